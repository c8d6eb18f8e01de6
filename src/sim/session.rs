//! 会话持久化: 恢复一次仿真所需的最小状态与可重放随机流.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::net::structure::Marking;

/// Seeded random source with a draw counter. `StdRng` exposes no seekable
/// stream position, so the stream position is persisted as the number of
/// uniform draws and restored by replaying them.
#[derive(Debug)]
pub struct RngState {
    seed: u64,
    draws: u64,
    rng: StdRng,
}

impl RngState {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            draws: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn restore(seed: u64, draws: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..draws {
            let _: f64 = rng.random();
        }
        Self { seed, draws, rng }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn reseed(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.draws = 0;
    }

    pub fn uniform(&mut self) -> f64 {
        self.draws += 1;
        self.rng.random()
    }

    /// Exponential waiting time with the given rate, by inverse transform.
    /// `1 - u` keeps the argument of `ln` strictly positive.
    pub fn exponential(&mut self, rate: f64) -> f64 {
        let u = self.uniform();
        -(1.0 - u).ln() / rate
    }
}

/// Everything needed to resume a session: the initial marking (for reset),
/// the marking and clock reached so far, and the random stream position.
/// Timers and candidates are not persisted; they re-arm deterministically
/// from this state on the first step after a restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub initial_marking: Marking,
    pub marking: Marking,
    pub time: f64,
    pub seed: u64,
    pub draws: u64,
}
