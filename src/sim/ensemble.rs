//! Parallel trajectory ensembles over an immutable net.
//!
//! Each trajectory gets its own detached controller seeded with
//! `base_seed + index`, so an ensemble is reproducible as a whole while its
//! members stay independent.
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::net::Net;
use crate::net::ids::TransitionId;
use crate::net::structure::Marking;
use crate::sim::controller::SimulationController;
use crate::sim::error::SimError;
use crate::sim::scheduler::SimState;

/// One recorded trajectory: the committed `(time, marking)` sequence plus
/// the first discrete firing, which is what race statistics look at.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub seed: u64,
    pub samples: Vec<(f64, Marking)>,
    pub first_fired: Option<TransitionId>,
}

pub fn run_trajectory(net: &Net, config: &SimConfig, seed: u64) -> Result<Trajectory, SimError> {
    let mut controller = SimulationController::detached(net, config.clone(), seed);
    let mut samples = Vec::new();
    let mut first_fired = None;
    loop {
        let report = controller.step(net)?;
        samples.push((report.time, controller.current_marking()));
        if first_fired.is_none() {
            first_fired = report.fired;
        }
        if report.state == SimState::Completed {
            break;
        }
    }
    Ok(Trajectory {
        seed,
        samples,
        first_fired,
    })
}

pub fn run_ensemble(
    net: &Net,
    config: &SimConfig,
    count: usize,
    base_seed: u64,
) -> Result<Vec<Trajectory>, SimError> {
    (0..count)
        .into_par_iter()
        .map(|index| run_trajectory(net, config, base_seed.wrapping_add(index as u64)))
        .collect()
}
