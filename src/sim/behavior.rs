//! 变迁行为: 四种语义各自的使能判定、发射增量与计时/候选状态.
use smallvec::SmallVec;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::structure::{ArcDirection, ArcKind, Guard, Marking, RateLaw, Tokens};
use crate::sim::arc_eval::{self, ArcSnapshot};
use crate::sim::error::SimError;

/// Deterministic-delay clock of a timed transition. Re-enabling always
/// restarts the delay; elapsed waiting time is not remembered across a
/// disable (no age memory).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TimerState {
    #[default]
    Disabled,
    Waiting { deadline: f64 },
}

/// Candidate firing time of a stochastic transition, together with the rate
/// it was drawn under. A marking change that alters the rate invalidates the
/// candidate and forces a redraw (the exponential law is memoryless).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub time: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum BehaviorKind {
    #[default]
    Immediate,
    Timed {
        delay: f64,
        timer: TimerState,
    },
    Stochastic {
        candidate: Option<Candidate>,
    },
    Continuous,
}

type Deltas = SmallVec<[(PlaceId, Tokens); 4]>;

/// Cached execution state of one transition: snapshots of its incident arcs,
/// its guard and rate law, and the kind-specific dynamic state. Built only
/// by the behavior cache; reconstructible from the net at any time.
#[derive(Clone)]
pub struct Behavior {
    transition: TransitionId,
    guard: Guard,
    law: Option<RateLaw>,
    arcs: SmallVec<[ArcSnapshot; 4]>,
    pub kind: BehaviorKind,
}

impl Behavior {
    pub fn new(
        transition: TransitionId,
        guard: Guard,
        law: Option<RateLaw>,
        arcs: SmallVec<[ArcSnapshot; 4]>,
        kind: BehaviorKind,
    ) -> Self {
        Self {
            transition,
            guard,
            law,
            arcs,
            kind,
        }
    }

    pub fn transition(&self) -> TransitionId {
        self.transition
    }

    pub fn arcs(&self) -> &[ArcSnapshot] {
        &self.arcs
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self.kind, BehaviorKind::Immediate)
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self.kind, BehaviorKind::Continuous)
    }

    /// Enabled iff every incident arc condition holds and the guard passes.
    pub fn is_enabled(&self, marking: &Marking) -> bool {
        self.arcs.iter().all(|arc| arc_eval::is_satisfied(arc, marking))
            && self.guard.holds(marking)
    }

    /// Marking deltas of one discrete firing: `-w` on each consuming input,
    /// `+w` on each Normal output. Test/Inhibitor arcs contribute nothing.
    pub fn fire_deltas(&self) -> Deltas {
        let mut deltas = Deltas::new();
        for arc in &self.arcs {
            if !arc_eval::consumes(arc) {
                continue;
            }
            match arc.direction {
                ArcDirection::PlaceToTransition => deltas.push((arc.place, -arc.weight)),
                ArcDirection::TransitionToPlace => deltas.push((arc.place, arc.weight)),
            }
        }
        deltas
    }

    /// Evaluate the rate (stochastic) or flow (continuous) law under the
    /// marking. Negative or non-finite values surface as errors; a law is
    /// never silently clamped.
    pub fn rate(&self, marking: &Marking) -> Result<f64, SimError> {
        let law = self
            .law
            .as_ref()
            .expect("rate() is only called on stochastic/continuous behaviors");
        let value = match law {
            RateLaw::Constant(k) => *k,
            RateLaw::MassAction(k) => {
                let mut value = *k;
                for arc in self
                    .arcs
                    .iter()
                    .filter(|arc| arc.is_input() && arc.kind != ArcKind::Inhibitor)
                {
                    let m = marking.tokens(arc.place);
                    value *= if arc.weight == 1.0 {
                        m
                    } else {
                        m.powf(arc.weight)
                    };
                }
                value
            }
            RateLaw::Custom(custom) => custom.evaluate(marking),
        };
        if !value.is_finite() || value < 0.0 {
            return Err(SimError::RateEvaluation {
                transition: self.transition,
                value,
            });
        }
        Ok(value)
    }

    /// Per-place flow coefficients of a continuous transition: the marking
    /// derivative contribution is `coefficient · v(marking)` for each term.
    /// Only Normal arcs carry flow; Test/Inhibitor arcs gate enabling only.
    pub fn flow_terms(&self) -> impl Iterator<Item = (PlaceId, Tokens)> + '_ {
        self.arcs
            .iter()
            .filter(|arc| arc_eval::consumes(arc))
            .map(|arc| match arc.direction {
                ArcDirection::PlaceToTransition => (arc.place, -arc.weight),
                ArcDirection::TransitionToPlace => (arc.place, arc.weight),
            })
    }

    pub fn timer(&self) -> Option<TimerState> {
        match self.kind {
            BehaviorKind::Timed { timer, .. } => Some(timer),
            _ => None,
        }
    }

    pub fn candidate(&self) -> Option<Candidate> {
        match self.kind {
            BehaviorKind::Stochastic { candidate } => candidate,
            _ => None,
        }
    }

    /// Drop timing/candidate state, e.g. on reset or after a firing. The
    /// scheduler re-arms on the next pass.
    pub fn clear_dynamic_state(&mut self) {
        match &mut self.kind {
            BehaviorKind::Timed { timer, .. } => *timer = TimerState::Disabled,
            BehaviorKind::Stochastic { candidate } => *candidate = None,
            BehaviorKind::Immediate | BehaviorKind::Continuous => {}
        }
    }
}

impl std::fmt::Debug for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Behavior")
            .field("transition", &self.transition)
            .field("arcs", &self.arcs.len())
            .field("kind", &self.kind)
            .finish()
    }
}
