//! 行为缓存: 变迁标识到行为实例的唯一映射, 结构变更后按项重建.
use indexmap::IndexMap;
use log::debug;
use smallvec::SmallVec;

use crate::net::Net;
use crate::net::ids::TransitionId;
use crate::net::structure::TransitionKind;
use crate::sim::arc_eval::ArcSnapshot;
use crate::sim::behavior::{Behavior, BehaviorKind};
use crate::sim::error::SimError;

/// The only constructor of [`Behavior`] instances. Whether a transition
/// needs a fresh behavior object is decided here and nowhere else; the
/// controller merely forwards invalidation notices.
#[derive(Debug, Default)]
pub struct BehaviorCache {
    entries: IndexMap<TransitionId, Behavior>,
}

impl BehaviorCache {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub fn contains(&self, id: TransitionId) -> bool {
        self.entries.contains_key(&id)
    }

    /// A miss here means an invalidation was skipped somewhere — the caller
    /// treats it as fatal for the session.
    pub fn get(&self, id: TransitionId) -> Result<&Behavior, SimError> {
        self.entries
            .get(&id)
            .ok_or(SimError::InconsistentBehavior(id))
    }

    pub fn get_mut(&mut self, id: TransitionId) -> Result<&mut Behavior, SimError> {
        self.entries
            .get_mut(&id)
            .ok_or(SimError::InconsistentBehavior(id))
    }

    /// Build the behavior for `id` if it is not cached yet. Returns whether
    /// a build happened, so the scheduler can arm fresh entries.
    pub fn ensure(&mut self, net: &Net, id: TransitionId) -> Result<bool, SimError> {
        if self.entries.contains_key(&id) {
            return Ok(false);
        }
        self.rebuild(net, id)?;
        Ok(true)
    }

    pub fn invalidate(&mut self, id: TransitionId) {
        if self.entries.shift_remove(&id).is_some() {
            debug!("invalidated behavior of {id:?}");
        }
    }

    /// Drop the cached entry for a deleted transition; subsequent `get`
    /// calls for it fail rather than resurrect it.
    pub fn remove(&mut self, id: TransitionId) {
        self.entries.shift_remove(&id);
    }

    /// Re-scan the transition's incident arcs and replace its behavior.
    /// Timing/candidate state does not survive a rebuild: the enabling
    /// semantics may have changed under it.
    pub fn rebuild(&mut self, net: &Net, id: TransitionId) -> Result<(), SimError> {
        let behavior = build(net, id)?;
        self.entries.insert(id, behavior);
        Ok(())
    }

    pub fn rebuild_all(&mut self, net: &Net) -> Result<(), SimError> {
        self.entries.clear();
        for (id, _) in net.transitions() {
            self.rebuild(net, id)?;
        }
        Ok(())
    }

    /// Keep the structural snapshots but drop all timers and candidates.
    pub fn clear_dynamic_state(&mut self) {
        for behavior in self.entries.values_mut() {
            behavior.clear_dynamic_state();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build(net: &Net, id: TransitionId) -> Result<Behavior, SimError> {
    let transition = net
        .transition(id)
        .ok_or(SimError::InconsistentBehavior(id))?;
    let arcs: SmallVec<[ArcSnapshot; 4]> = net
        .arcs_of_transition(id)
        .map(|(arc_id, arc)| ArcSnapshot::capture(arc_id, arc))
        .collect();
    let (law, kind) = match &transition.kind {
        TransitionKind::Immediate => (None, BehaviorKind::Immediate),
        TransitionKind::Timed { delay } => (
            None,
            BehaviorKind::Timed {
                delay: *delay,
                timer: Default::default(),
            },
        ),
        TransitionKind::Stochastic { rate } => (
            Some(rate.clone()),
            BehaviorKind::Stochastic { candidate: None },
        ),
        TransitionKind::Continuous { flow } => (Some(flow.clone()), BehaviorKind::Continuous),
    };
    Ok(Behavior::new(
        id,
        transition.guard.clone(),
        law,
        arcs,
        kind,
    ))
}
