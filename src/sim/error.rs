//! 运行期错误分类: 速率求值、容量越界与缓存一致性.
use thiserror::Error;

use crate::net::ids::{PlaceId, TransitionId};
use crate::net::structure::Tokens;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// A rate/flow law produced a negative or non-finite value.
    #[error("rate law of transition {transition:?} produced {value}")]
    RateEvaluation {
        transition: TransitionId,
        value: f64,
    },
    /// Committing the step would drive a place outside `[0, capacity]`. The
    /// step is rejected with the marking untouched; pending timers survive,
    /// so the firing stays pending until the cause is fixed.
    #[error("step would drive place {place:?} to {after}, outside [0, {capacity}]")]
    CapacityViolation {
        place: PlaceId,
        after: Tokens,
        capacity: Tokens,
    },
    /// The behavior cache was queried for a transition that no longer
    /// exists. Always a missed invalidation, never a user error; the
    /// controller reacts by forcing Idle and rebuilding the whole cache.
    #[error("behavior cache queried for missing transition {0:?}")]
    InconsistentBehavior(TransitionId),
}
