//! 弧求值: 纯函数判定弧条件满足与是否消耗.
use serde::{Deserialize, Serialize};

use crate::net::ids::{ArcId, PlaceId};
use crate::net::structure::{Arc, ArcDirection, ArcKind, Marking, Tokens};

/// Immutable copy of one incident arc, captured when a behavior is built.
/// Rebuilding the behavior is the only way an arc edit becomes visible here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArcSnapshot {
    pub arc: ArcId,
    pub place: PlaceId,
    pub direction: ArcDirection,
    pub kind: ArcKind,
    pub weight: Tokens,
    pub threshold: Tokens,
}

impl ArcSnapshot {
    pub fn capture(id: ArcId, arc: &Arc) -> Self {
        Self {
            arc: id,
            place: arc.place,
            direction: arc.direction,
            kind: arc.kind,
            weight: arc.weight,
            threshold: arc.threshold,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == ArcDirection::PlaceToTransition
    }
}

/// Whether the arc's condition holds under the marking. Output arcs never
/// gate enabling (capacity is checked at commit time); for input arcs,
/// Normal/Test require `m(p) ≥ w` and Inhibitor requires `m(p) < θ`.
pub fn is_satisfied(arc: &ArcSnapshot, marking: &Marking) -> bool {
    if !arc.is_input() {
        return true;
    }
    let tokens = marking.tokens(arc.place);
    match arc.kind {
        ArcKind::Normal | ArcKind::Test => tokens >= arc.weight,
        ArcKind::Inhibitor => tokens < arc.threshold,
    }
}

/// Whether firing over this arc moves tokens. Only Normal arcs do; Test and
/// Inhibitor arcs leave the marking untouched.
pub fn consumes(arc: &ArcSnapshot) -> bool {
    arc.kind == ArcKind::Normal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(kind: ArcKind, weight: Tokens, threshold: Tokens) -> ArcSnapshot {
        ArcSnapshot {
            arc: ArcId::new(0),
            place: PlaceId::new(0),
            direction: ArcDirection::PlaceToTransition,
            kind,
            weight,
            threshold,
        }
    }

    fn marking_with(tokens: Tokens) -> Marking {
        let mut marking = Marking::zeros(1);
        marking.set(PlaceId::new(0), tokens);
        marking
    }

    #[test]
    fn normal_and_test_require_weight() {
        for kind in [ArcKind::Normal, ArcKind::Test] {
            let arc = snapshot(kind, 2.0, 2.0);
            assert!(!is_satisfied(&arc, &marking_with(1.9)));
            assert!(is_satisfied(&arc, &marking_with(2.0)));
            assert!(is_satisfied(&arc, &marking_with(5.0)));
        }
    }

    #[test]
    fn inhibitor_disables_at_threshold() {
        let arc = snapshot(ArcKind::Inhibitor, 1.0, 3.0);
        assert!(is_satisfied(&arc, &marking_with(2.9)));
        assert!(!is_satisfied(&arc, &marking_with(3.0)));
        assert!(!is_satisfied(&arc, &marking_with(7.0)));
    }

    #[test]
    fn only_normal_arcs_consume() {
        assert!(consumes(&snapshot(ArcKind::Normal, 1.0, 1.0)));
        assert!(!consumes(&snapshot(ArcKind::Test, 1.0, 1.0)));
        assert!(!consumes(&snapshot(ArcKind::Inhibitor, 1.0, 1.0)));
    }

    #[test]
    fn output_arcs_never_gate() {
        let arc = ArcSnapshot {
            arc: ArcId::new(0),
            place: PlaceId::new(0),
            direction: ArcDirection::TransitionToPlace,
            kind: ArcKind::Normal,
            weight: 10.0,
            threshold: 10.0,
        };
        assert!(is_satisfied(&arc, &marking_with(0.0)));
    }
}
