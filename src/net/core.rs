//! 网容器: 实体竞技场、结构编辑操作、二部不变式校验与变更发布.
use std::fmt::Write as FmtWrite;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::net::arena::{Arena, Idx, IndexVec};
use crate::net::change::{EntityRef, NetChange, Subscribers};
use crate::net::ids::{ArcId, PlaceId, TransitionId};
use crate::net::structure::{
    Arc, ArcDirection, ArcKind, Marking, Place, RateLaw, Tokens, Transition, TransitionKind,
};

/// Bipartite violations and other arc shapes that are rejected before the
/// arc can enter the net. The evaluator never observes one.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedArcError {
    #[error("arc joins two places ({0:?}, {1:?})")]
    PlaceToPlace(PlaceId, PlaceId),
    #[error("arc joins two transitions ({0:?}, {1:?})")]
    TransitionToTransition(TransitionId, TransitionId),
    #[error("{kind:?} arcs must run from a place into a transition")]
    GatingOutput { kind: ArcKind },
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    MalformedArc(#[from] MalformedArcError),
    #[error("unknown place {0:?}")]
    UnknownPlace(PlaceId),
    #[error("unknown transition {0:?}")]
    UnknownTransition(TransitionId),
    #[error("unknown arc {0:?}")]
    UnknownArc(ArcId),
    #[error("place {place:?} still has {arcs} incident arc(s)")]
    PlaceHasArcs { place: PlaceId, arcs: usize },
    #[error("arc weight must be positive and finite, got {weight}")]
    InvalidWeight { weight: Tokens },
    #[error("inhibitor threshold must be positive and finite, got {threshold}")]
    InvalidThreshold { threshold: Tokens },
    #[error("transition '{name}' is invalid: {reason}")]
    InvalidTransition { name: String, reason: String },
    #[error("place '{name}' is invalid: {reason}")]
    InvalidPlace { name: String, reason: String },
}

/// Endpoint reference for arc construction; the editing layer passes
/// arbitrary endpoint pairs and the net rejects non-bipartite ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Place(PlaceId),
    Transition(TransitionId),
}

type ArcList = SmallVec<[ArcId; 4]>;

/// A hybrid stochastic Petri net: places, transitions and arcs in arena
/// storage with stable ids, plus incident-arc adjacency kept in sync by
/// every mutation. The net owns its subscriber list; each structural edit is
/// published before the mutating call returns.
#[derive(Debug, Serialize, Deserialize)]
pub struct Net {
    places: Arena<PlaceId, Place>,
    transitions: Arena<TransitionId, Transition>,
    arcs: Arena<ArcId, Arc>,
    place_arcs: IndexVec<PlaceId, ArcList>,
    transition_arcs: IndexVec<TransitionId, ArcList>,
    #[serde(skip)]
    subscribers: Subscribers<NetChange>,
}

impl Net {
    pub fn empty() -> Self {
        Self {
            places: Arena::new(),
            transitions: Arena::new(),
            arcs: Arena::new(),
            place_arcs: IndexVec::new(),
            transition_arcs: IndexVec::new(),
            subscribers: Subscribers::new(),
        }
    }

    pub fn subscribe(&mut self) -> std::sync::mpsc::Receiver<NetChange> {
        self.subscribers.subscribe()
    }

    pub fn add_place(&mut self, place: Place) -> Result<PlaceId, NetError> {
        if !place.tokens.is_finite() || place.tokens < 0.0 {
            return Err(NetError::InvalidPlace {
                name: place.name,
                reason: format!("initial tokens {} out of range", place.tokens),
            });
        }
        if let Some(capacity) = place.capacity {
            if !capacity.is_finite() || capacity < 0.0 || place.tokens > capacity {
                return Err(NetError::InvalidPlace {
                    name: place.name,
                    reason: format!("capacity {capacity} inconsistent with initial tokens"),
                });
            }
        }
        let id = self.places.insert(place);
        self.place_arcs.push(ArcList::new());
        self.subscribers
            .publish(NetChange::Created(EntityRef::Place(id)));
        Ok(id)
    }

    /// Removing a place requires its incident arcs to be removed first.
    pub fn remove_place(&mut self, id: PlaceId) -> Result<Place, NetError> {
        if !self.places.contains(id) {
            return Err(NetError::UnknownPlace(id));
        }
        let incident = self.place_arcs[id].len();
        if incident > 0 {
            return Err(NetError::PlaceHasArcs {
                place: id,
                arcs: incident,
            });
        }
        let place = self.places.remove(id).expect("checked above");
        self.subscribers
            .publish(NetChange::Deleted(EntityRef::Place(id)));
        Ok(place)
    }

    pub fn add_transition(&mut self, transition: Transition) -> Result<TransitionId, NetError> {
        validate_transition(&transition)?;
        let id = self.transitions.insert(transition);
        self.transition_arcs.push(ArcList::new());
        self.subscribers
            .publish(NetChange::Created(EntityRef::Transition(id)));
        Ok(id)
    }

    /// Removes a transition along with its incident arcs. Every arc removal
    /// is published before the transition deletion itself.
    pub fn remove_transition(&mut self, id: TransitionId) -> Result<Transition, NetError> {
        if !self.transitions.contains(id) {
            return Err(NetError::UnknownTransition(id));
        }
        let incident: Vec<ArcId> = self.transition_arcs[id].iter().copied().collect();
        for arc in incident {
            self.remove_arc(arc)?;
        }
        let transition = self.transitions.remove(id).expect("checked above");
        self.subscribers
            .publish(NetChange::Deleted(EntityRef::Transition(id)));
        Ok(transition)
    }

    /// Replace a transition in place, keeping its id and incident arcs —
    /// how a kind or guard edit reaches a live session. Published as a
    /// delete/create pair on the same id, so subscribers evict and then
    /// lazily rebuild the cached behavior.
    pub fn set_transition(
        &mut self,
        id: TransitionId,
        transition: Transition,
    ) -> Result<(), NetError> {
        if !self.transitions.contains(id) {
            return Err(NetError::UnknownTransition(id));
        }
        validate_transition(&transition)?;
        *self.transitions.get_mut(id).expect("checked above") = transition;
        self.subscribers
            .publish(NetChange::Deleted(EntityRef::Transition(id)));
        self.subscribers
            .publish(NetChange::Created(EntityRef::Transition(id)));
        Ok(())
    }

    pub fn add_arc(
        &mut self,
        source: NodeRef,
        target: NodeRef,
        kind: ArcKind,
        weight: Tokens,
    ) -> Result<ArcId, NetError> {
        self.add_arc_inner(source, target, kind, weight, None)
    }

    /// Inhibitor arc with an explicit disable threshold; the plain
    /// [`Net::add_arc`] defaults the threshold to the weight.
    pub fn add_arc_with_threshold(
        &mut self,
        source: NodeRef,
        target: NodeRef,
        kind: ArcKind,
        weight: Tokens,
        threshold: Tokens,
    ) -> Result<ArcId, NetError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(NetError::InvalidThreshold { threshold });
        }
        self.add_arc_inner(source, target, kind, weight, Some(threshold))
    }

    fn add_arc_inner(
        &mut self,
        source: NodeRef,
        target: NodeRef,
        kind: ArcKind,
        weight: Tokens,
        threshold: Option<Tokens>,
    ) -> Result<ArcId, NetError> {
        if !weight.is_finite() || weight <= 0.0 {
            return Err(NetError::InvalidWeight { weight });
        }
        let (place, transition, direction) = match (source, target) {
            (NodeRef::Place(p), NodeRef::Transition(t)) => (p, t, ArcDirection::PlaceToTransition),
            (NodeRef::Transition(t), NodeRef::Place(p)) => (p, t, ArcDirection::TransitionToPlace),
            (NodeRef::Place(a), NodeRef::Place(b)) => {
                return Err(MalformedArcError::PlaceToPlace(a, b).into());
            }
            (NodeRef::Transition(a), NodeRef::Transition(b)) => {
                return Err(MalformedArcError::TransitionToTransition(a, b).into());
            }
        };
        if direction == ArcDirection::TransitionToPlace && kind != ArcKind::Normal {
            return Err(MalformedArcError::GatingOutput { kind }.into());
        }
        if !self.places.contains(place) {
            return Err(NetError::UnknownPlace(place));
        }
        if !self.transitions.contains(transition) {
            return Err(NetError::UnknownTransition(transition));
        }

        let arc = Arc {
            place,
            transition,
            direction,
            kind,
            weight,
            threshold: threshold.unwrap_or(weight),
        };
        let id = self.arcs.insert(arc);
        self.place_arcs[place].push(id);
        self.transition_arcs[transition].push(id);
        self.subscribers.publish(NetChange::Created(EntityRef::Arc {
            arc: id,
            transition,
        }));
        Ok(id)
    }

    pub fn remove_arc(&mut self, id: ArcId) -> Result<Arc, NetError> {
        let arc = self.arcs.remove(id).ok_or(NetError::UnknownArc(id))?;
        self.place_arcs[arc.place].retain(|a| *a != id);
        self.transition_arcs[arc.transition].retain(|a| *a != id);
        self.subscribers.publish(NetChange::Deleted(EntityRef::Arc {
            arc: id,
            transition: arc.transition,
        }));
        Ok(arc)
    }

    /// Retype an arc in place (e.g. Normal → Inhibitor). The owning
    /// transition's cached behavior must be rebuilt by subscribers.
    pub fn transform_arc(&mut self, id: ArcId, new_kind: ArcKind) -> Result<(), NetError> {
        let arc = self.arcs.get(id).ok_or(NetError::UnknownArc(id))?;
        if arc.direction == ArcDirection::TransitionToPlace && new_kind != ArcKind::Normal {
            return Err(MalformedArcError::GatingOutput { kind: new_kind }.into());
        }
        let old_kind = arc.kind;
        let transition = arc.transition;
        if old_kind == new_kind {
            return Ok(());
        }
        self.arcs
            .get_mut(id)
            .expect("checked above")
            .kind = new_kind;
        self.subscribers.publish(NetChange::Transformed {
            arc: id,
            transition,
            old_kind,
            new_kind,
        });
        Ok(())
    }

    /// Editing-time marking edit. Published so a paused controller adopts
    /// the new value before its next step.
    pub fn set_tokens(&mut self, id: PlaceId, tokens: Tokens) -> Result<(), NetError> {
        let place = self.places.get_mut(id).ok_or(NetError::UnknownPlace(id))?;
        if !tokens.is_finite() || tokens < 0.0 || tokens > place.bound() {
            return Err(NetError::InvalidPlace {
                name: place.name.clone(),
                reason: format!("tokens {tokens} out of range"),
            });
        }
        place.tokens = tokens;
        self.subscribers
            .publish(NetChange::TokensSet { place: id, tokens });
        Ok(())
    }

    pub fn place(&self, id: PlaceId) -> Option<&Place> {
        self.places.get(id)
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.transitions.get(id)
    }

    pub fn arc(&self, id: ArcId) -> Option<&Arc> {
        self.arcs.get(id)
    }

    pub fn places(&self) -> impl Iterator<Item = (PlaceId, &Place)> {
        self.places.iter()
    }

    pub fn transitions(&self) -> impl Iterator<Item = (TransitionId, &Transition)> {
        self.transitions.iter()
    }

    pub fn arcs(&self) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.arcs.iter()
    }

    pub fn arcs_of_transition(&self, id: TransitionId) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.transition_arcs
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|arc| self.arcs.get(*arc).map(|a| (*arc, a)))
    }

    pub fn arcs_of_place(&self, id: PlaceId) -> impl Iterator<Item = (ArcId, &Arc)> {
        self.place_arcs
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|arc| self.arcs.get(*arc).map(|a| (*arc, a)))
    }

    /// Transitions whose enabling can be affected by a marking change at the
    /// given place.
    pub fn transitions_touching(&self, place: PlaceId) -> impl Iterator<Item = TransitionId> + '_ {
        self.arcs_of_place(place).map(|(_, arc)| arc.transition)
    }

    pub fn places_len(&self) -> usize {
        self.places.len()
    }

    pub fn transitions_len(&self) -> usize {
        self.transitions.len()
    }

    /// Dense slot count for marking vectors (vacant slots included).
    pub fn marking_width(&self) -> usize {
        self.places.capacity()
    }

    /// Marking built from the places' editing-time token values.
    pub fn initial_marking(&self) -> Marking {
        let mut marking = Marking::zeros(self.marking_width());
        for (id, place) in self.places.iter() {
            marking.set(id, place.tokens);
        }
        marking
    }

    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let _ = writeln!(&mut dot, "digraph HybridNet {{");
        let _ = writeln!(&mut dot, "    rankdir=LR;");
        let _ = writeln!(&mut dot, "    node [fontname=\"Helvetica\"];");

        for (place_id, place) in self.places.iter() {
            let node_id = format!("place_{}", place_id.index());
            let capacity = place
                .capacity
                .map(|c| format!("/{c}"))
                .unwrap_or_default();
            let label = format!(
                "{}\\n{}{}",
                escape_label(&place.name),
                place.tokens,
                capacity
            );
            let _ = writeln!(
                &mut dot,
                "    {} [label=\"{}\", shape=circle, style=filled, fillcolor=\"#e3f2fd\"];",
                node_id, label
            );
        }

        for (transition_id, transition) in self.transitions.iter() {
            let node_id = format!("trans_{}", transition_id.index());
            let label = format!(
                "{}\\n{}",
                escape_label(&transition.name),
                transition.kind.label()
            );
            let _ = writeln!(
                &mut dot,
                "    {} [label=\"{}\", shape=box, style=filled, fillcolor=\"#ffe0b2\"];",
                node_id, label
            );
        }

        for (_, arc) in self.arcs.iter() {
            let place_node = format!("place_{}", arc.place.index());
            let trans_node = format!("trans_{}", arc.transition.index());
            let (from, to) = match arc.direction {
                ArcDirection::PlaceToTransition => (place_node, trans_node),
                ArcDirection::TransitionToPlace => (trans_node, place_node),
            };
            let mut attrs: Vec<String> = Vec::new();
            if arc.weight != 1.0 {
                attrs.push(format!("label=\"{}\"", arc.weight));
            }
            match arc.kind {
                ArcKind::Normal => {}
                ArcKind::Test => attrs.push("style=dashed".into()),
                ArcKind::Inhibitor => {
                    attrs.push("arrowhead=odot".into());
                    attrs.push(format!("label=\"<{}\"", arc.threshold));
                }
            }
            if attrs.is_empty() {
                let _ = writeln!(&mut dot, "    {} -> {};", from, to);
            } else {
                let _ = writeln!(&mut dot, "    {} -> {} [{}];", from, to, attrs.join(", "));
            }
        }

        let _ = writeln!(&mut dot, "}}");
        dot
    }

    pub fn write_dot<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_dot())
    }
}

impl Default for Net {
    fn default() -> Self {
        Self::empty()
    }
}

fn validate_transition(transition: &Transition) -> Result<(), NetError> {
    let invalid = |reason: String| NetError::InvalidTransition {
        name: transition.name.clone(),
        reason,
    };
    match &transition.kind {
        TransitionKind::Immediate => Ok(()),
        TransitionKind::Timed { delay } => {
            if !delay.is_finite() || *delay < 0.0 {
                Err(invalid(format!("delay {delay} out of range")))
            } else {
                Ok(())
            }
        }
        TransitionKind::Stochastic { rate } | TransitionKind::Continuous { flow: rate } => {
            match rate {
                RateLaw::Constant(k) | RateLaw::MassAction(k) => {
                    if !k.is_finite() || *k < 0.0 {
                        Err(invalid(format!("rate constant {k} out of range")))
                    } else {
                        Ok(())
                    }
                }
                // 自定义律在求值时校验
                RateLaw::Custom(_) => Ok(()),
            }
        }
    }
}

fn escape_label(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bipartite_violations_are_rejected_at_construction() {
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("p0", 1.0)).unwrap();
        let p1 = net.add_place(Place::new("p1", 0.0)).unwrap();
        let t0 = net.add_transition(Transition::immediate("t0")).unwrap();

        let err = net
            .add_arc(NodeRef::Place(p0), NodeRef::Place(p1), ArcKind::Normal, 1.0)
            .unwrap_err();
        assert!(matches!(
            err,
            NetError::MalformedArc(MalformedArcError::PlaceToPlace(..))
        ));

        let err = net
            .add_arc(
                NodeRef::Transition(t0),
                NodeRef::Place(p1),
                ArcKind::Inhibitor,
                1.0,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            NetError::MalformedArc(MalformedArcError::GatingOutput { .. })
        ));
    }

    #[test]
    fn place_removal_requires_detached_arcs() {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("p", 1.0)).unwrap();
        let t = net.add_transition(Transition::immediate("t")).unwrap();
        let arc = net
            .add_arc(NodeRef::Place(p), NodeRef::Transition(t), ArcKind::Normal, 1.0)
            .unwrap();

        assert!(matches!(
            net.remove_place(p),
            Err(NetError::PlaceHasArcs { .. })
        ));
        net.remove_arc(arc).unwrap();
        net.remove_place(p).unwrap();
        assert_eq!(net.places_len(), 0);
    }

    #[test]
    fn transition_removal_cascades_to_arcs_and_notifies() {
        let mut net = Net::empty();
        let rx = net.subscribe();
        let p = net.add_place(Place::new("p", 1.0)).unwrap();
        let t = net.add_transition(Transition::immediate("t")).unwrap();
        let arc = net
            .add_arc(NodeRef::Place(p), NodeRef::Transition(t), ArcKind::Normal, 1.0)
            .unwrap();

        net.remove_transition(t).unwrap();
        assert_eq!(net.arcs().count(), 0);
        assert_eq!(net.arcs_of_place(p).count(), 0);

        let changes: Vec<NetChange> = rx.try_iter().collect();
        assert!(changes.contains(&NetChange::Deleted(EntityRef::Arc { arc, transition: t })));
        assert!(changes.contains(&NetChange::Deleted(EntityRef::Transition(t))));
    }

    #[test]
    fn transform_arc_publishes_old_and_new_kind() {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("p", 1.0)).unwrap();
        let t = net.add_transition(Transition::immediate("t")).unwrap();
        let arc = net
            .add_arc(NodeRef::Place(p), NodeRef::Transition(t), ArcKind::Normal, 2.0)
            .unwrap();
        let rx = net.subscribe();

        net.transform_arc(arc, ArcKind::Inhibitor).unwrap();
        assert_eq!(net.arc(arc).unwrap().kind, ArcKind::Inhibitor);
        assert_eq!(
            rx.try_recv().unwrap(),
            NetChange::Transformed {
                arc,
                transition: t,
                old_kind: ArcKind::Normal,
                new_kind: ArcKind::Inhibitor,
            }
        );
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let mut net = Net::empty();
        assert!(matches!(
            net.add_transition(Transition::timed("t", -1.0)),
            Err(NetError::InvalidTransition { .. })
        ));
        assert!(matches!(
            net.add_transition(Transition::stochastic("t", RateLaw::Constant(-2.0))),
            Err(NetError::InvalidTransition { .. })
        ));
        assert!(matches!(
            net.add_place(Place::with_capacity("p", 3.0, 2.0)),
            Err(NetError::InvalidPlace { .. })
        ));
    }

    #[test]
    fn initial_marking_covers_vacant_slots() {
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("p0", 2.0)).unwrap();
        let p1 = net.add_place(Place::new("p1", 5.0)).unwrap();
        net.remove_place(p0).unwrap();

        let marking = net.initial_marking();
        assert_eq!(marking.len(), 2);
        assert_eq!(marking.tokens(p0), 0.0);
        assert_eq!(marking.tokens(p1), 5.0);
    }
}
