//! 结构变更通知协议: 网自身持有订阅者列表, 变更在编辑线程上同步投递.
use std::sync::mpsc::{self, Receiver, Sender};

use crate::net::ids::{ArcId, PlaceId, TransitionId};
use crate::net::structure::{ArcKind, Tokens};

/// Identity of a created/deleted entity. Arc references carry the owning
/// transition so subscribers can map the change back to cached per-transition
/// state without consulting the net.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRef {
    Place(PlaceId),
    Transition(TransitionId),
    Arc { arc: ArcId, transition: TransitionId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetChange {
    Created(EntityRef),
    Deleted(EntityRef),
    Transformed {
        arc: ArcId,
        transition: TransitionId,
        old_kind: ArcKind,
        new_kind: ArcKind,
    },
    /// Editing-time marking edit (outside a running simulation).
    TokensSet { place: PlaceId, tokens: Tokens },
}

/// Synchronous fan-out channel list. Each subscriber gets its own receiver;
/// disconnected subscribers are pruned on the next publish.
#[derive(Debug)]
pub struct Subscribers<T> {
    senders: Vec<Sender<T>>,
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            senders: Vec::new(),
        }
    }
}

impl<T: Clone> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            senders: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.senders.push(tx);
        rx
    }

    pub fn publish(&mut self, event: T) {
        self.senders
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}
