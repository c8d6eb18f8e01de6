//! 混合 Petri 网静态结构元素：库所、变迁、弧与标识.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::arena::IndexVec;
use crate::net::ids::{PlaceId, TransitionId};

pub type Tokens = f64;

/// A place holds a non-negative token quantity. `tokens` is the value the
/// place starts a session with; the live marking is owned by the simulation
/// controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub tokens: Tokens,
    pub capacity: Option<Tokens>,
}

impl Place {
    pub fn new(name: impl Into<String>, tokens: Tokens) -> Self {
        Self {
            name: name.into(),
            tokens,
            capacity: None,
        }
    }

    pub fn with_capacity(name: impl Into<String>, tokens: Tokens, capacity: Tokens) -> Self {
        Self {
            name: name.into(),
            tokens,
            capacity: Some(capacity),
        }
    }

    /// Upper bound used for marking checks; unbounded places report infinity.
    pub fn bound(&self) -> Tokens {
        self.capacity.unwrap_or(f64::INFINITY)
    }
}

type RateFn = dyn Fn(&Marking) -> f64 + Send + Sync;
type GuardFn = dyn Fn(&Marking) -> bool + Send + Sync;

/// A programmatic rate/flow law. Not serializable; nets carrying one can be
/// simulated but not saved.
#[derive(Clone)]
pub struct CustomRate(pub std::sync::Arc<RateFn>);

impl CustomRate {
    pub fn new(f: impl Fn(&Marking) -> f64 + Send + Sync + 'static) -> Self {
        Self(std::sync::Arc::new(f))
    }

    pub fn evaluate(&self, marking: &Marking) -> f64 {
        (self.0)(marking)
    }
}

impl fmt::Debug for CustomRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomRate(..)")
    }
}

#[derive(Clone)]
pub struct CustomGuard(pub std::sync::Arc<GuardFn>);

impl CustomGuard {
    pub fn new(f: impl Fn(&Marking) -> bool + Send + Sync + 'static) -> Self {
        Self(std::sync::Arc::new(f))
    }

    pub fn evaluate(&self, marking: &Marking) -> bool {
        (self.0)(marking)
    }
}

impl fmt::Debug for CustomGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomGuard(..)")
    }
}

/// Rate law of a stochastic transition, or flow law of a continuous one.
///
/// `MassAction(k)` evaluates to `k · Π m(p)^w` over the transition's
/// Normal/Test input arcs — standard biochemical kinetics. `Custom` laws see
/// the whole marking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RateLaw {
    Constant(f64),
    MassAction(f64),
    #[serde(skip)]
    Custom(CustomRate),
}

/// Additional enabling predicate on top of the arc conditions. Defaults to
/// always-true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Guard {
    #[default]
    Always,
    #[serde(skip)]
    Custom(CustomGuard),
}

impl Guard {
    pub fn holds(&self, marking: &Marking) -> bool {
        match self {
            Guard::Always => true,
            Guard::Custom(guard) => guard.evaluate(marking),
        }
    }
}

/// 变迁语义类别: 四种之一, 调度器按类别穷举匹配.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransitionKind {
    Immediate,
    Timed { delay: f64 },
    Stochastic { rate: RateLaw },
    Continuous { flow: RateLaw },
}

impl TransitionKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransitionKind::Immediate => "immediate",
            TransitionKind::Timed { .. } => "timed",
            TransitionKind::Stochastic { .. } => "stochastic",
            TransitionKind::Continuous { .. } => "continuous",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub name: String,
    pub kind: TransitionKind,
    #[serde(default)]
    pub guard: Guard,
}

impl Transition {
    pub fn new(name: impl Into<String>, kind: TransitionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            guard: Guard::Always,
        }
    }

    pub fn immediate(name: impl Into<String>) -> Self {
        Self::new(name, TransitionKind::Immediate)
    }

    pub fn timed(name: impl Into<String>, delay: f64) -> Self {
        Self::new(name, TransitionKind::Timed { delay })
    }

    pub fn stochastic(name: impl Into<String>, rate: RateLaw) -> Self {
        Self::new(name, TransitionKind::Stochastic { rate })
    }

    pub fn continuous(name: impl Into<String>, flow: RateLaw) -> Self {
        Self::new(name, TransitionKind::Continuous { flow })
    }

    pub fn with_guard(mut self, guard: CustomGuard) -> Self {
        self.guard = Guard::Custom(guard);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArcKind {
    Normal,
    Test,
    Inhibitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArcDirection {
    PlaceToTransition,
    TransitionToPlace,
}

/// An arc joins one place and one transition (bipartite by construction,
/// enforced in [`crate::net::Net::add_arc`]).
///
/// `weight` is the consumption/production quantity for Normal arcs and the
/// presence threshold for Test arcs. For Inhibitor arcs the transition is
/// disabled while the place holds at least `threshold` tokens; `threshold`
/// defaults to `weight` and is only meaningful on inhibitors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    pub place: PlaceId,
    pub transition: TransitionId,
    pub direction: ArcDirection,
    pub kind: ArcKind,
    pub weight: Tokens,
    pub threshold: Tokens,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Marking(pub IndexVec<PlaceId, Tokens>);

impl Marking {
    pub fn new(initial: IndexVec<PlaceId, Tokens>) -> Self {
        Self(initial)
    }

    pub fn zeros(len: usize) -> Self {
        Self(IndexVec::from_elem(0.0, len))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PlaceId, &Tokens)> {
        self.0.iter_enumerated()
    }

    pub fn tokens(&self, place: PlaceId) -> Tokens {
        self.0.get(place).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, place: PlaceId, value: Tokens) {
        if let Some(slot) = self.0.get_mut(place) {
            *slot = value;
        }
    }

    /// Grow to cover `len` slots; new slots start at zero. Never shrinks, so
    /// ids handed out earlier stay addressable.
    pub fn grow(&mut self, len: usize) {
        if len > self.0.len() {
            self.0.resize(len, 0.0);
        }
    }
}

impl fmt::Debug for Marking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (place, tokens) in self.iter() {
            map.entry(&place, tokens);
        }
        map.finish()
    }
}
