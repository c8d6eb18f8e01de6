//! 仿真控制器: 规范标识的唯一写入者, 订阅结构变更并驱动调度器.
use std::sync::mpsc::Receiver;

use log::{debug, info, warn};

use crate::config::SimConfig;
use crate::net::Net;
use crate::net::change::{EntityRef, NetChange, Subscribers};
use crate::net::ids::TransitionId;
use crate::net::structure::Marking;
use crate::sim::cache::BehaviorCache;
use crate::sim::error::SimError;
use crate::sim::scheduler::{Scheduler, SimState, StepPlan};
use crate::sim::session::{RngState, SessionSnapshot};

/// Outward signals for plotting/redraw consumers. The engine does not know
/// who listens; subscribers get their own channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    StepCompleted { time: f64 },
    ResetCompleted,
    SettingsChanged,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub time: f64,
    pub fired: Option<TransitionId>,
    pub state: SimState,
}

/// Top-level orchestrator. Owns the canonical marking, the scheduler, the
/// behavior cache and the seeded random source; behaviors only report the
/// deltas they would apply, and commits happen here.
///
/// Structural edits flow in through the net's change channel and are drained
/// at operation boundaries, never mid-step. Suspension is cooperative:
/// `stop()` takes effect at the next step boundary.
pub struct SimulationController {
    config: SimConfig,
    state: SimState,
    scheduler: Scheduler,
    cache: BehaviorCache,
    rng: RngState,
    marking: Marking,
    initial: Marking,
    horizon: f64,
    changes: Option<Receiver<NetChange>>,
    events: Subscribers<SimulationEvent>,
    stop_requested: bool,
}

impl SimulationController {
    /// Controller wired to the net's change channel.
    pub fn new(net: &mut Net, config: SimConfig, seed: u64) -> Self {
        let changes = Some(net.subscribe());
        Self::build(net, config, seed, changes)
    }

    /// Controller without a change subscription, for workloads where the net
    /// is immutable for the whole session (ensemble runs, statistics).
    pub fn detached(net: &Net, config: SimConfig, seed: u64) -> Self {
        Self::build(net, config, seed, None)
    }

    fn build(
        net: &Net,
        config: SimConfig,
        seed: u64,
        changes: Option<Receiver<NetChange>>,
    ) -> Self {
        let marking = net.initial_marking();
        let horizon = config.duration;
        Self {
            config,
            state: SimState::Idle,
            scheduler: Scheduler::new(),
            cache: BehaviorCache::new(),
            rng: RngState::new(seed),
            initial: marking.clone(),
            marking,
            horizon,
            changes,
            events: Subscribers::new(),
            stop_requested: false,
        }
    }

    pub fn subscribe(&mut self) -> Receiver<SimulationEvent> {
        self.events.subscribe()
    }

    /// Start (or resume) a session and drive it until the simulated clock
    /// reaches `duration`, a step fails, or `stop()` was requested. Each
    /// loop iteration is one bounded step; edits queued on the change
    /// channel are observed between steps.
    pub fn run(&mut self, net: &Net, duration: f64) -> Result<(), SimError> {
        self.poll_changes(net);
        self.stop_requested = false;
        match self.state {
            SimState::Idle => self.begin(net, duration),
            SimState::Paused | SimState::Running => {
                self.horizon = duration;
                self.state = SimState::Running;
            }
            SimState::Completed => {
                warn!("run() ignored: session completed, reset() first");
                return Ok(());
            }
        }
        while self.state == SimState::Running && !self.stop_requested {
            self.poll_changes(net);
            self.advance_once(net)?;
        }
        if self.stop_requested {
            self.stop_requested = false;
            if self.state == SimState::Running {
                self.state = SimState::Paused;
            }
        }
        Ok(())
    }

    /// One discrete advance. From Idle this starts a session with the
    /// configured duration; invoked while not Running it leaves the session
    /// Paused afterwards (single-step mode).
    pub fn step(&mut self, net: &Net) -> Result<StepReport, SimError> {
        self.poll_changes(net);
        self.stop_requested = false;
        let single = match self.state {
            SimState::Idle => {
                self.begin(net, self.config.duration);
                true
            }
            SimState::Paused => {
                self.state = SimState::Running;
                true
            }
            SimState::Running => false,
            SimState::Completed => {
                return Ok(StepReport {
                    time: self.scheduler.now(),
                    fired: None,
                    state: SimState::Completed,
                });
            }
        };
        let mut report = self.advance_once(net)?;
        if single && self.state == SimState::Running {
            self.state = SimState::Paused;
            report.state = SimState::Paused;
        }
        Ok(report)
    }

    /// Cooperative: takes effect at the next step boundary, never mid-step.
    pub fn stop(&mut self) {
        if self.state == SimState::Running {
            self.stop_requested = true;
            self.state = SimState::Paused;
        }
    }

    /// Restore the marking recorded when the session began and clear all
    /// timing state. The random source is re-seeded, so a re-run reproduces
    /// the same trajectory.
    pub fn reset(&mut self, net: &Net) {
        self.poll_changes(net);
        self.marking = self.initial.clone();
        self.marking.grow(net.marking_width());
        self.scheduler.reset();
        self.scheduler.mark_all_dirty(net);
        self.cache.clear_dynamic_state();
        self.rng.reseed();
        self.stop_requested = false;
        self.state = SimState::Idle;
        self.events.publish(SimulationEvent::ResetCompleted);
    }

    pub fn set_parameters(&mut self, config: SimConfig) {
        if matches!(self.state, SimState::Running | SimState::Paused) {
            self.horizon = config.duration;
        }
        self.config = config;
        self.events.publish(SimulationEvent::SettingsChanged);
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SimState::Running
    }

    pub fn time(&self) -> f64 {
        self.scheduler.now()
    }

    /// Snapshot of the canonical marking.
    pub fn current_marking(&self) -> Marking {
        self.marking.clone()
    }

    /// Fraction of the session horizon already simulated, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.horizon <= 0.0 {
            return if self.state == SimState::Completed {
                1.0
            } else {
                0.0
            };
        }
        (self.scheduler.now() / self.horizon).clamp(0.0, 1.0)
    }

    /// Minimal state to resume this session later; see
    /// [`SessionSnapshot`] for what is and is not carried across.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            initial_marking: self.initial.clone(),
            marking: self.marking.clone(),
            time: self.scheduler.now(),
            seed: self.rng.seed(),
            draws: self.rng.draws(),
        }
    }

    pub fn restore(&mut self, net: &Net, snapshot: SessionSnapshot) {
        self.poll_changes(net);
        self.initial = snapshot.initial_marking;
        self.marking = snapshot.marking;
        self.initial.grow(net.marking_width());
        self.marking.grow(net.marking_width());
        self.rng = RngState::restore(snapshot.seed, snapshot.draws);
        self.scheduler.reset();
        self.scheduler.set_now(snapshot.time);
        self.scheduler.mark_all_dirty(net);
        self.cache.clear_dynamic_state();
        self.stop_requested = false;
        self.state = SimState::Paused;
    }

    fn begin(&mut self, net: &Net, duration: f64) {
        self.marking = net.initial_marking();
        self.initial = self.marking.clone();
        self.horizon = duration;
        self.scheduler.reset();
        self.scheduler.mark_all_dirty(net);
        self.cache.clear_dynamic_state();
        self.stop_requested = false;
        self.state = SimState::Running;
        debug!("session started, horizon {duration}");
    }

    fn advance_once(&mut self, net: &Net) -> Result<StepReport, SimError> {
        let plan = match self.scheduler.advance(
            net,
            &self.marking,
            &mut self.cache,
            &mut self.rng,
            &self.config,
            self.horizon,
        ) {
            Ok(plan) => plan,
            Err(err) => return Err(self.fail(net, err)),
        };
        Ok(self.commit(net, plan))
    }

    /// A failed step leaves the marking exactly as it was. Cache
    /// inconsistency additionally voids the session: it means an
    /// invalidation was missed, so nothing cached can be trusted.
    fn fail(&mut self, net: &Net, err: SimError) -> SimError {
        match &err {
            SimError::InconsistentBehavior(id) => {
                warn!("behavior cache inconsistent at {id:?}; forcing idle + full rebuild");
                self.state = SimState::Idle;
                if let Err(rebuild) = self.cache.rebuild_all(net) {
                    warn!("cache rebuild failed: {rebuild}");
                }
                self.scheduler.mark_all_dirty(net);
            }
            _ => {
                warn!("step failed at t={}: {err}", self.scheduler.now());
                self.state = SimState::Paused;
            }
        }
        err
    }

    fn commit(&mut self, net: &Net, plan: StepPlan) -> StepReport {
        self.marking = plan.marking;
        self.scheduler.set_now(plan.now);
        self.scheduler.note_changes(net, &plan.changed);
        if plan.now >= self.horizon {
            self.state = SimState::Completed;
            info!("session completed at t={}", plan.now);
        }
        self.events
            .publish(SimulationEvent::StepCompleted { time: plan.now });
        StepReport {
            time: plan.now,
            fired: plan.fired,
            state: self.state,
        }
    }

    fn poll_changes(&mut self, net: &Net) {
        let Some(receiver) = &self.changes else {
            return;
        };
        let pending: Vec<NetChange> = receiver.try_iter().collect();
        for change in pending {
            self.apply_change(net, change);
        }
    }

    fn apply_change(&mut self, net: &Net, change: NetChange) {
        debug!("net change: {change:?}");
        match change {
            NetChange::Created(EntityRef::Place(place)) => {
                self.marking.grow(net.marking_width());
                self.initial.grow(net.marking_width());
                if let Some(entry) = net.place(place) {
                    self.marking.set(place, entry.tokens);
                    self.initial.set(place, entry.tokens);
                }
            }
            // 行为在首次使用前由缓存惰性构建
            NetChange::Created(EntityRef::Transition(transition)) => {
                self.scheduler.mark_dirty(transition);
            }
            NetChange::Created(EntityRef::Arc { transition, .. })
            | NetChange::Deleted(EntityRef::Arc { transition, .. })
            | NetChange::Transformed { transition, .. } => {
                self.cache.invalidate(transition);
                self.scheduler.mark_dirty(transition);
            }
            NetChange::Deleted(EntityRef::Transition(transition)) => {
                self.cache.remove(transition);
                self.scheduler.forget(transition);
            }
            NetChange::Deleted(EntityRef::Place(place)) => {
                self.marking.set(place, 0.0);
                self.initial.set(place, 0.0);
            }
            NetChange::TokensSet { place, tokens } => {
                if self.state != SimState::Running {
                    self.marking.set(place, tokens);
                    for transition in net.transitions_touching(place) {
                        self.scheduler.mark_dirty(transition);
                    }
                }
            }
        }
    }
}
