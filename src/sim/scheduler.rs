//! 时钟与调度: 事件选择、优先级、平局决议与连续积分.
//!
//! 一次 `advance` 即规范中的一个离散推进:
//! 1. 任一 Immediate 变迁可激发时, 仅发射 id 最小者且不推进时钟;
//! 2. 否则取 `next = min(Timed 截止时刻, Stochastic 候选时刻, 积分步界, 视界)`;
//! 3. 在 `[now, next]` 上积分全部可激发的 Continuous 变迁;
//! 4. 若获胜事件为离散发射, 原子施加其增量并在下一轮重新武装;
//! 5. 标识变更只波及关联变迁的计时状态, 不做全量重扫.
//!
//! 调度器从不写入规范标识: `advance` 返回候选标识, 提交与否由控制器决定,
//! 因此失败的步不留下任何部分变更.
use std::collections::BTreeSet;

use log::{debug, trace};

use crate::config::{IntegrationMethod, SimConfig, TieBreak};
use crate::net::Net;
use crate::net::arena::IndexVec;
use crate::net::ids::{PlaceId, TransitionId};
use crate::net::structure::{Marking, Tokens};
use crate::sim::behavior::{BehaviorKind, Candidate, TimerState};
use crate::sim::cache::BehaviorCache;
use crate::sim::error::SimError;
use crate::sim::session::RngState;

/// Session lifecycle; owned by the controller, documented here with the
/// step algorithm it gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

/// Outcome of one advance, not yet committed. `marking` is a full candidate
/// marking; `changed` lists the places whose value differs from the input.
#[derive(Debug, Clone)]
pub struct StepPlan {
    pub marking: Marking,
    pub now: f64,
    pub fired: Option<TransitionId>,
    pub changed: Vec<PlaceId>,
}

const TIME_EPS: f64 = 1e-12;
/// Floating-point slack tolerated at the marking bounds before a step is
/// rejected; results inside the slack are snapped onto the bound.
const BOUNDS_TOL: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventClass {
    Timed,
    Stochastic,
}

pub struct Scheduler {
    now: f64,
    /// Transitions whose timing state must be re-derived before the next
    /// event selection (incident marking changed, behavior rebuilt, …).
    dirty: BTreeSet<TransitionId>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            now: 0.0,
            dirty: BTreeSet::new(),
        }
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn set_now(&mut self, now: f64) {
        self.now = now;
    }

    pub fn reset(&mut self) {
        self.now = 0.0;
        self.dirty.clear();
    }

    pub fn mark_dirty(&mut self, id: TransitionId) {
        self.dirty.insert(id);
    }

    pub fn mark_all_dirty(&mut self, net: &Net) {
        for (id, _) in net.transitions() {
            self.dirty.insert(id);
        }
    }

    pub fn forget(&mut self, id: TransitionId) {
        self.dirty.remove(&id);
    }

    /// Record which places a committed step touched; every transition with
    /// an arc on one of them gets re-armed on the next advance.
    pub fn note_changes(&mut self, net: &Net, changed: &[PlaceId]) {
        for &place in changed {
            for transition in net.transitions_touching(place) {
                self.dirty.insert(transition);
            }
        }
    }

    pub fn advance(
        &mut self,
        net: &Net,
        marking: &Marking,
        cache: &mut BehaviorCache,
        rng: &mut RngState,
        config: &SimConfig,
        horizon: f64,
    ) -> Result<StepPlan, SimError> {
        let ids: Vec<TransitionId> = net.transitions().map(|(id, _)| id).collect();
        for &id in &ids {
            if cache.ensure(net, id)? {
                self.dirty.insert(id);
            }
        }
        self.arm_dirty(marking, cache, rng)?;

        // Immediate 变迁绝对优先, 时钟不动
        for &id in &ids {
            let behavior = cache.get(id)?;
            if behavior.is_immediate() && behavior.is_enabled(marking) {
                let mut next = marking.clone();
                let changed = apply_deltas(net, &mut next, &behavior.fire_deltas())?;
                debug!("fired immediate {id:?} at t={}", self.now);
                return Ok(StepPlan {
                    marking: next,
                    now: self.now,
                    fired: Some(id),
                    changed,
                });
            }
        }

        let mut best: Option<(f64, EventClass, TransitionId)> = None;
        let mut continuous: Vec<TransitionId> = Vec::new();
        for &id in &ids {
            let behavior = cache.get(id)?;
            match behavior.kind {
                BehaviorKind::Timed {
                    timer: TimerState::Waiting { deadline },
                    ..
                } => {
                    if wins(deadline, EventClass::Timed, &best, config.tie_break) {
                        best = Some((deadline, EventClass::Timed, id));
                    }
                }
                BehaviorKind::Stochastic {
                    candidate: Some(Candidate { time, .. }),
                } => {
                    if wins(time, EventClass::Stochastic, &best, config.tie_break) {
                        best = Some((time, EventClass::Stochastic, id));
                    }
                }
                BehaviorKind::Continuous => {
                    if behavior.is_enabled(marking) {
                        continuous.push(id);
                    }
                }
                _ => {}
            }
        }

        if best.is_none() && continuous.is_empty() {
            // 静默: 视界之前不再有任何活动
            trace!("quiescent at t={}, jumping to horizon {horizon}", self.now);
            return Ok(StepPlan {
                marking: marking.clone(),
                now: horizon.max(self.now),
                fired: None,
                changed: Vec::new(),
            });
        }

        let mut next_t = horizon.max(self.now);
        if let Some((time, _, _)) = best {
            next_t = next_t.min(time.max(self.now));
        }
        if !continuous.is_empty() {
            next_t = next_t.min(self.now + config.max_step);
        }

        let mut working = marking.clone();
        let mut changed: Vec<PlaceId> = Vec::new();
        if !continuous.is_empty() && next_t > self.now {
            changed.extend(integrate(
                net,
                cache,
                &continuous,
                &mut working,
                next_t - self.now,
                config,
            )?);
        }

        let mut fired = None;
        if let Some((time, _, id)) = best {
            if time <= next_t + TIME_EPS {
                let behavior = cache.get(id)?;
                // 积分可能在事件时刻之前已解除使能
                if behavior.is_enabled(&working) {
                    let deltas = behavior.fire_deltas();
                    changed.extend(apply_deltas(net, &mut working, &deltas)?);
                    fired = Some(id);
                    debug!("fired {id:?} at t={next_t}");
                }
                cache.get_mut(id)?.clear_dynamic_state();
                self.dirty.insert(id);
            }
        }

        Ok(StepPlan {
            marking: working,
            now: next_t,
            fired,
            changed,
        })
    }

    /// Re-derive timers and stochastic candidates for the transitions marked
    /// dirty. Candidates are kept across unrelated events (the exponential
    /// race is memoryless) and redrawn only when the evaluated rate differs
    /// from the one they were drawn under.
    fn arm_dirty(
        &mut self,
        marking: &Marking,
        cache: &mut BehaviorCache,
        rng: &mut RngState,
    ) -> Result<(), SimError> {
        let pending: Vec<TransitionId> = self.dirty.iter().copied().collect();
        for id in pending {
            let (enabled, rate) = {
                let behavior = cache.get(id)?;
                let enabled = behavior.is_enabled(marking);
                let rate = match (&behavior.kind, enabled) {
                    (BehaviorKind::Stochastic { .. }, true) => Some(behavior.rate(marking)?),
                    _ => None,
                };
                (enabled, rate)
            };
            let now = self.now;
            let behavior = cache.get_mut(id)?;
            match &mut behavior.kind {
                BehaviorKind::Timed { delay, timer } => {
                    *timer = match (enabled, *timer) {
                        (false, _) => TimerState::Disabled,
                        // 重新使能总是重置延迟, 不保留已等待时长
                        (true, TimerState::Disabled) => TimerState::Waiting {
                            deadline: now + *delay,
                        },
                        (true, waiting) => waiting,
                    };
                }
                BehaviorKind::Stochastic { candidate } => match rate {
                    Some(rate) if rate > 0.0 => {
                        let stale = candidate.as_ref().map_or(true, |c| c.rate != rate);
                        if stale {
                            *candidate = Some(Candidate {
                                time: now + rng.exponential(rate),
                                rate,
                            });
                        }
                    }
                    _ => *candidate = None,
                },
                BehaviorKind::Immediate | BehaviorKind::Continuous => {}
            }
        }
        self.dirty.clear();
        Ok(())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn wins(
    time: f64,
    class: EventClass,
    best: &Option<(f64, EventClass, TransitionId)>,
    tie_break: TieBreak,
) -> bool {
    match best {
        None => true,
        Some((best_time, best_class, _)) => {
            if time < *best_time {
                true
            } else if time > *best_time || class == *best_class {
                // 同类平局: 先遍历到的 id 更小, 保持现任
                false
            } else {
                match tie_break {
                    TieBreak::TimedFirst => class == EventClass::Timed,
                    TieBreak::StochasticFirst => class == EventClass::Stochastic,
                }
            }
        }
    }
}

/// Apply discrete firing deltas onto a candidate marking, snapping
/// float-noise onto the bounds and rejecting anything beyond them.
fn apply_deltas(
    net: &Net,
    marking: &mut Marking,
    deltas: &[(PlaceId, Tokens)],
) -> Result<Vec<PlaceId>, SimError> {
    let mut changed = Vec::with_capacity(deltas.len());
    for &(place, delta) in deltas {
        let bound = net.place(place).map(|p| p.bound()).unwrap_or(f64::INFINITY);
        let after = marking.tokens(place) + delta;
        if after < -BOUNDS_TOL || after > bound + BOUNDS_TOL {
            return Err(SimError::CapacityViolation {
                place,
                after,
                capacity: bound,
            });
        }
        marking.set(place, after.clamp(0.0, bound));
        changed.push(place);
    }
    Ok(changed)
}

/// Integrate the enabled continuous transitions over an interval of length
/// `span`, in substeps bounded by `max_step`. Enabling is re-checked at
/// every derivative evaluation, so a flow starves as soon as its input arc
/// condition breaks.
fn integrate(
    net: &Net,
    cache: &BehaviorCache,
    continuous: &[TransitionId],
    working: &mut Marking,
    span: f64,
    config: &SimConfig,
) -> Result<Vec<PlaceId>, SimError> {
    let before = working.clone();
    let mut remaining = span;
    while remaining > TIME_EPS {
        let h = remaining.min(config.max_step);
        match config.integration {
            IntegrationMethod::Euler => {
                let d = derivative(cache, continuous, working)?;
                add_scaled(working, &d, h);
            }
            IntegrationMethod::RungeKutta4 => {
                let k1 = derivative(cache, continuous, working)?;
                let k2 = derivative(cache, continuous, &shifted(working, &k1, h / 2.0))?;
                let k3 = derivative(cache, continuous, &shifted(working, &k2, h / 2.0))?;
                let k4 = derivative(cache, continuous, &shifted(working, &k3, h))?;
                let mut combined = IndexVec::from_elem(0.0, working.len());
                for (place, v1) in k1.iter_enumerated() {
                    combined[place] = (v1 + 2.0 * k2[place] + 2.0 * k3[place] + k4[place]) / 6.0;
                }
                add_scaled(working, &combined, h);
            }
        }
        check_bounds(net, working)?;
        remaining -= h;
    }

    let changed = before
        .iter()
        .filter(|(place, tokens)| working.tokens(*place) != **tokens)
        .map(|(place, _)| place)
        .collect();
    Ok(changed)
}

/// Marking derivative contributed by the currently-enabled continuous
/// transitions: `d[p] = Σ coefficient · v(m)`.
fn derivative(
    cache: &BehaviorCache,
    continuous: &[TransitionId],
    marking: &Marking,
) -> Result<IndexVec<PlaceId, f64>, SimError> {
    let mut d = IndexVec::from_elem(0.0, marking.len());
    for &id in continuous {
        let behavior = cache.get(id)?;
        if !behavior.is_enabled(marking) {
            continue;
        }
        let flow = behavior.rate(marking)?;
        for (place, coefficient) in behavior.flow_terms() {
            d[place] += coefficient * flow;
        }
    }
    Ok(d)
}

fn add_scaled(marking: &mut Marking, d: &IndexVec<PlaceId, f64>, h: f64) {
    for (place, dv) in d.iter_enumerated() {
        if *dv != 0.0 {
            marking.set(place, marking.tokens(place) + dv * h);
        }
    }
}

fn shifted(marking: &Marking, d: &IndexVec<PlaceId, f64>, h: f64) -> Marking {
    let mut out = marking.clone();
    add_scaled(&mut out, d, h);
    out
}

fn check_bounds(net: &Net, marking: &mut Marking) -> Result<(), SimError> {
    for (id, place) in net.places() {
        let value = marking.tokens(id);
        let bound = place.bound();
        if value < -BOUNDS_TOL || value > bound + BOUNDS_TOL {
            return Err(SimError::CapacityViolation {
                place: id,
                after: value,
                capacity: bound,
            });
        }
        if value < 0.0 || value > bound {
            marking.set(id, value.clamp(0.0, bound));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::structure::{ArcKind, Place, RateLaw, Transition};
    use crate::net::NodeRef;

    fn advance_once(
        scheduler: &mut Scheduler,
        net: &Net,
        marking: &mut Marking,
        cache: &mut BehaviorCache,
        rng: &mut RngState,
        config: &SimConfig,
        horizon: f64,
    ) -> StepPlan {
        let plan = scheduler
            .advance(net, marking, cache, rng, config, horizon)
            .unwrap();
        *marking = plan.marking.clone();
        scheduler.set_now(plan.now);
        scheduler.note_changes(net, &plan.changed);
        plan
    }

    #[test]
    fn immediate_fires_lowest_id_without_time_advance() {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("p", 1.0)).unwrap();
        let t0 = net.add_transition(Transition::immediate("t0")).unwrap();
        let t1 = net.add_transition(Transition::immediate("t1")).unwrap();
        for t in [t0, t1] {
            net.add_arc(NodeRef::Place(p), NodeRef::Transition(t), ArcKind::Normal, 1.0)
                .unwrap();
        }

        let mut scheduler = Scheduler::new();
        let mut marking = net.initial_marking();
        let mut cache = BehaviorCache::new();
        let mut rng = RngState::new(0);
        let config = SimConfig::default();

        let plan = advance_once(
            &mut scheduler, &net, &mut marking, &mut cache, &mut rng, &config, 10.0,
        );
        assert_eq!(plan.fired, Some(t0));
        assert_eq!(plan.now, 0.0);
        assert_eq!(marking.tokens(p), 0.0);
    }

    #[test]
    fn timed_deadline_resets_when_disabled_in_between() {
        // t2 在 3 抽走令牌, t3 在 4 送回; t1 的截止时刻应为 4 + 10
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("p0", 1.0)).unwrap();
        let p1 = net.add_place(Place::new("p1", 1.0)).unwrap();
        let p3 = net.add_place(Place::new("p3", 0.0)).unwrap();
        let p4 = net.add_place(Place::new("p4", 0.0)).unwrap();

        let t1 = net.add_transition(Transition::timed("t1", 10.0)).unwrap();
        let t2 = net.add_transition(Transition::timed("t2", 3.0)).unwrap();
        let t3 = net.add_transition(Transition::timed("t3", 1.0)).unwrap();

        net.add_arc(NodeRef::Place(p1), NodeRef::Transition(t1), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Transition(t1), NodeRef::Place(p4), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Place(p0), NodeRef::Transition(t2), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Place(p1), NodeRef::Transition(t2), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Transition(t2), NodeRef::Place(p3), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Place(p3), NodeRef::Transition(t3), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Transition(t3), NodeRef::Place(p1), ArcKind::Normal, 1.0)
            .unwrap();

        let mut scheduler = Scheduler::new();
        let mut marking = net.initial_marking();
        let mut cache = BehaviorCache::new();
        let mut rng = RngState::new(0);
        let config = SimConfig::default();

        let mut fire_times = Vec::new();
        for _ in 0..3 {
            let plan = advance_once(
                &mut scheduler, &net, &mut marking, &mut cache, &mut rng, &config, 100.0,
            );
            fire_times.push((plan.fired, plan.now));
        }
        assert_eq!(fire_times, vec![
            (Some(t2), 3.0),
            (Some(t3), 4.0),
            (Some(t1), 14.0),
        ]);
        assert_eq!(marking.tokens(p4), 1.0);
    }

    #[test]
    fn quiescent_net_jumps_to_horizon() {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("p", 0.0)).unwrap();
        let t = net.add_transition(Transition::immediate("t")).unwrap();
        net.add_arc(NodeRef::Place(p), NodeRef::Transition(t), ArcKind::Normal, 1.0)
            .unwrap();

        let mut scheduler = Scheduler::new();
        let mut marking = net.initial_marking();
        let mut cache = BehaviorCache::new();
        let mut rng = RngState::new(0);
        let config = SimConfig::default();

        let plan = advance_once(
            &mut scheduler, &net, &mut marking, &mut cache, &mut rng, &config, 42.0,
        );
        assert_eq!(plan.fired, None);
        assert_eq!(plan.now, 42.0);
        assert!(plan.changed.is_empty());
    }

    #[test]
    fn euler_decay_tracks_the_analytic_solution() {
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("s", 10.0)).unwrap();
        let p1 = net.add_place(Place::new("x", 0.0)).unwrap();
        let t = net
            .add_transition(Transition::continuous("decay", RateLaw::MassAction(1.0)))
            .unwrap();
        net.add_arc(NodeRef::Place(p0), NodeRef::Transition(t), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Transition(t), NodeRef::Place(p1), ArcKind::Normal, 1.0)
            .unwrap();

        let mut scheduler = Scheduler::new();
        let mut marking = net.initial_marking();
        let mut cache = BehaviorCache::new();
        let mut rng = RngState::new(0);
        let config = SimConfig {
            max_step: 0.01,
            ..SimConfig::default()
        };

        while scheduler.now() < 1.0 - 1e-9 {
            advance_once(
                &mut scheduler, &net, &mut marking, &mut cache, &mut rng, &config, 1.0,
            );
        }
        let expected = 10.0 * (-1.0f64).exp();
        assert!((marking.tokens(p0) - expected).abs() < 0.05);
        assert!((marking.tokens(p0) + marking.tokens(p1) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn rk4_is_markedly_more_accurate_than_euler() {
        let run = |method: IntegrationMethod| {
            let mut net = Net::empty();
            let p0 = net.add_place(Place::new("s", 10.0)).unwrap();
            let t = net
                .add_transition(Transition::continuous("decay", RateLaw::MassAction(1.0)))
                .unwrap();
            net.add_arc(NodeRef::Place(p0), NodeRef::Transition(t), ArcKind::Normal, 1.0)
                .unwrap();

            let mut scheduler = Scheduler::new();
            let mut marking = net.initial_marking();
            let mut cache = BehaviorCache::new();
            let mut rng = RngState::new(0);
            let config = SimConfig {
                max_step: 0.05,
                integration: method,
                ..SimConfig::default()
            };
            while scheduler.now() < 1.0 - 1e-9 {
                advance_once(
                    &mut scheduler, &net, &mut marking, &mut cache, &mut rng, &config, 1.0,
                );
            }
            (marking.tokens(p0) - 10.0 * (-1.0f64).exp()).abs()
        };

        let euler_error = run(IntegrationMethod::Euler);
        let rk4_error = run(IntegrationMethod::RungeKutta4);
        assert!(rk4_error < 1e-6, "rk4 error {rk4_error}");
        assert!(rk4_error < euler_error / 100.0);
    }

    #[test]
    fn capacity_violation_rejects_the_whole_step() {
        let mut net = Net::empty();
        let p0 = net.add_place(Place::new("p0", 1.0)).unwrap();
        let p1 = net.add_place(Place::with_capacity("p1", 0.0, 0.5)).unwrap();
        let t = net.add_transition(Transition::immediate("t")).unwrap();
        net.add_arc(NodeRef::Place(p0), NodeRef::Transition(t), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Transition(t), NodeRef::Place(p1), ArcKind::Normal, 1.0)
            .unwrap();

        let mut scheduler = Scheduler::new();
        let marking = net.initial_marking();
        let mut cache = BehaviorCache::new();
        let mut rng = RngState::new(0);
        let config = SimConfig::default();

        let err = scheduler
            .advance(&net, &marking, &mut cache, &mut rng, &config, 10.0)
            .unwrap_err();
        assert!(matches!(err, SimError::CapacityViolation { .. }));
        // 输入标识未被触碰
        assert_eq!(marking.tokens(p0), 1.0);
        assert_eq!(marking.tokens(p1), 0.0);
    }
}
