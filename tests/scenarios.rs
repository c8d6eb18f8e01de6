//! 端到端场景: 通过公共 API 驱动完整仿真会话.

use RustHPN::config::SimConfig;
use RustHPN::net::{ArcKind, Net, NodeRef, Place, RateLaw, Transition};
use RustHPN::sim::{SimState, SimulationController, SimulationEvent, run_ensemble};

/// P1(2) --1--> T1(immediate) --1--> P2: two firings drain P1, the third
/// step changes nothing.
#[test]
fn immediate_chain_scenario() {
    let mut net = Net::empty();
    let p1 = net.add_place(Place::new("p1", 2.0)).unwrap();
    let p2 = net.add_place(Place::new("p2", 0.0)).unwrap();
    let t1 = net.add_transition(Transition::immediate("t1")).unwrap();
    net.add_arc(NodeRef::Place(p1), NodeRef::Transition(t1), ArcKind::Normal, 1.0)
        .unwrap();
    net.add_arc(NodeRef::Transition(t1), NodeRef::Place(p2), ArcKind::Normal, 1.0)
        .unwrap();

    let mut controller = SimulationController::new(&mut net, SimConfig::default(), 0);
    let events = controller.subscribe();

    controller.step(&net).unwrap();
    let marking = controller.current_marking();
    assert_eq!((marking.tokens(p1), marking.tokens(p2)), (1.0, 1.0));

    controller.step(&net).unwrap();
    let marking = controller.current_marking();
    assert_eq!((marking.tokens(p1), marking.tokens(p2)), (0.0, 2.0));

    let report = controller.step(&net).unwrap();
    assert_eq!(report.fired, None);
    let marking = controller.current_marking();
    assert_eq!((marking.tokens(p1), marking.tokens(p2)), (0.0, 2.0));

    // 每个提交的步都对外发出一次 step_completed
    let steps = events
        .try_iter()
        .filter(|e| matches!(e, SimulationEvent::StepCompleted { .. }))
        .count();
    assert_eq!(steps, 3);
}

/// An inhibitor with threshold 3 keeps the transition disabled while the
/// place holds at least 3 tokens; an external edit below the threshold
/// releases it.
#[test]
fn inhibitor_release_scenario() {
    let mut net = Net::empty();
    let p1 = net.add_place(Place::new("p1", 5.0)).unwrap();
    let p2 = net.add_place(Place::new("p2", 0.0)).unwrap();
    let t1 = net.add_transition(Transition::immediate("t1")).unwrap();
    net.add_arc_with_threshold(
        NodeRef::Place(p1),
        NodeRef::Transition(t1),
        ArcKind::Inhibitor,
        1.0,
        3.0,
    )
    .unwrap();
    net.add_arc(NodeRef::Transition(t1), NodeRef::Place(p2), ArcKind::Normal, 1.0)
        .unwrap();

    let mut controller = SimulationController::new(&mut net, SimConfig::default(), 0);
    assert_eq!(controller.step(&net).unwrap().fired, None);
    controller.reset(&net);

    net.set_tokens(p1, 2.0).unwrap();
    let report = controller.step(&net).unwrap();
    assert_eq!(report.fired, Some(t1));
    assert_eq!(controller.current_marking().tokens(p2), 1.0);
    // 抑制弧与测试弧从不移动令牌
    assert_eq!(controller.current_marking().tokens(p1), 2.0);
}

/// Stochastic race at rates 2:1 resolves to the faster transition in about
/// two thirds of independent runs.
#[test]
fn stochastic_race_scenario() {
    let mut net = Net::empty();
    let p = net.add_place(Place::new("p", 1.0)).unwrap();
    let fast = net
        .add_transition(Transition::stochastic("fast", RateLaw::Constant(2.0)))
        .unwrap();
    let slow = net
        .add_transition(Transition::stochastic("slow", RateLaw::Constant(1.0)))
        .unwrap();
    for t in [fast, slow] {
        net.add_arc(NodeRef::Place(p), NodeRef::Transition(t), ArcKind::Normal, 1.0)
            .unwrap();
    }

    let config = SimConfig {
        duration: 100.0,
        ..SimConfig::default()
    };
    let runs = 10_000;
    let trajectories = run_ensemble(&net, &config, runs, 42).unwrap();
    let fast_first = trajectories
        .iter()
        .filter(|t| t.first_fired == Some(fast))
        .count();
    let share = fast_first as f64 / runs as f64;
    assert!((share - 2.0 / 3.0).abs() < 0.02, "fast won {share}");
}

/// Two controllers over identical nets, seeds and configurations yield the
/// same `(time, marking)` sequence.
#[test]
fn deterministic_replay_scenario() {
    let build = || {
        let mut net = Net::empty();
        let p = net.add_place(Place::new("p", 3.0)).unwrap();
        let sink = net.add_place(Place::new("sink", 0.0)).unwrap();
        let t = net
            .add_transition(Transition::stochastic("drain", RateLaw::MassAction(1.5)))
            .unwrap();
        net.add_arc(NodeRef::Place(p), NodeRef::Transition(t), ArcKind::Normal, 1.0)
            .unwrap();
        net.add_arc(NodeRef::Transition(t), NodeRef::Place(sink), ArcKind::Normal, 1.0)
            .unwrap();
        net
    };

    let trace = |mut net: Net| {
        let mut controller = SimulationController::new(&mut net, SimConfig::default(), 77);
        let mut out = Vec::new();
        loop {
            let report = controller.step(&net).unwrap();
            out.push((report.time, controller.current_marking()));
            if report.state == SimState::Completed {
                break;
            }
        }
        out
    };

    assert_eq!(trace(build()), trace(build()));
}
