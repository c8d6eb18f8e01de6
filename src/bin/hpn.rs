//! 命令行入口: 加载网文件, 运行混合仿真并导出轨迹或 DOT 图.
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use itertools::Itertools;
use log::info;

use RustHPN::config::SimConfig;
use RustHPN::net::io;
use RustHPN::sim::{SimState, SimulationController};

fn make_parser() -> Command {
    Command::new("hpn")
        .about("Hybrid stochastic Petri net simulator")
        .version("v0.1.0")
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Simulate a net file (.json/.ron)")
                .arg(Arg::new("net").required(true).value_name("FILE"))
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .default_value("hpn.toml")
                        .help("TOML simulation configuration"),
                )
                .arg(
                    Arg::new("duration")
                        .short('d')
                        .long("duration")
                        .value_name("TIME")
                        .help("Simulated-time horizon, overrides the config"),
                )
                .arg(
                    Arg::new("seed")
                        .short('s')
                        .long("seed")
                        .value_name("N")
                        .default_value("0")
                        .help("Seed of the stochastic random stream"),
                )
                .arg(
                    Arg::new("csv")
                        .long("csv")
                        .value_name("FILE")
                        .help("Write the (time, marking) trajectory as CSV"),
                )
                .arg(
                    Arg::new("session")
                        .long("session")
                        .value_name("FILE")
                        .help("Save a resumable session snapshot after the run"),
                ),
        )
        .subcommand(
            Command::new("dot")
                .about("Export a net file as Graphviz DOT")
                .arg(Arg::new("net").required(true).value_name("FILE"))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .action(ArgAction::Set),
                ),
        )
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("HPN_LOG", "info")).init();

    let matches = make_parser().get_matches();
    match matches.subcommand() {
        Some(("run", args)) => run(args),
        Some(("dot", args)) => dot(args),
        _ => unreachable!("subcommand is required"),
    }
}

fn run(args: &clap::ArgMatches) -> Result<()> {
    let net_path: &String = args.get_one("net").expect("required arg");
    let net = io::load_net(net_path).with_context(|| format!("loading net {net_path}"))?;

    let config_path: &String = args.get_one("config").expect("defaulted arg");
    let mut config = SimConfig::load_from_file(config_path)?;
    if let Some(duration) = args.get_one::<String>("duration") {
        config.duration = duration
            .parse()
            .with_context(|| format!("invalid duration {duration:?}"))?;
    }
    config.validate()?;
    let seed: u64 = args
        .get_one::<String>("seed")
        .expect("defaulted arg")
        .parse()
        .context("invalid seed")?;

    let mut net = net;
    let mut controller = SimulationController::new(&mut net, config.clone(), seed);
    let events = controller.subscribe();

    let mut trajectory = vec![(0.0, controller.current_marking())];
    loop {
        let report = controller.step(&net)?;
        trajectory.push((report.time, controller.current_marking()));
        if let Some(fired) = report.fired {
            let name = net
                .transition(fired)
                .map(|t| t.name.as_str())
                .unwrap_or("?");
            info!("t={:.6} fired {}", report.time, name);
        }
        if report.state == SimState::Completed {
            break;
        }
    }
    info!(
        "completed at t={:.6} after {} steps",
        controller.time(),
        events.try_iter().count()
    );

    if let Some(csv_path) = args.get_one::<String>("csv") {
        let header = std::iter::once("time".to_string())
            .chain(net.places().map(|(_, p)| p.name.clone()))
            .join(",");
        let mut lines = vec![header];
        for (time, marking) in &trajectory {
            let row = std::iter::once(format!("{time}"))
                .chain(net.places().map(|(id, _)| format!("{}", marking.tokens(id))))
                .join(",");
            lines.push(row);
        }
        fs::write(csv_path, lines.join("\n")).with_context(|| format!("writing {csv_path}"))?;
        info!("trajectory written to {csv_path}");
    }

    if let Some(session_path) = args.get_one::<String>("session") {
        io::save(session_path, &controller.snapshot())
            .with_context(|| format!("writing session {session_path}"))?;
        info!("session snapshot written to {session_path}");
    }

    Ok(())
}

fn dot(args: &clap::ArgMatches) -> Result<()> {
    let net_path: &String = args.get_one("net").expect("required arg");
    let net = io::load_net(net_path).with_context(|| format!("loading net {net_path}"))?;
    match args.get_one::<String>("output") {
        Some(output) => {
            net.write_dot(PathBuf::from(output))
                .with_context(|| format!("writing {output}"))?;
            info!("dot written to {output}");
        }
        None => print!("{}", net.to_dot()),
    }
    Ok(())
}
