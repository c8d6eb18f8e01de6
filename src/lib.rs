//! Hybrid stochastic Petri net simulation engine for biochemical reaction
//! networks: immediate, deterministic-timed, stochastic and continuous
//! transitions over consuming, test and inhibitor arcs, with live structural
//! edits propagated to the running simulation through a change channel.

pub mod config;
pub mod net;
pub mod sim;

pub use config::{IntegrationMethod, SimConfig, TieBreak};
