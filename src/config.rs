use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Numerical method used to advance continuous transitions between discrete
/// events. Both methods honor `max_step` as the substep bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationMethod {
    #[default]
    Euler,
    RungeKutta4,
}

/// Resolution order when a timed deadline and a stochastic candidate fall on
/// exactly the same instant. Equal-kind ties always go to the lowest
/// transition id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    TimedFirst,
    StochasticFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Simulated-time horizon of a `run()`; `run(duration)` overrides it.
    #[serde(default = "default_duration")]
    pub duration: f64,
    /// Upper bound on one continuous integration substep.
    #[serde(default = "default_max_step")]
    pub max_step: f64,
    #[serde(default)]
    pub integration: IntegrationMethod,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            duration: default_duration(),
            max_step: default_max_step(),
            integration: IntegrationMethod::default(),
            tie_break: TieBreak::default(),
        }
    }
}

impl SimConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: SimConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.duration.is_finite() && self.duration > 0.0,
            "duration must be positive, got {}",
            self.duration
        );
        anyhow::ensure!(
            self.max_step.is_finite() && self.max_step > 0.0,
            "max_step must be positive, got {}",
            self.max_step
        );
        Ok(())
    }
}

fn default_duration() -> f64 {
    10.0
}

fn default_max_step() -> f64 {
    0.1
}
