//! reconf.toml solver configuration.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! time_limit_secs = 10
//! optimize = true
//! repair = true
//!
//! [durations]
//! migrate_vm = { linear = { view = "mem", factor = 1, offset = 2 } }
//! boot_node = { constant = 6 }
//! ```

use std::path::Path;
use std::time::Duration;

use reconf_model::{Model, NodeId, VmId};
use serde::{Deserialize, Serialize};

use crate::error::{SolverError, SolverResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Wall-clock budget for the whole solve. Unbounded when absent.
    pub time_limit_secs: Option<u64>,
    /// Keep improving the first solution instead of stopping at it.
    pub optimize: bool,
    /// Only re-decide the placement of misplaced VMs.
    pub repair: bool,
    /// Plan horizon. Defaults to the sum of every maximal action duration.
    pub max_end: Option<u32>,
    /// Replay the plan through the constraint checkers before returning it.
    pub verify: bool,
    /// Maximum number of improvement rounds when optimizing.
    pub max_iterations: Option<u32>,
    pub durations: DurationsConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: None,
            optimize: false,
            repair: false,
            max_end: None,
            verify: true,
            max_iterations: None,
            durations: DurationsConfig::default(),
        }
    }
}

impl SolverConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> SolverResult<Self> {
        toml::from_str(content).map_err(|e| SolverError::Config(e.to_string()))
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_secs.map(Duration::from_secs)
    }
}

/// One duration evaluator per action kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationsConfig {
    pub boot_node: DurationEvaluator,
    pub shutdown_node: DurationEvaluator,
    pub boot_vm: DurationEvaluator,
    pub shutdown_vm: DurationEvaluator,
    pub migrate_vm: DurationEvaluator,
    pub suspend_vm: DurationEvaluator,
    pub resume_vm: DurationEvaluator,
    pub kill_vm: DurationEvaluator,
    pub forge_vm: DurationEvaluator,
}

impl Default for DurationsConfig {
    fn default() -> Self {
        let one = DurationEvaluator::Constant(1);
        Self {
            boot_node: one.clone(),
            shutdown_node: one.clone(),
            boot_vm: one.clone(),
            shutdown_vm: one.clone(),
            migrate_vm: one.clone(),
            suspend_vm: one.clone(),
            resume_vm: one.clone(),
            kill_vm: one.clone(),
            forge_vm: one,
        }
    }
}

/// How long an action lasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationEvaluator {
    Constant(u32),
    /// `factor * amount + offset`, where `amount` is the VM consumption or
    /// the node capacity in a view.
    Linear {
        view: String,
        factor: u32,
        #[serde(default)]
        offset: u32,
    },
}

impl DurationEvaluator {
    pub fn for_vm(&self, mo: &Model, vm: VmId) -> SolverResult<i32> {
        match self {
            Self::Constant(d) => Ok(*d as i32),
            Self::Linear {
                view,
                factor,
                offset,
            } => {
                let amount = mo.view(view)?.consumption(vm);
                Ok(linear(amount, *factor, *offset))
            }
        }
    }

    pub fn for_node(&self, mo: &Model, node: NodeId) -> SolverResult<i32> {
        match self {
            Self::Constant(d) => Ok(*d as i32),
            Self::Linear {
                view,
                factor,
                offset,
            } => {
                let amount = mo.view(view)?.capacity(node);
                Ok(linear(amount, *factor, *offset))
            }
        }
    }
}

fn linear(amount: i64, factor: u32, offset: u32) -> i32 {
    let d = amount.max(0) * factor as i64 + offset as i64;
    d.min(i32::MAX as i64 / 4) as i32
}
