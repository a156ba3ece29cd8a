//! reconf-solver: constraint-based scheduling of datacenter
//! reconfigurations.
//!
//! Given a source [`reconf_model::Model`] and placement constraints, the
//! solver decides where every VM ends up and when every action happens.
//!
//! # Layers
//!
//! - [`kernel`]: finite-domain variables with a trail, propagators and a
//!   depth-first search with limits.
//! - [`extensions`]: global propagators for group exclusion
//!   ([`DisjointMultiple`]) and multi-resource precedences
//!   ([`Precedences`]).
//! - [`action_model`]: per node and per VM temporal variables and slices.
//! - [`constraint`]: translation of each constraint kind into propagators.
//! - [`problem`], [`objective`], [`algorithm`]: building, searching and
//!   turning solutions into plans.
//! - [`partition`]: concurrent solving of independent sub-instances.

pub mod action_model;
pub mod algorithm;
pub mod config;
pub mod constraint;
pub mod error;
pub mod extensions;
pub mod kernel;
pub mod objective;
pub mod partition;
pub mod problem;

pub use algorithm::{ReconfigurationAlgorithm, SolveOutcome, SolvingStatistics};
pub use config::{DurationEvaluator, DurationsConfig, SolverConfig};
pub use error::{SolverError, SolverResult};
pub use extensions::{DisjointMultiple, Precedences};
pub use objective::{MinMttr, Objective};
pub use partition::{solve_partitioned, split_instance, Partition};
pub use problem::ReconfigurationProblem;
