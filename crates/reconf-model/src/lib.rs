//! reconf-model: the datacenter model a reconfiguration plan works on.
//!
//! # Contents
//!
//! - [`Model`]: a [`Mapping`] of VMs on nodes, resource views, naming
//!   services and per-VM attributes.
//! - [`Action`]: timed operations (boot, migrate, shutdown, ...) with
//!   guarded application on a model.
//! - [`SatConstraint`]: placement constraints, discrete or continuous.
//! - [`ReconfigurationPlan`]: a source model plus actions, replayed in
//!   start-time order, with lazily extracted dependencies.
//! - [`PlanChecker`]: validates a plan along its timeline against a set
//!   of constraints.

pub mod action;
pub mod checker;
pub mod constraint;
pub mod dependency;
pub mod error;
pub mod mapping;
pub mod model;
pub mod plan;
pub mod types;
pub mod view;

pub use action::{Action, ActionCategory, ActionKind};
pub use checker::{check_plan, ConstraintChecker, PlanChecker};
pub use constraint::SatConstraint;
pub use error::{CheckPhase, CheckerError, ModelError, ModelResult};
pub use mapping::Mapping;
pub use model::{AttrValue, Attributes, Model};
pub use plan::ReconfigurationPlan;
pub use types::{Element, ElementKind, NodeId, NodeState, VmId, VmState};
pub use view::{NamingService, ShareableResource, NAMING_SERVICE_ID};
