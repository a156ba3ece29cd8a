//! A small finite-domain constraint kernel.
//!
//! - [`Store`]: arena of integer variables and reversible cells with a
//!   trail and nested worlds.
//! - [`Propagator`]: filtering algorithms reacting to domain events.
//! - [`Solver`]: owns the store and the propagators and runs the
//!   propagation queue to a fixpoint.
//! - [`search`]: depth-first search driven by ordered goals, with
//!   time and node limits.
//!
//! A [`Contradiction`] is the only failure a propagator can raise; the
//! search recovers from it by backtracking.

use std::fmt;

use thiserror::Error;

pub mod arith;
pub mod packing;
pub mod search;
pub mod solver;
pub mod store;

pub use search::{dfs, Goal, Limits, SearchOutcome, SearchStats, Solution, ValueSelector, VarSelector};
pub use solver::Solver;
pub use store::{CellId, Event, EventKind, PropId, Store, VarId};

/// A domain became empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("contradiction")]
pub struct Contradiction;

/// Result of a filtering step.
pub type Propagation<T = ()> = Result<T, Contradiction>;

/// How a propagator wants to be woken up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// Scheduled once per batch of events, then filters from scratch.
    Coarse,
    /// Receives every event, except the ones it caused itself.
    Fine,
}

/// A filtering algorithm over store variables.
pub trait Propagator: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Variables whose events wake the propagator up.
    fn vars(&self) -> Vec<VarId>;

    fn granularity(&self) -> Granularity {
        Granularity::Coarse
    }

    /// Full filtering. Called once when posted, then on every wake-up of
    /// a coarse propagator.
    fn propagate(&mut self, store: &mut Store) -> Propagation;

    /// Incremental filtering for fine-grained propagators.
    fn on_event(&mut self, store: &mut Store, _event: &Event) -> Propagation {
        self.propagate(store)
    }
}
