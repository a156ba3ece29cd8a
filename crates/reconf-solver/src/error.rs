//! Solver error types.

use reconf_model::{CheckerError, ModelError, NodeId, SatConstraint, VmId, VmState};
use thiserror::Error;

/// Errors that can occur while building or solving a reconfiguration
/// problem. Infeasibility and timeouts are outcomes, not errors.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("unable to inject {constraint}: {reason}")]
    Injection {
        constraint: SatConstraint,
        reason: String,
    },

    #[error("vm {0} cannot be forged: no 'template' attribute")]
    MissingTemplate(VmId),

    #[error("unsupported transition for {vm}: {} -> {to}", state_name(.from))]
    UnsupportedTransition {
        vm: VmId,
        from: Option<VmState>,
        to: VmState,
    },

    #[error("node {0} is not part of the model")]
    UnknownNode(NodeId),

    #[error("the problem has no solution: contradiction at the root")]
    Contradiction,

    #[error("computed plan does not replay on the source model: {0}")]
    InconsistentPlan(String),

    #[error("partitioning error: {0}")]
    Partition(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("plan violates a constraint: {0}")]
    Checker(#[from] CheckerError),
}

fn state_name(state: &Option<VmState>) -> String {
    match state {
        Some(s) => s.to_string(),
        None => "absent".to_string(),
    }
}

pub type SolverResult<T> = Result<T, SolverError>;
