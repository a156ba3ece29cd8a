//! Error types for the reconfiguration model.

use thiserror::Error;

use crate::action::Action;
use crate::constraint::SatConstraint;
use crate::types::{ElementKind, NodeId, VmId};

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while building or querying a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown vm: {0}")]
    UnknownVm(VmId),

    #[error("unknown resource view: {0}")]
    UnknownView(String),

    #[error("name '{0}' is already registered")]
    DuplicatedName(String),

    #[error("{kind} {id} already has a name")]
    AlreadyNamed { kind: ElementKind, id: u32 },

    #[error("naming service for {expected} elements can not name a {found}")]
    ElementKindMismatch {
        expected: ElementKind,
        found: ElementKind,
    },

    #[error("invalid naming service: {0}")]
    InvalidNaming(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The moment of a plan replay at which a checker rejected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    StartsWith,
    ActionStart,
    ActionEnd,
    EndsWith,
}

/// Violations reported by the plan checker.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("{constraint} violated at {phase:?}{}", fmt_action(.action))]
    Violation {
        constraint: SatConstraint,
        phase: CheckPhase,
        action: Option<Action>,
    },

    #[error("plan is not applyable: {0} failed")]
    NotApplyable(Action),
}

fn fmt_action(action: &Option<Action>) -> String {
    match action {
        Some(a) => format!(" by {a}"),
        None => String::new(),
    }
}

impl CheckerError {
    /// The constraint that was violated, if the failure is a violation.
    pub fn constraint(&self) -> Option<&SatConstraint> {
        match self {
            Self::Violation { constraint, .. } => Some(constraint),
            Self::NotApplyable(_) => None,
        }
    }
}
