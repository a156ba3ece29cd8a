//! Constraint injection.
//!
//! Each [`SatConstraint`] kind is translated into propagators over the
//! action models of a [`ReconfigurationProblem`]. State constraints are
//! already accounted for when next states are computed; their injection
//! only checks the problem agrees.
//!
//! [`misplaced`] reports the VMs whose placement in a model violates a
//! constraint. Repair mode keeps every other VM where it is.

use std::collections::BTreeSet;

use reconf_model::{Model, SatConstraint, VmId};
use tracing::trace;

use crate::error::{SolverError, SolverResult};
use crate::problem::ReconfigurationProblem;

mod placement;
mod resource;
mod state;

pub(crate) fn rejected(c: &SatConstraint, reason: impl Into<String>) -> SolverError {
    SolverError::Injection {
        constraint: c.clone(),
        reason: reason.into(),
    }
}

/// Post the propagators realizing a constraint.
pub fn inject(problem: &mut ReconfigurationProblem, c: &SatConstraint) -> SolverResult<()> {
    trace!(constraint = %c, "injecting");
    match c {
        SatConstraint::Among {
            vms,
            groups,
            continuous,
        } => placement::among(problem, c, vms, groups, *continuous).map(|_| ()),
        SatConstraint::Spread { vms, continuous } => {
            let groups: Vec<BTreeSet<VmId>> = vms.iter().map(|vm| BTreeSet::from([*vm])).collect();
            placement::split(problem, c, &groups, *continuous)
        }
        SatConstraint::Split { groups, continuous } => {
            placement::split(problem, c, groups, *continuous)
        }
        SatConstraint::SplitAmong {
            vm_groups,
            node_groups,
            continuous,
        } => placement::split_among(problem, c, vm_groups, node_groups, *continuous),
        SatConstraint::Ban { vms, nodes } => placement::ban(problem, c, vms, nodes),
        SatConstraint::Fence { vms, nodes } => placement::fence(problem, c, vms, nodes),
        SatConstraint::Root { vm } => placement::root(problem, c, *vm),
        SatConstraint::Offline { node } => state::node_state(problem, c, *node, false),
        SatConstraint::Online { node } => state::node_state(problem, c, *node, true),
        SatConstraint::Running { vm }
        | SatConstraint::Ready { vm }
        | SatConstraint::Sleeping { vm }
        | SatConstraint::Killed { vm } => state::vm_state(problem, c, *vm),
        SatConstraint::MaxOnline {
            nodes,
            amount,
            continuous,
        } => state::max_online(problem, c, nodes, *amount, *continuous),
        SatConstraint::Preserve {
            vms,
            resource,
            amount,
        } => resource::preserve(problem, c, vms, resource, *amount),
        SatConstraint::SingleRunningCapacity { nodes, amount } => {
            resource::single_running_capacity(problem, nodes, *amount);
            Ok(())
        }
    }
}

/// VMs whose placement in `mo` violates the constraint.
pub fn misplaced(c: &SatConstraint, mo: &Model) -> BTreeSet<VmId> {
    match c {
        SatConstraint::Among { .. }
        | SatConstraint::Spread { .. }
        | SatConstraint::Split { .. }
        | SatConstraint::SplitAmong { .. }
        | SatConstraint::Ban { .. }
        | SatConstraint::Fence { .. }
        | SatConstraint::Root { .. } => placement::misplaced(c, mo),
        SatConstraint::Offline { .. }
        | SatConstraint::Online { .. }
        | SatConstraint::Running { .. }
        | SatConstraint::Ready { .. }
        | SatConstraint::Sleeping { .. }
        | SatConstraint::Killed { .. }
        | SatConstraint::MaxOnline { .. } => state::misplaced(c, mo),
        SatConstraint::Preserve { .. } | SatConstraint::SingleRunningCapacity { .. } => {
            resource::misplaced(c, mo)
        }
    }
}
