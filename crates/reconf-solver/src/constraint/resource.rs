//! Resource constraints: preserve and singleRunningCapacity.

use std::collections::BTreeSet;

use reconf_model::{Model, NodeId, SatConstraint, VmId};

use super::rejected;
use crate::error::SolverResult;
use crate::kernel::packing::BinPacking;
use crate::problem::ReconfigurationProblem;

/// Raise the demand of the VMs running at the end of the plan. The
/// resource packing picks it up.
pub(super) fn preserve(
    problem: &mut ReconfigurationProblem,
    c: &SatConstraint,
    vms: &BTreeSet<VmId>,
    resource: &str,
    amount: i64,
) -> SolverResult<()> {
    if problem.source().view(resource).is_err() {
        return Err(rejected(c, format!("no resource view named '{resource}'")));
    }
    for vm in vms {
        if problem.host_var(*vm).is_some() {
            problem.raise_demand(resource, *vm, amount);
        }
    }
    Ok(())
}

pub(super) fn single_running_capacity(
    problem: &mut ReconfigurationProblem,
    nodes: &BTreeSet<NodeId>,
    amount: u32,
) {
    let bins: Vec<_> = problem
        .vm_models()
        .filter_map(|m| m.dslice.map(|d| d.host))
        .collect();
    let unbounded = bins.len() as i64;
    let capacities = problem
        .nodes()
        .iter()
        .map(|n| {
            if nodes.contains(n) {
                amount as i64
            } else {
                unbounded
            }
        })
        .collect();
    let sizes = vec![1; bins.len()];
    problem
        .solver_mut()
        .post(BinPacking::new("singleRunningCapacity", bins, sizes, capacities));
}

pub(super) fn misplaced(c: &SatConstraint, mo: &Model) -> BTreeSet<VmId> {
    let map = mo.mapping();
    match c {
        SatConstraint::Preserve {
            vms,
            resource,
            amount,
        } => {
            let Ok(view) = mo.view(resource) else {
                return BTreeSet::new();
            };
            vms.iter()
                .filter(|vm| map.is_running(**vm) && view.consumption(**vm) < *amount)
                .copied()
                .collect()
        }
        SatConstraint::SingleRunningCapacity { nodes, amount } => nodes
            .iter()
            .map(|n| map.running_vms_on(*n))
            .filter(|vms| vms.len() > *amount as usize)
            .flatten()
            .collect(),
        _ => BTreeSet::new(),
    }
}
