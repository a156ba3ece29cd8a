//! State constraints: online, offline, running, ready, sleeping, killed
//! and maxOnline.

use std::collections::BTreeSet;

use reconf_model::{Model, NodeId, SatConstraint, VmId, VmState};

use super::rejected;
use crate::error::{SolverError, SolverResult};
use crate::kernel::arith::{ReifiedLeq, Sum};
use crate::problem::ReconfigurationProblem;

pub(super) fn node_state(
    problem: &mut ReconfigurationProblem,
    c: &SatConstraint,
    node: NodeId,
    online: bool,
) -> SolverResult<()> {
    let state = problem
        .node_model(node)
        .ok_or(SolverError::UnknownNode(node))?
        .state;
    let wanted = i32::from(online);
    problem
        .solver_mut()
        .store_mut()
        .instantiate(state, wanted)
        .map_err(|_| {
            let verb = if online { "online" } else { "offline" };
            rejected(c, format!("{node} can not be forced {verb}"))
        })?;
    Ok(())
}

/// Next states are computed from the state constraints; this only checks
/// the problem was built accordingly.
pub(super) fn vm_state(problem: &ReconfigurationProblem, c: &SatConstraint, vm: VmId) -> SolverResult<()> {
    let wanted = match c {
        SatConstraint::Running { .. } => VmState::Running,
        SatConstraint::Ready { .. } => VmState::Ready,
        SatConstraint::Sleeping { .. } => VmState::Sleeping,
        _ => VmState::Killed,
    };
    let next = problem.vm_model(vm).map(|m| m.transition.next_state());
    match next {
        Some(s) if s == wanted => Ok(()),
        None if wanted == VmState::Killed => Ok(()),
        Some(s) => Err(rejected(c, format!("{vm} is planned to be {s}"))),
        None => Err(rejected(c, format!("{vm} is not part of the model"))),
    }
}

/// At most `amount` of the nodes online at the end of the plan.
///
/// The continuous restriction also forbids any boot to start before every
/// shutdown of the set ended, so the count never goes above the bound in
/// between.
pub(super) fn max_online(
    problem: &mut ReconfigurationProblem,
    c: &SatConstraint,
    nodes: &BTreeSet<NodeId>,
    amount: u32,
    continuous: bool,
) -> SolverResult<()> {
    let models: Vec<_> = nodes
        .iter()
        .filter_map(|n| problem.node_model(*n))
        .cloned()
        .collect();
    if continuous {
        let online = models.iter().filter(|m| m.initially_online).count();
        if online > amount as usize {
            return Err(rejected(
                c,
                format!("{online} nodes are already online"),
            ));
        }
    }
    let bound = i32::try_from(amount).unwrap_or(i32::MAX);
    let solver = problem.solver_mut();
    let count = solver.store_mut().new_bounded("maxOnline.count", 0, bound);
    solver.post(Sum::new(models.iter().map(|m| m.state).collect(), count));
    if continuous {
        for boot in models.iter().filter(|m| !m.initially_online) {
            for halt in models.iter().filter(|m| m.initially_online) {
                solver.post(ReifiedLeq::new(
                    vec![(boot.state, 1), (halt.state, 0)],
                    halt.end,
                    boot.start,
                    0,
                ));
            }
        }
    }
    Ok(())
}

pub(super) fn misplaced(c: &SatConstraint, mo: &Model) -> BTreeSet<VmId> {
    let map = mo.mapping();
    match c {
        SatConstraint::Offline { node } => map.running_vms_on(*node),
        SatConstraint::Running { vm } if !map.is_running(*vm) => BTreeSet::from([*vm]),
        SatConstraint::Ready { vm } if !map.is_ready(*vm) => BTreeSet::from([*vm]),
        SatConstraint::Sleeping { vm } if !map.is_sleeping(*vm) => BTreeSet::from([*vm]),
        SatConstraint::Killed { vm } if map.contains_vm(*vm) => BTreeSet::from([*vm]),
        SatConstraint::MaxOnline { nodes, amount, .. } => {
            let online: Vec<NodeId> = nodes.iter().filter(|n| map.is_online(**n)).copied().collect();
            if online.len() <= *amount as usize {
                return BTreeSet::new();
            }
            online.iter().flat_map(|n| map.running_vms_on(*n)).collect()
        }
        _ => BTreeSet::new(),
    }
}
