//! Objectives: a cost to minimize and the branching heuristic that goes
//! with it.

use std::collections::BTreeMap;
use std::fmt;

use crate::action_model::VmTransition;
use crate::kernel::{Goal, Store, VarId};
use crate::problem::ReconfigurationProblem;

pub trait Objective: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Branching goals, in decision order.
    fn goals(&self, problem: &ReconfigurationProblem) -> Vec<Goal>;

    /// Variables whose sum is the cost.
    fn cost_vars(&self, problem: &ReconfigurationProblem) -> Vec<VarId>;
}

/// Minimize the time to repair: the sum of every action end.
///
/// Hosts are decided first, VMs that can stay where they are before the
/// ones that must move, each preferring its current node. Node states
/// prefer their current state. Start times come last, each at its
/// earliest.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinMttr;

/// First value of `host` that is a node online in the source model.
fn online_host(problem: &ReconfigurationProblem, store: &Store, host: VarId) -> Option<i32> {
    let map = problem.source().mapping();
    store.values(host).into_iter().find(|h| {
        usize::try_from(*h)
            .ok()
            .and_then(|i| problem.nodes().get(i))
            .is_some_and(|n| map.is_online(*n))
    })
}

impl Objective for MinMttr {
    fn name(&self) -> &'static str {
        "minMTTR"
    }

    fn goals(&self, problem: &ReconfigurationProblem) -> Vec<Goal> {
        let store = problem.solver().store();
        let mut stable = Vec::new();
        let mut resuming = Vec::new();
        let mut moving = Vec::new();
        let mut booting = Vec::new();
        let mut preferred = BTreeMap::new();

        for m in problem.vm_models() {
            let Some(ds) = m.dslice else {
                continue;
            };
            let current = m
                .transition
                .current_host()
                .and_then(|n| problem.node_index(n))
                .map(|i| i as i32);
            match (m.transition, current) {
                (VmTransition::Relocate { .. }, Some(cur)) if store.contains(ds.host, cur) => {
                    preferred.insert(ds.host, cur);
                    stable.push(ds.host);
                }
                (VmTransition::Resume { .. }, Some(cur)) => {
                    preferred.insert(ds.host, cur);
                    resuming.push(ds.host);
                }
                (VmTransition::Boot, _) => {
                    if let Some(h) = online_host(problem, store, ds.host) {
                        preferred.insert(ds.host, h);
                    }
                    booting.push(ds.host);
                }
                _ => {
                    if let Some(h) = online_host(problem, store, ds.host) {
                        preferred.insert(ds.host, h);
                    }
                    moving.push(ds.host);
                }
            }
        }

        let states: BTreeMap<VarId, i32> = problem
            .node_models()
            .iter()
            .map(|m| (m.state, m.initial_state()))
            .collect();
        let mut starts: Vec<VarId> = problem
            .vm_models()
            .filter(|m| !m.transition.is_stay())
            .map(|m| m.start)
            .collect();
        starts.extend(problem.node_models().iter().map(|m| m.start));

        vec![
            Goal::new("stableHosts", stable).preferring(preferred.clone()),
            Goal::new("resumeHosts", resuming).preferring(preferred.clone()),
            Goal::new("movingHosts", moving)
                .min_domain()
                .preferring(preferred.clone()),
            Goal::new("bootHosts", booting).min_domain().preferring(preferred),
            Goal::new("nodeStates", states.keys().copied().collect()).preferring(states),
            Goal::new("starts", starts),
        ]
    }

    fn cost_vars(&self, problem: &ReconfigurationProblem) -> Vec<VarId> {
        let mut ends: Vec<VarId> = problem
            .vm_models()
            .filter(|m| !m.transition.is_stay())
            .map(|m| m.end)
            .collect();
        ends.extend(problem.node_models().iter().map(|m| m.end));
        ends
    }
}
