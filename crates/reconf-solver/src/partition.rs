//! Static partitioning.
//!
//! A large instance is split along node sets into independent
//! sub-instances that are solved concurrently on the blocking thread pool.
//! VMs follow their host; VMs without host (ready, or not yet forged)
//! belong to the first partition. A constraint must fit in a single
//! partition. The plans of every partition are merged into one plan on
//! the full model.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use reconf_model::{Model, NodeId, ReconfigurationPlan, SatConstraint, VmId};
use tracing::{info, warn};

use crate::algorithm::{ReconfigurationAlgorithm, SolveOutcome, SolvingStatistics};
use crate::config::SolverConfig;
use crate::error::{SolverError, SolverResult};

/// One sub-instance: a model restricted to a node set and the constraints
/// that concern it.
#[derive(Debug, Clone)]
pub struct Partition {
    pub model: Model,
    pub constraints: Vec<SatConstraint>,
}

/// Split an instance along node sets.
///
/// Every node of the model must belong to exactly one set.
pub fn split_instance(
    model: &Model,
    constraints: &[SatConstraint],
    partitions: &[BTreeSet<NodeId>],
) -> SolverResult<Vec<Partition>> {
    if partitions.is_empty() {
        return Err(SolverError::Partition("no partition given".to_string()));
    }
    let map = model.mapping();
    let mut owner: BTreeMap<NodeId, usize> = BTreeMap::new();
    for (i, nodes) in partitions.iter().enumerate() {
        for n in nodes {
            if !map.contains_node(*n) {
                return Err(SolverError::UnknownNode(*n));
            }
            if owner.insert(*n, i).is_some() {
                return Err(SolverError::Partition(format!(
                    "{n} belongs to several partitions"
                )));
            }
        }
    }
    if let Some(n) = map.all_nodes().into_iter().find(|n| !owner.contains_key(n)) {
        return Err(SolverError::Partition(format!("{n} belongs to no partition")));
    }
    let vm_owner = |vm: VmId| -> usize {
        map.vm_location(vm)
            .and_then(|n| owner.get(&n).copied())
            .unwrap_or(0)
    };

    let mut out: Vec<Partition> = Vec::with_capacity(partitions.len());
    for i in 0..partitions.len() {
        let mut sub = model.clone();
        for vm in map.all_vms() {
            if vm_owner(vm) != i {
                sub.mapping_mut().remove_vm(vm);
            }
        }
        for (n, o) in &owner {
            if *o != i {
                sub.mapping_mut().remove_node(*n);
            }
        }
        out.push(Partition {
            model: sub,
            constraints: Vec::new(),
        });
    }

    for c in constraints {
        let mut parts: BTreeSet<usize> = c
            .involved_nodes()
            .iter()
            .filter_map(|n| owner.get(n).copied())
            .collect();
        parts.extend(c.involved_vms().into_iter().map(vm_owner));
        if parts.len() > 1 {
            return Err(SolverError::Partition(format!("{c} spans several partitions")));
        }
        let target = parts.first().copied().unwrap_or(0);
        out[target].constraints.push(c.clone());
    }
    Ok(out)
}

/// Solve every partition concurrently and merge the plans.
///
/// The merged outcome has no plan as soon as one partition has none.
pub async fn solve_partitioned(
    model: &Model,
    constraints: &[SatConstraint],
    partitions: &[BTreeSet<NodeId>],
    config: &SolverConfig,
) -> SolverResult<SolveOutcome> {
    let started = Instant::now();
    let instances = split_instance(model, constraints, partitions)?;
    info!(partitions = instances.len(), "solving partitions");

    let mut handles = Vec::with_capacity(instances.len());
    for part in instances {
        let config = config.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            ReconfigurationAlgorithm::new(config).solve(&part.model, &part.constraints)
        }));
    }
    let mut outcomes = Vec::with_capacity(handles.len());
    for h in handles {
        let outcome = h
            .await
            .map_err(|e| SolverError::Partition(e.to_string()))??;
        outcomes.push(outcome);
    }

    let mut stats = SolvingStatistics {
        optimal: true,
        cost: Some(0),
        ..SolvingStatistics::default()
    };
    let mut plan = Some(ReconfigurationPlan::new(model.clone()));
    for (i, o) in outcomes.into_iter().enumerate() {
        stats.nodes += o.stats.nodes;
        stats.backtracks += o.stats.backtracks;
        stats.fails += o.stats.fails;
        stats.solutions += o.stats.solutions;
        stats.time_limit_reached |= o.stats.time_limit_reached;
        stats.optimal &= o.stats.optimal;
        stats.cost = stats.cost.zip(o.stats.cost).map(|(a, b)| a + b);
        match o.plan {
            Some(sub) => {
                if let Some(p) = plan.as_mut() {
                    for a in sub.actions() {
                        p.add(a.clone());
                    }
                }
            }
            None => {
                warn!(partition = i, "partition has no plan");
                plan = None;
            }
        }
    }
    if plan.is_none() {
        stats.optimal = false;
        stats.cost = None;
    }
    if let Some(p) = &plan {
        if let Err(action) = p.apply_detailed() {
            return Err(SolverError::InconsistentPlan(format!(
                "{action} can not be applied on the merged plan"
            )));
        }
    }
    stats.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        actions = plan.as_ref().map_or(0, |p| p.size()),
        elapsed_ms = stats.elapsed_ms,
        "partitions merged"
    );
    Ok(SolveOutcome { plan, stats })
}
