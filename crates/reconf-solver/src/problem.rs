//! Reconfiguration problem: the action models of a source model and the
//! links between them.
//!
//! - Next states: the state every VM must reach, from the state
//!   constraints (`running`, `ready`, `sleeping`, `killed`).
//! - Horizon: unless configured, the sum of every maximal action
//!   duration, enough to run all the actions one after the other.
//! - Links: consuming slices end before their host stops hosting,
//!   demanding slices start once their host hosts, offline nodes host
//!   nothing, and resource views are packed over the demanding slices.
//! - Materialization: the actions of a solution, as a plan on the source.

use std::collections::{BTreeMap, BTreeSet};

use reconf_model::{
    Action, ActionKind, Model, NodeId, ReconfigurationPlan, SatConstraint, VmId, VmState,
};
use tracing::debug;

use crate::action_model::{
    ArrivalWindow, NodeActionModel, NodeHosting, VmActionModel, VmTransition,
};
use crate::config::{DurationsConfig, SolverConfig};
use crate::error::{SolverError, SolverResult};
use crate::kernel::arith::Leq;
use crate::kernel::packing::BinPacking;
use crate::kernel::{Solution, Solver, VarId};

/// Attribute a VM needs to be forged.
pub const TEMPLATE_ATTRIBUTE: &str = "template";

/// State of every VM at the end of the plan.
///
/// VMs keep their current state unless a state constraint says otherwise.
/// Two state constraints disagreeing on a VM fail the second one.
pub fn next_states(
    mo: &Model,
    constraints: &[SatConstraint],
) -> SolverResult<BTreeMap<VmId, VmState>> {
    let map = mo.mapping();
    let mut states: BTreeMap<VmId, VmState> = map
        .all_vms()
        .into_iter()
        .filter_map(|vm| Some((vm, map.vm_state(vm)?)))
        .collect();
    let mut demanded: BTreeMap<VmId, VmState> = BTreeMap::new();
    for c in constraints {
        let (vm, wanted) = match c {
            SatConstraint::Running { vm } => (*vm, VmState::Running),
            SatConstraint::Ready { vm } => (*vm, VmState::Ready),
            SatConstraint::Sleeping { vm } => (*vm, VmState::Sleeping),
            SatConstraint::Killed { vm } => (*vm, VmState::Killed),
            _ => continue,
        };
        match demanded.insert(vm, wanted) {
            Some(prev) if prev != wanted => {
                return Err(SolverError::Injection {
                    constraint: c.clone(),
                    reason: format!("{vm} is already required to be {prev}"),
                });
            }
            _ => {
                states.insert(vm, wanted);
            }
        }
    }
    Ok(states)
}

fn vm_duration(
    durations: &DurationsConfig,
    mo: &Model,
    vm: VmId,
    t: VmTransition,
) -> SolverResult<i32> {
    let eval = match t {
        VmTransition::Relocate { .. } => &durations.migrate_vm,
        VmTransition::Boot => &durations.boot_vm,
        VmTransition::Resume { .. } => &durations.resume_vm,
        VmTransition::Shutdown { .. } => &durations.shutdown_vm,
        VmTransition::Suspend { .. } => &durations.suspend_vm,
        VmTransition::Kill { .. } => &durations.kill_vm,
        VmTransition::Forge => &durations.forge_vm,
        VmTransition::StayReady | VmTransition::StaySleeping { .. } => return Ok(0),
    };
    eval.for_vm(mo, vm)
}

/// Action models of every node and VM of a source model, linked together.
#[derive(Debug)]
pub struct ReconfigurationProblem {
    source: Model,
    solver: Solver,
    horizon: i32,
    nodes: Vec<NodeId>,
    node_index: BTreeMap<NodeId, usize>,
    node_models: Vec<NodeActionModel>,
    vm_models: BTreeMap<VmId, VmActionModel>,
    /// Demand raised above the consumption, per view and VM.
    demands: BTreeMap<String, BTreeMap<VmId, i64>>,
}

impl ReconfigurationProblem {
    pub fn build(
        source: &Model,
        next: &BTreeMap<VmId, VmState>,
        config: &SolverConfig,
    ) -> SolverResult<Self> {
        let map = source.mapping();
        let durations = &config.durations;

        let nodes: Vec<NodeId> = map.all_nodes().into_iter().collect();
        let node_index: BTreeMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

        let mut node_durations = Vec::with_capacity(nodes.len());
        for n in &nodes {
            let eval = if map.is_online(*n) {
                &durations.shutdown_node
            } else {
                &durations.boot_node
            };
            node_durations.push(eval.for_node(source, *n)?);
        }

        let mut transitions = Vec::new();
        for (vm, state) in next {
            let Some(t) = VmTransition::between(map, *vm, *state)? else {
                continue;
            };
            if t == VmTransition::Forge && source.attributes().get(*vm, TEMPLATE_ATTRIBUTE).is_none() {
                return Err(SolverError::MissingTemplate(*vm));
            }
            transitions.push((*vm, t, vm_duration(durations, source, *vm, t)?));
        }

        let horizon = match config.max_end {
            Some(h) => i32::try_from(h).unwrap_or(i32::MAX / 4),
            None => {
                let total: i64 = node_durations.iter().map(|d| *d as i64).sum::<i64>()
                    + transitions.iter().map(|(_, _, d)| *d as i64).sum::<i64>();
                total.min(i32::MAX as i64 / 4) as i32
            }
        };

        let mut solver = Solver::new();
        let node_models: Vec<NodeActionModel> = nodes
            .iter()
            .zip(&node_durations)
            .map(|(n, d)| NodeActionModel::new(&mut solver, *n, map.is_online(*n), *d, horizon))
            .collect();
        let mut vm_models = BTreeMap::new();
        for (vm, t, d) in transitions {
            let m = VmActionModel::new(&mut solver, vm, t, d, horizon, &node_index)?;
            vm_models.insert(vm, m);
        }

        let mut problem = Self {
            source: source.clone(),
            solver,
            horizon,
            nodes,
            node_index,
            node_models,
            vm_models,
            demands: BTreeMap::new(),
        };
        problem.link()?;
        debug!(
            nodes = problem.nodes.len(),
            vms = problem.vm_models.len(),
            horizon,
            "problem built"
        );
        Ok(problem)
    }

    fn link(&mut self) -> SolverResult<()> {
        let hosting_starts: Vec<VarId> = self.node_models.iter().map(|m| m.hosting_start).collect();
        let mut hosts: Vec<VarId> = Vec::new();
        let mut posted = Vec::new();
        let mut sleeping_on = Vec::new();
        for m in self.vm_models.values() {
            if let (Some(c), Some(on)) = (m.cslice, m.transition.current_host()) {
                let idx = self.node_index.get(&on).ok_or(SolverError::UnknownNode(on))?;
                posted.push(Leq::new(c.end, self.node_models[*idx].hosting_end, 0));
            }
            if let VmTransition::Suspend { on } | VmTransition::StaySleeping { on } = m.transition {
                sleeping_on.push(on);
            }
            if let Some(d) = m.dslice {
                hosts.push(d.host);
                self.solver.post(ArrivalWindow {
                    host: d.host,
                    start: d.start,
                    hosting_starts: hosting_starts.clone(),
                });
            }
        }
        for p in posted {
            self.solver.post(p);
        }
        for on in sleeping_on {
            let state = self.node_model(on).ok_or(SolverError::UnknownNode(on))?.state;
            self.solver
                .store_mut()
                .instantiate(state, 1)
                .map_err(|_| SolverError::Contradiction)?;
        }
        for (i, m) in self.node_models.iter().enumerate() {
            self.solver.post(NodeHosting {
                node: i as i32,
                state: m.state,
                hosts: hosts.clone(),
            });
        }
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn source(&self) -> &Model {
        &self.source
    }

    pub fn solver(&self) -> &Solver {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut Solver {
        &mut self.solver
    }

    pub fn horizon(&self) -> i32 {
        self.horizon
    }

    /// Nodes in index order: host variables range over these indices.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn node_index(&self, node: NodeId) -> Option<usize> {
        self.node_index.get(&node).copied()
    }

    pub fn node_model(&self, node: NodeId) -> Option<&NodeActionModel> {
        self.node_models.get(self.node_index(node)?)
    }

    pub fn node_models(&self) -> &[NodeActionModel] {
        &self.node_models
    }

    pub fn vm_model(&self, vm: VmId) -> Option<&VmActionModel> {
        self.vm_models.get(&vm)
    }

    pub fn vm_models(&self) -> impl Iterator<Item = &VmActionModel> {
        self.vm_models.values()
    }

    /// Host variable of a VM running at the end of the plan.
    pub fn host_var(&self, vm: VmId) -> Option<VarId> {
        Some(self.vm_models.get(&vm)?.dslice?.host)
    }

    /// Host variables of the VMs of a set running at the end of the plan.
    pub fn host_vars(&self, vms: &BTreeSet<VmId>) -> Vec<VarId> {
        vms.iter().filter_map(|vm| self.host_var(*vm)).collect()
    }

    /// Index set of a node set, nodes outside the model skipped.
    pub fn node_indices(&self, nodes: &BTreeSet<NodeId>) -> BTreeSet<i32> {
        nodes
            .iter()
            .filter_map(|n| self.node_index(*n))
            .map(|i| i as i32)
            .collect()
    }

    // ── Resources ─────────────────────────────────────────────────

    /// Make a VM demand at least `amount` of a resource at the end of the
    /// plan.
    pub fn raise_demand(&mut self, resource: &str, vm: VmId, amount: i64) {
        let entry = self
            .demands
            .entry(resource.to_string())
            .or_default()
            .entry(vm)
            .or_insert(amount);
        *entry = (*entry).max(amount);
    }

    /// What a running VM needs of a resource at the end of the plan.
    pub fn demand(&self, resource: &str, vm: VmId) -> i64 {
        let consumption = self
            .source
            .view(resource)
            .map(|v| v.consumption(vm))
            .unwrap_or(0);
        let raised = self
            .demands
            .get(resource)
            .and_then(|d| d.get(&vm))
            .copied()
            .unwrap_or(0);
        consumption.max(raised)
    }

    /// One bin packing per resource view over the demanding slices.
    pub fn post_packing(&mut self) {
        let running: Vec<(VmId, VarId)> = self
            .vm_models
            .values()
            .filter_map(|m| Some((m.vm, m.dslice?.host)))
            .collect();
        let names: Vec<String> = self.source.views().map(|v| v.name().to_string()).collect();
        for name in names {
            let Ok(view) = self.source.view(&name) else {
                continue;
            };
            let capacities: Vec<i64> = self.nodes.iter().map(|n| view.capacity(*n)).collect();
            let sizes: Vec<i64> = running.iter().map(|(vm, _)| self.demand(&name, *vm)).collect();
            let bins = running.iter().map(|(_, h)| *h).collect();
            debug!(view = %name, items = sizes.len(), "resource packing");
            self.solver.post(BinPacking::new("packing", bins, sizes, capacities));
        }
    }

    /// Running VMs hosted on a node whose capacity is exceeded in some
    /// view, counting raised demands.
    pub fn overloaded_vms(&self) -> BTreeSet<VmId> {
        let map = self.source.mapping();
        let mut out = BTreeSet::new();
        for view in self.source.views() {
            for n in map.online_nodes() {
                let vms = map.running_vms_on(*n);
                let load: i64 = vms.iter().map(|vm| self.demand(view.name(), *vm)).sum();
                if load > view.capacity(*n) {
                    out.extend(vms);
                }
            }
        }
        out
    }

    // ── Repair ────────────────────────────────────────────────────

    /// Keep every running VM outside `misplaced` on its current host.
    /// Returns the number of VMs fixed.
    pub fn fix_stable_hosts(&mut self, misplaced: &BTreeSet<VmId>) -> SolverResult<usize> {
        let mut fixed = Vec::new();
        for m in self.vm_models.values() {
            if misplaced.contains(&m.vm) {
                continue;
            }
            if let (VmTransition::Relocate { on }, Some(d)) = (m.transition, m.dslice) {
                let idx = self.node_index(on).ok_or(SolverError::UnknownNode(on))?;
                fixed.push((d.host, idx as i32));
            }
        }
        for (host, idx) in &fixed {
            self.solver
                .store_mut()
                .instantiate(*host, *idx)
                .map_err(|_| SolverError::Contradiction)?;
        }
        Ok(fixed.len())
    }

    // ── Materialization ───────────────────────────────────────────

    /// The plan selected by a solution.
    ///
    /// Actions are added node boots first, then VM actions and resource
    /// allocations, then node shutdowns, so that actions sharing start
    /// and end times replay in a valid order.
    pub fn build_plan(&self, sol: &Solution) -> ReconfigurationPlan {
        let mut plan = ReconfigurationPlan::new(self.source.clone());
        let node_actions: Vec<Action> = self
            .node_models
            .iter()
            .filter_map(|m| m.action(sol))
            .collect();
        let (boots, shutdowns): (Vec<Action>, Vec<Action>) = node_actions
            .into_iter()
            .partition(|a| matches!(a.kind, ActionKind::BootNode { .. }));
        for a in boots {
            plan.add(a);
        }
        for m in self.vm_models.values() {
            if let Some(a) = m.action(sol, &self.nodes) {
                plan.add(a);
            }
        }
        for (resource, vms) in &self.demands {
            let Ok(view) = self.source.view(resource) else {
                continue;
            };
            for (vm, amount) in vms {
                let Some(m) = self.vm_models.get(vm) else {
                    continue;
                };
                let Some(node) = m.next_host(sol, &self.nodes) else {
                    continue;
                };
                if *amount > view.consumption(*vm) {
                    let at = sol.value(m.end);
                    plan.add(Action::allocate(*vm, node, resource, *amount, at, at));
                }
            }
        }
        for a in shutdowns {
            plan.add(a);
        }
        plan
    }
}
