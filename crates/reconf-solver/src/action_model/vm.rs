//! VM action models, one per state transition.

use std::collections::BTreeMap;

use reconf_model::{Action, Mapping, NodeId, VmId, VmState};

use super::links::RelocationLink;
use super::slice::Slice;
use crate::error::{SolverError, SolverResult};
use crate::kernel::arith::Sum;
use crate::kernel::{Solution, Solver, VarId};

/// What happens to a VM between the source and the destination model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmTransition {
    /// Running before and after: stays on `on` or migrates.
    Relocate { on: NodeId },
    Boot,
    Resume { from: NodeId },
    Shutdown { from: NodeId },
    Suspend { on: NodeId },
    Kill { from: Option<NodeId> },
    Forge,
    StayReady,
    StaySleeping { on: NodeId },
}

impl VmTransition {
    /// The transition leading a VM of the mapping to `next`.
    ///
    /// `Ok(None)` when nothing has to be modelled: an absent VM that must
    /// stay absent.
    pub fn between(map: &Mapping, vm: VmId, next: VmState) -> SolverResult<Option<Self>> {
        let current = map.vm_state(vm);
        let location = map.vm_location(vm);
        let transition = match (current, location, next) {
            (Some(VmState::Running), Some(on), VmState::Running) => Self::Relocate { on },
            (Some(VmState::Running), Some(from), VmState::Ready) => Self::Shutdown { from },
            (Some(VmState::Running), Some(on), VmState::Sleeping) => Self::Suspend { on },
            (Some(VmState::Sleeping), Some(from), VmState::Running) => Self::Resume { from },
            (Some(VmState::Sleeping), Some(on), VmState::Sleeping) => Self::StaySleeping { on },
            (Some(VmState::Ready), _, VmState::Running) => Self::Boot,
            (Some(VmState::Ready), _, VmState::Ready) => Self::StayReady,
            (Some(_), from, VmState::Killed) => Self::Kill { from },
            (None, _, VmState::Ready) => Self::Forge,
            (None, _, VmState::Killed) => return Ok(None),
            (from, _, to) => {
                return Err(SolverError::UnsupportedTransition { vm, from, to });
            }
        };
        Ok(Some(transition))
    }

    /// State of the VM once the transition is over.
    pub fn next_state(self) -> VmState {
        match self {
            Self::Relocate { .. } | Self::Boot | Self::Resume { .. } => VmState::Running,
            Self::Shutdown { .. } | Self::Forge | Self::StayReady => VmState::Ready,
            Self::Suspend { .. } | Self::StaySleeping { .. } => VmState::Sleeping,
            Self::Kill { .. } => VmState::Killed,
        }
    }

    /// Node the VM occupies before the transition, when it leaves it or
    /// may leave it.
    pub fn current_host(self) -> Option<NodeId> {
        match self {
            Self::Relocate { on } | Self::Suspend { on } | Self::StaySleeping { on } => Some(on),
            Self::Resume { from } | Self::Shutdown { from } => Some(from),
            Self::Kill { from } => from,
            Self::Boot | Self::Forge | Self::StayReady => None,
        }
    }

    /// Whether the transition is a no-op in the plan.
    pub fn is_stay(self) -> bool {
        matches!(self, Self::StayReady | Self::StaySleeping { .. })
    }
}

/// Variables of one VM transition.
///
/// The consuming slice covers the residency on the current host until the
/// action ends; the demanding slice the residency on the next host from
/// the action start. Only VMs running at the end of the plan demand.
#[derive(Debug, Clone)]
pub struct VmActionModel {
    pub vm: VmId,
    pub transition: VmTransition,
    pub state: VarId,
    pub start: VarId,
    pub end: VarId,
    pub duration: VarId,
    pub cslice: Option<Slice>,
    pub dslice: Option<Slice>,
}

impl VmActionModel {
    pub fn new(
        solver: &mut Solver,
        vm: VmId,
        transition: VmTransition,
        d: i32,
        horizon: i32,
        node_index: &BTreeMap<NodeId, usize>,
    ) -> SolverResult<Self> {
        let index = |n: NodeId| -> SolverResult<i32> {
            node_index
                .get(&n)
                .map(|i| *i as i32)
                .ok_or(SolverError::UnknownNode(n))
        };
        let name = vm.to_string();
        let st = solver.store_mut();
        let state = st.constant(transition.next_state().code());
        let (start, end, duration) = if transition.is_stay() {
            (st.constant(0), st.constant(0), st.constant(0))
        } else {
            let start = st.new_bounded(format!("{name}.start"), 0, horizon);
            let end = st.new_bounded(format!("{name}.end"), 0, horizon);
            let duration = match transition {
                VmTransition::Relocate { .. } => {
                    st.new_enumerated(format!("{name}.duration"), &[0, d])
                }
                _ => st.constant(d),
            };
            solver.post(Sum::new(vec![start, duration], end));
            (start, end, duration)
        };

        let nb_nodes = node_index.len();
        let mut cslice = None;
        let mut dslice = None;
        match transition {
            VmTransition::Relocate { on } => {
                let current = index(on)?;
                let c = Slice::consuming(solver, &name, current, end, horizon);
                let ds = Slice::demanding(solver, &name, nb_nodes, start, horizon);
                solver.post(RelocationLink {
                    host: ds.host,
                    current,
                    start,
                    duration,
                    d,
                });
                cslice = Some(c);
                dslice = Some(ds);
            }
            VmTransition::Boot => {
                dslice = Some(Slice::demanding(solver, &name, nb_nodes, start, horizon));
            }
            VmTransition::Resume { from } => {
                cslice = Some(Slice::consuming(solver, &name, index(from)?, end, horizon));
                dslice = Some(Slice::demanding(solver, &name, nb_nodes, start, horizon));
            }
            VmTransition::Shutdown { from: on }
            | VmTransition::Suspend { on }
            | VmTransition::Kill { from: Some(on) } => {
                cslice = Some(Slice::consuming(solver, &name, index(on)?, end, horizon));
            }
            VmTransition::StaySleeping { on } => {
                index(on)?;
            }
            VmTransition::Kill { from: None } | VmTransition::Forge | VmTransition::StayReady => {}
        }

        Ok(Self {
            vm,
            transition,
            state,
            start,
            end,
            duration,
            cslice,
            dslice,
        })
    }

    /// Host index selected by a solution for the demanding slice.
    pub fn next_host(&self, sol: &Solution, nodes: &[NodeId]) -> Option<NodeId> {
        let h = sol.value(self.dslice?.host);
        usize::try_from(h).ok().and_then(|h| nodes.get(h)).copied()
    }

    /// The action selected by a solution, if the VM does anything.
    pub fn action(&self, sol: &Solution, nodes: &[NodeId]) -> Option<Action> {
        let (start, end) = (sol.value(self.start), sol.value(self.end));
        let vm = self.vm;
        match self.transition {
            VmTransition::Relocate { on } => {
                let to = self.next_host(sol, nodes)?;
                (to != on).then(|| Action::migrate_vm(vm, on, to, start, end))
            }
            VmTransition::Boot => {
                let to = self.next_host(sol, nodes)?;
                Some(Action::boot_vm(vm, to, start, end))
            }
            VmTransition::Resume { from } => {
                let to = self.next_host(sol, nodes)?;
                Some(Action::resume_vm(vm, from, to, start, end))
            }
            VmTransition::Shutdown { from } => Some(Action::shutdown_vm(vm, from, start, end)),
            VmTransition::Suspend { on } => Some(Action::suspend_vm(vm, on, on, start, end)),
            VmTransition::Kill { from } => Some(Action::kill_vm(vm, from, start, end)),
            VmTransition::Forge => Some(Action::forge_vm(vm, start, end)),
            VmTransition::StayReady | VmTransition::StaySleeping { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{dfs, Goal, Limits, SearchOutcome, SearchStats};

    fn nodes(n: u32) -> (Vec<NodeId>, BTreeMap<NodeId, usize>) {
        let list: Vec<NodeId> = (0..n).map(NodeId).collect();
        let index = list.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        (list, index)
    }

    fn solve(solver: &mut Solver, goals: &[Goal]) -> Solution {
        let mut stats = SearchStats::default();
        match dfs(solver, goals, &Limits::default(), &mut stats) {
            SearchOutcome::Solution(sol) => sol,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn transitions_from_mapping() {
        let mut map = Mapping::new();
        map.add_online_node(NodeId(0));
        map.add_running_vm(VmId(0), NodeId(0));
        map.add_sleeping_vm(VmId(1), NodeId(0));
        map.add_ready_vm(VmId(2));

        let t = |vm, next| VmTransition::between(&map, VmId(vm), next).unwrap();
        assert_eq!(t(0, VmState::Running), Some(VmTransition::Relocate { on: NodeId(0) }));
        assert_eq!(t(0, VmState::Sleeping), Some(VmTransition::Suspend { on: NodeId(0) }));
        assert_eq!(t(1, VmState::Running), Some(VmTransition::Resume { from: NodeId(0) }));
        assert_eq!(t(1, VmState::Killed), Some(VmTransition::Kill { from: Some(NodeId(0)) }));
        assert_eq!(t(2, VmState::Running), Some(VmTransition::Boot));
        assert_eq!(t(2, VmState::Killed), Some(VmTransition::Kill { from: None }));
        assert_eq!(t(7, VmState::Ready), Some(VmTransition::Forge));
        assert_eq!(t(7, VmState::Killed), None);

        assert!(matches!(
            VmTransition::between(&map, VmId(2), VmState::Sleeping),
            Err(SolverError::UnsupportedTransition { from: Some(VmState::Ready), .. })
        ));
        assert!(matches!(
            VmTransition::between(&map, VmId(9), VmState::Running),
            Err(SolverError::UnsupportedTransition { from: None, .. })
        ));
    }

    #[test]
    fn staying_put_is_free() {
        let (list, index) = nodes(3);
        let mut s = Solver::new();
        let m = VmActionModel::new(
            &mut s,
            VmId(0),
            VmTransition::Relocate { on: NodeId(1) },
            5,
            20,
            &index,
        )
        .unwrap();
        let host = m.dslice.unwrap().host;
        s.store_mut().instantiate(host, 1).unwrap();
        let sol = solve(&mut s, &[]);
        assert_eq!(sol.value(m.duration), 0);
        assert_eq!(sol.value(m.start), 0);
        assert_eq!(m.action(&sol, &list), None);
    }

    #[test]
    fn moving_costs_the_migration() {
        let (list, index) = nodes(3);
        let mut s = Solver::new();
        let m = VmActionModel::new(
            &mut s,
            VmId(0),
            VmTransition::Relocate { on: NodeId(1) },
            5,
            20,
            &index,
        )
        .unwrap();
        let host = m.dslice.unwrap().host;
        s.store_mut().remove(host, 1).unwrap();
        s.propagate().unwrap();
        assert_eq!(s.value(m.duration), Some(5));
        let sol = solve(&mut s, &[Goal::new("host", vec![host]).max_value()]);
        assert_eq!(
            m.action(&sol, &list),
            Some(Action::migrate_vm(VmId(0), NodeId(1), NodeId(2), 0, 5))
        );
        let c = m.cslice.unwrap();
        assert_eq!(sol.value(c.end), 5);
        assert_eq!(sol.value(c.host), 1);
    }

    #[test]
    fn shutdown_only_consumes() {
        let (list, index) = nodes(2);
        let mut s = Solver::new();
        let m = VmActionModel::new(
            &mut s,
            VmId(3),
            VmTransition::Shutdown { from: NodeId(0) },
            2,
            10,
            &index,
        )
        .unwrap();
        assert!(m.dslice.is_none());
        let sol = solve(&mut s, &[]);
        assert_eq!(
            m.action(&sol, &list),
            Some(Action::shutdown_vm(VmId(3), NodeId(0), 0, 2))
        );
    }

    #[test]
    fn unknown_host_is_rejected() {
        let (_, index) = nodes(1);
        let mut s = Solver::new();
        let r = VmActionModel::new(
            &mut s,
            VmId(0),
            VmTransition::Shutdown { from: NodeId(5) },
            1,
            4,
            &index,
        );
        assert!(matches!(r, Err(SolverError::UnknownNode(NodeId(5)))));
    }
}
