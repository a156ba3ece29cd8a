//! Node action model.

use reconf_model::{Action, NodeId};

use super::links::NodeTransitionLink;
use crate::kernel::arith::Sum;
use crate::kernel::{Solution, Solver, VarId};

/// Boot or shutdown decision of one node.
///
/// `state` is 1 when the node is online at the end of the plan. The node
/// may host VMs during `[hosting_start, hosting_end)`.
#[derive(Debug, Clone)]
pub struct NodeActionModel {
    pub node: NodeId,
    pub initially_online: bool,
    pub state: VarId,
    pub start: VarId,
    pub end: VarId,
    pub duration: VarId,
    pub hosting_start: VarId,
    pub hosting_end: VarId,
}

impl NodeActionModel {
    /// Variables of a node whose transition takes `d` time units when it
    /// happens.
    pub fn new(solver: &mut Solver, node: NodeId, initially_online: bool, d: i32, horizon: i32) -> Self {
        let st = solver.store_mut();
        let state = st.new_range(format!("{node}.state"), 0, 1);
        let start = st.new_bounded(format!("{node}.start"), 0, horizon);
        let end = st.new_bounded(format!("{node}.end"), 0, horizon);
        let duration = st.new_enumerated(format!("{node}.duration"), &[0, d]);
        let hosting_start = st.new_bounded(format!("{node}.hostingStart"), 0, horizon);
        let hosting_end = st.new_bounded(format!("{node}.hostingEnd"), 0, horizon);
        solver.post(Sum::new(vec![start, duration], end));
        solver.post(NodeTransitionLink {
            bootable: !initially_online,
            state,
            start,
            end,
            duration,
            hosting_start,
            hosting_end,
            d,
            horizon,
        });
        Self {
            node,
            initially_online,
            state,
            start,
            end,
            duration,
            hosting_start,
            hosting_end,
        }
    }

    pub fn initial_state(&self) -> i32 {
        i32::from(self.initially_online)
    }

    /// The boot or shutdown action selected by a solution, if any.
    pub fn action(&self, sol: &Solution) -> Option<Action> {
        let online = sol.value(self.state) == 1;
        let (start, end) = (sol.value(self.start), sol.value(self.end));
        match (self.initially_online, online) {
            (false, true) => Some(Action::boot_node(self.node, start, end)),
            (true, false) => Some(Action::shutdown_node(self.node, start, end)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{dfs, Goal, Limits, SearchOutcome, SearchStats};

    fn solve(solver: &mut Solver, goals: &[Goal]) -> Solution {
        let mut stats = SearchStats::default();
        match dfs(solver, goals, &Limits::default(), &mut stats) {
            SearchOutcome::Solution(sol) => sol,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn booting_node_hosts_after_boot() {
        let mut s = Solver::new();
        let m = NodeActionModel::new(&mut s, NodeId(0), false, 3, 10);
        s.store_mut().instantiate(m.state, 1).unwrap();
        let sol = solve(&mut s, &[]);
        assert_eq!(sol.value(m.duration), 3);
        assert_eq!(sol.value(m.hosting_start), sol.value(m.end));
        assert_eq!(sol.value(m.hosting_end), 10);
        assert_eq!(m.action(&sol), Some(Action::boot_node(NodeId(0), 0, 3)));
    }

    #[test]
    fn offline_node_never_hosts() {
        let mut s = Solver::new();
        let m = NodeActionModel::new(&mut s, NodeId(0), false, 3, 10);
        let goal = Goal::new("state", vec![m.state]);
        let sol = solve(&mut s, &[goal]);
        assert_eq!(sol.value(m.state), 0);
        assert_eq!((sol.value(m.hosting_start), sol.value(m.hosting_end)), (0, 0));
        assert_eq!(m.action(&sol), None);
    }

    #[test]
    fn shutdown_stops_hosting_at_start() {
        let mut s = Solver::new();
        let m = NodeActionModel::new(&mut s, NodeId(4), true, 2, 10);
        s.store_mut().update_ub(m.hosting_end, 5).unwrap();
        s.propagate().unwrap();
        assert_eq!(s.value(m.state), Some(0));
        assert_eq!(s.value(m.duration), Some(2));
        let sol = solve(&mut s, &[]);
        assert_eq!(sol.value(m.hosting_end), sol.value(m.start));
        assert_eq!(
            m.action(&sol),
            Some(Action::shutdown_node(NodeId(4), 0, 2))
        );
    }

    #[test]
    fn staying_online_hosts_whole_plan() {
        let mut s = Solver::new();
        let m = NodeActionModel::new(&mut s, NodeId(1), true, 2, 8);
        s.store_mut().instantiate(m.state, 1).unwrap();
        s.propagate().unwrap();
        assert_eq!(s.value(m.hosting_end), Some(8));
        assert_eq!(s.value(m.end), Some(0));
    }
}
