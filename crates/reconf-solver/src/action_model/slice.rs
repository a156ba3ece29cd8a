//! Residency of a VM on a node over a time interval.

use crate::kernel::arith::Sum;
use crate::kernel::{Solver, VarId};

/// A VM occupying the node `host` during `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub host: VarId,
    pub start: VarId,
    pub end: VarId,
    pub duration: VarId,
}

impl Slice {
    /// A slice over existing host, start and end variables; its duration
    /// is derived with `start + duration = end`.
    pub fn new(solver: &mut Solver, name: &str, host: VarId, start: VarId, end: VarId, horizon: i32) -> Self {
        let duration = solver
            .store_mut()
            .new_bounded(format!("{name}.duration"), 0, horizon);
        solver.post(Sum::new(vec![start, duration], end));
        Self {
            host,
            start,
            end,
            duration,
        }
    }

    /// Residency before an action: from time 0 on the current host until
    /// the action ends.
    pub fn consuming(solver: &mut Solver, name: &str, current: i32, action_end: VarId, horizon: i32) -> Self {
        let st = solver.store_mut();
        let host = st.constant(current);
        let start = st.constant(0);
        Self::new(solver, &format!("{name}.cSlice"), host, start, action_end, horizon)
    }

    /// Residency after an action: from the action start on a host to be
    /// decided until the end of the plan.
    pub fn demanding(solver: &mut Solver, name: &str, nb_nodes: usize, action_start: VarId, horizon: i32) -> Self {
        let st = solver.store_mut();
        let host = st.new_range(format!("{name}.host"), 0, nb_nodes as i32 - 1);
        let end = st.constant(horizon);
        Self::new(solver, &format!("{name}.dSlice"), host, action_start, end, horizon)
    }
}
