//! Depth-first search.
//!
//! Goals are explored in order: the first goal holding an uninstantiated
//! variable provides the next decision `x = v`, refuted by `x != v` on
//! backtrack. Each decision and each refutation lives in its own world.
//! The limits are checked at every node; reaching one stops the search
//! without error.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tracing::trace;

use super::solver::Solver;
use super::store::VarId;

/// How the next variable of a goal is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarSelector {
    InputOrder,
    /// Smallest domain first, input order on ties.
    MinDomain,
}

/// How the value of a decision is picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSelector {
    Min,
    Max,
    /// A preferred value per variable, the minimum when it is gone.
    Preferred(BTreeMap<VarId, i32>),
}

/// An ordered group of branching variables.
#[derive(Debug, Clone)]
pub struct Goal {
    pub name: &'static str,
    pub vars: Vec<VarId>,
    pub var_selector: VarSelector,
    pub value_selector: ValueSelector,
}

impl Goal {
    pub fn new(name: &'static str, vars: Vec<VarId>) -> Self {
        Self {
            name,
            vars,
            var_selector: VarSelector::InputOrder,
            value_selector: ValueSelector::Min,
        }
    }

    pub fn min_domain(mut self) -> Self {
        self.var_selector = VarSelector::MinDomain;
        self
    }

    pub fn preferring(mut self, preferred: BTreeMap<VarId, i32>) -> Self {
        self.value_selector = ValueSelector::Preferred(preferred);
        self
    }

    pub fn max_value(mut self) -> Self {
        self.value_selector = ValueSelector::Max;
        self
    }

    fn decision(&self, solver: &Solver) -> Option<(VarId, i32)> {
        let store = solver.store();
        let open = self.vars.iter().filter(|v| !store.is_instantiated(**v));
        let var = match self.var_selector {
            VarSelector::InputOrder => open.copied().next(),
            VarSelector::MinDomain => open.copied().min_by_key(|v| store.size(*v)),
        }?;
        let val = match &self.value_selector {
            ValueSelector::Min => store.lb(var),
            ValueSelector::Max => store.ub(var),
            ValueSelector::Preferred(pref) => match pref.get(&var) {
                Some(p) if store.contains(var, *p) => *p,
                _ => store.lb(var),
            },
        };
        Some((var, val))
    }
}

/// Budget of one search.
#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub deadline: Option<Instant>,
    pub max_nodes: Option<u64>,
}

impl Limits {
    fn reached(&self, stats: &SearchStats) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.max_nodes.is_some_and(|m| stats.nodes >= m)
    }
}

/// Counters accumulated across searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub nodes: u64,
    pub backtracks: u64,
    pub fails: u64,
    pub solutions: u64,
}

/// Value of every variable of the store at a solution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    values: Vec<i32>,
}

impl Solution {
    fn capture(solver: &Solver) -> Self {
        let store = solver.store();
        let values = (0..store.var_count())
            .map(|i| store.lb(VarId(i)))
            .collect();
        Self { values }
    }

    pub fn value(&self, v: VarId) -> i32 {
        self.values[v.index()]
    }
}

/// How a search ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Solution(Solution),
    /// The tree was fully explored without a solution.
    Exhausted,
    LimitReached,
}

#[derive(Debug, Clone, Copy)]
struct Decision {
    var: VarId,
    val: i32,
    refuted: bool,
}

/// Search the first solution below the current world.
///
/// Worlds opened by the search are left open when a solution is found;
/// callers restore their depth with `Store::pop_to`. Every store variable
/// is instantiated at a solution: the goals are followed by an implicit
/// goal over the whole store.
pub fn dfs(
    solver: &mut Solver,
    goals: &[Goal],
    limits: &Limits,
    stats: &mut SearchStats,
) -> SearchOutcome {
    let catch_all = Goal::new("all", (0..solver.store().var_count()).map(VarId).collect());
    let base = solver.store().world_depth();
    let mut stack: Vec<Decision> = Vec::new();

    if solver.propagate().is_err() {
        stats.fails += 1;
        return SearchOutcome::Exhausted;
    }

    loop {
        if limits.reached(stats) {
            solver.store_mut().pop_to(base);
            return SearchOutcome::LimitReached;
        }
        let next = goals
            .iter()
            .chain(std::iter::once(&catch_all))
            .find_map(|g| g.decision(solver));
        let Some((var, val)) = next else {
            stats.solutions += 1;
            trace!(nodes = stats.nodes, "solution");
            return SearchOutcome::Solution(Solution::capture(solver));
        };

        stats.nodes += 1;
        solver.store_mut().world_push();
        stack.push(Decision {
            var,
            val,
            refuted: false,
        });
        let ok = solver
            .store_mut()
            .instantiate(var, val)
            .and_then(|_| solver.propagate())
            .is_ok();
        if ok {
            continue;
        }
        stats.fails += 1;
        if !backtrack(solver, &mut stack, stats) {
            solver.store_mut().pop_to(base);
            return SearchOutcome::Exhausted;
        }
    }
}

/// Pop decisions until a refutation holds. Returns `false` once the
/// stack is empty.
fn backtrack(solver: &mut Solver, stack: &mut Vec<Decision>, stats: &mut SearchStats) -> bool {
    while let Some(d) = stack.pop() {
        solver.store_mut().world_pop();
        stats.backtracks += 1;
        if d.refuted {
            continue;
        }
        solver.store_mut().world_push();
        stack.push(Decision { refuted: true, ..d });
        let ok = solver
            .store_mut()
            .remove(d.var, d.val)
            .and_then(|_| solver.propagate())
            .is_ok();
        if ok {
            return true;
        }
        stats.fails += 1;
    }
    false
}
