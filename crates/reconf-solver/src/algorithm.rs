//! Reconfiguration algorithm: from a source model and constraints to a
//! plan.
//!
//! 1. Compute the next state of every VM and build the problem.
//! 2. Inject every constraint; a contradiction at this point fails the
//!    constraint that caused it.
//! 3. Post the resource packing; in repair mode, keep the VMs that are
//!    not misplaced on their host.
//! 4. Search. When optimizing, every solution restarts the search with
//!    the cost bounded below the best one, until the search space is
//!    exhausted (optimal) or a limit is reached.
//! 5. Replay the best plan on the source model and, unless disabled,
//!    check it against the constraints.

use std::collections::BTreeSet;
use std::time::Instant;

use reconf_model::{check_plan, Model, ReconfigurationPlan, SatConstraint, VmId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SolverConfig;
use crate::constraint::{inject, misplaced};
use crate::error::{SolverError, SolverResult};
use crate::kernel::arith::Sum;
use crate::kernel::{dfs, Limits, SearchOutcome, SearchStats, VarId};
use crate::objective::{MinMttr, Objective};
use crate::problem::{next_states, ReconfigurationProblem};

/// Counters of one solve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SolvingStatistics {
    pub nodes: u64,
    pub backtracks: u64,
    pub fails: u64,
    pub solutions: u64,
    pub elapsed_ms: u64,
    /// The search stopped on the time limit.
    pub time_limit_reached: bool,
    /// No better plan exists.
    pub optimal: bool,
    /// Cost of the returned plan.
    pub cost: Option<i64>,
}

impl SolvingStatistics {
    fn record(&mut self, search: &SearchStats) {
        self.nodes = search.nodes;
        self.backtracks = search.backtracks;
        self.fails = search.fails;
        self.solutions = search.solutions;
    }
}

/// Result of a solve: the best plan found, if any, and how it was found.
#[derive(Debug)]
pub struct SolveOutcome {
    pub plan: Option<ReconfigurationPlan>,
    pub stats: SolvingStatistics,
}

#[derive(Debug)]
pub struct ReconfigurationAlgorithm {
    config: SolverConfig,
    objective: Box<dyn Objective>,
}

impl ReconfigurationAlgorithm {
    pub fn new(config: SolverConfig) -> Self {
        Self::with_objective(config, Box::new(MinMttr))
    }

    pub fn with_objective(config: SolverConfig, objective: Box<dyn Objective>) -> Self {
        Self { config, objective }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Compute a plan reaching a model that satisfies `constraints`.
    ///
    /// An infeasible instance, or a limit reached before any solution, is
    /// an outcome without plan. Errors are reserved to constraints that
    /// can not be injected and to plans that do not replay.
    pub fn solve(
        &self,
        mo: &Model,
        constraints: &[SatConstraint],
    ) -> SolverResult<SolveOutcome> {
        let started = Instant::now();
        let limits = Limits {
            deadline: self.config.time_limit().map(|d| started + d),
            max_nodes: None,
        };

        let next = next_states(mo, constraints)?;
        let mut problem = ReconfigurationProblem::build(mo, &next, &self.config)?;
        problem
            .solver_mut()
            .propagate()
            .map_err(|_| SolverError::Contradiction)?;

        for c in constraints {
            inject(&mut problem, c)?;
            if problem.solver_mut().propagate().is_err() {
                warn!(constraint = %c, "contradiction while injecting");
                return Err(SolverError::Injection {
                    constraint: c.clone(),
                    reason: "contradiction at the root".to_string(),
                });
            }
            debug!(constraint = %c, "injected");
        }
        problem.post_packing();

        if self.config.repair {
            let mut wrong: BTreeSet<VmId> = constraints
                .iter()
                .flat_map(|c| misplaced(c, mo))
                .collect();
            wrong.extend(problem.overloaded_vms());
            let fixed = problem.fix_stable_hosts(&wrong)?;
            info!(misplaced = wrong.len(), fixed, "repair mode");
        }

        let goals = self.objective.goals(&problem);
        let cost_vars = self.objective.cost_vars(&problem);
        info!(
            nodes = problem.nodes().len(),
            vms = problem.vm_models().count(),
            constraints = constraints.len(),
            horizon = problem.horizon(),
            objective = self.objective.name(),
            "solving"
        );

        let mut search = SearchStats::default();
        let mut stats = SolvingStatistics::default();
        let mut best: Option<(i64, ReconfigurationPlan)> = None;
        let mut cost_var: Option<VarId> = None;
        let mut rounds = 0u32;
        let base = problem.solver().store().world_depth();

        loop {
            match dfs(problem.solver_mut(), &goals, &limits, &mut search) {
                SearchOutcome::Solution(sol) => {
                    let cost: i64 = cost_vars.iter().map(|v| sol.value(*v) as i64).sum();
                    let plan = problem.build_plan(&sol);
                    problem.solver_mut().store_mut().pop_to(base);
                    info!(
                        cost,
                        actions = plan.size(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "solution found"
                    );
                    best = Some((cost, plan));
                    rounds += 1;
                    if !self.config.optimize
                        || self.config.max_iterations.is_some_and(|m| rounds >= m)
                    {
                        break;
                    }
                    let bound = i32::try_from(cost - 1).unwrap_or(i32::MAX);
                    let cv = match cost_var {
                        Some(v) => v,
                        None => {
                            let v = self.post_cost(&mut problem, &cost_vars);
                            cost_var = Some(v);
                            v
                        }
                    };
                    if problem.solver_mut().store_mut().update_ub(cv, bound).is_err() {
                        stats.optimal = true;
                        break;
                    }
                    debug!(bound, "cost bound tightened");
                }
                SearchOutcome::Exhausted => {
                    stats.optimal = best.is_some();
                    if best.is_none() {
                        info!("no solution");
                    }
                    break;
                }
                SearchOutcome::LimitReached => {
                    stats.time_limit_reached = true;
                    warn!(solved = best.is_some(), "time limit reached");
                    break;
                }
            }
        }

        stats.record(&search);
        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        let plan = match best {
            Some((cost, plan)) => {
                stats.cost = Some(cost);
                self.verify(&plan, constraints)?;
                Some(plan)
            }
            None => None,
        };
        info!(
            nodes = stats.nodes,
            backtracks = stats.backtracks,
            solutions = stats.solutions,
            optimal = stats.optimal,
            elapsed_ms = stats.elapsed_ms,
            "search over"
        );
        Ok(SolveOutcome { plan, stats })
    }

    fn post_cost(&self, problem: &mut ReconfigurationProblem, cost_vars: &[VarId]) -> VarId {
        let ub: i64 = cost_vars
            .iter()
            .map(|v| problem.solver().ub(*v) as i64)
            .sum();
        let ub = ub.min(i32::MAX as i64) as i32;
        let solver = problem.solver_mut();
        let cost = solver.store_mut().new_bounded("cost", 0, ub);
        solver.post(Sum::new(cost_vars.to_vec(), cost));
        cost
    }

    fn verify(&self, plan: &ReconfigurationPlan, constraints: &[SatConstraint]) -> SolverResult<()> {
        if let Err(action) = plan.apply_detailed() {
            return Err(SolverError::InconsistentPlan(format!("{action} can not be applied")));
        }
        if self.config.verify {
            check_plan(plan, constraints)?;
        }
        Ok(())
    }
}
