//! Reconfiguration plans.
//!
//! A plan is a source model plus a set of timed actions. Actions are
//! replayed by ascending start time, ties broken by ascending end time
//! and then by insertion order. Dependencies between actions are only
//! computed when first queried; once tracked, later additions are
//! indexed incrementally.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::action::Action;
use crate::dependency::DependencyExtractor;
use crate::model::Model;

/// Whether the dependency relation has been built yet.
#[derive(Debug, Clone, Default)]
enum DependencyState {
    #[default]
    Pending,
    Tracked(DependencyExtractor),
}

/// A source model and the actions that reconfigure it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconfigurationPlan {
    source: Model,
    actions: Vec<Action>,
    #[serde(skip)]
    deps: DependencyState,
}

impl ReconfigurationPlan {
    pub fn new(source: Model) -> Self {
        Self {
            source,
            actions: Vec::new(),
            deps: DependencyState::Pending,
        }
    }

    pub fn source(&self) -> &Model {
        &self.source
    }

    /// Add an action. Returns `false` if an equal action is already there.
    pub fn add(&mut self, a: Action) -> bool {
        if self.actions.contains(&a) {
            return false;
        }
        let idx = self.actions.len();
        if let DependencyState::Tracked(ex) = &mut self.deps {
            ex.visit(idx, &a);
        }
        self.actions.push(a);
        true
    }

    /// Number of actions.
    pub fn size(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Completion time of the last action, 0 for an empty plan.
    pub fn duration(&self) -> i32 {
        self.actions.iter().map(|a| a.end).max().unwrap_or(0)
    }

    /// Actions in insertion order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Actions in replay order.
    pub fn ordered(&self) -> Vec<&Action> {
        let mut v: Vec<&Action> = self.actions.iter().collect();
        v.sort_by_key(|a| (a.start, a.end));
        v
    }

    /// Replay the plan on a copy of the source model.
    ///
    /// Returns the first action whose guard failed; the copy is dropped
    /// then, so a failed replay never leaks a partial model.
    pub fn apply_detailed(&self) -> Result<Model, Action> {
        let mut mo = self.source.clone();
        for a in self.ordered() {
            if !a.apply(&mut mo) {
                debug!(action = %a, "action guard failed during replay");
                return Err(a.clone());
            }
        }
        Ok(mo)
    }

    /// The destination model, or `None` if the plan cannot be applied.
    pub fn result(&self) -> Option<Model> {
        self.apply_detailed().ok()
    }

    pub fn is_applyable(&self) -> bool {
        self.apply_detailed().is_ok()
    }

    /// Actions that must complete before `a` starts.
    ///
    /// The first query indexes every action; later additions are indexed
    /// as they come. Returns an empty list for unknown actions.
    pub fn direct_dependencies(&mut self, a: &Action) -> Vec<Action> {
        let Some(idx) = self.actions.iter().position(|x| x == a) else {
            return Vec::new();
        };
        if let DependencyState::Pending = self.deps {
            let mut ex = DependencyExtractor::new();
            for (i, x) in self.actions.iter().enumerate() {
                ex.visit(i, x);
            }
            self.deps = DependencyState::Tracked(ex);
        }
        match &self.deps {
            DependencyState::Tracked(ex) => ex
                .dependencies(&self.actions, idx)
                .into_iter()
                .map(|i| self.actions[i].clone())
                .collect(),
            DependencyState::Pending => Vec::new(),
        }
    }

    /// Whether dependencies are being tracked.
    pub fn tracks_dependencies(&self) -> bool {
        matches!(self.deps, DependencyState::Tracked(_))
    }
}

/// Plans are equal when they share a source model and the same action set.
impl PartialEq for ReconfigurationPlan {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
            && self.actions.len() == other.actions.len()
            && self.actions.iter().all(|a| other.actions.contains(a))
    }
}

impl fmt::Display for ReconfigurationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in self.ordered() {
            writeln!(f, "{a}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, VmId};

    fn source() -> (Model, NodeId, NodeId, VmId) {
        let mut mo = Model::new();
        let n1 = mo.new_node();
        let n2 = mo.new_node();
        let vm = mo.new_vm();
        mo.mapping_mut().add_online_node(n1);
        mo.mapping_mut().add_offline_node(n2);
        mo.mapping_mut().add_running_vm(vm, n1);
        (mo, n1, n2, vm)
    }

    #[test]
    fn duplicate_actions_are_ignored() {
        let (mo, _, n2, _) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        assert!(plan.add(Action::boot_node(n2, 0, 2)));
        assert!(!plan.add(Action::boot_node(n2, 0, 2)));
        assert_eq!(plan.size(), 1);
        assert_eq!(plan.duration(), 2);
    }

    #[test]
    fn ordering_is_stable_on_ties() {
        let (mo, n1, n2, vm) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        let late = Action::migrate_vm(vm, n1, n2, 3, 5);
        let boot = Action::boot_node(n2, 0, 3);
        let tie_a = Action::allocate(vm, n2, "cpu", 1, 5, 5);
        let tie_b = Action::allocate(vm, n2, "mem", 1, 5, 5);
        plan.add(late.clone());
        plan.add(tie_b.clone());
        plan.add(boot.clone());
        plan.add(tie_a.clone());
        let ordered: Vec<&Action> = plan.ordered();
        assert_eq!(ordered, vec![&boot, &late, &tie_b, &tie_a]);
    }

    #[test]
    fn application_is_all_or_nothing() {
        let (mo, n1, n2, vm) = source();
        let mut plan = ReconfigurationPlan::new(mo.clone());
        // Migrating to a node that is still offline.
        plan.add(Action::migrate_vm(vm, n1, n2, 0, 2));
        plan.add(Action::boot_node(n2, 2, 4));
        assert!(!plan.is_applyable());
        assert!(plan.result().is_none());
        assert_eq!(plan.apply_detailed().unwrap_err().start, 0);

        let mut fixed = ReconfigurationPlan::new(mo);
        fixed.add(Action::boot_node(n2, 0, 2));
        fixed.add(Action::migrate_vm(vm, n1, n2, 2, 4));
        fixed.add(Action::shutdown_node(n1, 4, 5));
        let dst = fixed.result().unwrap();
        assert_eq!(dst.mapping().vm_location(vm), Some(n2));
        assert!(dst.mapping().is_offline(n1));
    }

    #[test]
    fn dependencies_are_lazy_then_incremental() {
        let (mo, n1, n2, vm) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        let boot = Action::boot_node(n2, 0, 2);
        let mig = Action::migrate_vm(vm, n1, n2, 2, 4);
        plan.add(boot.clone());
        plan.add(mig.clone());
        assert!(!plan.tracks_dependencies());
        assert_eq!(plan.direct_dependencies(&mig), vec![boot.clone()]);
        assert!(plan.tracks_dependencies());
        assert_eq!(plan.direct_dependencies(&mig), vec![boot]);

        let off = Action::shutdown_node(n1, 4, 5);
        plan.add(off.clone());
        assert_eq!(plan.direct_dependencies(&off), vec![mig]);
        assert!(plan.direct_dependencies(&Action::boot_node(n1, 0, 1)).is_empty());
    }

    #[test]
    fn json_roundtrip_keeps_actions() {
        let (mo, n1, n2, vm) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        plan.add(Action::boot_node(n2, 0, 2));
        plan.add(Action::migrate_vm(vm, n1, n2, 2, 4));
        let json = serde_json::to_string(&plan).unwrap();
        let back: ReconfigurationPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
        assert!(!back.tracks_dependencies());
    }

    #[test]
    fn display_lists_actions_in_order() {
        let (mo, n1, n2, vm) = source();
        let mut plan = ReconfigurationPlan::new(mo);
        plan.add(Action::migrate_vm(vm, n1, n2, 2, 4));
        plan.add(Action::boot_node(n2, 0, 2));
        let text = plan.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "0:2 boot(node=node#1)");
        assert!(lines[1].starts_with("2:4 migrate"));
    }
}
