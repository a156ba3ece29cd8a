//! Group-wise mutual exclusion over values.
//!
//! Several groups of variables range over `0..nb_values`. A value used by
//! one group can not be used by any other group. The propagator keeps, per
//! group and value:
//!
//! - a *candidate* counter: variables of the group still holding the value,
//! - a *required* flag: some variable of the group is instantiated to it.
//!
//! Both are reversible cells; the counters start from the domains seen
//! when the propagator is built. Events are handled one by one: a removal
//! decrements a counter, an instantiation marks its value as required
//! and strips it from the other groups, cascading on the instantiations
//! this provokes. Events the propagator causes itself are not delivered
//! back to it; the cascade accounts for them directly.

use std::collections::BTreeMap;

use crate::kernel::{CellId, Contradiction, Event, EventKind, Granularity, Propagation, Propagator, Store, VarId};

#[derive(Debug)]
pub struct DisjointMultiple {
    groups: Vec<Vec<VarId>>,
    nb_values: usize,
    candidates: Vec<Vec<CellId>>,
    required: Vec<Vec<CellId>>,
    owner: BTreeMap<VarId, usize>,
}

impl DisjointMultiple {
    pub fn new(store: &mut Store, groups: Vec<Vec<VarId>>, nb_values: usize) -> Self {
        let mut counts = vec![vec![0i64; nb_values]; groups.len()];
        for (g, vars) in groups.iter().enumerate() {
            for x in vars {
                for v in store.values(*x) {
                    match usize::try_from(v) {
                        Ok(v) if v < nb_values => counts[g][v] += 1,
                        _ => {}
                    }
                }
            }
        }
        let candidates = counts
            .into_iter()
            .map(|row| row.into_iter().map(|c| store.new_cell(c)).collect())
            .collect();
        let required = groups
            .iter()
            .map(|_| (0..nb_values).map(|_| store.new_cell(0)).collect())
            .collect();
        let owner = groups
            .iter()
            .enumerate()
            .flat_map(|(g, vars)| vars.iter().map(move |v| (*v, g)))
            .collect();
        Self {
            groups,
            nb_values,
            candidates,
            required,
            owner,
        }
    }

    fn slot(&self, v: i32) -> Option<usize> {
        usize::try_from(v).ok().filter(|v| *v < self.nb_values)
    }

    /// Whether a value is required by a group.
    pub fn is_required(&self, store: &Store, group: usize, value: usize) -> bool {
        store.cell(self.required[group][value]) != 0
    }

    /// Number of variables of a group still holding a value.
    pub fn candidates(&self, store: &Store, group: usize, value: usize) -> i64 {
        store.cell(self.candidates[group][value])
    }

    fn decrement(&self, store: &mut Store, group: usize, value: usize) {
        let c = self.candidates[group][value];
        store.set_cell(c, store.cell(c) - 1);
    }

    fn set_required(&self, store: &mut Store, group: usize, value: i32) -> Propagation {
        let Some(v) = self.slot(value) else {
            return Ok(());
        };
        if store.cell(self.required[group][v]) != 0 {
            return Ok(());
        }
        store.set_cell(self.required[group][v], 1);
        for other in 0..self.groups.len() {
            if other == group {
                continue;
            }
            if store.cell(self.required[other][v]) != 0 {
                return Err(Contradiction);
            }
            if store.cell(self.candidates[other][v]) == 0 {
                continue;
            }
            for x in &self.groups[other] {
                if store.remove(*x, value)? {
                    self.decrement(store, other, v);
                    if let Some(fixed) = store.value(*x) {
                        self.set_required(store, other, fixed)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Propagator for DisjointMultiple {
    fn name(&self) -> &'static str {
        "disjointMultiple"
    }

    fn vars(&self) -> Vec<VarId> {
        self.groups.iter().flatten().copied().collect()
    }

    fn granularity(&self) -> Granularity {
        Granularity::Fine
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        for (g, vars) in self.groups.iter().enumerate() {
            for x in vars {
                if let Some(v) = store.value(*x) {
                    self.set_required(store, g, v)?;
                }
            }
        }
        Ok(())
    }

    fn on_event(&mut self, store: &mut Store, event: &Event) -> Propagation {
        let Some(&g) = self.owner.get(&event.var) else {
            return Ok(());
        };
        match event.kind {
            EventKind::Removed(v) => {
                if let Some(v) = self.slot(v) {
                    self.decrement(store, g, v);
                }
                Ok(())
            }
            EventKind::Instantiated => match store.value(event.var) {
                Some(v) => self.set_required(store, g, v),
                None => Ok(()),
            },
            EventKind::LowerBound | EventKind::UpperBound => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Solver;

    fn setup(groups: usize, per_group: usize, values: i32) -> (Solver, Vec<Vec<VarId>>) {
        let mut s = Solver::new();
        let vars: Vec<Vec<VarId>> = (0..groups)
            .map(|g| {
                (0..per_group)
                    .map(|i| s.store_mut().new_range(format!("g{g}x{i}"), 0, values - 1))
                    .collect()
            })
            .collect();
        (s, vars)
    }

    fn no_shared_requirement(s: &Solver, p: &DisjointMultiple, groups: usize, values: usize) {
        for v in 0..values {
            let users = (0..groups)
                .filter(|g| p.is_required(s.store(), *g, v))
                .count();
            assert!(users <= 1, "value {v} required by {users} groups");
        }
    }

    #[test]
    fn instantiation_removes_value_from_other_groups() {
        let (mut s, vars) = setup(3, 2, 3);
        let st = s.store_mut();
        let dm = DisjointMultiple::new(st, vars.clone(), 3);
        s.post(dm);
        s.propagate().unwrap();

        s.store_mut().world_push();
        s.store_mut().instantiate(vars[0][0], 1).unwrap();
        s.propagate().unwrap();
        for g in 1..3 {
            for x in &vars[g] {
                assert!(!s.store().contains(*x, 1));
            }
        }
        // Same group may reuse the value.
        assert!(s.store().contains(vars[0][1], 1));
        s.store_mut().world_pop();
        assert!(s.store().contains(vars[1][0], 1));
    }

    #[test]
    fn removal_cascades_through_instantiations() {
        // Two values, two groups of one variable each.
        let (mut s, vars) = setup(2, 1, 2);
        let dm = DisjointMultiple::new(s.store_mut(), vars.clone(), 2);
        s.post(dm);
        s.propagate().unwrap();
        s.store_mut().remove(vars[0][0], 0).unwrap();
        s.propagate().unwrap();
        assert_eq!(s.value(vars[0][0]), Some(1));
        assert_eq!(s.value(vars[1][0]), Some(0));
    }

    #[test]
    fn first_propagation_inside_a_world_survives_backtracking() {
        let (mut s, vars) = setup(2, 1, 2);
        let dm = DisjointMultiple::new(s.store_mut(), vars.clone(), 2);
        s.post(dm);
        s.store_mut().world_push();
        s.propagate().unwrap();
        s.store_mut().world_pop();

        s.store_mut().world_push();
        s.store_mut().remove(vars[0][0], 0).unwrap();
        s.propagate().unwrap();
        assert_eq!(s.value(vars[0][0]), Some(1));
        assert_eq!(s.value(vars[1][0]), Some(0));
    }

    #[test]
    fn counters_start_from_the_current_domains() {
        let (mut s, vars) = setup(2, 2, 3);
        s.store_mut().remove(vars[1][0], 2).unwrap();
        let dm = DisjointMultiple::new(s.store_mut(), vars, 3);
        assert_eq!(dm.candidates(s.store(), 0, 2), 2);
        assert_eq!(dm.candidates(s.store(), 1, 2), 1);
        s.post(dm);
        s.propagate().unwrap();
    }

    #[test]
    fn shared_requirement_is_a_contradiction() {
        let (mut s, vars) = setup(2, 1, 3);
        s.store_mut().instantiate(vars[0][0], 2).unwrap();
        s.store_mut().instantiate(vars[1][0], 2).unwrap();
        let dm = DisjointMultiple::new(s.store_mut(), vars, 3);
        s.post(dm);
        assert_eq!(s.propagate(), Err(Contradiction));
    }

    #[test]
    fn counters_stay_consistent_in_stable_states() {
        let (mut s, vars) = setup(3, 2, 4);
        let dm = DisjointMultiple::new(s.store_mut(), vars.clone(), 4);
        s.post(dm);
        s.propagate().unwrap();
        s.store_mut().world_push();
        s.store_mut().instantiate(vars[0][0], 0).unwrap();
        s.propagate().unwrap();
        s.store_mut().instantiate(vars[1][1], 3).unwrap();
        s.propagate().unwrap();
        s.store_mut().remove(vars[2][0], 1).unwrap();
        s.propagate().unwrap();
        // g2x0 = 2 requires 2 in group 2, which forces g1x0 = 1 and
        // strips 1 from g2x1 in turn.
        assert_eq!(s.store().values(vars[2][0]), vec![2]);
        assert!(!s.store().contains(vars[1][0], 0));
        assert!(!s.store().contains(vars[2][1], 3));
        assert_eq!(s.value(vars[1][0]), Some(1));
        assert_eq!(s.value(vars[2][1]), Some(2));
    }

    #[test]
    fn direct_propagator_state_never_shares_values() {
        let (mut s, vars) = setup(2, 2, 3);
        let mut dm = DisjointMultiple::new(s.store_mut(), vars.clone(), 3);
        dm.propagate(s.store_mut()).unwrap();
        s.store_mut().instantiate(vars[0][0], 2).unwrap();
        let evs = s.store_mut().take_events();
        for ev in &evs {
            dm.on_event(s.store_mut(), ev).unwrap();
        }
        no_shared_requirement(&s, &dm, 2, 3);
        assert!(dm.is_required(s.store(), 0, 2));
        assert_eq!(dm.candidates(s.store(), 1, 2), 0);
        assert_eq!(dm.candidates(s.store(), 1, 0), 2);
    }
}
