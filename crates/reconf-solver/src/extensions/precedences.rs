//! Multi-resource precedences.
//!
//! A subject task picks its resource through a host variable and can
//! only start once every other task already using that resource has
//! left it. Other tasks sit on fixed resources and leave at their end
//! variable. Per resource the propagator keeps the lower and upper bound
//! of the latest departure (the *horizon*) in reversible cells, computed
//! first when the propagator is built.
//!
//! - An end bound change of another task refreshes the horizon of its
//!   resource.
//! - A fixed host pushes the subject start to that resource horizon.
//! - An undecided host loses the resources whose horizon lower bound is
//!   beyond the subject latest start; the subject start is pushed to the
//!   smallest horizon among the remaining ones.

use std::collections::BTreeMap;

use crate::kernel::{CellId, Event, Granularity, Propagation, Propagator, Store, VarId};

#[derive(Debug)]
pub struct Precedences {
    host: VarId,
    start: VarId,
    /// Resource and end of every other task.
    others: Vec<(usize, VarId)>,
    by_resource: Vec<Vec<usize>>,
    by_end: BTreeMap<VarId, Vec<usize>>,
    horizon_lb: Vec<CellId>,
    horizon_ub: Vec<CellId>,
}

impl Precedences {
    pub fn new(
        store: &mut Store,
        host: VarId,
        start: VarId,
        others: Vec<(usize, VarId)>,
        nb_resources: usize,
    ) -> Self {
        let mut by_resource = vec![Vec::new(); nb_resources];
        let mut by_end: BTreeMap<VarId, Vec<usize>> = BTreeMap::new();
        for (i, (r, end)) in others.iter().enumerate() {
            if let Some(list) = by_resource.get_mut(*r) {
                list.push(i);
            }
            by_end.entry(*end).or_default().push(i);
        }
        let mut horizon_lb = Vec::with_capacity(nb_resources);
        let mut horizon_ub = Vec::with_capacity(nb_resources);
        for tasks in &by_resource {
            let (lb, ub) = departure(store, tasks.iter().map(|i| others[*i].1));
            horizon_lb.push(store.new_cell(lb));
            horizon_ub.push(store.new_cell(ub));
        }
        Self {
            host,
            start,
            others,
            by_resource,
            by_end,
            horizon_lb,
            horizon_ub,
        }
    }

    /// Current horizon bounds of a resource.
    pub fn horizon(&self, store: &Store, resource: usize) -> (i64, i64) {
        (
            store.cell(self.horizon_lb[resource]),
            store.cell(self.horizon_ub[resource]),
        )
    }

    fn refresh(&self, store: &mut Store, resource: usize) {
        let ends = self.by_resource[resource].iter().map(|i| self.others[*i].1);
        let (lb, ub) = departure(store, ends);
        store.set_cell(self.horizon_lb[resource], lb);
        store.set_cell(self.horizon_ub[resource], ub);
    }

    fn horizon_lb_of(&self, store: &Store, resource: i32) -> Option<i64> {
        let r = usize::try_from(resource).ok()?;
        self.horizon_lb.get(r).map(|c| store.cell(*c))
    }

    fn filter(&self, store: &mut Store) -> Propagation {
        if let Some(h) = store.value(self.host) {
            if let Some(lb) = self.horizon_lb_of(store, h) {
                store.update_lb(self.start, lb as i32)?;
            }
            return Ok(());
        }
        let latest = store.ub(self.start) as i64;
        for h in store.values(self.host) {
            if self.horizon_lb_of(store, h).is_some_and(|lb| lb > latest) {
                store.remove(self.host, h)?;
            }
        }
        let earliest = store
            .values(self.host)
            .into_iter()
            .map(|h| self.horizon_lb_of(store, h).unwrap_or(0))
            .min();
        if let Some(lb) = earliest {
            store.update_lb(self.start, lb as i32)?;
        }
        Ok(())
    }
}

/// Bounds of the latest end among `ends`.
fn departure(store: &Store, ends: impl Iterator<Item = VarId>) -> (i64, i64) {
    ends.fold((0, 0), |(lb, ub), e| {
        (lb.max(store.lb(e) as i64), ub.max(store.ub(e) as i64))
    })
}

impl Propagator for Precedences {
    fn name(&self) -> &'static str {
        "precedences"
    }

    fn vars(&self) -> Vec<VarId> {
        let mut v = vec![self.host, self.start];
        v.extend(self.by_end.keys().copied());
        v
    }

    fn granularity(&self) -> Granularity {
        Granularity::Fine
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        for r in 0..self.by_resource.len() {
            self.refresh(store, r);
        }
        self.filter(store)
    }

    fn on_event(&mut self, store: &mut Store, event: &Event) -> Propagation {
        if let Some(tasks) = self.by_end.get(&event.var) {
            let resources: Vec<usize> = tasks.iter().map(|i| self.others[*i].0).collect();
            for r in resources {
                if r < self.by_resource.len() {
                    self.refresh(store, r);
                }
            }
        }
        self.filter(store)
    }
}
