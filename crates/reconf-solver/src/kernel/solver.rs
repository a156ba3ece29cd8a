//! Propagation engine.

use std::collections::VecDeque;

use tracing::trace;

use super::store::{Event, PropId, Store, VarId};
use super::{Granularity, Propagation, Propagator};

/// A store, its propagators and the propagation queues.
#[derive(Debug, Default)]
pub struct Solver {
    store: Store,
    props: Vec<Box<dyn Propagator>>,
    watchers: Vec<Vec<PropId>>,
    fine_queue: VecDeque<(PropId, Event)>,
    coarse_queue: VecDeque<PropId>,
    scheduled: Vec<bool>,
}

impl Solver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    /// Register a propagator. Its first full filtering runs on the next
    /// call to [`Solver::propagate`]. It only receives the events raised
    /// after it was posted.
    pub fn post(&mut self, p: impl Propagator + 'static) -> PropId {
        self.dispatch();
        let id = self.props.len();
        if self.watchers.len() < self.store.var_count() {
            self.watchers.resize_with(self.store.var_count(), Vec::new);
        }
        for v in p.vars() {
            if !self.watchers[v.index()].contains(&id) {
                self.watchers[v.index()].push(id);
            }
        }
        trace!(prop = p.name(), id, "posted");
        self.props.push(Box::new(p));
        self.scheduled.push(true);
        self.coarse_queue.push_back(id);
        id
    }

    /// Run every pending propagator to a fixpoint.
    ///
    /// On contradiction the queues are flushed; the caller is expected to
    /// pop the current world.
    pub fn propagate(&mut self) -> Propagation {
        let r = self.fixpoint();
        if r.is_err() {
            self.fine_queue.clear();
            self.coarse_queue.clear();
            self.scheduled.iter_mut().for_each(|s| *s = false);
            self.store.clear_events();
            self.store.set_cause(None);
        }
        r
    }

    fn fixpoint(&mut self) -> Propagation {
        loop {
            self.dispatch();
            if let Some((p, ev)) = self.fine_queue.pop_front() {
                self.store.set_cause(Some(p));
                let r = self.props[p].on_event(&mut self.store, &ev);
                self.store.set_cause(None);
                r?;
                continue;
            }
            if let Some(p) = self.coarse_queue.pop_front() {
                self.scheduled[p] = false;
                self.store.set_cause(Some(p));
                let r = self.props[p].propagate(&mut self.store);
                self.store.set_cause(None);
                r?;
                continue;
            }
            return Ok(());
        }
    }

    fn dispatch(&mut self) {
        for ev in self.store.take_events() {
            let Some(ws) = self.watchers.get(ev.var.index()) else {
                continue;
            };
            for &p in ws {
                match self.props[p].granularity() {
                    Granularity::Fine => {
                        if ev.cause != Some(p) {
                            self.fine_queue.push_back((p, ev));
                        }
                    }
                    Granularity::Coarse => {
                        if !self.scheduled[p] {
                            self.scheduled[p] = true;
                            self.coarse_queue.push_back(p);
                        }
                    }
                }
            }
        }
    }

    // ── Convenience wrappers around the store ─────────────────────

    pub fn lb(&self, v: VarId) -> i32 {
        self.store.lb(v)
    }

    pub fn ub(&self, v: VarId) -> i32 {
        self.store.ub(v)
    }

    pub fn value(&self, v: VarId) -> Option<i32> {
        self.store.value(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::arith::{Leq, Sum};
    use crate::kernel::Contradiction;

    #[test]
    fn propagation_reaches_fixpoint_through_chains() {
        let mut s = Solver::new();
        let st = s.store_mut();
        let a = st.new_bounded("a", 0, 20);
        let d = st.constant(3);
        let b = st.new_bounded("b", 0, 20);
        let c = st.new_bounded("c", 0, 20);
        s.post(Sum::new(vec![a, d], b));
        s.post(Leq::new(b, c, 2));
        s.propagate().unwrap();
        assert_eq!(s.lb(b), 3);
        assert_eq!(s.lb(c), 5);
        assert_eq!(s.ub(a), 15);

        s.store_mut().world_push();
        s.store_mut().update_lb(a, 10).unwrap();
        s.propagate().unwrap();
        assert_eq!(s.lb(c), 15);
        s.store_mut().world_pop();
        assert_eq!(s.lb(c), 5);
    }

    #[test]
    fn contradiction_flushes_queues() {
        let mut s = Solver::new();
        let st = s.store_mut();
        let a = st.new_bounded("a", 5, 10);
        let b = st.new_bounded("b", 0, 4);
        s.post(Leq::new(a, b, 0));
        assert_eq!(s.propagate(), Err(Contradiction));
        assert!(s.coarse_queue.is_empty());
    }
}
