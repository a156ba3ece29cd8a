//! Propagators tying action-model variables together.

use crate::kernel::arith::filter_leq;
use crate::kernel::{Propagation, Propagator, Store, VarId};

fn eq_bounds(store: &mut Store, a: VarId, b: VarId) -> Propagation {
    store.update_lb(a, store.lb(b))?;
    store.update_ub(a, store.ub(b))?;
    store.update_lb(b, store.lb(a))?;
    store.update_ub(b, store.ub(a))?;
    Ok(())
}

/// Node state versus its transition variables and hosting window.
///
/// An initially online node either stays online (no action, hosting
/// during the whole plan) or shuts down (hosting stops when the shutdown
/// starts). An initially offline node either stays offline (no hosting)
/// or boots (hosting starts when the boot ends).
#[derive(Debug, Clone)]
pub struct NodeTransitionLink {
    pub(crate) bootable: bool,
    pub(crate) state: VarId,
    pub(crate) start: VarId,
    pub(crate) end: VarId,
    pub(crate) duration: VarId,
    pub(crate) hosting_start: VarId,
    pub(crate) hosting_end: VarId,
    pub(crate) d: i32,
    pub(crate) horizon: i32,
}

impl NodeTransitionLink {
    fn bootable(&self, store: &mut Store) -> Propagation {
        if store.lb(self.duration) > 0 || store.lb(self.start) > 0 || store.lb(self.hosting_end) > 0 {
            store.instantiate(self.state, 1)?;
        }
        match store.value(self.state) {
            Some(1) => {
                store.instantiate(self.duration, self.d)?;
                eq_bounds(store, self.hosting_start, self.end)?;
                store.instantiate(self.hosting_end, self.horizon)?;
            }
            Some(_) => {
                store.instantiate(self.duration, 0)?;
                store.instantiate(self.start, 0)?;
                store.instantiate(self.hosting_start, 0)?;
                store.instantiate(self.hosting_end, 0)?;
            }
            None => {
                store.update_ub(self.hosting_start, store.ub(self.end))?;
            }
        }
        Ok(())
    }

    fn shutdownable(&self, store: &mut Store) -> Propagation {
        store.instantiate(self.hosting_start, 0)?;
        if store.lb(self.duration) > 0
            || store.lb(self.start) > 0
            || store.ub(self.hosting_end) < self.horizon
        {
            store.instantiate(self.state, 0)?;
        }
        match store.value(self.state) {
            Some(0) => {
                store.instantiate(self.duration, self.d)?;
                eq_bounds(store, self.hosting_end, self.start)?;
            }
            Some(_) => {
                store.instantiate(self.duration, 0)?;
                store.instantiate(self.start, 0)?;
                store.instantiate(self.hosting_end, self.horizon)?;
            }
            None => {
                store.update_lb(self.hosting_end, store.lb(self.start))?;
            }
        }
        Ok(())
    }
}

impl Propagator for NodeTransitionLink {
    fn name(&self) -> &'static str {
        "nodeTransition"
    }

    fn vars(&self) -> Vec<VarId> {
        vec![
            self.state,
            self.start,
            self.end,
            self.duration,
            self.hosting_start,
            self.hosting_end,
        ]
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        if self.bootable {
            self.bootable(store)
        } else {
            self.shutdownable(store)
        }
    }
}

/// A running VM that may stay on its host or migrate.
///
/// Staying costs nothing and happens at time 0; moving takes `d`.
#[derive(Debug, Clone)]
pub struct RelocationLink {
    pub(crate) host: VarId,
    pub(crate) current: i32,
    pub(crate) start: VarId,
    pub(crate) duration: VarId,
    pub(crate) d: i32,
}

impl Propagator for RelocationLink {
    fn name(&self) -> &'static str {
        "relocation"
    }

    fn vars(&self) -> Vec<VarId> {
        vec![self.host, self.start, self.duration]
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        if self.d > 0 {
            match store.value(self.duration) {
                Some(0) => {
                    store.instantiate(self.host, self.current)?;
                }
                Some(_) => {
                    store.remove(self.host, self.current)?;
                }
                None => {}
            }
        }
        if !store.contains(self.host, self.current) {
            store.instantiate(self.duration, self.d)?;
        }
        if store.value(self.host) == Some(self.current) {
            store.instantiate(self.duration, 0)?;
            store.instantiate(self.start, 0)?;
        } else if store.lb(self.start) > 0 && store.size(self.host) > 1 {
            // Starting late only makes sense for a move.
            store.remove(self.host, self.current)?;
        }
        Ok(())
    }
}

/// A demanding slice can only start on a node once the node hosts.
#[derive(Debug, Clone)]
pub struct ArrivalWindow {
    pub(crate) host: VarId,
    pub(crate) start: VarId,
    /// `hosting_start` of every node, by node index.
    pub(crate) hosting_starts: Vec<VarId>,
}

impl ArrivalWindow {
    fn hosting(&self, h: i32) -> Option<VarId> {
        usize::try_from(h)
            .ok()
            .and_then(|h| self.hosting_starts.get(h))
            .copied()
    }
}

impl Propagator for ArrivalWindow {
    fn name(&self) -> &'static str {
        "arrivalWindow"
    }

    fn vars(&self) -> Vec<VarId> {
        let mut v = vec![self.host, self.start];
        v.extend(self.hosting_starts.iter().copied());
        v
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        let latest = store.ub(self.start);
        let mut earliest = i32::MAX;
        for h in store.values(self.host) {
            match self.hosting(h) {
                Some(hs) if store.lb(hs) <= latest => earliest = earliest.min(store.lb(hs)),
                _ => {
                    store.remove(self.host, h)?;
                }
            }
        }
        if earliest != i32::MAX {
            store.update_lb(self.start, earliest)?;
        }
        if let Some(hs) = store.value(self.host).and_then(|h| self.hosting(h)) {
            filter_leq(store, hs, self.start, 0)?;
        }
        Ok(())
    }
}

/// An offline node hosts nothing at the end of the plan.
#[derive(Debug, Clone)]
pub struct NodeHosting {
    pub(crate) node: i32,
    pub(crate) state: VarId,
    pub(crate) hosts: Vec<VarId>,
}

impl Propagator for NodeHosting {
    fn name(&self) -> &'static str {
        "nodeHosting"
    }

    fn vars(&self) -> Vec<VarId> {
        let mut v = vec![self.state];
        v.extend(self.hosts.iter().copied());
        v
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        match store.value(self.state) {
            Some(0) => {
                for h in &self.hosts {
                    store.remove(*h, self.node)?;
                }
            }
            Some(_) => {}
            None => {
                if self.hosts.iter().any(|h| store.value(*h) == Some(self.node)) {
                    store.instantiate(self.state, 1)?;
                }
            }
        }
        Ok(())
    }
}
