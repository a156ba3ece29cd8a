//! Arithmetic propagators.

use super::store::{Store, VarId};
use super::{Propagation, Propagator};

fn clamp(x: i64) -> i32 {
    x.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// `x + offset <= y`.
#[derive(Debug, Clone)]
pub struct Leq {
    x: VarId,
    y: VarId,
    offset: i32,
}

impl Leq {
    pub fn new(x: VarId, y: VarId, offset: i32) -> Self {
        Self { x, y, offset }
    }
}

pub(crate) fn filter_leq(store: &mut Store, x: VarId, y: VarId, offset: i32) -> Propagation {
    store.update_lb(y, clamp(store.lb(x) as i64 + offset as i64))?;
    store.update_ub(x, clamp(store.ub(y) as i64 - offset as i64))?;
    Ok(())
}

impl Propagator for Leq {
    fn name(&self) -> &'static str {
        "leq"
    }

    fn vars(&self) -> Vec<VarId> {
        vec![self.x, self.y]
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        filter_leq(store, self.x, self.y, self.offset)
    }
}

/// `sum(vars) = result`, bound consistent.
#[derive(Debug, Clone)]
pub struct Sum {
    vars: Vec<VarId>,
    result: VarId,
}

impl Sum {
    pub fn new(vars: Vec<VarId>, result: VarId) -> Self {
        Self { vars, result }
    }
}

impl Propagator for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn vars(&self) -> Vec<VarId> {
        let mut v = self.vars.clone();
        v.push(self.result);
        v
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        loop {
            let lo: i64 = self.vars.iter().map(|v| store.lb(*v) as i64).sum();
            let hi: i64 = self.vars.iter().map(|v| store.ub(*v) as i64).sum();
            let mut changed = store.update_lb(self.result, clamp(lo))?;
            changed |= store.update_ub(self.result, clamp(hi))?;
            let (rlb, rub) = (store.lb(self.result) as i64, store.ub(self.result) as i64);
            for v in &self.vars {
                let (vlb, vub) = (store.lb(*v) as i64, store.ub(*v) as i64);
                changed |= store.update_lb(*v, clamp(rlb - (hi - vub)))?;
                changed |= store.update_ub(*v, clamp(rub - (lo - vlb)))?;
            }
            if !changed {
                return Ok(());
            }
        }
    }
}

/// `value = table[index]`.
#[derive(Debug, Clone)]
pub struct Element {
    index: VarId,
    table: Vec<i32>,
    value: VarId,
}

impl Element {
    pub fn new(index: VarId, table: Vec<i32>, value: VarId) -> Self {
        Self {
            index,
            table,
            value,
        }
    }
}

impl Propagator for Element {
    fn name(&self) -> &'static str {
        "element"
    }

    fn vars(&self) -> Vec<VarId> {
        vec![self.index, self.value]
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        let mut supported = Vec::new();
        for i in store.values(self.index) {
            let entry = usize::try_from(i).ok().and_then(|i| self.table.get(i)).copied();
            match entry {
                Some(t) if store.contains(self.value, t) => supported.push(t),
                _ => {
                    store.remove(self.index, i)?;
                }
            }
        }
        let (Some(lo), Some(hi)) = (supported.iter().min(), supported.iter().max()) else {
            return Err(super::Contradiction);
        };
        store.update_lb(self.value, *lo)?;
        store.update_ub(self.value, *hi)?;
        if store.is_enumerated(self.value) {
            for v in store.values(self.value) {
                if !supported.contains(&v) {
                    store.remove(self.value, v)?;
                }
            }
        }
        Ok(())
    }
}

/// `x + offset <= y` whenever every guard variable takes its guard value.
#[derive(Debug, Clone)]
pub struct ReifiedLeq {
    guards: Vec<(VarId, i32)>,
    x: VarId,
    y: VarId,
    offset: i32,
}

impl ReifiedLeq {
    pub fn new(guards: Vec<(VarId, i32)>, x: VarId, y: VarId, offset: i32) -> Self {
        Self {
            guards,
            x,
            y,
            offset,
        }
    }
}

impl Propagator for ReifiedLeq {
    fn name(&self) -> &'static str {
        "reifiedLeq"
    }

    fn vars(&self) -> Vec<VarId> {
        let mut v: Vec<VarId> = self.guards.iter().map(|(g, _)| *g).collect();
        v.push(self.x);
        v.push(self.y);
        v
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        if self.guards.iter().any(|(g, val)| !store.contains(*g, *val)) {
            return Ok(());
        }
        let open: Vec<&(VarId, i32)> = self
            .guards
            .iter()
            .filter(|(g, val)| store.value(*g) != Some(*val))
            .collect();
        let violated = store.lb(self.x) as i64 + self.offset as i64 > store.ub(self.y) as i64;
        match open.as_slice() {
            [] => filter_leq(store, self.x, self.y, self.offset),
            [(g, val)] if violated => {
                store.remove(*g, *val)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Contradiction, Solver};

    #[test]
    fn sum_filters_both_ways() {
        let mut s = Solver::new();
        let st = s.store_mut();
        let a = st.new_bounded("a", 0, 10);
        let b = st.new_bounded("b", 2, 10);
        let r = st.new_bounded("r", 0, 5);
        s.post(Sum::new(vec![a, b], r));
        s.propagate().unwrap();
        assert_eq!(s.lb(r), 2);
        assert_eq!(s.ub(a), 3);
        assert_eq!(s.ub(b), 5);
    }

    #[test]
    fn element_prunes_index_and_value() {
        let mut s = Solver::new();
        let st = s.store_mut();
        let idx = st.new_range("idx", 0, 4);
        let val = st.new_range("val", 0, 2);
        s.post(Element::new(idx, vec![0, 1, 0, 3, 2], val));
        s.propagate().unwrap();
        assert_eq!(s.store().values(idx), vec![0, 1, 2, 4]);
        s.store_mut().remove(val, 0).unwrap();
        s.propagate().unwrap();
        assert_eq!(s.store().values(idx), vec![1, 4]);
        s.store_mut().remove(idx, 4).unwrap();
        s.propagate().unwrap();
        assert_eq!(s.value(val), Some(1));
    }

    #[test]
    fn reified_leq_waits_for_guards() {
        let mut s = Solver::new();
        let st = s.store_mut();
        let g = st.new_range("g", 0, 1);
        let x = st.new_bounded("x", 4, 8);
        let y = st.new_bounded("y", 0, 3);
        s.post(ReifiedLeq::new(vec![(g, 1)], x, y, 0));
        s.propagate().unwrap();
        // The only way out is for the guard to be false.
        assert_eq!(s.value(g), Some(0));

        let mut s = Solver::new();
        let st = s.store_mut();
        let g = st.constant(1);
        let x = st.new_bounded("x", 4, 8);
        let y = st.new_bounded("y", 0, 3);
        s.post(ReifiedLeq::new(vec![(g, 1)], x, y, 0));
        assert_eq!(s.propagate(), Err(Contradiction));
    }
}
