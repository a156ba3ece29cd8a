//! Reversible variable store.
//!
//! Variables live in an arena and are referenced by [`VarId`]. Every
//! mutation made while at least one world is open is recorded on the
//! trail, so popping a world restores domains and cells in time
//! proportional to the number of undone mutations.

use std::fmt;

use super::{Contradiction, Propagation};

/// Index of a variable in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of a reversible integer cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(usize);

/// Index of a propagator in the solver.
pub type PropId = usize;

/// What happened to a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A value left an enumerated domain.
    Removed(i32),
    LowerBound,
    UpperBound,
    Instantiated,
}

/// A domain modification, tagged with the propagator that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub var: VarId,
    pub kind: EventKind,
    pub cause: Option<PropId>,
}

#[derive(Debug, Clone)]
struct Domain {
    name: String,
    lb: i32,
    ub: i32,
    /// Enumerated domains keep one bit per value of `[base, base + 64 * len)`.
    /// Bounded domains are intervals and ignore interior removals.
    bits: Option<Vec<u64>>,
    base: i32,
}

impl Domain {
    fn has_bit(&self, x: i32) -> bool {
        match &self.bits {
            None => true,
            Some(words) => {
                let off = (x - self.base) as usize;
                words[off / 64] & (1 << (off % 64)) != 0
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Undo {
    Bounds { var: usize, lb: i32, ub: i32 },
    Word { var: usize, idx: usize, word: u64 },
    Cell { cell: usize, value: i64 },
}

/// Arena of variables and reversible cells with a trail.
#[derive(Debug, Default)]
pub struct Store {
    domains: Vec<Domain>,
    cells: Vec<i64>,
    trail: Vec<Undo>,
    worlds: Vec<usize>,
    events: Vec<Event>,
    cause: Option<PropId>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Creation ──────────────────────────────────────────────────

    /// An interval variable `[lb, ub]`.
    pub fn new_bounded(&mut self, name: impl Into<String>, lb: i32, ub: i32) -> VarId {
        self.push(Domain {
            name: name.into(),
            lb,
            ub,
            bits: None,
            base: lb,
        })
    }

    /// An enumerated variable holding every value of `[lb, ub]`.
    pub fn new_range(&mut self, name: impl Into<String>, lb: i32, ub: i32) -> VarId {
        let values: Vec<i32> = (lb..=ub).collect();
        self.new_enumerated(name, &values)
    }

    /// An enumerated variable over an explicit set of values.
    ///
    /// An empty set yields a variable with an empty interval, which fails
    /// as soon as it is touched.
    pub fn new_enumerated(&mut self, name: impl Into<String>, values: &[i32]) -> VarId {
        let (Some(lb), Some(ub)) = (values.iter().min().copied(), values.iter().max().copied())
        else {
            return self.new_bounded(name, 1, 0);
        };
        let span = (ub - lb) as usize + 1;
        let mut words = vec![0u64; span.div_ceil(64)];
        for v in values {
            let off = (v - lb) as usize;
            words[off / 64] |= 1 << (off % 64);
        }
        self.push(Domain {
            name: name.into(),
            lb,
            ub,
            bits: Some(words),
            base: lb,
        })
    }

    pub fn constant(&mut self, value: i32) -> VarId {
        self.new_bounded(format!("cst({value})"), value, value)
    }

    fn push(&mut self, d: Domain) -> VarId {
        self.domains.push(d);
        VarId(self.domains.len() - 1)
    }

    pub fn var_count(&self) -> usize {
        self.domains.len()
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn name(&self, v: VarId) -> &str {
        &self.domains[v.0].name
    }

    pub fn lb(&self, v: VarId) -> i32 {
        self.domains[v.0].lb
    }

    pub fn ub(&self, v: VarId) -> i32 {
        self.domains[v.0].ub
    }

    pub fn is_instantiated(&self, v: VarId) -> bool {
        let d = &self.domains[v.0];
        d.lb == d.ub
    }

    pub fn value(&self, v: VarId) -> Option<i32> {
        let d = &self.domains[v.0];
        (d.lb == d.ub).then_some(d.lb)
    }

    pub fn is_enumerated(&self, v: VarId) -> bool {
        self.domains[v.0].bits.is_some()
    }

    pub fn contains(&self, v: VarId, x: i32) -> bool {
        let d = &self.domains[v.0];
        x >= d.lb && x <= d.ub && d.has_bit(x)
    }

    pub fn size(&self, v: VarId) -> usize {
        let d = &self.domains[v.0];
        if d.lb > d.ub {
            return 0;
        }
        match d.bits {
            None => (d.ub - d.lb) as usize + 1,
            Some(_) => (d.lb..=d.ub).filter(|x| d.has_bit(*x)).count(),
        }
    }

    /// Current values, ascending.
    pub fn values(&self, v: VarId) -> Vec<i32> {
        let d = &self.domains[v.0];
        (d.lb..=d.ub).filter(|x| d.has_bit(*x)).collect()
    }

    // ── Mutations ─────────────────────────────────────────────────

    /// Propagator blamed for the following mutations.
    pub(crate) fn set_cause(&mut self, cause: Option<PropId>) {
        self.cause = cause;
    }

    fn emit(&mut self, var: usize, kind: EventKind) {
        self.events.push(Event {
            var: VarId(var),
            kind,
            cause: self.cause,
        });
    }

    fn save_bounds(&mut self, var: usize) {
        if !self.worlds.is_empty() {
            let d = &self.domains[var];
            self.trail.push(Undo::Bounds {
                var,
                lb: d.lb,
                ub: d.ub,
            });
        }
    }

    /// Raise the lower bound. Returns whether the domain changed.
    pub fn update_lb(&mut self, v: VarId, x: i32) -> Propagation<bool> {
        let d = &self.domains[v.0];
        if x <= d.lb {
            return Ok(false);
        }
        if x > d.ub {
            return Err(Contradiction);
        }
        let old = d.lb;
        let new_lb = (x..=d.ub).find(|y| d.has_bit(*y)).ok_or(Contradiction)?;
        let removed: Vec<i32> = if d.bits.is_some() {
            (old..new_lb).filter(|y| d.has_bit(*y)).collect()
        } else {
            Vec::new()
        };
        self.save_bounds(v.0);
        self.domains[v.0].lb = new_lb;
        for y in removed {
            self.emit(v.0, EventKind::Removed(y));
        }
        self.emit(v.0, EventKind::LowerBound);
        if self.is_instantiated(v) {
            self.emit(v.0, EventKind::Instantiated);
        }
        Ok(true)
    }

    /// Lower the upper bound. Returns whether the domain changed.
    pub fn update_ub(&mut self, v: VarId, x: i32) -> Propagation<bool> {
        let d = &self.domains[v.0];
        if x >= d.ub {
            return Ok(false);
        }
        if x < d.lb {
            return Err(Contradiction);
        }
        let old = d.ub;
        let new_ub = (d.lb..=x).rev().find(|y| d.has_bit(*y)).ok_or(Contradiction)?;
        let removed: Vec<i32> = if d.bits.is_some() {
            (new_ub + 1..=old).filter(|y| d.has_bit(*y)).collect()
        } else {
            Vec::new()
        };
        self.save_bounds(v.0);
        self.domains[v.0].ub = new_ub;
        for y in removed {
            self.emit(v.0, EventKind::Removed(y));
        }
        self.emit(v.0, EventKind::UpperBound);
        if self.is_instantiated(v) {
            self.emit(v.0, EventKind::Instantiated);
        }
        Ok(true)
    }

    /// Reduce the domain to a single value.
    pub fn instantiate(&mut self, v: VarId, x: i32) -> Propagation<bool> {
        if !self.contains(v, x) {
            return Err(Contradiction);
        }
        if self.is_instantiated(v) {
            return Ok(false);
        }
        let a = self.update_lb(v, x)?;
        let b = self.update_ub(v, x)?;
        Ok(a || b)
    }

    /// Remove a value. Interior removals on bounded domains are ignored.
    pub fn remove(&mut self, v: VarId, x: i32) -> Propagation<bool> {
        if !self.contains(v, x) {
            return Ok(false);
        }
        let (lb, ub) = (self.lb(v), self.ub(v));
        if lb == ub {
            return Err(Contradiction);
        }
        if x == lb {
            return self.update_lb(v, x + 1);
        }
        if x == ub {
            return self.update_ub(v, x - 1);
        }
        let (idx, mask, word) = {
            let d = &self.domains[v.0];
            let Some(words) = &d.bits else {
                return Ok(false);
            };
            let off = (x - d.base) as usize;
            (off / 64, 1u64 << (off % 64), words[off / 64])
        };
        if !self.worlds.is_empty() {
            self.trail.push(Undo::Word { var: v.0, idx, word });
        }
        if let Some(words) = &mut self.domains[v.0].bits {
            words[idx] = word & !mask;
        }
        self.emit(v.0, EventKind::Removed(x));
        Ok(true)
    }

    // ── Reversible cells ──────────────────────────────────────────

    pub fn new_cell(&mut self, init: i64) -> CellId {
        self.cells.push(init);
        CellId(self.cells.len() - 1)
    }

    pub fn cell(&self, c: CellId) -> i64 {
        self.cells[c.0]
    }

    pub fn set_cell(&mut self, c: CellId, value: i64) {
        let old = self.cells[c.0];
        if old == value {
            return;
        }
        if !self.worlds.is_empty() {
            self.trail.push(Undo::Cell { cell: c.0, value: old });
        }
        self.cells[c.0] = value;
    }

    // ── Worlds ────────────────────────────────────────────────────

    /// Open a choice point.
    pub fn world_push(&mut self) {
        self.worlds.push(self.trail.len());
    }

    /// Undo every mutation since the matching `world_push`.
    pub fn world_pop(&mut self) {
        let Some(mark) = self.worlds.pop() else {
            return;
        };
        while self.trail.len() > mark {
            let Some(undo) = self.trail.pop() else {
                break;
            };
            match undo {
                Undo::Bounds { var, lb, ub } => {
                    self.domains[var].lb = lb;
                    self.domains[var].ub = ub;
                }
                Undo::Word { var, idx, word } => {
                    if let Some(words) = &mut self.domains[var].bits {
                        words[idx] = word;
                    }
                }
                Undo::Cell { cell, value } => self.cells[cell] = value,
            }
        }
        self.events.clear();
    }

    /// Pop worlds until `depth` remain open.
    pub fn pop_to(&mut self, depth: usize) {
        while self.worlds.len() > depth {
            self.world_pop();
        }
    }

    pub fn world_depth(&self) -> usize {
        self.worlds.len()
    }

    pub(crate) fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn clear_events(&mut self) {
        self.events.clear();
    }
}
