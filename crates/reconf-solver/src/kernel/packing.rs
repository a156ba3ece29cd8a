//! Bin packing of items on bins with integer capacities.

use super::store::{Store, VarId};
use super::{Contradiction, Propagation, Propagator};

/// Each item `i` goes to bin `bins[i]`; the summed sizes of the items of a
/// bin never exceed its capacity.
#[derive(Debug, Clone)]
pub struct BinPacking {
    name: &'static str,
    bins: Vec<VarId>,
    sizes: Vec<i64>,
    capacities: Vec<i64>,
}

impl BinPacking {
    pub fn new(name: &'static str, bins: Vec<VarId>, sizes: Vec<i64>, capacities: Vec<i64>) -> Self {
        Self {
            name,
            bins,
            sizes,
            capacities,
        }
    }
}

impl Propagator for BinPacking {
    fn name(&self) -> &'static str {
        self.name
    }

    fn vars(&self) -> Vec<VarId> {
        self.bins.clone()
    }

    fn propagate(&mut self, store: &mut Store) -> Propagation {
        let mut load = vec![0i64; self.capacities.len()];
        for (bin, size) in self.bins.iter().zip(&self.sizes) {
            if let Some(b) = store.value(*bin) {
                let slot = usize::try_from(b)
                    .ok()
                    .and_then(|b| load.get_mut(b))
                    .ok_or(Contradiction)?;
                *slot += size;
            }
        }
        if load.iter().zip(&self.capacities).any(|(l, c)| l > c) {
            return Err(Contradiction);
        }
        for (bin, size) in self.bins.iter().zip(&self.sizes) {
            if *size == 0 || store.is_instantiated(*bin) {
                continue;
            }
            for b in store.values(*bin) {
                let fits = usize::try_from(b)
                    .ok()
                    .and_then(|b| Some(load.get(b)? + size <= *self.capacities.get(b)?))
                    .unwrap_or(false);
                if !fits {
                    store.remove(*bin, b)?;
                }
            }
        }
        Ok(())
    }
}
