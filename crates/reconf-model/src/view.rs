//! Model views.
//!
//! - [`ShareableResource`] attaches a named numeric resource (memory,
//!   bandwidth, ...) to the model: a capacity per node and a consumption
//!   per VM. Unknown entities fall back to the view defaults.
//! - [`NamingService`] gives human-readable, unique names to the nodes or
//!   the VMs of a model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::types::{Element, ElementKind, NodeId, VmId};

/// A shareable resource such as memory or CPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareableResource {
    name: String,
    #[serde(default)]
    capacities: BTreeMap<NodeId, i64>,
    #[serde(default)]
    consumptions: BTreeMap<VmId, i64>,
    #[serde(default)]
    default_capacity: i64,
    #[serde(default)]
    default_consumption: i64,
}

impl ShareableResource {
    pub fn new(name: &str) -> Self {
        Self::with_defaults(name, 0, 0)
    }

    pub fn with_defaults(name: &str, default_capacity: i64, default_consumption: i64) -> Self {
        Self {
            name: name.to_string(),
            capacities: BTreeMap::new(),
            consumptions: BTreeMap::new(),
            default_capacity,
            default_consumption,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_capacity(&mut self, node: NodeId, amount: i64) -> &mut Self {
        self.capacities.insert(node, amount);
        self
    }

    pub fn set_consumption(&mut self, vm: VmId, amount: i64) -> &mut Self {
        self.consumptions.insert(vm, amount);
        self
    }

    pub fn capacity(&self, node: NodeId) -> i64 {
        self.capacities
            .get(&node)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    pub fn consumption(&self, vm: VmId) -> i64 {
        self.consumptions
            .get(&vm)
            .copied()
            .unwrap_or(self.default_consumption)
    }
}

// ── Naming ────────────────────────────────────────────────────────

/// JSON identifier of a naming service.
pub const NAMING_SERVICE_ID: &str = "ns";

/// Unique names for the elements of one kind.
///
/// Serialized as `{"id": "ns", "type": "vm", "map": {"name": id, ...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NamingRepr", into = "NamingRepr")]
pub struct NamingService {
    element: ElementKind,
    ids: BTreeMap<String, u32>,
    names: BTreeMap<u32, String>,
}

#[derive(Serialize, Deserialize)]
struct NamingRepr {
    id: String,
    #[serde(rename = "type")]
    element: ElementKind,
    #[serde(default)]
    map: BTreeMap<String, u32>,
}

impl NamingService {
    pub fn new(element: ElementKind) -> Self {
        Self {
            element,
            ids: BTreeMap::new(),
            names: BTreeMap::new(),
        }
    }

    pub fn for_nodes() -> Self {
        Self::new(ElementKind::Node)
    }

    pub fn for_vms() -> Self {
        Self::new(ElementKind::Vm)
    }

    pub fn element(&self) -> ElementKind {
        self.element
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Give a name to an element. Names and elements are both unique.
    pub fn register<E: Element>(&mut self, e: E, name: &str) -> ModelResult<()> {
        self.check_kind::<E>()?;
        self.insert(e.id(), name)
    }

    /// The name of an element.
    pub fn resolve<E: Element>(&self, e: E) -> Option<&str> {
        if E::KIND != self.element {
            return None;
        }
        self.names.get(&e.id()).map(String::as_str)
    }

    /// The element carrying a name.
    pub fn lookup<E: Element>(&self, name: &str) -> Option<E> {
        if E::KIND != self.element {
            return None;
        }
        self.ids.get(name).copied().map(E::from_id)
    }

    /// Every named element, by ascending identifier.
    pub fn named_elements<E: Element>(&self) -> Vec<E> {
        if E::KIND != self.element {
            return Vec::new();
        }
        self.names.keys().copied().map(E::from_id).collect()
    }

    fn check_kind<E: Element>(&self) -> ModelResult<()> {
        if E::KIND == self.element {
            Ok(())
        } else {
            Err(ModelError::ElementKindMismatch {
                expected: self.element,
                found: E::KIND,
            })
        }
    }

    fn insert(&mut self, id: u32, name: &str) -> ModelResult<()> {
        if self.ids.contains_key(name) {
            return Err(ModelError::DuplicatedName(name.to_string()));
        }
        if self.names.contains_key(&id) {
            return Err(ModelError::AlreadyNamed {
                kind: self.element,
                id,
            });
        }
        self.ids.insert(name.to_string(), id);
        self.names.insert(id, name.to_string());
        Ok(())
    }
}

impl TryFrom<NamingRepr> for NamingService {
    type Error = ModelError;

    fn try_from(repr: NamingRepr) -> ModelResult<Self> {
        if repr.id != NAMING_SERVICE_ID {
            return Err(ModelError::InvalidNaming(format!(
                "expected id '{NAMING_SERVICE_ID}', got '{}'",
                repr.id
            )));
        }
        let mut ns = Self::new(repr.element);
        for (name, id) in &repr.map {
            ns.insert(*id, name)?;
        }
        Ok(ns)
    }
}

impl From<NamingService> for NamingRepr {
    fn from(ns: NamingService) -> Self {
        Self {
            id: NAMING_SERVICE_ID.to_string(),
            element: ns.element,
            map: ns.ids,
        }
    }
}
