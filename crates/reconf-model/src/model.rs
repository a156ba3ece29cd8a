//! Model snapshots: a mapping plus resource views, naming services and VM
//! attributes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::mapping::Mapping;
use crate::types::{ElementKind, NodeId, VmId};
use crate::view::{NamingService, ShareableResource};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Per-VM key/value attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    values: BTreeMap<VmId, BTreeMap<String, AttrValue>>,
}

impl Attributes {
    pub fn put(&mut self, vm: VmId, key: &str, value: AttrValue) {
        self.values
            .entry(vm)
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn get(&self, vm: VmId, key: &str) -> Option<&AttrValue> {
        self.values.get(&vm).and_then(|kv| kv.get(key))
    }

    pub fn get_str(&self, vm: VmId, key: &str) -> Option<&str> {
        self.get(vm, key).and_then(AttrValue::as_str)
    }
}

/// A datacenter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Model {
    mapping: Mapping,
    #[serde(default)]
    views: BTreeMap<String, ShareableResource>,
    /// At most one naming service per element kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    naming: Vec<NamingService>,
    #[serde(default)]
    attributes: Attributes,
    #[serde(default)]
    next_node: u32,
    #[serde(default)]
    next_vm: u32,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a model around an existing mapping.
    pub fn with_mapping(mapping: Mapping) -> Self {
        let next_node = mapping.all_nodes().iter().map(|n| n.0 + 1).max().unwrap_or(0);
        let next_vm = mapping.all_vms().iter().map(|v| v.0 + 1).max().unwrap_or(0);
        Self {
            mapping,
            next_node,
            next_vm,
            ..Self::default()
        }
    }

    /// Allocate a fresh node identifier.
    pub fn new_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    /// Allocate a fresh VM identifier.
    pub fn new_vm(&mut self) -> VmId {
        let id = VmId(self.next_vm);
        self.next_vm += 1;
        id
    }

    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    pub fn mapping_mut(&mut self) -> &mut Mapping {
        &mut self.mapping
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Attach a view, replacing any view with the same name.
    pub fn attach(&mut self, view: ShareableResource) {
        self.views.insert(view.name().to_string(), view);
    }

    pub fn view(&self, name: &str) -> ModelResult<&ShareableResource> {
        self.views
            .get(name)
            .ok_or_else(|| ModelError::UnknownView(name.to_string()))
    }

    pub fn view_mut(&mut self, name: &str) -> ModelResult<&mut ShareableResource> {
        self.views
            .get_mut(name)
            .ok_or_else(|| ModelError::UnknownView(name.to_string()))
    }

    pub fn views(&self) -> impl Iterator<Item = &ShareableResource> {
        self.views.values()
    }

    /// Attach a naming service, replacing the one for the same kind.
    pub fn attach_naming(&mut self, ns: NamingService) {
        self.naming.retain(|n| n.element() != ns.element());
        self.naming.push(ns);
        self.naming.sort_by_key(NamingService::element);
    }

    pub fn naming_service(&self, kind: ElementKind) -> Option<&NamingService> {
        self.naming.iter().find(|n| n.element() == kind)
    }

    pub fn naming_service_mut(&mut self, kind: ElementKind) -> Option<&mut NamingService> {
        self.naming.iter_mut().find(|n| n.element() == kind)
    }

    pub fn naming_services(&self) -> impl Iterator<Item = &NamingService> {
        self.naming.iter()
    }

    /// Whether the node is known to the mapping.
    pub fn require_node(&self, node: NodeId) -> ModelResult<()> {
        if self.mapping.contains_node(node) {
            Ok(())
        } else {
            Err(ModelError::UnknownNode(node))
        }
    }

    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(s)?)
    }
}
