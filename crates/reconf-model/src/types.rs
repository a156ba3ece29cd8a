//! Identity and lifecycle types shared by every other module.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a physical node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

/// Identifier of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm#{}", self.0)
    }
}

/// Kind of model element a naming service applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Node,
    Vm,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Vm => write!(f, "vm"),
        }
    }
}

/// A node or VM identifier.
pub trait Element: Copy + Ord + fmt::Display {
    const KIND: ElementKind;

    fn id(self) -> u32;

    fn from_id(id: u32) -> Self;
}

impl Element for NodeId {
    const KIND: ElementKind = ElementKind::Node;

    fn id(self) -> u32 {
        self.0
    }

    fn from_id(id: u32) -> Self {
        Self(id)
    }
}

impl Element for VmId {
    const KIND: ElementKind = ElementKind::Vm;

    fn id(self) -> u32 {
        self.0
    }

    fn from_id(id: u32) -> Self {
        Self(id)
    }
}

// ── Lifecycle ─────────────────────────────────────────────────────

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Online,
    Offline,
}

/// Lifecycle state of a VM.
///
/// `Killed` is never stored in a mapping: a killed VM simply leaves it.
/// The variant exists so the solver can name the destination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Ready,
    Running,
    Sleeping,
    Killed,
}

impl VmState {
    /// Integer encoding used by solver state variables.
    pub fn code(self) -> i32 {
        match self {
            Self::Ready => 0,
            Self::Running => 1,
            Self::Sleeping => 2,
            Self::Killed => 3,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// Format a collection of identifiers as `[a, b, c]`.
pub(crate) fn fmt_list<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    items: impl IntoIterator<Item = T>,
) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_kind_prefix() {
        assert_eq!(NodeId(3).to_string(), "node#3");
        assert_eq!(VmId(12).to_string(), "vm#12");
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        assert_eq!(serde_json::to_string(&VmId(7)).unwrap(), "7");
        let n: NodeId = serde_json::from_str("4").unwrap();
        assert_eq!(n, NodeId(4));
    }
}
