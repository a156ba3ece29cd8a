//! Temporal action models.
//!
//! Every node and every VM gets a bundle of variables describing when its
//! transition happens (`start`, `end`, `duration` with
//! `start + duration = end`) and its state at the end of the plan. VMs
//! additionally hold slices telling where they sit before and after.

pub mod links;
pub mod node;
pub mod slice;
pub mod vm;

pub use links::{ArrivalWindow, NodeHosting, NodeTransitionLink, RelocationLink};
pub use node::NodeActionModel;
pub use slice::Slice;
pub use vm::{VmActionModel, VmTransition};
