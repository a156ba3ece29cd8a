//! Global propagators for placement and scheduling.

pub mod disjoint;
pub mod precedences;

pub use disjoint::DisjointMultiple;
pub use precedences::Precedences;
