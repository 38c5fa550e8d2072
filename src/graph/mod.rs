//! Strategy node graph and the per-tick scheduler.

/// Condition-tree evaluation for signal nodes
pub mod condition;
mod node;
mod scheduler;

pub use node::{
    EntryConfig, EntryTarget, ExitConfig, Node, NodeGraph, NodeId, NodeKind, NodeState, NodeStatus,
};
pub use scheduler::{CycleCtx, CycleOutcome, Scheduler};
