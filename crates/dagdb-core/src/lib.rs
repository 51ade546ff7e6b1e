//! DagDB Core - Storage layout, commit DAGs, and the query plan graph.
//!
//! This crate provides the execution core of DagDB: a sled-backed document
//! and commit store, and the pull-based plan nodes that read it.

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod error;
pub mod query;
pub mod storage;

pub use error::{Error, ExecError, PlanError};
pub use query::{
    AppendNode, CommitSelectNode, DagScanNode, JoinKind, JoinStrategy, MultiScanNode, NodeKind,
    ParallelNode, PipeNode, PlanNode, Planner, PlannerConfig, ScanNode, SelectNode, TypeJoinNode,
};
pub use storage::{Cid, CommitStore, Key, Span, StorageConfig, StorageEngine};

/// Re-export protocol types.
pub use dagdb_proto as proto;
