//! Core error types.

use thiserror::Error;

/// Core database errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Key decoding error.
    #[error("invalid key format")]
    InvalidKey,

    /// Record not found.
    #[error("record not found")]
    NotFound,

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Plan assembly failed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// A plan node was driven outside its contract.
    #[error(transparent)]
    Execution(#[from] ExecError),
}

/// Errors raised while assembling or rewiring a plan graph.
///
/// These abort plan assembly before any row is pulled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// No scan node could be located inside a sub-plan.
    #[error("failed to find original scan node in plan graph")]
    ScanNodeNotFound,

    /// A sub-plan of an unsupported kind was attached.
    #[error("sub plan needs to be either a MergeNode or an AppendNode, got {0}")]
    UnsupportedSubPlan(&'static str),

    /// A merge sub-plan was attached to a parallel node without a shared scan.
    #[error("merge node source must be a multiScanNode, got {0}")]
    MergeSourceNotMultiScan(&'static str),

    /// The node kind cannot take the attached sub-plan.
    #[error("cannot attach sub plan {plan} to source {source_kind}")]
    UnsupportedSource {
        source_kind: &'static str,
        plan: &'static str,
    },

    /// A reader was registered after the shared scan started executing.
    #[error("cannot add a reader to a multiScanNode after execution started")]
    ReadersSealed,

    /// Spans are malformed for the node kind.
    #[error("invalid spans: {0}")]
    InvalidSpans(String),
}

/// Errors raised when a node is driven outside its pull contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// `values` was called without a preceding successful `next`.
    #[error("no current row: values() requires a successful next()")]
    NoCurrentRow,

    /// `next` was called before `init`.
    #[error("{0} was not initialized")]
    NotInitialized(&'static str),

    /// A handle that never registered as a reader tried to read a shared scan.
    #[error("multiScanNode handle is not a registered reader")]
    UnregisteredReader,

    /// A reader tried to advance before every other reader consumed the row.
    #[error("reader {reader} advanced past round {round} before all readers consumed it")]
    ReaderOutOfStep { reader: usize, round: u64 },

    /// A plan produced more rows than the execution budget allows.
    #[error("plan produced more than {0} rows")]
    RowBudgetExceeded(usize),
}
