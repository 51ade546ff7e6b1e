//! Query execution plan graph.
//!
//! Queries run as a tree of pull-based [`PlanNode`]s: the root is asked for a
//! row, asks its sources in turn, and rows flow bottom-up from the storage
//! scans. Related fields are grafted onto a built tree with
//! [`SelectNode::add_sub_plan`], which shares one storage scan between
//! several joins through [`MultiScanNode`] readers under a [`ParallelNode`].

mod commit_select;
mod dag_scan;
mod filter;
mod multiscan;
mod node;
mod parallel;
mod pipe;
mod planner;
mod scan;
mod select;
mod type_join;
pub mod walk;

pub use commit_select::{CommitSelectNode, COMMIT_FIELDS};
pub use dag_scan::{commit_span, DagScanNode};
pub use filter::{sort_rows, FilterEvaluator};
pub use multiscan::MultiScanNode;
pub use node::{NodeKind, PlanNode};
pub use parallel::{AppendNode, ParallelNode};
pub use pipe::PipeNode;
pub use planner::{Planner, PlannerConfig};
pub use scan::{ScanNode, ScanStats};
pub use select::SelectNode;
pub use type_join::{JoinKind, JoinStrategy, TypeJoinNode};
