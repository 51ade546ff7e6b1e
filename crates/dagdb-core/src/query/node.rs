//! The plan node sum type and its pull contract.
//!
//! Every node follows the same lifecycle:
//! 1. `set_spans()` - bind (or re-bind) the key range the node reads
//! 2. `init()` - reset execution state, transitively for owned sub-plans
//! 3. `next()` - advance one row; `Ok(false)` on exhaustion
//! 4. `values()` - borrow the current row, valid only after `next()` returned true
//! 5. `close()` - release resources; idempotent
//!
//! Nodes are a closed set of variants so the graph walkers in
//! [`super::walk`] can match on [`NodeKind`] instead of concrete types.

use dagdb_proto::Doc;

use super::commit_select::CommitSelectNode;
use super::dag_scan::DagScanNode;
use super::multiscan::MultiScanNode;
use super::parallel::{AppendNode, ParallelNode};
use super::pipe::PipeNode;
use super::scan::ScanNode;
use super::select::SelectNode;
use super::type_join::TypeJoinNode;
use crate::error::Error;
use crate::storage::Span;

/// Discriminant of a [`PlanNode`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Scan,
    MultiScan,
    Pipe,
    TypeJoin,
    Append,
    Parallel,
    Select,
    DagScan,
    CommitSelect,
}

impl NodeKind {
    /// Name used in explain output and error messages.
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Scan => "scanNode",
            NodeKind::MultiScan => "multiScanNode",
            NodeKind::Pipe => "pipeNode",
            NodeKind::TypeJoin => "typeJoin",
            NodeKind::Append => "appendNode",
            NodeKind::Parallel => "parallelNode",
            NodeKind::Select => "selectNode",
            NodeKind::DagScan => "dagScanNode",
            NodeKind::CommitSelect => "commitSelectNode",
        }
    }

    /// Whether the kind joins a related type into the parent row.
    pub fn is_merge(self) -> bool {
        matches!(self, NodeKind::TypeJoin)
    }

    /// Whether the kind is a per-parent-row sub-plan.
    pub fn is_append(self) -> bool {
        matches!(self, NodeKind::Append)
    }
}

/// A node of the query execution plan.
pub enum PlanNode {
    Scan(ScanNode),
    MultiScan(MultiScanNode),
    Pipe(PipeNode),
    TypeJoin(TypeJoinNode),
    Append(AppendNode),
    Parallel(ParallelNode),
    Select(SelectNode),
    DagScan(DagScanNode),
    CommitSelect(CommitSelectNode),
}

impl PlanNode {
    /// The variant tag.
    pub fn kind(&self) -> NodeKind {
        match self {
            PlanNode::Scan(_) => NodeKind::Scan,
            PlanNode::MultiScan(_) => NodeKind::MultiScan,
            PlanNode::Pipe(_) => NodeKind::Pipe,
            PlanNode::TypeJoin(_) => NodeKind::TypeJoin,
            PlanNode::Append(_) => NodeKind::Append,
            PlanNode::Parallel(_) => NodeKind::Parallel,
            PlanNode::Select(_) => NodeKind::Select,
            PlanNode::DagScan(_) => NodeKind::DagScan,
            PlanNode::CommitSelect(_) => NodeKind::CommitSelect,
        }
    }

    /// Bind the key range this node (and its primary input) reads.
    pub fn set_spans(&mut self, spans: Vec<Span>) {
        match self {
            PlanNode::Scan(n) => n.set_spans(spans),
            PlanNode::MultiScan(n) => n.set_spans(spans),
            PlanNode::Pipe(n) => n.set_spans(spans),
            PlanNode::TypeJoin(n) => n.set_spans(spans),
            PlanNode::Append(n) => n.set_spans(spans),
            PlanNode::Parallel(n) => n.set_spans(spans),
            PlanNode::Select(n) => n.set_spans(spans),
            PlanNode::DagScan(n) => n.set_spans(spans),
            PlanNode::CommitSelect(n) => n.set_spans(spans),
        }
    }

    /// Reset execution state against the bound spans.
    pub fn init(&mut self) -> Result<(), Error> {
        match self {
            PlanNode::Scan(n) => n.init(),
            PlanNode::MultiScan(n) => n.init(),
            PlanNode::Pipe(n) => n.init(),
            PlanNode::TypeJoin(n) => n.init(),
            PlanNode::Append(n) => n.init(),
            PlanNode::Parallel(n) => n.init(),
            PlanNode::Select(n) => n.init(),
            PlanNode::DagScan(n) => n.init(),
            PlanNode::CommitSelect(n) => n.init(),
        }
    }

    /// Advance one logical row.
    pub fn next(&mut self) -> Result<bool, Error> {
        match self {
            PlanNode::Scan(n) => n.next(),
            PlanNode::MultiScan(n) => n.next(),
            PlanNode::Pipe(n) => n.next(),
            PlanNode::TypeJoin(n) => n.next(),
            PlanNode::Append(n) => n.next(),
            PlanNode::Parallel(n) => n.next(),
            PlanNode::Select(n) => n.next(),
            PlanNode::DagScan(n) => n.next(),
            PlanNode::CommitSelect(n) => n.next(),
        }
    }

    /// Borrow the current row.
    pub fn values(&self) -> Result<&Doc, Error> {
        match self {
            PlanNode::Scan(n) => n.values(),
            PlanNode::MultiScan(n) => n.values(),
            PlanNode::Pipe(n) => n.values(),
            PlanNode::TypeJoin(n) => n.values(),
            PlanNode::Append(n) => n.values(),
            PlanNode::Parallel(n) => n.values(),
            PlanNode::Select(n) => n.values(),
            PlanNode::DagScan(n) => n.values(),
            PlanNode::CommitSelect(n) => n.values(),
        }
    }

    /// Release resources, transitively. Calling it twice is harmless.
    pub fn close(&mut self) {
        match self {
            PlanNode::Scan(n) => n.close(),
            PlanNode::MultiScan(n) => n.close(),
            PlanNode::Pipe(n) => n.close(),
            PlanNode::TypeJoin(n) => n.close(),
            PlanNode::Append(n) => n.close(),
            PlanNode::Parallel(n) => n.close(),
            PlanNode::Select(n) => n.close(),
            PlanNode::DagScan(n) => n.close(),
            PlanNode::CommitSelect(n) => n.close(),
        }
    }

    /// The primary input of this node, if any.
    ///
    /// For a parallel node this is the shared multi-scan handle, which is
    /// not an owned sub-plan.
    pub fn source(&self) -> Option<&PlanNode> {
        match self {
            PlanNode::Scan(_) | PlanNode::MultiScan(_) | PlanNode::DagScan(_) => None,
            PlanNode::Pipe(n) => Some(n.source()),
            PlanNode::TypeJoin(n) => Some(n.root()),
            PlanNode::Append(n) => Some(n.plan()),
            PlanNode::Parallel(n) => n.source(),
            PlanNode::Select(n) => Some(n.source()),
            PlanNode::CommitSelect(n) => Some(n.source()),
        }
    }

    /// The owned sub-plans of this node, primary input first.
    pub fn children(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::Scan(_) | PlanNode::MultiScan(_) | PlanNode::DagScan(_) => Vec::new(),
            PlanNode::Pipe(n) => vec![n.source()],
            PlanNode::TypeJoin(n) => vec![n.root(), n.sub_type()],
            PlanNode::Append(n) => vec![n.plan()],
            PlanNode::Parallel(n) => n.children().iter().collect(),
            PlanNode::Select(n) => vec![n.source()],
            PlanNode::CommitSelect(n) => vec![n.source()],
        }
    }

    /// Mutable access to the owned sub-plans, primary input first.
    pub fn children_mut(&mut self) -> Vec<&mut PlanNode> {
        match self {
            PlanNode::Scan(_) | PlanNode::MultiScan(_) | PlanNode::DagScan(_) => Vec::new(),
            PlanNode::Pipe(n) => vec![n.source_mut()],
            PlanNode::TypeJoin(n) => {
                let (root, sub_type) = n.parts_mut();
                vec![root, sub_type]
            }
            PlanNode::Append(n) => vec![n.plan_mut()],
            PlanNode::Parallel(n) => n.children_mut().iter_mut().collect(),
            PlanNode::Select(n) => vec![n.source_mut()],
            PlanNode::CommitSelect(n) => vec![n.source_mut()],
        }
    }

    /// Structured dump of the plan shape, keyed by node name.
    pub fn explain(&self) -> serde_json::Value {
        match self {
            PlanNode::Scan(n) => n.explain(),
            PlanNode::MultiScan(n) => n.explain(),
            PlanNode::Pipe(n) => n.explain(),
            PlanNode::TypeJoin(n) => n.explain(),
            PlanNode::Append(n) => n.explain(),
            PlanNode::Parallel(n) => n.explain(),
            PlanNode::Select(n) => n.explain(),
            PlanNode::DagScan(n) => n.explain(),
            PlanNode::CommitSelect(n) => n.explain(),
        }
    }

    /// Pull every remaining row.
    ///
    /// Convenience for callers that want the whole result; the node must
    /// already be initialized.
    pub fn collect_rows(&mut self) -> Result<Vec<Doc>, Error> {
        let mut rows = Vec::new();
        while self.next()? {
            rows.push(self.values()?.clone());
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for PlanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.explain())
    }
}

macro_rules! impl_from_node {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for PlanNode {
                fn from(node: $ty) -> Self {
                    PlanNode::$variant(node)
                }
            }
        )*
    };
}

impl_from_node! {
    Scan => ScanNode,
    MultiScan => MultiScanNode,
    Pipe => PipeNode,
    TypeJoin => TypeJoinNode,
    Append => AppendNode,
    Parallel => ParallelNode,
    Select => SelectNode,
    DagScan => DagScanNode,
    CommitSelect => CommitSelectNode,
}
