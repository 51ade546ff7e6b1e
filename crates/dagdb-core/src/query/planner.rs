//! Builders for the plan shapes the query compiler emits.
//!
//! The planner hands out leaf and composite nodes wired to one storage
//! engine; compilers assemble them and graft related fields with
//! [`SelectNode::add_sub_plan`].

use std::sync::Arc;

use tracing::{debug, instrument};

use super::commit_select::CommitSelectNode;
use super::dag_scan::DagScanNode;
use super::node::PlanNode;
use super::parallel::AppendNode;
use super::scan::ScanNode;
use super::select::SelectNode;
use super::type_join::{JoinKind, JoinStrategy, TypeJoinNode};
use crate::error::{Error, ExecError};
use crate::storage::{Cid, Key, Span, StorageEngine};
use dagdb_proto::Doc;

/// Planner settings.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Depth bound of commit history walks. None walks to the roots.
    pub commit_depth: Option<u64>,
    /// Field the version history of a document is attached under.
    pub version_field: String,
    /// Maximum rows [`Planner::execute`] returns before failing.
    pub max_rows: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            commit_depth: None,
            version_field: "_version".to_string(),
            max_rows: 10_000,
        }
    }
}

impl PlannerConfig {
    /// Bound commit history walks.
    pub fn with_commit_depth(mut self, depth: Option<u64>) -> Self {
        self.commit_depth = depth;
        self
    }

    /// Set the row budget of a single execution.
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }
}

/// Builds plan nodes over one storage engine.
pub struct Planner {
    storage: Arc<StorageEngine>,
    config: PlannerConfig,
}

impl Planner {
    /// Create a planner with default settings.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self::with_config(storage, PlannerConfig::default())
    }

    /// Create a planner with custom settings.
    pub fn with_config(storage: Arc<StorageEngine>, config: PlannerConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Scan every document of a collection.
    pub fn scan(&self, collection: &str) -> ScanNode {
        ScanNode::new(Arc::clone(&self.storage), collection)
    }

    /// Select over a scan of a collection.
    pub fn select(&self, collection: &str) -> SelectNode {
        SelectNode::new(collection, self.scan(collection))
    }

    /// Join the document `related` points to through `fk_field` of each
    /// `collection` row, under `field`.
    pub fn join_one(
        &self,
        collection: &str,
        field: &str,
        related: SelectNode,
        fk_field: &str,
    ) -> PlanNode {
        let sub_collection = related.collection().to_string();
        TypeJoinNode::new(
            self.scan(collection),
            related,
            sub_collection,
            field,
            JoinKind::One {
                fk_field: fk_field.to_string(),
            },
        )
        .into()
    }

    /// Join every `related` document whose `fk_field` holds the key of the
    /// `collection` row, under `field`.
    pub fn join_many(
        &self,
        collection: &str,
        field: &str,
        related: SelectNode,
        fk_field: &str,
        strategy: JoinStrategy,
    ) -> PlanNode {
        let sub_collection = related.collection().to_string();
        TypeJoinNode::new(
            self.scan(collection),
            related,
            sub_collection,
            field,
            JoinKind::Many {
                fk_field: fk_field.to_string(),
                strategy,
            },
        )
        .into()
    }

    /// Append plan listing the composite commit history of each row.
    pub fn version(&self) -> PlanNode {
        let scan = DagScanNode::new(Arc::clone(&self.storage), None)
            .with_depth(self.config.commit_depth);
        AppendNode::new(CommitSelectNode::new(scan)).into()
    }

    /// Attach the version history to a select under the configured field.
    pub fn add_version(&self, select: &mut SelectNode) -> Result<(), Error> {
        let field = self.config.version_field.clone();
        select.add_sub_plan(&field, self.version())
    }

    /// Current heads of one field DAG, or of the composite DAG.
    pub fn latest_commits(&self, doc_key: &str, field: Option<&str>) -> PlanNode {
        self.commit_walk(doc_key, field, Some(1))
    }

    /// Commit history of one field DAG, or of the composite DAG.
    pub fn commits(&self, doc_key: &str, field: Option<&str>) -> PlanNode {
        self.commit_walk(doc_key, field, self.config.commit_depth)
    }

    fn commit_walk(&self, doc_key: &str, field: Option<&str>, depth: Option<u64>) -> PlanNode {
        let mut scan = DagScanNode::new(Arc::clone(&self.storage), field.map(str::to_string))
            .with_depth(depth);
        scan.set_spans(vec![Span::prefix(Key::doc(doc_key))]);
        CommitSelectNode::new(scan)
            .with_fields(&["dockey", "fieldName"])
            .into()
    }

    /// One commit by CID.
    ///
    /// CIDs here are blake3 block digests in lowercase hex, the form
    /// `Cid` displays as. Multibase CID text (`bafy...`) does not name a
    /// block in this store and fails with `Error::InvalidKey`.
    pub fn commit(&self, cid: &str) -> Result<PlanNode, Error> {
        let cid: Cid = cid.parse()?;
        let scan = DagScanNode::new(Arc::clone(&self.storage), None)
            .with_cid(cid)
            .with_depth(Some(1));
        Ok(CommitSelectNode::new(scan)
            .with_fields(&["dockey", "fieldName"])
            .into())
    }

    /// Run a plan to completion and close it.
    ///
    /// The plan is closed on failure too. Fails once more than
    /// `max_rows` rows come back.
    #[instrument(skip(self, plan), fields(plan = plan.kind().name()))]
    pub fn execute(&self, plan: &mut PlanNode) -> Result<Vec<Doc>, Error> {
        let result = self.drain(plan);
        plan.close();
        if let Ok(rows) = &result {
            debug!(rows = rows.len(), "Executed plan");
        }
        result
    }

    fn drain(&self, plan: &mut PlanNode) -> Result<Vec<Doc>, Error> {
        plan.init()?;
        let mut rows = Vec::new();
        while plan.next()? {
            if rows.len() >= self.config.max_rows {
                return Err(ExecError::RowBudgetExceeded(self.config.max_rows).into());
            }
            rows.push(plan.values()?.clone());
        }
        Ok(rows)
    }
}
