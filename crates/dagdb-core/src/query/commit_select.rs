//! Projection of commit blocks into the commit query shape.

use serde_json::json;

use super::dag_scan::DagScanNode;
use super::node::PlanNode;
use crate::error::{Error, ExecError};
use crate::storage::Span;
use dagdb_proto::Doc;

/// Fields every commit row carries.
pub const COMMIT_FIELDS: &[&str] = &["cid", "height", "delta", "links"];

/// Shapes raw DAG blocks into `{cid, height, delta, links: [{cid}]}` rows.
///
/// `dockey` and `fieldName` are dropped unless requested with
/// [`CommitSelectNode::with_fields`].
pub struct CommitSelectNode {
    source: Box<PlanNode>,
    extra_fields: Vec<String>,
    current: Option<Doc>,
}

impl CommitSelectNode {
    pub fn new(source: DagScanNode) -> Self {
        Self {
            source: Box::new(PlanNode::DagScan(source)),
            extra_fields: Vec::new(),
            current: None,
        }
    }

    /// Also keep these raw block fields (`dockey`, `fieldName`).
    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.extra_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn source(&self) -> &PlanNode {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut PlanNode {
        &mut self.source
    }

    pub fn set_spans(&mut self, spans: Vec<Span>) {
        self.source.set_spans(spans);
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.current = None;
        self.source.init()
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        self.current = None;
        if !self.source.next()? {
            return Ok(false);
        }

        let block = self.source.values()?;
        let mut doc = Doc::new();
        for name in COMMIT_FIELDS
            .iter()
            .copied()
            .chain(self.extra_fields.iter().map(String::as_str))
        {
            if let Some(value) = block.get(name) {
                doc.set(name, value.clone());
            }
        }
        self.current = Some(doc);
        Ok(true)
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.current
            .as_ref()
            .ok_or_else(|| ExecError::NoCurrentRow.into())
    }

    pub fn close(&mut self) {
        self.current = None;
        self.source.close();
    }

    pub fn explain(&self) -> serde_json::Value {
        json!({ "commitSelectNode": self.source.explain() })
    }
}
