//! Walk of the per-document commit Merkle-DAG.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde_json::json;
use tracing::{trace, warn};

use crate::error::{Error, ExecError, PlanError};
use crate::storage::key::spans_to_json;
use crate::storage::{Cid, Commit, HeadStoreKey, Span, StorageEngine, COMPOSITE_FIELD};
use dagdb_proto::{Doc, Value};

/// The head store span covering one field DAG of a document.
///
/// `commit_span("bae-1", "1")` is `["/bae-1/1", "/bae-1/2")`.
pub fn commit_span(doc_key: &str, field: &str) -> Span {
    let start = HeadStoreKey::field(doc_key, field).to_key();
    let end = start.prefix_end();
    Span::new(start, end)
}

/// Yields raw commit blocks, breadth-first from the current heads.
///
/// The walk starts either at the heads found within the spans or at a single
/// CID. Every block is yielded once even when several paths reach it.
/// `depth` bounds the walk: depth 1 yields only the starting blocks.
pub struct DagScanNode {
    storage: Arc<StorageEngine>,
    field: Option<String>,
    cid: Option<Cid>,
    depth: Option<u64>,
    spans: Vec<Span>,

    queue: VecDeque<(Cid, u64)>,
    visited: HashSet<Cid>,
    current: Option<Doc>,
    initialized: bool,
}

impl DagScanNode {
    /// Walk the DAG of `field`, or the composite DAG when `field` is `None`.
    pub fn new(storage: Arc<StorageEngine>, field: Option<String>) -> Self {
        Self {
            storage,
            field,
            cid: None,
            depth: None,
            spans: Vec::new(),
            queue: VecDeque::new(),
            visited: HashSet::new(),
            current: None,
            initialized: false,
        }
    }

    /// Start the walk at one commit instead of the heads in the spans.
    pub fn with_cid(mut self, cid: Cid) -> Self {
        self.cid = Some(cid);
        self
    }

    /// Bound the walk to `depth` levels; `None` walks to the roots.
    ///
    /// The starting blocks are always yielded, so `Some(0)` is clamped to
    /// `Some(1)`.
    pub fn with_depth(mut self, depth: Option<u64>) -> Self {
        self.depth = depth.map(|d| d.max(1));
        self
    }

    /// The field DAG this scan reads.
    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or(COMPOSITE_FIELD)
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Bind spans, rewriting each to cover exactly this scan's field DAG of
    /// the document its start key names.
    ///
    /// Starts that are not head store keys are kept as given and rejected by
    /// `init`.
    pub fn set_spans(&mut self, spans: Vec<Span>) {
        let field = self.field().to_string();
        self.spans = spans
            .into_iter()
            .map(|span| match HeadStoreKey::decode(span.start.as_bytes()) {
                Ok(key) => commit_span(&key.doc_key, &field),
                Err(_) => span,
            })
            .collect();
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.queue.clear();
        self.visited.clear();
        self.current = None;

        if let Some(cid) = self.cid {
            self.queue.push_back((cid, 1));
        } else {
            for span in &self.spans {
                span.validate()?;
                let want = HeadStoreKey::decode(span.start.as_bytes()).map_err(|_| {
                    PlanError::InvalidSpans(format!("{} is not a commit key", span.start))
                })?;

                for entry in self.storage.scan_heads(span) {
                    let (key, _height) = entry?;
                    // The span also covers longer field names sharing the prefix
                    if key.doc_key != want.doc_key || key.field != want.field {
                        continue;
                    }
                    if let Some(cid) = key.cid {
                        self.queue.push_back((cid, 1));
                    }
                }
            }
        }

        trace!(field = self.field(), heads = self.queue.len(), "Initialized DAG scan");
        self.initialized = true;
        Ok(())
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        if !self.initialized {
            return Err(ExecError::NotInitialized("dagScanNode").into());
        }
        self.current = None;

        while let Some((cid, depth)) = self.queue.pop_front() {
            if !self.visited.insert(cid) {
                continue;
            }
            let Some(block) = self.storage.get_block(&cid)? else {
                if self.cid != Some(cid) {
                    warn!(cid = %cid, depth, "Commit block missing from block store, skipping");
                }
                continue;
            };

            if self.depth.map_or(true, |max| depth < max) {
                for link in block.links() {
                    if !self.visited.contains(&link) {
                        self.queue.push_back((link, depth + 1));
                    }
                }
            }

            self.current = Some(commit_doc(Commit { cid, block }));
            return Ok(true);
        }
        Ok(false)
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.current
            .as_ref()
            .ok_or_else(|| ExecError::NoCurrentRow.into())
    }

    pub fn close(&mut self) {
        self.queue.clear();
        self.visited.clear();
        self.current = None;
        self.initialized = false;
    }

    pub fn explain(&self) -> serde_json::Value {
        json!({
            "dagScanNode": {
                "cid": self.cid.map(|cid| cid.to_string()),
                "fieldId": self.field,
                "spans": spans_to_json(&self.spans),
            }
        })
    }
}

/// Raw row of one commit block.
fn commit_doc(commit: Commit) -> Doc {
    let links: Vec<Doc> = commit
        .block
        .links()
        .into_iter()
        .map(|link| {
            let mut doc = Doc::new();
            doc.set("cid", link.to_string());
            doc
        })
        .collect();

    let mut doc = Doc::new();
    doc.set("cid", commit.cid.to_string());
    doc.set("dockey", commit.block.doc_key);
    doc.set("fieldName", commit.block.field);
    doc.set("height", commit.block.height as i64);
    doc.set("delta", Value::Bytes(commit.block.delta));
    doc.set("links", links);
    doc
}
