//! Select node: filtering, ordering, paging and sub-plan grafting.

use std::collections::VecDeque;

use serde_json::json;
use tracing::{debug, instrument};

use super::filter::{sort_rows, FilterEvaluator};
use super::multiscan::MultiScanNode;
use super::node::{NodeKind, PlanNode};
use super::parallel::ParallelNode;
use super::walk;
use crate::error::{Error, ExecError, PlanError};
use crate::storage::Span;
use dagdb_proto::{Doc, FilterExpr, OrderSpec, Pagination};

/// Top of a collection query.
///
/// Pulls rows from its source, keeps those matching the filter, orders them
/// when asked to (buffering the whole source), applies offset and limit and
/// projects the requested fields. Related fields are attached with
/// [`SelectNode::add_sub_plan`].
pub struct SelectNode {
    collection: String,
    source: Box<PlanNode>,
    filter: Option<FilterExpr>,
    order: Vec<OrderSpec>,
    pagination: Option<Pagination>,
    fields: Vec<String>,

    /// Sorted rows, filled on the first `next` of an ordered select.
    sorted: Option<VecDeque<Doc>>,
    skipped: u32,
    emitted: u32,
    current: Option<Doc>,
}

impl SelectNode {
    pub fn new(collection: impl Into<String>, source: impl Into<PlanNode>) -> Self {
        Self {
            collection: collection.into(),
            source: Box::new(source.into()),
            filter: None,
            order: Vec::new(),
            pagination: None,
            fields: Vec::new(),
            sorted: None,
            skipped: 0,
            emitted: 0,
            current: None,
        }
    }

    /// Keep only rows matching `filter`.
    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Order rows. Ordering buffers the whole source on first `next`.
    pub fn with_order(mut self, order: Vec<OrderSpec>) -> Self {
        self.order = order;
        self
    }

    /// Skip and limit rows after filtering and ordering.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Project rows onto `fields`; `_key` is always kept.
    pub fn with_fields(mut self, fields: Vec<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn source(&self) -> &PlanNode {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut PlanNode {
        &mut self.source
    }

    /// Attach the plan of a related field to this select.
    ///
    /// Depending on what the source already is:
    ///
    /// | source         | merge plan                       | append plan          |
    /// |----------------|----------------------------------|----------------------|
    /// | scan or pipe   | replaces the source              | new parallel node    |
    /// | merge          | new parallel over a shared scan  | rejected             |
    /// | parallel       | shares the parallel's scan       | added as a child     |
    ///
    /// Any other plan kind is rejected. On error the select is left as it was.
    #[instrument(skip(self, plan), fields(collection = %self.collection, plan = plan.kind().name()))]
    pub fn add_sub_plan(&mut self, field: &str, plan: PlanNode) -> Result<(), Error> {
        let source_kind = self.source.kind();
        let plan_kind = plan.kind();

        match source_kind {
            NodeKind::Scan | NodeKind::Pipe => {
                if plan_kind.is_merge() {
                    debug!(field, "Replacing scan source with merge plan");
                    *self.source = plan;
                } else if plan_kind.is_append() {
                    debug!(field, "Wrapping source and append plan in a parallel node");
                    let source = self.take_source();
                    let mut parallel = ParallelNode::new();
                    parallel.add_child("", source);
                    parallel.add_child(field, plan);
                    *self.source = PlanNode::Parallel(parallel);
                } else {
                    return Err(PlanError::UnsupportedSubPlan(plan_kind.name()).into());
                }
            }

            kind if kind.is_merge() => {
                if plan_kind.is_merge() {
                    self.share_merge_scan(field, plan)?;
                } else if plan_kind.is_append() {
                    return Err(PlanError::UnsupportedSource {
                        source_kind: source_kind.name(),
                        plan: plan_kind.name(),
                    }
                    .into());
                } else {
                    return Err(PlanError::UnsupportedSubPlan(plan_kind.name()).into());
                }
            }

            NodeKind::Parallel => {
                if plan_kind.is_merge() {
                    self.add_merge_reader(field, plan)?;
                } else if plan_kind.is_append() {
                    debug!(field, "Adding append plan to parallel node");
                    if let PlanNode::Parallel(parallel) = &mut *self.source {
                        parallel.add_child(field, plan);
                    }
                } else {
                    return Err(PlanError::UnsupportedSubPlan(plan_kind.name()).into());
                }
            }

            _ => {
                return Err(PlanError::UnsupportedSource {
                    source_kind: source_kind.name(),
                    plan: plan_kind.name(),
                }
                .into())
            }
        }
        Ok(())
    }

    /// Merge source plus merge plan: both read one shared scan of this
    /// collection under a new parallel node.
    fn share_merge_scan(&mut self, field: &str, mut plan: PlanNode) -> Result<(), Error> {
        if walk::find(&self.source, NodeKind::Scan).is_none()
            || walk::find(&plan, NodeKind::Scan).is_none()
        {
            return Err(PlanError::ScanNodeNotFound.into());
        }

        let multiscan = MultiScanNode::new();
        let source_reader = multiscan.add_reader()?;
        let plan_reader = multiscan.add_reader()?;

        let original = walk::replace_first(&mut self.source, NodeKind::Scan, source_reader.into())
            .map_err(|_| PlanError::ScanNodeNotFound)?;
        match original {
            PlanNode::Scan(scan) => multiscan.attach(scan),
            _ => return Err(PlanError::ScanNodeNotFound.into()),
        }
        // The plan's own scan reads the same rows; the shared one replaces it
        walk::replace_first(&mut plan, NodeKind::Scan, plan_reader.into())
            .map_err(|_| PlanError::ScanNodeNotFound)?;

        debug!(field, readers = multiscan.readers(), "Sharing scan between merge plans");
        let source = self.take_source();
        let mut parallel = ParallelNode::with_multiscan(multiscan);
        parallel.add_child("", source);
        parallel.add_child(field, plan);
        *self.source = PlanNode::Parallel(parallel);
        Ok(())
    }

    /// Parallel source plus merge plan: the plan joins the parallel's shared
    /// scan as one more reader.
    fn add_merge_reader(&mut self, field: &str, mut plan: PlanNode) -> Result<(), Error> {
        let PlanNode::Parallel(parallel) = &mut *self.source else {
            return Err(PlanError::ScanNodeNotFound.into());
        };
        let multiscan = match parallel.source() {
            Some(PlanNode::MultiScan(multiscan)) => multiscan,
            Some(other) => return Err(PlanError::MergeSourceNotMultiScan(other.kind().name()).into()),
            None => return Err(PlanError::MergeSourceNotMultiScan("none").into()),
        };
        if walk::find(&plan, NodeKind::Scan).is_none() {
            return Err(PlanError::ScanNodeNotFound.into());
        }

        let reader = multiscan.add_reader()?;
        walk::replace_first(&mut plan, NodeKind::Scan, reader.into())
            .map_err(|_| PlanError::ScanNodeNotFound)?;

        debug!(field, readers = multiscan.readers(), "Adding merge plan to shared scan");
        parallel.add_child(field, plan);
        Ok(())
    }

    /// Move the source out, leaving an empty parallel node in its place.
    fn take_source(&mut self) -> PlanNode {
        std::mem::replace(&mut *self.source, PlanNode::Parallel(ParallelNode::new()))
    }

    pub fn set_spans(&mut self, spans: Vec<Span>) {
        self.source.set_spans(spans);
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.sorted = None;
        self.skipped = 0;
        self.emitted = 0;
        self.current = None;
        self.source.init()
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        self.current = None;
        let (limit, offset) = match self.pagination {
            Some(p) => (Some(p.limit), p.offset),
            None => (None, 0),
        };

        loop {
            if limit.is_some_and(|limit| self.emitted >= limit) {
                return Ok(false);
            }

            let Some(mut doc) = self.next_candidate()? else {
                return Ok(false);
            };
            if self.skipped < offset {
                self.skipped += 1;
                continue;
            }

            if !self.fields.is_empty() {
                doc.retain_fields(&self.fields);
            }
            self.emitted += 1;
            self.current = Some(doc);
            return Ok(true);
        }
    }

    /// Next row passing the filter, in output order.
    fn next_candidate(&mut self) -> Result<Option<Doc>, Error> {
        if self.order.is_empty() {
            while self.source.next()? {
                let doc = self.source.values()?;
                if self.matches(doc)? {
                    return Ok(Some(doc.clone()));
                }
            }
            return Ok(None);
        }

        if self.sorted.is_none() {
            let mut rows = Vec::new();
            while self.source.next()? {
                let doc = self.source.values()?;
                if self.matches(doc)? {
                    rows.push(doc.clone());
                }
            }
            sort_rows(&mut rows, &self.order);
            self.sorted = Some(rows.into());
        }
        Ok(self.sorted.as_mut().and_then(VecDeque::pop_front))
    }

    fn matches(&self, doc: &Doc) -> Result<bool, Error> {
        match &self.filter {
            Some(filter) => FilterEvaluator::evaluate(filter, doc),
            None => Ok(true),
        }
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.current
            .as_ref()
            .ok_or_else(|| ExecError::NoCurrentRow.into())
    }

    pub fn close(&mut self) {
        self.sorted = None;
        self.current = None;
        self.source.close();
    }

    pub fn explain(&self) -> serde_json::Value {
        let mut attrs = serde_json::Map::new();
        attrs.insert("collectionName".into(), json!(self.collection));
        attrs.insert(
            "filter".into(),
            self.filter
                .as_ref()
                .and_then(|f| serde_json::to_value(f).ok())
                .unwrap_or(serde_json::Value::Null),
        );
        if !self.order.is_empty() {
            attrs.insert(
                "order".into(),
                serde_json::to_value(&self.order).unwrap_or(serde_json::Value::Null),
            );
        }
        if let Some(p) = self.pagination {
            attrs.insert("limit".into(), json!(p.limit));
            attrs.insert("offset".into(), json!(p.offset));
        }
        if let serde_json::Value::Object(source) = self.source.explain() {
            attrs.extend(source);
        }
        json!({ "selectNode": attrs })
    }
}
