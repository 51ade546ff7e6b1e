//! Parallel composition of sub-plans into one row.
//!
//! A [`ParallelNode`] drives several child plans in lockstep and assembles
//! one output row per step. Children come in two flavors:
//!
//! - merge children (scans, multi-scan readers, type joins) advance once per
//!   step and contribute their fields to the row
//! - append children ([`AppendNode`]) run to completion once per step,
//!   restricted to the current row's key, and their rows are stored as a
//!   document sequence under the child's field
//!
//! The first child is registered under the empty field name and yields the
//! base row; its `_key` drives every append child that follows.

use serde_json::json;
use tracing::trace;

use super::multiscan::MultiScanNode;
use super::node::PlanNode;
use crate::error::{Error, ExecError};
use crate::storage::{Key, Span};
use dagdb_proto::{Doc, Value};

/// Wraps a sub-plan that runs once per parent row.
///
/// The parent binds the sub-plan to the current row by giving it a span that
/// starts at the row's key, then drains it.
pub struct AppendNode {
    plan: Box<PlanNode>,
}

impl AppendNode {
    pub fn new(plan: impl Into<PlanNode>) -> Self {
        Self {
            plan: Box::new(plan.into()),
        }
    }

    pub fn plan(&self) -> &PlanNode {
        &self.plan
    }

    pub fn plan_mut(&mut self) -> &mut PlanNode {
        &mut self.plan
    }

    pub fn set_spans(&mut self, spans: Vec<Span>) {
        self.plan.set_spans(spans);
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.plan.init()
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        self.plan.next()
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.plan.values()
    }

    pub fn close(&mut self) {
        self.plan.close();
    }

    pub fn explain(&self) -> serde_json::Value {
        json!({ "appendNode": self.plan.explain() })
    }
}

/// Runs child plans side by side and merges their output into one row.
pub struct ParallelNode {
    /// Controller of the shared scan when the merge children read one.
    multiscan: Option<Box<PlanNode>>,
    children: Vec<PlanNode>,
    child_fields: Vec<String>,
    current: Option<Doc>,
}

impl ParallelNode {
    /// Create an empty parallel node.
    pub fn new() -> Self {
        Self {
            multiscan: None,
            children: Vec::new(),
            child_fields: Vec::new(),
            current: None,
        }
    }

    /// Create a parallel node whose merge children share `multiscan`.
    pub fn with_multiscan(multiscan: MultiScanNode) -> Self {
        Self {
            multiscan: Some(Box::new(PlanNode::MultiScan(multiscan))),
            ..Self::new()
        }
    }

    /// Add a child whose output lands under `field`.
    ///
    /// The base child uses the empty field name.
    pub fn add_child(&mut self, field: impl Into<String>, child: impl Into<PlanNode>) {
        self.child_fields.push(field.into());
        self.children.push(child.into());
    }

    /// The shared scan controller, if any.
    pub fn source(&self) -> Option<&PlanNode> {
        self.multiscan.as_deref()
    }

    /// The shared scan controller as a typed handle.
    pub fn multiscan(&self) -> Option<&MultiScanNode> {
        match self.multiscan.as_deref() {
            Some(PlanNode::MultiScan(m)) => Some(m),
            _ => None,
        }
    }

    pub fn children(&self) -> &[PlanNode] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [PlanNode] {
        &mut self.children
    }

    /// Field names of the children, in child order.
    pub fn child_fields(&self) -> &[String] {
        &self.child_fields
    }

    /// Spans go to the merge children. Append children get per-row spans.
    pub fn set_spans(&mut self, spans: Vec<Span>) {
        for child in self.children.iter_mut().filter(|c| !c.kind().is_append()) {
            child.set_spans(spans.clone());
        }
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.current = None;
        for child in self.children.iter_mut().filter(|c| !c.kind().is_append()) {
            child.init()?;
        }
        Ok(())
    }

    /// Advance every child one step and merge the results.
    ///
    /// Returns true if any child produced a row.
    pub fn next(&mut self) -> Result<bool, Error> {
        self.current = None;
        let mut doc = Doc::new();
        let mut or_next = false;

        for i in 0..self.children.len() {
            let next = if self.children[i].kind().is_append() {
                self.next_append(i, &mut doc)?
            } else {
                self.next_merge(i, &mut doc)?
            };
            or_next |= next;
        }

        if or_next {
            self.current = Some(doc);
        }
        Ok(or_next)
    }

    fn next_merge(&mut self, index: usize, doc: &mut Doc) -> Result<bool, Error> {
        let child = &mut self.children[index];
        if !child.next()? {
            return Ok(false);
        }
        doc.merge(child.values()?);
        Ok(true)
    }

    /// Run the append child once over the current row's key.
    ///
    /// Rows without a key skip the child.
    fn next_append(&mut self, index: usize, doc: &mut Doc) -> Result<bool, Error> {
        let Some(key) = doc.key().map(str::to_string) else {
            return Ok(false);
        };

        let child = &mut self.children[index];
        child.set_spans(vec![Span::prefix(Key::doc(&key))]);
        child.init()?;

        let mut results = Vec::new();
        while child.next()? {
            results.push(child.values()?.clone());
        }

        trace!(
            doc_key = %key,
            field = %self.child_fields[index],
            rows = results.len(),
            "Appended sub plan rows"
        );
        doc.set(self.child_fields[index].clone(), Value::Docs(results));
        Ok(true)
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.current
            .as_ref()
            .ok_or_else(|| ExecError::NoCurrentRow.into())
    }

    pub fn close(&mut self) {
        self.current = None;
        for child in &mut self.children {
            child.close();
        }
    }

    pub fn explain(&self) -> serde_json::Value {
        let children: Vec<_> = self.children.iter().map(PlanNode::explain).collect();
        json!({ "parallelNode": children })
    }
}

impl Default for ParallelNode {
    fn default() -> Self {
        Self::new()
    }
}
