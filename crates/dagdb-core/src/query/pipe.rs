//! Pass-through wrapper node.

use serde_json::json;

use super::node::PlanNode;
use crate::error::Error;
use crate::storage::Span;
use dagdb_proto::Doc;

/// Forwards every call to its source.
///
/// Compilers use it to give a sub-plan a stable slot that can later be
/// replaced without touching the parent.
pub struct PipeNode {
    source: Box<PlanNode>,
}

impl PipeNode {
    pub fn new(source: impl Into<PlanNode>) -> Self {
        Self {
            source: Box::new(source.into()),
        }
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
        self.source.init()
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        self.source.next()
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.source.values()
    }

    pub fn close(&mut self) {
        self.source.close();
    }

    pub fn explain(&self) -> serde_json::Value {
        json!({ "pipeNode": self.source.explain() })
    }
}
