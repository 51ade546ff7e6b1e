//! Type join: the merge node that embeds related documents into each row.
//!
//! The join drives its root plan and, for each root row, resolves the related
//! documents through its sub-type plan:
//! - `One`: the root row holds the related document's key; the sub-type plan
//!   is pointed at that single document and its row (or null) is embedded
//! - `Many`: each related document holds the root's key; matches are
//!   embedded as a document sequence

use std::collections::HashMap;

use serde_json::json;
use tracing::trace;

use super::filter::FilterEvaluator;
use super::node::PlanNode;
use crate::error::{Error, ExecError};
use crate::storage::{DataStoreKey, Span};
use dagdb_proto::{Doc, Value};

/// Join strategy for one-to-many relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Re-run the sub-type plan for every root row - O(N*M), no buffering.
    NestedLoop,
    /// Run the sub-type plan once and bucket children by foreign key - O(N+M).
    HashJoin,
}

impl JoinStrategy {
    /// Select a strategy from a cardinality estimate of the root side.
    ///
    /// Uses a hash join when more than 100 root rows are expected, otherwise
    /// a nested loop for lower overhead on small sets.
    pub fn select(estimated_roots: usize) -> Self {
        if estimated_roots > 100 {
            JoinStrategy::HashJoin
        } else {
            JoinStrategy::NestedLoop
        }
    }
}

/// How root rows relate to sub-type rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinKind {
    /// The root row holds the related document's key in `fk_field`.
    One { fk_field: String },
    /// Each related document holds the root's key in `fk_field`.
    Many {
        fk_field: String,
        strategy: JoinStrategy,
    },
}

impl JoinKind {
    fn name(&self) -> &'static str {
        match self {
            JoinKind::One { .. } => "typeJoinOne",
            JoinKind::Many { .. } => "typeJoinMany",
        }
    }
}

/// Merge node joining a related type under `sub_field`.
pub struct TypeJoinNode {
    root: Box<PlanNode>,
    sub_type: Box<PlanNode>,
    sub_collection: String,
    sub_field: String,
    kind: JoinKind,

    /// Children bucketed by foreign key, built on first use by a hash join.
    buckets: Option<HashMap<String, Vec<Doc>>>,
    current: Option<Doc>,
}

impl TypeJoinNode {
    /// Join `sub_type` (reading `sub_collection`) into rows of `root` under `sub_field`.
    pub fn new(
        root: impl Into<PlanNode>,
        sub_type: impl Into<PlanNode>,
        sub_collection: impl Into<String>,
        sub_field: impl Into<String>,
        kind: JoinKind,
    ) -> Self {
        Self {
            root: Box::new(root.into()),
            sub_type: Box::new(sub_type.into()),
            sub_collection: sub_collection.into(),
            sub_field: sub_field.into(),
            kind,
            buckets: None,
            current: None,
        }
    }

    pub fn root(&self) -> &PlanNode {
        &self.root
    }

    pub fn sub_type(&self) -> &PlanNode {
        &self.sub_type
    }

    /// Mutable access to both sides at once.
    pub fn parts_mut(&mut self) -> (&mut PlanNode, &mut PlanNode) {
        (&mut self.root, &mut self.sub_type)
    }

    /// Field the related documents are embedded under.
    pub fn sub_field(&self) -> &str {
        &self.sub_field
    }

    pub fn kind(&self) -> &JoinKind {
        &self.kind
    }

    /// Spans bind the root side.
    pub fn set_spans(&mut self, spans: Vec<Span>) {
        self.root.set_spans(spans);
    }

    pub fn init(&mut self) -> Result<(), Error> {
        self.buckets = None;
        self.current = None;
        self.root.init()
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        self.current = None;
        if !self.root.next()? {
            return Ok(false);
        }
        let mut doc = self.root.values()?.clone();

        let related = match self.kind.clone() {
            JoinKind::One { fk_field } => {
                let fk = doc.get(&fk_field).and_then(Value::as_str).map(str::to_string);
                match fk {
                    Some(fk) => self.fetch_one(&fk)?,
                    None => Value::Null,
                }
            }
            JoinKind::Many { fk_field, strategy } => {
                match doc.key().map(str::to_string) {
                    Some(key) => match strategy {
                        JoinStrategy::NestedLoop => self.fetch_many_nested(&fk_field, &key)?,
                        JoinStrategy::HashJoin => self.fetch_many_hashed(&fk_field, &key)?,
                    },
                    None => Value::Docs(Vec::new()),
                }
            }
        };

        trace!(sub_field = %self.sub_field, root = ?doc.key(), "Joined sub type");
        doc.set(self.sub_field.clone(), related);
        self.current = Some(doc);
        Ok(true)
    }

    /// Point the sub-type plan at one document.
    fn fetch_one(&mut self, doc_key: &str) -> Result<Value, Error> {
        let span = Span::prefix(DataStoreKey::document(&self.sub_collection, doc_key).to_key());
        self.sub_type.set_spans(vec![span]);
        self.sub_type.init()?;
        if self.sub_type.next()? {
            Ok(Value::Doc(self.sub_type.values()?.clone()))
        } else {
            Ok(Value::Null)
        }
    }

    /// Re-run the sub-type plan and keep the children pointing at `key`.
    fn fetch_many_nested(&mut self, fk_field: &str, key: &str) -> Result<Value, Error> {
        self.sub_type.init()?;
        let mut children = Vec::new();
        while self.sub_type.next()? {
            let child = self.sub_type.values()?;
            if FilterEvaluator::get_field_value(child, fk_field).and_then(Value::as_str) == Some(key)
            {
                children.push(child.clone());
            }
        }
        Ok(Value::Docs(children))
    }

    /// Look `key` up in the foreign key buckets, building them on first use.
    fn fetch_many_hashed(&mut self, fk_field: &str, key: &str) -> Result<Value, Error> {
        if self.buckets.is_none() {
            let mut buckets: HashMap<String, Vec<Doc>> = HashMap::new();
            self.sub_type.init()?;
            while self.sub_type.next()? {
                let child = self.sub_type.values()?;
                let fk = FilterEvaluator::get_field_value(child, fk_field).and_then(Value::as_str);
                if let Some(fk) = fk {
                    buckets.entry(fk.to_string()).or_default().push(child.clone());
                }
            }
            self.sub_type.close();
            self.buckets = Some(buckets);
        }

        let children = self
            .buckets
            .as_mut()
            .and_then(|buckets| buckets.remove(key))
            .unwrap_or_default();
        Ok(Value::Docs(children))
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.current
            .as_ref()
            .ok_or_else(|| ExecError::NoCurrentRow.into())
    }

    pub fn close(&mut self) {
        self.current = None;
        self.buckets = None;
        self.root.close();
        self.sub_type.close();
    }

    pub fn explain(&self) -> serde_json::Value {
        json!({
            "typeJoin": {
                "joinType": self.kind.name(),
                "subTypeName": self.sub_field,
                "root": self.root.explain(),
                "subType": self.sub_type.explain(),
            }
        })
    }
}
