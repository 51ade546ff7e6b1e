//! Leaf scan over the document data store.

use std::sync::Arc;

use serde_json::json;
use tracing::trace;

use crate::error::{Error, ExecError};
use crate::storage::key::spans_to_json;
use crate::storage::{DataStoreKey, FieldCursor, Span, StorageEngine};
use dagdb_proto::{Doc, Value};

/// Execution counters of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Successful and unsuccessful `next` calls.
    pub next_calls: u64,
    /// Documents yielded.
    pub docs_fetched: u64,
    /// Times an open cursor was released by `close`.
    pub releases: u64,
}

/// Reads documents of one collection within its spans.
///
/// Field records come back from storage in key order, one record per field.
/// The scan groups consecutive records with the same document key into one
/// row whose first field is `_key`.
pub struct ScanNode {
    storage: Arc<StorageEngine>,
    collection: String,
    spans: Vec<Span>,

    cursor: Option<FieldCursor>,
    span_index: usize,
    /// A record read past the end of the previous document.
    pending: Option<(DataStoreKey, Value)>,
    current: Option<Doc>,
    initialized: bool,
    stats: ScanStats,
}

impl ScanNode {
    /// Scan every document of `collection`.
    pub fn new(storage: Arc<StorageEngine>, collection: impl Into<String>) -> Self {
        let collection = collection.into();
        let spans = vec![Span::prefix(DataStoreKey::collection(&collection).to_key())];
        Self {
            storage,
            collection,
            spans,
            cursor: None,
            span_index: 0,
            pending: None,
            current: None,
            initialized: false,
            stats: ScanStats::default(),
        }
    }

    /// The collection this scan reads.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The bound spans.
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Execution counters.
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// Bind spans. An empty list falls back to the whole collection.
    pub fn set_spans(&mut self, spans: Vec<Span>) {
        self.spans = if spans.is_empty() {
            vec![Span::prefix(DataStoreKey::collection(&self.collection).to_key())]
        } else {
            spans
        };
    }

    pub fn init(&mut self) -> Result<(), Error> {
        for span in &self.spans {
            span.validate()?;
        }
        self.span_index = 0;
        self.cursor = self.spans.first().map(|span| self.storage.scan_fields(span));
        self.pending = None;
        self.current = None;
        self.initialized = true;
        Ok(())
    }

    pub fn next(&mut self) -> Result<bool, Error> {
        if !self.initialized {
            return Err(ExecError::NotInitialized("scanNode").into());
        }
        self.stats.next_calls += 1;
        self.current = None;

        let mut building: Option<Doc> = None;
        loop {
            let record = match self.pending.take() {
                Some(record) => Some(record),
                None => self.next_record()?,
            };
            let Some((key, value)) = record else {
                break;
            };
            let Some(field) = key.field.clone() else {
                continue;
            };
            let doc_key = key.doc_key.clone().unwrap_or_default();

            match building.as_mut() {
                None => {
                    let mut doc = Doc::with_key(doc_key);
                    doc.set(field, value);
                    building = Some(doc);
                }
                Some(doc) if doc.key() == Some(doc_key.as_str()) => doc.set(field, value),
                Some(_) => {
                    self.pending = Some((key, value));
                    break;
                }
            }
        }

        match building {
            Some(doc) => {
                trace!(collection = %self.collection, doc_key = ?doc.key(), "Scanned document");
                self.stats.docs_fetched += 1;
                self.current = Some(doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pull the next raw record, moving on to the next span when one runs dry.
    fn next_record(&mut self) -> Result<Option<(DataStoreKey, Value)>, Error> {
        loop {
            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };
            if let Some(record) = cursor.next() {
                return record.map(Some);
            }
            self.span_index += 1;
            self.cursor = self
                .spans
                .get(self.span_index)
                .map(|span| self.storage.scan_fields(span));
        }
    }

    pub fn values(&self) -> Result<&Doc, Error> {
        self.current
            .as_ref()
            .ok_or_else(|| ExecError::NoCurrentRow.into())
    }

    pub fn close(&mut self) {
        if self.initialized {
            self.stats.releases += 1;
        }
        self.cursor = None;
        self.pending = None;
        self.current = None;
        self.initialized = false;
    }

    pub fn explain(&self) -> serde_json::Value {
        json!({
            "scanNode": {
                "collectionName": self.collection,
                "spans": spans_to_json(&self.spans),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    fn storage() -> Arc<StorageEngine> {
        let engine = StorageEngine::open(StorageConfig::temporary()).unwrap();
        engine.put_field("users", "bae-1", "name", &Value::from("Alice")).unwrap();
        engine.put_field("users", "bae-1", "age", &Value::Int(30)).unwrap();
        engine.put_field("users", "bae-2", "name", &Value::from("Bob")).unwrap();
        engine.put_field("users", "bae-12", "name", &Value::from("Carol")).unwrap();
        engine.put_field("posts", "bae-9", "title", &Value::from("Hi")).unwrap();
        Arc::new(engine)
    }

    #[test]
    fn test_groups_fields_into_documents() {
        let mut scan = ScanNode::new(storage(), "users");
        scan.init().unwrap();

        assert!(scan.next().unwrap());
        let doc = scan.values().unwrap();
        assert_eq!(doc.key(), Some("bae-1"));
        assert_eq!(doc.field_names(), vec!["_key", "age", "name"]);

        let mut keys = vec![doc.key().unwrap().to_string()];
        while scan.next().unwrap() {
            keys.push(scan.values().unwrap().key().unwrap().to_string());
        }
        assert_eq!(keys, vec!["bae-1", "bae-12", "bae-2"]);
        assert_eq!(scan.stats().docs_fetched, 3);

        // Exhaustion is sticky
        assert!(!scan.next().unwrap());
        assert!(scan.values().is_err());
    }

    #[test]
    fn test_document_span() {
        let mut scan = ScanNode::new(storage(), "users");
        scan.set_spans(vec![Span::prefix(DataStoreKey::document("users", "bae-1").to_key())]);
        scan.init().unwrap();

        assert!(scan.next().unwrap());
        assert_eq!(scan.values().unwrap().get("name"), Some(&Value::from("Alice")));
        assert!(!scan.next().unwrap());
    }

    #[test]
    fn test_multiple_spans_in_order() {
        let mut scan = ScanNode::new(storage(), "users");
        scan.set_spans(vec![
            Span::prefix(DataStoreKey::document("users", "bae-2").to_key()),
            Span::prefix(DataStoreKey::document("users", "bae-1").to_key()),
        ]);
        scan.init().unwrap();

        let mut keys = Vec::new();
        while scan.next().unwrap() {
            keys.push(scan.values().unwrap().key().unwrap().to_string());
        }
        assert_eq!(keys, vec!["bae-2", "bae-1"]);
    }

    #[test]
    fn test_contract_errors() {
        let mut scan = ScanNode::new(storage(), "users");
        assert!(matches!(
            scan.next(),
            Err(Error::Execution(ExecError::NotInitialized("scanNode")))
        ));

        scan.init().unwrap();
        assert!(matches!(
            scan.values(),
            Err(Error::Execution(ExecError::NoCurrentRow))
        ));

        scan.set_spans(vec![Span::new("/users/b", "/users/a")]);
        assert!(scan.init().is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut scan = ScanNode::new(storage(), "users");
        scan.init().unwrap();
        assert!(scan.next().unwrap());

        scan.close();
        scan.close();
        assert_eq!(scan.stats().releases, 1);
        assert!(scan.next().is_err());

        // A closed scan can be initialized again
        scan.init().unwrap();
        assert!(scan.next().unwrap());
    }

    #[test]
    fn test_explain() {
        let scan = ScanNode::new(storage(), "users");
        let explain = scan.explain();
        assert_eq!(explain["scanNode"]["collectionName"], "users");
        assert_eq!(explain["scanNode"]["spans"][0]["start"], "/users/");
        assert_eq!(explain["scanNode"]["spans"][0]["end"], "");
    }
}
