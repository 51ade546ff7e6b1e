//! Writes documents and their per-field commit DAGs.
//!
//! Delta generation and merge resolution belong to the CRDT layer. This
//! store only records the blocks such a layer produces: it addresses them,
//! computes heights, and keeps the head store in step so scans can find the
//! current heads of every field.

use tracing::debug;

use super::commit::{Cid, CommitBlock};
use super::value_codec::{encode_fields, encode_value};
use super::StorageEngine;
use crate::error::Error;
use dagdb_proto::{Value, KEY_FIELD};

/// Field id of the composite DAG that records whole-document updates.
pub const COMPOSITE_FIELD: &str = "C";

/// Derive the key of a new document from its collection and initial fields.
///
/// Format: `bae-` followed by the first 16 bytes of a blake3 digest laid out
/// like a UUID (8-4-4-4-12 hex groups).
pub fn doc_key_for(collection: &str, fields: &[(String, Value)]) -> Result<String, Error> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(collection.as_bytes());
    hasher.update(&encode_fields(fields)?);
    let digest = hasher.finalize();
    let hex = hex::encode(&digest.as_bytes()[..16]);
    Ok(format!(
        "bae-{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

/// Records document writes as commit blocks.
/// Names user fields may not take: the composite DAG id and the row key.
fn check_field_name(name: &str) -> Result<(), Error> {
    if name == COMPOSITE_FIELD {
        return Err(Error::InvalidData(format!(
            "field name {} is reserved for the composite DAG",
            COMPOSITE_FIELD
        )));
    }
    if name == KEY_FIELD {
        return Err(Error::InvalidData(format!(
            "field name {} is reserved for the document key",
            KEY_FIELD
        )));
    }
    Ok(())
}

pub struct CommitStore<'a> {
    storage: &'a StorageEngine,
}

impl<'a> CommitStore<'a> {
    /// Create a commit store over a storage engine.
    pub fn new(storage: &'a StorageEngine) -> Self {
        Self { storage }
    }

    /// Append a block on top of the current heads of `(doc_key, field)`.
    ///
    /// The new block links to every current head, so concurrent heads are
    /// merged, and becomes the only head.
    pub fn append(&self, doc_key: &str, field: &str, delta: Vec<u8>) -> Result<Cid, Error> {
        let heads = self.storage.field_heads(doc_key, field)?;
        let links: Vec<Cid> = heads.iter().map(|(cid, _)| *cid).collect();
        let height = heads.iter().map(|(_, h)| *h).max().unwrap_or(0) + 1;

        let block = CommitBlock::new(doc_key, field, height, delta, &links);
        let cid = self.storage.put_block(&block)?;
        for link in &links {
            self.storage.remove_head(doc_key, field, *link)?;
        }
        self.storage.add_head(doc_key, field, cid, height)?;

        debug!(doc_key, field, cid = %cid, height, parents = links.len(), "Appended commit");
        Ok(cid)
    }

    /// Store a block with explicit parents, as received from a peer.
    ///
    /// Only the heads the block links to are retired; any other head stays,
    /// which is how concurrent, un-merged updates show up as several heads.
    /// Every parent must already be in the block store.
    pub fn put_block(
        &self,
        doc_key: &str,
        field: &str,
        delta: Vec<u8>,
        links: &[Cid],
    ) -> Result<Cid, Error> {
        let mut height = 0;
        for link in links {
            let parent = self.storage.get_block(link)?.ok_or(Error::NotFound)?;
            height = height.max(parent.height);
        }
        let height = height + 1;

        let block = CommitBlock::new(doc_key, field, height, delta, links);
        let cid = self.storage.put_block(&block)?;
        for link in links {
            self.storage.remove_head(doc_key, field, *link)?;
        }
        self.storage.add_head(doc_key, field, cid, height)?;

        debug!(doc_key, field, cid = %cid, height, "Stored commit");
        Ok(cid)
    }

    /// Create a document, returning its key.
    pub fn create_document(
        &self,
        collection: &str,
        fields: &[(String, Value)],
    ) -> Result<String, Error> {
        let doc_key = doc_key_for(collection, fields)?;
        self.update_document(collection, &doc_key, fields)?;
        Ok(doc_key)
    }

    /// Write fields of a document.
    ///
    /// Each field gets a commit in its own DAG, and one composite commit
    /// links the previous composite heads and the new field commits.
    /// Returns the composite commit's CID.
    pub fn update_document(
        &self,
        collection: &str,
        doc_key: &str,
        fields: &[(String, Value)],
    ) -> Result<Cid, Error> {
        // Reject before the first write so a bad batch leaves no trace
        for (name, _) in fields {
            check_field_name(name)?;
        }

        let mut links: Vec<Cid> = self
            .storage
            .field_heads(doc_key, COMPOSITE_FIELD)?
            .into_iter()
            .map(|(cid, _)| cid)
            .collect();
        let composite_heads = links.len();

        for (name, value) in fields {
            self.storage.put_field(collection, doc_key, name, value)?;
            links.push(self.append(doc_key, name, encode_value(value)?)?);
        }

        let mut height = 0;
        for cid in &links[..composite_heads] {
            let parent = self.storage.get_block(cid)?.ok_or(Error::NotFound)?;
            height = height.max(parent.height);
        }
        let block = CommitBlock::new(
            doc_key,
            COMPOSITE_FIELD,
            height + 1,
            encode_fields(fields)?,
            &links,
        );
        let cid = self.storage.put_block(&block)?;
        for head in &links[..composite_heads] {
            self.storage.remove_head(doc_key, COMPOSITE_FIELD, *head)?;
        }
        self.storage.add_head(doc_key, COMPOSITE_FIELD, cid, height + 1)?;

        debug!(collection, doc_key, cid = %cid, fields = fields.len(), "Wrote document");
        Ok(cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;

    fn fields(pairs: &[(&str, Value)]) -> Vec<(String, Value)> {
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_doc_key_shape() {
        let key = doc_key_for("users", &fields(&[("name", Value::from("Alice"))])).unwrap();
        assert!(key.starts_with("bae-"));
        assert_eq!(key.len(), 4 + 36);
        assert_eq!(key.matches('-').count(), 5);

        let other = doc_key_for("users", &fields(&[("name", Value::from("Bob"))])).unwrap();
        assert_ne!(key, other);
    }

    #[test]
    fn test_append_chains_heights_and_heads() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let store = CommitStore::new(&storage);

        let first = store.append("bae-1", "name", b"a".to_vec()).unwrap();
        let second = store.append("bae-1", "name", b"b".to_vec()).unwrap();

        let block = storage.get_block(&second).unwrap().unwrap();
        assert_eq!(block.height, 2);
        assert_eq!(block.links(), vec![first]);
        assert_eq!(storage.field_heads("bae-1", "name").unwrap(), vec![(second, 2)]);
    }

    #[test]
    fn test_concurrent_blocks_keep_two_heads() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let store = CommitStore::new(&storage);

        let root = store.append("bae-1", "name", b"root".to_vec()).unwrap();
        let left = store.put_block("bae-1", "name", b"l".to_vec(), &[root]).unwrap();
        let right = store.put_block("bae-1", "name", b"r".to_vec(), &[root]).unwrap();

        let mut heads: Vec<Cid> = storage
            .field_heads("bae-1", "name")
            .unwrap()
            .into_iter()
            .map(|(cid, _)| cid)
            .collect();
        heads.sort();
        let mut expected = vec![left, right];
        expected.sort();
        assert_eq!(heads, expected);

        let merged = store.append("bae-1", "name", b"m".to_vec()).unwrap();
        let block = storage.get_block(&merged).unwrap().unwrap();
        assert_eq!(block.height, 3);
        assert_eq!(block.links().len(), 2);
    }

    #[test]
    fn test_put_block_requires_known_parents() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let store = CommitStore::new(&storage);
        let result = store.put_block("bae-1", "name", vec![], &[Cid::of(b"unknown")]);
        assert!(matches!(result, Err(Error::NotFound)));
    }

    #[test]
    fn test_document_writes_composite_commit() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let store = CommitStore::new(&storage);

        let doc_key = store
            .create_document(
                "users",
                &fields(&[("name", Value::from("Alice")), ("age", Value::Int(30))]),
            )
            .unwrap();
        let heads = storage.field_heads(&doc_key, COMPOSITE_FIELD).unwrap();
        assert_eq!(heads.len(), 1);

        let composite = storage.get_block(&heads[0].0).unwrap().unwrap();
        assert_eq!(composite.height, 1);
        assert_eq!(composite.links().len(), 2);

        let update = store
            .update_document("users", &doc_key, &fields(&[("age", Value::Int(31))]))
            .unwrap();
        let block = storage.get_block(&update).unwrap().unwrap();
        assert_eq!(block.height, 2);
        assert_eq!(block.links().len(), 2);
        assert_eq!(
            storage.get_field("users", &doc_key, "age").unwrap(),
            Some(Value::Int(31))
        );
    }

    #[test]
    fn test_reserved_field_name() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let store = CommitStore::new(&storage);
        let result = store.update_document("users", "bae-1", &fields(&[("C", Value::Null)]));
        assert!(matches!(result, Err(Error::InvalidData(_))));
        let result = store.update_document("users", "bae-1", &fields(&[("_key", Value::from("x"))]));
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_rejected_batch_writes_nothing() {
        let storage = StorageEngine::open(StorageConfig::temporary()).unwrap();
        let store = CommitStore::new(&storage);
        let batch = fields(&[("name", Value::from("Alice")), ("C", Value::Int(1))]);

        let result = store.update_document("users", "bae-1", &batch);
        assert!(matches!(result, Err(Error::InvalidData(_))));
        assert_eq!(storage.get_field("users", "bae-1", "name").unwrap(), None);
        assert!(storage.field_heads("bae-1", "name").unwrap().is_empty());
        assert!(storage.field_heads("bae-1", COMPOSITE_FIELD).unwrap().is_empty());
    }
}
