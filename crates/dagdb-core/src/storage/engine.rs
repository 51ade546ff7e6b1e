//! Storage engine implementation.

use super::commit::{Cid, CommitBlock};
use super::key::{DataStoreKey, HeadStoreKey, Span};
use super::value_codec::{decode_value, encode_value};
use super::StorageConfig;
use crate::error::Error;
use dagdb_proto::{Value, KEY_FIELD};
use sled::{Db, Tree};

/// Tree name for document field records.
pub const DOCS_TREE: &str = "docs";

/// Tree name for the head store (current DAG heads per field).
pub const HEADS_TREE: &str = "heads";

/// Tree name for the content-addressed block store.
pub const BLOCKS_TREE: &str = "blocks";

/// The main storage engine wrapping sled.
///
/// This is the storage collaborator of the plan executor: it serves ordered
/// range reads bounded by [`Span`]s over the data store and the head store,
/// and direct reads of commit blocks by CID.
pub struct StorageEngine {
    /// The underlying sled database.
    db: Db,

    /// Field records, `/{collection}/{dockey}/{field}` -> encoded value.
    docs_tree: Tree,

    /// Head store, `/{dockey}/{field}/{cid}` -> height (big-endian u64).
    heads_tree: Tree,

    /// Block store, raw CID bytes -> rkyv-encoded block.
    blocks_tree: Tree,
}

impl StorageEngine {
    /// Open or create a storage engine with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let sled_config = config.to_sled_config();
        let db = sled_config.open()?;
        let docs_tree = db.open_tree(DOCS_TREE)?;
        let heads_tree = db.open_tree(HEADS_TREE)?;
        let blocks_tree = db.open_tree(BLOCKS_TREE)?;

        Ok(Self {
            db,
            docs_tree,
            heads_tree,
            blocks_tree,
        })
    }

    /// Check if the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    // ========== Data store ==========

    /// Write one field of a document.
    pub fn put_field(
        &self,
        collection: &str,
        doc_key: &str,
        field: &str,
        value: &Value,
    ) -> Result<(), Error> {
        if field == KEY_FIELD {
            return Err(Error::InvalidData(format!(
                "field name {} is reserved for the document key",
                KEY_FIELD
            )));
        }
        let key = DataStoreKey::field(collection, doc_key, field).to_key();
        self.docs_tree.insert(key.as_bytes(), encode_value(value)?)?;
        Ok(())
    }

    /// Read one field of a document.
    pub fn get_field(
        &self,
        collection: &str,
        doc_key: &str,
        field: &str,
    ) -> Result<Option<Value>, Error> {
        let key = DataStoreKey::field(collection, doc_key, field).to_key();
        match self.docs_tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Open an ordered cursor over the field records within `span`.
    pub fn scan_fields(&self, span: &Span) -> FieldCursor {
        FieldCursor {
            iter: span_iter(&self.docs_tree, span),
        }
    }

    // ========== Block store ==========

    /// Store a block, returning its CID. Storing the same block twice is a no-op.
    pub fn put_block(&self, block: &CommitBlock) -> Result<Cid, Error> {
        let (cid, bytes) = block.seal()?;
        self.blocks_tree.insert(cid.as_bytes(), bytes)?;
        Ok(cid)
    }

    /// Read a block by CID.
    pub fn get_block(&self, cid: &Cid) -> Result<Option<CommitBlock>, Error> {
        match self.blocks_tree.get(cid.as_bytes())? {
            Some(bytes) => Ok(Some(CommitBlock::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    // ========== Head store ==========

    /// Mark `cid` as a head of the `(doc_key, field)` DAG.
    pub fn add_head(&self, doc_key: &str, field: &str, cid: Cid, height: u64) -> Result<(), Error> {
        let key = HeadStoreKey::field(doc_key, field).with_cid(cid).to_key();
        self.heads_tree.insert(key.as_bytes(), &height.to_be_bytes()[..])?;
        Ok(())
    }

    /// Remove `cid` from the heads of the `(doc_key, field)` DAG.
    pub fn remove_head(&self, doc_key: &str, field: &str, cid: Cid) -> Result<(), Error> {
        let key = HeadStoreKey::field(doc_key, field).with_cid(cid).to_key();
        self.heads_tree.remove(key.as_bytes())?;
        Ok(())
    }

    /// Current heads of one field DAG, in CID order.
    pub fn field_heads(&self, doc_key: &str, field: &str) -> Result<Vec<(Cid, u64)>, Error> {
        // Trailing separator keeps field `1` from matching field `10`.
        let mut prefix = HeadStoreKey::field(doc_key, field).to_key().as_bytes().to_vec();
        prefix.push(b'/');
        let span = Span::prefix(prefix);

        let mut heads = Vec::new();
        for entry in self.scan_heads(&span) {
            let (key, height) = entry?;
            let cid = key.cid.ok_or(Error::InvalidKey)?;
            heads.push((cid, height));
        }
        Ok(heads)
    }

    /// Open an ordered cursor over head entries within `span`.
    pub fn scan_heads(&self, span: &Span) -> HeadCursor {
        HeadCursor {
            iter: span_iter(&self.heads_tree, span),
        }
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Get database size in bytes.
    pub fn size_on_disk(&self) -> Result<u64, Error> {
        Ok(self.db.size_on_disk()?)
    }

    /// Get the underlying sled database (for opening new trees).
    pub fn db(&self) -> &Db {
        &self.db
    }
}

fn span_iter(tree: &Tree, span: &Span) -> sled::Iter {
    if span.is_prefix() {
        tree.scan_prefix(span.start.as_bytes())
    } else {
        tree.range(span.start.as_bytes().to_vec()..span.end.as_bytes().to_vec())
    }
}

/// Ordered cursor over decoded field records.
pub struct FieldCursor {
    iter: sled::Iter,
}

impl Iterator for FieldCursor {
    type Item = Result<(DataStoreKey, Value), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = match self.iter.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };
        Some(DataStoreKey::decode(&key).and_then(|key| Ok((key, decode_value(&value)?))))
    }
}

/// Ordered cursor over head store entries.
pub struct HeadCursor {
    iter: sled::Iter,
}

impl Iterator for HeadCursor {
    type Item = Result<(HeadStoreKey, u64), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = match self.iter.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e.into())),
        };
        let decoded = HeadStoreKey::decode(&key).and_then(|key| {
            let height: [u8; 8] = value.as_ref().try_into().map_err(|_| {
                Error::Deserialization(format!("head height has {} bytes", value.len()))
            })?;
            Ok((key, u64::from_be_bytes(height)))
        });
        Some(decoded)
    }
}
