//! Ordered key encoding and the spans that bound every scan.
//!
//! Keys are `/`-separated byte strings so that lexicographic byte order
//! groups every record of a document (and every commit of a field) together:
//!
//! - data store: `/{collection}/{dockey}/{field}`
//! - head store: `/{dockey}/{field}/{cid}`

use std::fmt;

use super::commit::Cid;
use crate::error::Error;

const SEPARATOR: u8 = b'/';

/// An ordered binary key.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    /// Create a key from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The empty key. As a span end it means "no upper bound".
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Key naming a document without any collection or field, `/{dockey}`.
    ///
    /// Append children receive this as the start of their one-shot span.
    pub fn doc(doc_key: &str) -> Self {
        let mut buf = Vec::with_capacity(doc_key.len() + 1);
        buf.push(SEPARATOR);
        buf.extend_from_slice(doc_key.as_bytes());
        Self(buf)
    }

    /// Raw bytes of the key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether the key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this key starts with `prefix`.
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The smallest key greater than every key prefixed by `self`.
    ///
    /// Trailing `0xff` bytes are dropped and the last remaining byte is
    /// incremented, so `/k/1` becomes `/k/2` and `/k/C` becomes `/k/D`.
    /// A key made only of `0xff` bytes has no successor and yields the empty
    /// (unbounded) key.
    pub fn prefix_end(&self) -> Key {
        let mut bytes = self.0.clone();
        while let Some(last) = bytes.pop() {
            if last < u8::MAX {
                bytes.push(last + 1);
                return Key(bytes);
            }
        }
        Key::empty()
    }

    /// Append a `/`-separated segment.
    pub fn child(&self, segment: &str) -> Key {
        let mut bytes = self.0.clone();
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(segment.as_bytes());
        Key(bytes)
    }

    /// Split the key into its `/`-separated UTF-8 segments.
    pub fn segments(&self) -> Result<Vec<&str>, Error> {
        let text = std::str::from_utf8(&self.0).map_err(|_| Error::InvalidKey)?;
        let rest = text.strip_prefix('/').ok_or(Error::InvalidKey)?;
        Ok(rest.split('/').collect())
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Key(bytes)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s.into_bytes())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", String::from_utf8_lossy(&self.0))
    }
}

/// A key into the document data store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStoreKey {
    pub collection: String,
    pub doc_key: Option<String>,
    pub field: Option<String>,
}

impl DataStoreKey {
    /// Key addressing a whole collection.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            doc_key: None,
            field: None,
        }
    }

    /// Key addressing every field of one document.
    pub fn document(collection: impl Into<String>, doc_key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            doc_key: Some(doc_key.into()),
            field: None,
        }
    }

    /// Key addressing one field of one document.
    pub fn field(
        collection: impl Into<String>,
        doc_key: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            doc_key: Some(doc_key.into()),
            field: Some(field.into()),
        }
    }

    /// Encode to an ordered key.
    ///
    /// Collection and document keys end with a separator so that their
    /// prefix scans never pick up `bae-12` when asked for `bae-1`.
    pub fn to_key(&self) -> Key {
        let mut key = Key::doc(&self.collection);
        match (&self.doc_key, &self.field) {
            (Some(doc), Some(field)) => key.child(doc).child(field),
            (Some(doc), None) => {
                key = key.child(doc);
                key.0.push(SEPARATOR);
                key
            }
            (None, _) => {
                key.0.push(SEPARATOR);
                key
            }
        }
    }

    /// Decode a full field key `/{collection}/{dockey}/{field}`.
    pub fn decode(key: &[u8]) -> Result<Self, Error> {
        let key = Key::new(key.to_vec());
        match key.segments()?.as_slice() {
            [collection, doc, field] if !doc.is_empty() && !field.is_empty() => {
                Ok(Self::field(*collection, *doc, *field))
            }
            _ => Err(Error::InvalidKey),
        }
    }
}

/// A key into the head store, which indexes the commit DAG of each field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadStoreKey {
    pub doc_key: String,
    pub field: Option<String>,
    pub cid: Option<Cid>,
}

impl HeadStoreKey {
    /// Key addressing the heads of one field.
    pub fn field(doc_key: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            doc_key: doc_key.into(),
            field: Some(field.into()),
            cid: None,
        }
    }

    /// Replace the field component.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Set the head CID component.
    pub fn with_cid(mut self, cid: Cid) -> Self {
        self.cid = Some(cid);
        self
    }

    /// Encode to an ordered key. Components stop at the first missing one.
    pub fn to_key(&self) -> Key {
        let key = Key::doc(&self.doc_key);
        match (&self.field, &self.cid) {
            (Some(field), Some(cid)) => key.child(field).child(&cid.to_string()),
            (Some(field), None) => key.child(field),
            (None, _) => key,
        }
    }

    /// Decode `/{dockey}`, `/{dockey}/{field}` or `/{dockey}/{field}/{cid}`.
    pub fn decode(key: &[u8]) -> Result<Self, Error> {
        let key = Key::new(key.to_vec());
        let segments = key.segments()?;
        let mut parts = segments.into_iter();
        let doc_key = match parts.next() {
            Some(doc) if !doc.is_empty() => doc.to_string(),
            _ => return Err(Error::InvalidKey),
        };
        let field = parts.next().filter(|f| !f.is_empty()).map(str::to_string);
        let cid = match parts.next() {
            Some(cid) => Some(cid.parse::<Cid>()?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(Error::InvalidKey);
        }
        Ok(Self {
            doc_key,
            field,
            cid,
        })
    }
}

/// A range over keys bounding one scan.
///
/// With a non-empty `end` the span covers `[start, end)`. An empty `end`
/// makes it a prefix bound: every key that starts with `start`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: Key,
    pub end: Key,
}

impl Span {
    /// Create a `[start, end)` span.
    pub fn new(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Create a prefix span (empty end).
    pub fn prefix(start: impl Into<Key>) -> Self {
        Self {
            start: start.into(),
            end: Key::empty(),
        }
    }

    /// Whether this span is a prefix bound.
    pub fn is_prefix(&self) -> bool {
        self.end.is_empty()
    }

    /// Whether `key` falls within the span.
    pub fn contains(&self, key: &[u8]) -> bool {
        if self.is_prefix() {
            key.starts_with(self.start.as_bytes())
        } else {
            key >= self.start.as_bytes() && key < self.end.as_bytes()
        }
    }

    /// Check the span is well formed: a bounded span must not be inverted.
    pub fn validate(&self) -> Result<(), Error> {
        if !self.is_prefix() && self.end < self.start {
            return Err(crate::error::PlanError::InvalidSpans(format!(
                "span end {} sorts before start {}",
                self.end, self.start
            ))
            .into());
        }
        Ok(())
    }

    /// Render as `{"start": ..., "end": ...}` for explain output.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "start": self.start.to_string(),
            "end": self.end.to_string(),
        })
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span[{} -> {}]", self.start, self.end)
    }
}

/// Render a span list for explain output.
pub fn spans_to_json(spans: &[Span]) -> serde_json::Value {
    serde_json::Value::Array(spans.iter().map(Span::to_json).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_end() {
        assert_eq!(Key::from("/bae-1/1").prefix_end(), Key::from("/bae-1/2"));
        assert_eq!(Key::from("/bae-1/C").prefix_end(), Key::from("/bae-1/D"));
        assert_eq!(
            Key::new(vec![b'a', 0xff, 0xff]).prefix_end(),
            Key::new(vec![b'b'])
        );
        assert!(Key::new(vec![0xff]).prefix_end().is_empty());
    }

    #[test]
    fn test_data_store_key_layout() {
        let key = DataStoreKey::field("users", "bae-1", "name").to_key();
        assert_eq!(key.to_string(), "/users/bae-1/name");
        assert_eq!(
            DataStoreKey::document("users", "bae-1").to_key().to_string(),
            "/users/bae-1/"
        );
        assert_eq!(DataStoreKey::collection("users").to_key().to_string(), "/users/");

        let decoded = DataStoreKey::decode(key.as_bytes()).unwrap();
        assert_eq!(decoded.doc_key.as_deref(), Some("bae-1"));
        assert_eq!(decoded.field.as_deref(), Some("name"));

        assert!(DataStoreKey::decode(b"/users/bae-1").is_err());
        assert!(DataStoreKey::decode(b"users/bae-1/name").is_err());
    }

    #[test]
    fn test_head_store_key_layout() {
        let cid = Cid::from_bytes([7u8; 32]);
        let key = HeadStoreKey::field("bae-1", "C").with_cid(cid).to_key();
        assert_eq!(key.to_string(), format!("/bae-1/C/{}", cid));

        let decoded = HeadStoreKey::decode(key.as_bytes()).unwrap();
        assert_eq!(decoded.doc_key, "bae-1");
        assert_eq!(decoded.field.as_deref(), Some("C"));
        assert_eq!(decoded.cid, Some(cid));

        let doc_only = HeadStoreKey::decode(Key::doc("bae-1").as_bytes()).unwrap();
        assert_eq!(doc_only.field, None);
    }

    #[test]
    fn test_document_prefix_does_not_bleed() {
        let span = Span::prefix(DataStoreKey::document("users", "bae-1").to_key());
        assert!(span.contains(b"/users/bae-1/name"));
        assert!(!span.contains(b"/users/bae-12/name"));
    }

    #[test]
    fn test_span_bounds() {
        let span = Span::new("/bae-1/1", "/bae-1/2");
        assert!(span.contains(b"/bae-1/1/abc"));
        assert!(!span.contains(b"/bae-1/2"));
        assert!(span.validate().is_ok());

        let inverted = Span::new("/b", "/a");
        assert!(inverted.validate().is_err());
    }
}
