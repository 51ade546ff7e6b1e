//! Content-addressed commit blocks.

use std::fmt;
use std::str::FromStr;

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::Error;

/// Size of a content identifier in bytes (blake3 digest).
pub const CID_SIZE: usize = 32;

/// Content identifier of a commit block: the blake3 digest of its encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cid([u8; CID_SIZE]);

impl Cid {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; CID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Compute the CID of an encoded block.
    pub fn of(encoded: &[u8]) -> Self {
        Self(*blake3::hash(encoded).as_bytes())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; CID_SIZE] {
        &self.0
    }

    /// Decode from a raw byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let digest: [u8; CID_SIZE] = bytes.try_into().map_err(|_| Error::InvalidKey)?;
        Ok(Self(digest))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", hex::encode(&self.0[..8]))
    }
}

impl FromStr for Cid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidKey)?;
        Self::from_slice(&bytes)
    }
}

/// One update record in a field's Merkle DAG.
///
/// `links` are the CIDs of the causal parents. A block with no links is a
/// root; its height is 1. Every other block sits one above its highest parent.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct CommitBlock {
    /// Document the commit belongs to.
    pub doc_key: String,

    /// Field identifier, or the composite field for whole-document commits.
    pub field: String,

    /// Distance from the DAG roots.
    pub height: u64,

    /// Opaque CRDT delta payload.
    pub delta: Vec<u8>,

    /// Causal parents.
    pub links: Vec<[u8; CID_SIZE]>,
}

impl CommitBlock {
    /// Create a block.
    pub fn new(
        doc_key: impl Into<String>,
        field: impl Into<String>,
        height: u64,
        delta: Vec<u8>,
        links: &[Cid],
    ) -> Self {
        Self {
            doc_key: doc_key.into(),
            field: field.into(),
            height,
            delta,
            links: links.iter().map(|cid| *cid.as_bytes()).collect(),
        }
    }

    /// Parent CIDs.
    pub fn links(&self) -> Vec<Cid> {
        self.links.iter().copied().map(Cid::from_bytes).collect()
    }

    /// Serialize the block to bytes using rkyv.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a block from bytes using rkyv.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Encode and address the block.
    pub fn seal(&self) -> Result<(Cid, Vec<u8>), Error> {
        let bytes = self.to_bytes()?;
        Ok((Cid::of(&bytes), bytes))
    }
}

/// A commit block together with its content identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub cid: Cid,
    pub block: CommitBlock,
}
