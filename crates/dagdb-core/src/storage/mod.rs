//! Storage layer for DagDB.
//!
//! This module provides the sled-based storage collaborator of the plan
//! executor: field records, the commit block store and the head store.

mod commit_store;
mod config;
mod engine;
mod value_codec;

pub mod commit;
pub mod key;

pub use commit::{Cid, Commit, CommitBlock};
pub use commit_store::{doc_key_for, CommitStore, COMPOSITE_FIELD};
pub use config::StorageConfig;
pub use engine::{FieldCursor, HeadCursor, StorageEngine, BLOCKS_TREE, DOCS_TREE, HEADS_TREE};
pub use key::{DataStoreKey, HeadStoreKey, Key, Span};
pub use value_codec::{decode_value, encode_fields, encode_value};
