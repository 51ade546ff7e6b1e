//! DagDB value and query types.
//!
//! This crate defines the row and query vocabulary shared by the plan
//! executor in `dagdb-core` and whatever compiles queries into plans.
//!
//! # Modules
//!
//! - [`value`] - Runtime field values, scalar and nested
//! - [`doc`] - Insertion-ordered document rows
//! - [`query`] - Filter, ordering and pagination types

pub mod doc;
pub mod query;
pub mod value;

pub use doc::{Doc, KEY_FIELD};
pub use query::{FilterExpr, OrderDirection, OrderSpec, Pagination};
pub use value::Value;
