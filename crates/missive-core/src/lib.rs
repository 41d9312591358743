//! # missive-core
//!
//! Database-free foundation for the Missive persistence core:
//!
//! - **[`RecordId`]**: branded logical identifier for persisted records
//! - **[`FieldValue`] / [`ColumnValues`]**: the scalar value model shared by
//!   encoding, query parameters, and live-query sort keys
//! - **[`Predicate`] / [`SortKey`]**: serializable filter and sort trees that
//!   compile to SQL in the store crate and evaluate in memory here, with
//!   matching semantics
//!
//! Nothing in this crate touches SQLite; the store crate layers storage on
//! top of these types.

#![deny(unsafe_code)]

pub mod ids;
pub mod predicate;
pub mod value;

pub use ids::RecordId;
pub use predicate::{CompareOp, Predicate, SortKey, compare_key_values};
pub use value::{ColumnValues, FieldValue};
