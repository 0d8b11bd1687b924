//! Storage layer for Vellum.
//!
//! Three pieces, leaves first:
//!
//! - [`collation`] - the `JSON` collation, registered at open time and
//!   consumed by the (external) view engine's map rows.
//! - [`schema`] - the version-1 DDL and `user_version` helpers.
//! - [`engine`] - [`SqlEngine`], the thin synchronous adapter the
//!   revision store talks to: parameterized statements, last-insert-id,
//!   affected rows, and reference-counted nested transactions with a
//!   sticky failure flag.

pub mod collation;
pub mod engine;
pub mod schema;

pub use engine::SqlEngine;
pub use schema::{MIN_INCOMPATIBLE_VERSION, SCHEMA_VERSION};
