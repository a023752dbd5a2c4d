//! Cursor-aware query cache for browsing large remote collections.
//!
//! [`cache`] holds the core: query keys, the entry store, the single-flight
//! executor and the prefetch coordinator. [`cursor`] turns opaque API cursors
//! into URL state. Everything else is the command line browser built on them.

pub mod api;
pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod query;

pub use error::{QueryError, QueryResult};
