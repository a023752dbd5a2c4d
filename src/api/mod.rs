//! Admin API: wire types, the HTTP client and the per-resource query
//! factories the cache runs.

pub mod api_types;
pub mod client;
pub mod queries;
pub mod types;

pub use client::ApiClient;
pub use queries::{Queries, ResourceApi, ResourceQuery};
pub use types::{FieldDefinition, Item, ListArgs, Page, Resource, Shop};
