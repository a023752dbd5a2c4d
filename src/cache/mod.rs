//! Resource query cache.
//!
//! This module provides the resource-agnostic caching core that:
//! - Derives a canonical key for every "this data, with these arguments" request
//! - Serves cached results while they are fresh, per query type
//! - Collapses concurrent identical requests into one network operation
//! - Commits results by request start order, never letting an older response
//!   overwrite a newer one
//! - Fans a list query out together with its auxiliary metadata queries

mod descriptor;
mod entry;
mod executor;
mod key;
mod prefetch;
mod store;

pub use descriptor::{AnyQuery, FetchFn, FetchFuture, QueryDescriptor, RunOptions};
pub use entry::{CacheEntry, QueryData, QueryStatus};
pub use executor::QueryExecutor;
pub use key::QueryKey;
pub use prefetch::PrefetchCoordinator;
pub use store::{CacheStore, Subscriber, Subscription, DEFAULT_GC_TIME};
