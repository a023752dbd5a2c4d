//! Runs a list query together with the auxiliary queries its view needs.

use futures::future::join_all;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;

use super::descriptor::{AnyQuery, QueryDescriptor};
use super::entry::QueryData;
use super::executor::QueryExecutor;
use crate::error::QueryResult;

/// Fans a primary query and its auxiliary queries out through the executor.
///
/// Every constituent is issued at once and cached on its own; a failure in
/// one never rolls back the others.
#[derive(Clone)]
pub struct PrefetchCoordinator {
  executor: QueryExecutor,
}

impl PrefetchCoordinator {
  pub fn new(executor: QueryExecutor) -> Self {
    Self { executor }
  }

  pub fn executor(&self) -> &QueryExecutor {
    &self.executor
  }

  /// Resolve once the primary and all auxiliary queries have settled.
  ///
  /// Returns the primary data, or the first failure in declaration order
  /// (primary first). Successful results are committed either way.
  pub async fn prefetch<T: Any + Send + Sync>(
    &self,
    primary: QueryDescriptor<T>,
    auxiliary: Vec<AnyQuery>,
  ) -> QueryResult<Arc<T>> {
    let primary_key = primary.key.clone();
    let (primary, auxiliary) = futures::join!(
      self.executor.fetch_query(primary),
      self.settle_all(auxiliary)
    );

    let failed = auxiliary.iter().filter(|r| r.is_err()).count();
    debug!(key = %primary_key, auxiliary = auxiliary.len(), failed, "prefetch settled");

    let data = primary?;
    for result in auxiliary {
      result?;
    }
    Ok(data)
  }

  /// Warm a set of queries without a primary one.
  pub async fn prefetch_all(&self, queries: Vec<AnyQuery>) -> QueryResult<Vec<QueryData>> {
    self.settle_all(queries).await.into_iter().collect()
  }

  async fn settle_all(&self, queries: Vec<AnyQuery>) -> Vec<QueryResult<QueryData>> {
    join_all(queries.into_iter().map(|q| self.executor.fetch_any(q))).await
  }
}
