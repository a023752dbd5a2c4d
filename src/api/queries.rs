//! Per-resource query factories.
//!
//! Every request the browser makes is one of the [`ResourceQuery`] variants.
//! The variant decides the key, the stale time and the API call, so call
//! sites never branch on the resource themselves.

use color_eyre::Result;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::time::Duration;

use crate::api::types::{FieldDefinition, Item, ListArgs, Page, Resource, Shop};
use crate::cache::{AnyQuery, QueryDescriptor, QueryKey};
use crate::config::StalePolicy;
use crate::cursor::PageState;
use crate::error::QueryResult;

/// Scope of shop-level reference data, which belongs to no resource.
pub const SHOP_SCOPE: &str = "shop";

/// Remote operations the query factories are built on.
pub trait ResourceApi: Clone + Send + Sync + 'static {
  fn list_items(&self, resource: Resource, args: ListArgs) -> impl Future<Output = Result<Page<Item>>> + Send;

  fn get_item(&self, resource: Resource, id: String) -> impl Future<Output = Result<Item>> + Send;

  fn field_definitions(&self, resource: Resource) -> impl Future<Output = Result<Vec<FieldDefinition>>> + Send;

  fn shop(&self) -> impl Future<Output = Result<Shop>> + Send;

  fn update_item(
    &self,
    resource: Resource,
    id: String,
    fields: Map<String, Value>,
  ) -> impl Future<Output = Result<Item>> + Send;
}

/// One cacheable request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceQuery {
  List { resource: Resource, args: ListArgs },
  Detail { resource: Resource, id: String },
  FieldDefinitions { resource: Resource },
  Shop,
}

impl ResourceQuery {
  pub fn scope(&self) -> &'static str {
    match self {
      ResourceQuery::List { resource, .. }
      | ResourceQuery::Detail { resource, .. }
      | ResourceQuery::FieldDefinitions { resource } => resource.route(),
      ResourceQuery::Shop => SHOP_SCOPE,
    }
  }

  /// Searches are cached apart from plain list windows: they go stale on
  /// their own schedule.
  pub fn entity(&self) -> &'static str {
    match self {
      ResourceQuery::List { args, .. } if args.search.is_some() => "search",
      ResourceQuery::List { .. } => "list",
      ResourceQuery::Detail { .. } => "detail",
      ResourceQuery::FieldDefinitions { .. } => "field_definitions",
      ResourceQuery::Shop => "reference",
    }
  }

  pub fn key(&self) -> QueryResult<QueryKey> {
    match self {
      ResourceQuery::List { args, .. } => QueryKey::build(self.scope(), self.entity(), args),
      ResourceQuery::Detail { id, .. } => QueryKey::build(self.scope(), self.entity(), &json!({ "id": id })),
      ResourceQuery::FieldDefinitions { .. } | ResourceQuery::Shop => QueryKey::simple(self.scope(), self.entity()),
    }
  }

  pub fn stale_time(&self, policy: &StalePolicy) -> Duration {
    match self {
      ResourceQuery::List { args, .. } if args.search.is_some() => policy.search,
      ResourceQuery::List { .. } => policy.list,
      ResourceQuery::Detail { .. } => policy.detail,
      ResourceQuery::FieldDefinitions { .. } => policy.field_definitions,
      ResourceQuery::Shop => policy.reference,
    }
  }
}

/// Builds [`QueryDescriptor`]s for an API.
#[derive(Clone)]
pub struct Queries<A> {
  api: A,
  policy: StalePolicy,
  page_size: u32,
}

impl<A: ResourceApi> Queries<A> {
  pub fn new(api: A, policy: StalePolicy, page_size: u32) -> Self {
    Self {
      api,
      policy,
      page_size,
    }
  }

  pub fn api(&self) -> &A {
    &self.api
  }

  pub fn page_size(&self) -> u32 {
    self.page_size
  }

  pub fn list(
    &self,
    resource: Resource,
    page: PageState,
    search: Option<String>,
  ) -> QueryResult<QueryDescriptor<Page<Item>>> {
    let args = ListArgs::new(page, self.page_size, search);
    let query = ResourceQuery::List {
      resource,
      args: args.clone(),
    };
    let api = self.api.clone();
    self.describe(&query, move || async move { api.list_items(resource, args).await })
  }

  pub fn detail(&self, resource: Resource, id: &str) -> QueryResult<QueryDescriptor<Item>> {
    let id = id.to_string();
    let query = ResourceQuery::Detail {
      resource,
      id: id.clone(),
    };
    let api = self.api.clone();
    self.describe(&query, move || async move { api.get_item(resource, id).await })
  }

  pub fn field_definitions(&self, resource: Resource) -> QueryResult<QueryDescriptor<Vec<FieldDefinition>>> {
    let api = self.api.clone();
    self.describe(&ResourceQuery::FieldDefinitions { resource }, move || async move {
      api.field_definitions(resource).await
    })
  }

  pub fn shop(&self) -> QueryResult<QueryDescriptor<Shop>> {
    let api = self.api.clone();
    self.describe(&ResourceQuery::Shop, move || async move { api.shop().await })
  }

  /// Metadata a list view of `resource` renders next to its items.
  pub fn list_auxiliaries(&self, resource: Resource) -> QueryResult<Vec<AnyQuery>> {
    Ok(vec![self.field_definitions(resource)?.erase(), self.shop()?.erase()])
  }

  fn describe<T, F, Fut>(&self, query: &ResourceQuery, fetch: F) -> QueryResult<QueryDescriptor<T>>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    let key = query.key()?;
    Ok(QueryDescriptor::new(key, fetch).with_stale_time(query.stale_time(&self.policy)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheStore, PrefetchCoordinator, QueryExecutor};
  use crate::cursor::{Cursor, Direction, PageCursors};
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[derive(Clone, Default)]
  struct CountingApi {
    lists: Arc<AtomicUsize>,
    definitions: Arc<AtomicUsize>,
  }

  impl ResourceApi for CountingApi {
    async fn list_items(&self, resource: Resource, args: ListArgs) -> Result<Page<Item>> {
      self.lists.fetch_add(1, Ordering::SeqCst);
      let id = format!("{}-{}", resource, args.page.cursor.map(|c| c.to_string()).unwrap_or_default());
      Ok(Page {
        items: vec![Item {
          id,
          title: "first".to_string(),
          updated_at: None,
          fields: Map::new(),
        }],
        cursors: PageCursors::default(),
      })
    }

    async fn get_item(&self, _resource: Resource, id: String) -> Result<Item> {
      Ok(Item {
        id,
        title: String::new(),
        updated_at: None,
        fields: Map::new(),
      })
    }

    async fn field_definitions(&self, _resource: Resource) -> Result<Vec<FieldDefinition>> {
      self.definitions.fetch_add(1, Ordering::SeqCst);
      Ok(Vec::new())
    }

    async fn shop(&self) -> Result<Shop> {
      Err(eyre!("shop unavailable"))
    }

    async fn update_item(&self, resource: Resource, id: String, _fields: Map<String, Value>) -> Result<Item> {
      self.get_item(resource, id).await
    }
  }

  fn queries() -> Queries<CountingApi> {
    Queries::new(CountingApi::default(), StalePolicy::default(), 25)
  }

  #[test]
  fn test_entities_and_scopes() {
    let list = ResourceQuery::List {
      resource: Resource::Orders,
      args: ListArgs::new(PageState::first(), 25, None),
    };
    let search = ResourceQuery::List {
      resource: Resource::Orders,
      args: ListArgs::new(PageState::first(), 25, Some("paid".to_string())),
    };
    assert_eq!(list.scope(), "orders");
    assert_eq!(list.entity(), "list");
    assert_eq!(search.entity(), "search");
    assert_eq!(ResourceQuery::Shop.scope(), SHOP_SCOPE);

    let policy = StalePolicy::default();
    assert_eq!(list.stale_time(&policy), policy.list);
    assert_eq!(search.stale_time(&policy), policy.search);
    assert_eq!(ResourceQuery::Shop.stale_time(&policy), Duration::MAX);
  }

  #[test]
  fn test_blank_search_is_plain_list() {
    let q = queries();
    let plain = q.list(Resource::Products, PageState::first(), None).unwrap();
    let blank = q
      .list(Resource::Products, PageState::first(), Some("  ".to_string()))
      .unwrap();
    assert_eq!(plain.key, blank.key);
    assert_eq!(blank.key.entity(), "list");
  }

  #[test]
  fn test_cursor_and_direction_change_key() {
    let q = queries();
    let first = q.list(Resource::Products, PageState::first(), None).unwrap();
    let forward = q
      .list(
        Resource::Products,
        PageState::new(Cursor::new("c1"), Direction::Forward),
        None,
      )
      .unwrap();
    let backward = q
      .list(
        Resource::Products,
        PageState::new(Cursor::new("c1"), Direction::Backward),
        None,
      )
      .unwrap();
    let other_resource = q.list(Resource::Orders, PageState::first(), None).unwrap();

    assert_ne!(first.key, forward.key);
    assert_ne!(forward.key, backward.key);
    assert_ne!(first.key, other_resource.key);
    assert_eq!(forward.key.arg("limit"), Some(&json!(25)));
  }

  #[test]
  fn test_detail_key_carries_id() {
    let q = queries();
    let detail = q.detail(Resource::Customers, "42").unwrap();
    assert_eq!(detail.key.entity(), "detail");
    assert_eq!(detail.key.arg("id"), Some(&json!("42")));
    assert_eq!(detail.stale_time, StalePolicy::default().detail);
  }

  #[tokio::test]
  async fn test_list_descriptor_fetches_through_executor() {
    let q = queries();
    let executor = QueryExecutor::new(CacheStore::new());

    let page = executor
      .fetch_query(q.list(Resource::Products, PageState::first(), None).unwrap())
      .await
      .unwrap();
    assert_eq!(page.items[0].id, "products-");

    // Fresh within the list stale time
    executor
      .fetch_query(q.list(Resource::Products, PageState::first(), None).unwrap())
      .await
      .unwrap();
    assert_eq!(q.api().lists.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_auxiliary_failure_keeps_definitions() {
    let q = queries();
    let coordinator = PrefetchCoordinator::new(QueryExecutor::new(CacheStore::new()));

    let result = coordinator
      .prefetch(
        q.list(Resource::Products, PageState::first(), None).unwrap(),
        q.list_auxiliaries(Resource::Products).unwrap(),
      )
      .await;
    assert!(result.is_err());

    let definitions_key = ResourceQuery::FieldDefinitions {
      resource: Resource::Products,
    }
    .key()
    .unwrap();
    let cached = coordinator
      .executor()
      .cached::<Vec<FieldDefinition>>(&definitions_key);
    assert!(cached.is_some());
    assert_eq!(q.api().definitions.load(Ordering::SeqCst), 1);
  }
}
