use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::cursor::{Direction, PageCursors, PageState, PaginationWindow};

/// Remote collections the tool can browse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
  Products,
  Customers,
  Orders,
  Collections,
  DraftOrders,
}

impl Resource {
  /// API route segment, also used as the query key scope
  pub fn route(&self) -> &'static str {
    match self {
      Resource::Products => "products",
      Resource::Customers => "customers",
      Resource::Orders => "orders",
      Resource::Collections => "collections",
      Resource::DraftOrders => "draft_orders",
    }
  }

  /// Field shown as the item's title in list views
  pub fn title_field(&self) -> &'static str {
    match self {
      Resource::Products | Resource::Collections => "title",
      Resource::Customers => "email",
      Resource::Orders | Resource::DraftOrders => "name",
    }
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.route())
  }
}

/// One record of a collection. Resource specific fields stay untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
  pub id: String,
  pub title: String,
  pub updated_at: Option<String>,
  pub fields: Map<String, Value>,
}

/// One window of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub cursors: PageCursors,
}

impl<T> Page<T> {
  /// Pagination state of this window, given how it was reached.
  pub fn window(&self, direction: Direction) -> PaginationWindow {
    PaginationWindow::new(&self.cursors, direction)
  }
}

/// Custom field definition attached to a resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
  pub namespace: String,
  pub key: String,
  pub name: String,
  pub field_type: String,
}

/// Shop-level reference data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shop {
  pub name: String,
  pub domain: String,
  pub currency: Option<String>,
  pub timezone: Option<String>,
}

/// Arguments of a list window request. Serialized into the query key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ListArgs {
  #[serde(flatten)]
  pub page: PageState,
  pub limit: u32,
  pub search: Option<String>,
}

impl ListArgs {
  /// Blank search terms are no search at all.
  pub fn new(page: PageState, limit: u32, search: Option<String>) -> Self {
    let search = search
      .map(|s| s.trim().to_string())
      .filter(|s| !s.is_empty());
    Self {
      page,
      limit,
      search,
    }
  }
}
