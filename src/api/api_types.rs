//! Serde-deserializable types matching the admin API responses.
//!
//! These types are separate from domain types to allow clean deserialization
//! while keeping domain types focused on application needs.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::api::types::{FieldDefinition, Item, Page, Resource, Shop};
use crate::cursor::{Cursor, PageCursors};

// ============================================================================
// List endpoints
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ApiPageInfo {
  #[serde(default)]
  pub start_cursor: Option<String>,
  #[serde(default)]
  pub end_cursor: Option<String>,
  #[serde(default)]
  pub has_next_page: bool,
  #[serde(default)]
  pub has_previous_page: bool,
}

impl ApiPageInfo {
  /// The start cursor leads backwards, the end cursor forwards; either is
  /// dropped when the API says there is nothing on that side.
  pub fn into_cursors(self) -> PageCursors {
    PageCursors {
      previous: self
        .start_cursor
        .filter(|_| self.has_previous_page)
        .and_then(Cursor::new),
      next: self
        .end_cursor
        .filter(|_| self.has_next_page)
        .and_then(Cursor::new),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiListResponse {
  #[serde(default)]
  pub items: Vec<Map<String, Value>>,
  #[serde(default)]
  pub page_info: ApiPageInfo,
}

impl ApiListResponse {
  pub fn into_page(self, resource: Resource) -> Result<Page<Item>> {
    let items = self
      .items
      .into_iter()
      .map(|fields| into_item(resource, fields))
      .collect::<Result<Vec<_>>>()?;

    Ok(Page {
      items,
      cursors: self.page_info.into_cursors(),
    })
  }
}

// ============================================================================
// Single item endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiItemResponse {
  pub item: Map<String, Value>,
}

impl ApiItemResponse {
  pub fn into_item(self, resource: Resource) -> Result<Item> {
    into_item(resource, self.item)
  }
}

/// Build an item from its raw fields. Ids may be numeric or strings.
pub fn into_item(resource: Resource, fields: Map<String, Value>) -> Result<Item> {
  let id = match fields.get("id") {
    Some(Value::String(s)) if !s.is_empty() => s.clone(),
    Some(Value::Number(n)) => n.to_string(),
    _ => return Err(eyre!("{} item without an id", resource)),
  };

  let title = fields
    .get(resource.title_field())
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string();

  let updated_at = fields
    .get("updated_at")
    .and_then(Value::as_str)
    .map(String::from);

  Ok(Item {
    id,
    title,
    updated_at,
    fields,
  })
}

// ============================================================================
// Metadata endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiFieldDefinition {
  pub namespace: String,
  pub key: String,
  pub name: Option<String>,
  #[serde(rename = "type")]
  pub field_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiFieldDefinitionsResponse {
  #[serde(default)]
  pub definitions: Vec<ApiFieldDefinition>,
}

impl From<ApiFieldDefinition> for FieldDefinition {
  fn from(def: ApiFieldDefinition) -> Self {
    Self {
      name: def.name.unwrap_or_else(|| def.key.clone()),
      namespace: def.namespace,
      key: def.key,
      field_type: def.field_type,
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiShop {
  pub name: String,
  pub domain: String,
  pub currency: Option<String>,
  #[serde(rename = "iana_timezone")]
  pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiShopResponse {
  pub shop: ApiShop,
}

impl From<ApiShop> for Shop {
  fn from(shop: ApiShop) -> Self {
    Self {
      name: shop.name,
      domain: shop.domain,
      currency: shop.currency,
      timezone: shop.timezone,
    }
  }
}
