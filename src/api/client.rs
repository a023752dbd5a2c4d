use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::api::api_types::{
  ApiFieldDefinitionsResponse, ApiItemResponse, ApiListResponse, ApiShopResponse,
};
use crate::api::queries::ResourceApi;
use crate::api::types::{FieldDefinition, Item, ListArgs, Page, Resource, Shop};
use crate::config::Config;
use crate::cursor::Direction;

/// Admin API client
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid API url {}: {}", config.api.url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("API url {} cannot be used as a base", base_url));
    }

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.api.timeout_secs))
      .user_agent(concat!("resq/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url,
      token: Config::get_api_token(),
    })
  }

  /// Build `{base}/{segments...}`.
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("API url {} cannot be used as a base", self.base_url))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  /// URL of one list window. Forward windows ask for the items after the
  /// cursor, backward windows for the items before it.
  pub fn list_url(&self, resource: Resource, args: &ListArgs) -> Result<Url> {
    let mut url = self.endpoint(&[resource.route()])?;
    {
      let mut query = url.query_pairs_mut();
      let limit = args.limit.to_string();
      match (&args.page.cursor, args.page.direction) {
        (Some(cursor), Direction::Forward) => {
          query.append_pair("first", &limit);
          query.append_pair("after", cursor.as_str());
        }
        (Some(cursor), Direction::Backward) => {
          query.append_pair("last", &limit);
          query.append_pair("before", cursor.as_str());
        }
        _ => {
          query.append_pair("first", &limit);
        }
      }
      if let Some(search) = &args.search {
        query.append_pair("query", search);
      }
    }
    Ok(url)
  }

  async fn send<T: DeserializeOwned>(&self, method: Method, url: Url, body: Option<Value>) -> Result<T> {
    debug!(%method, url = %url, "api request");

    let mut request = self.http.request(method, url.clone());
    if let Some(token) = &self.token {
      request = request.bearer_auth(token);
    }
    if let Some(body) = body {
      request = request.json(&body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", url.path(), e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(eyre!("{} returned HTTP {}", url.path(), status));
    }

    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", url.path(), e))
  }
}

impl ResourceApi for ApiClient {
  async fn list_items(&self, resource: Resource, args: ListArgs) -> Result<Page<Item>> {
    let url = self.list_url(resource, &args)?;
    let response: ApiListResponse = self.send(Method::GET, url, None).await?;
    response.into_page(resource)
  }

  async fn get_item(&self, resource: Resource, id: String) -> Result<Item> {
    let url = self.endpoint(&[resource.route(), id.as_str()])?;
    let response: ApiItemResponse = self
      .send(Method::GET, url, None)
      .await
      .map_err(|e| eyre!("Failed to get {} {}: {}", resource, id, e))?;
    response.into_item(resource)
  }

  async fn field_definitions(&self, resource: Resource) -> Result<Vec<FieldDefinition>> {
    let mut url = self.endpoint(&["field_definitions"])?;
    url.query_pairs_mut().append_pair("owner", resource.route());

    let response: ApiFieldDefinitionsResponse = self.send(Method::GET, url, None).await?;
    Ok(response.definitions.into_iter().map(FieldDefinition::from).collect())
  }

  async fn shop(&self) -> Result<Shop> {
    let url = self.endpoint(&["shop"])?;
    let response: ApiShopResponse = self.send(Method::GET, url, None).await?;
    Ok(response.shop.into())
  }

  /// Not cached - write operation.
  async fn update_item(&self, resource: Resource, id: String, fields: Map<String, Value>) -> Result<Item> {
    let url = self.endpoint(&[resource.route(), id.as_str()])?;
    let body = serde_json::json!({ "item": fields });

    let response: ApiItemResponse = self.send(Method::PATCH, url, Some(body)).await?;
    response.into_item(resource)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{ApiConfig, CacheConfig};
  use crate::cursor::{Cursor, PageState};

  fn client(url: &str) -> ApiClient {
    let config = Config {
      api: ApiConfig {
        url: url.to_string(),
        timeout_secs: 5,
      },
      default_resource: None,
      page_size: 50,
      cache: CacheConfig::default(),
    };
    ApiClient::new(&config).unwrap()
  }

  fn args(page: PageState, search: Option<&str>) -> ListArgs {
    ListArgs::new(page, 50, search.map(String::from))
  }

  #[test]
  fn test_first_page_url() {
    let url = client("https://shop.example.com/admin/api/")
      .list_url(Resource::Products, &args(PageState::first(), None))
      .unwrap();
    assert_eq!(url.as_str(), "https://shop.example.com/admin/api/products?first=50");
  }

  #[test]
  fn test_forward_and_backward_urls() {
    let api = client("https://shop.example.com/admin/api");
    let cursor = Cursor::new("abc=").unwrap();

    let forward = api
      .list_url(
        Resource::Orders,
        &args(PageState::new(Some(cursor.clone()), Direction::Forward), Some("paid")),
      )
      .unwrap();
    assert_eq!(
      forward.query(),
      Some("first=50&after=abc%3D&query=paid")
    );

    let backward = api
      .list_url(
        Resource::Orders,
        &args(PageState::new(Some(cursor), Direction::Backward), None),
      )
      .unwrap();
    assert_eq!(backward.query(), Some("last=50&before=abc%3D"));
  }

  #[test]
  fn test_invalid_base_url() {
    let config = Config {
      api: ApiConfig {
        url: "not a url".to_string(),
        timeout_secs: 5,
      },
      default_resource: None,
      page_size: 50,
      cache: CacheConfig::default(),
    };
    assert!(ApiClient::new(&config).is_err());
  }
}
