use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::io::Write as _;
use std::time::Duration;
use tracing::{debug, info};

use crate::api::queries::{Queries, ResourceApi, ResourceQuery};
use crate::api::types::{FieldDefinition, Item, Page, Resource, Shop};
use crate::cache::{QueryExecutor, QueryKey};
use crate::commands::{self, PromptCommand};
use crate::cursor::{Direction, PageState};
use crate::event::{Event, EventHandler};
use crate::query::{Query, QueryState};

/// View state - each variant owns its query
pub enum ViewState {
  // Root view (set via : commands)
  List {
    resource: Resource,
    page: PageState,
    search: Option<String>,
    query: Query<Page<Item>>,
  },

  // Detail view (pushed via open/get)
  Detail {
    resource: Resource,
    id: String,
    query: Query<Item>,
  },
}

impl ViewState {
  fn resource(&self) -> Resource {
    match self {
      ViewState::List { resource, .. } | ViewState::Detail { resource, .. } => *resource,
    }
  }

  fn poll(&mut self) -> bool {
    match self {
      ViewState::List { query, .. } => query.poll(),
      ViewState::Detail { query, .. } => query.poll(),
    }
  }

  fn is_loading(&self) -> bool {
    match self {
      ViewState::List { query, .. } => query.is_loading(),
      ViewState::Detail { query, .. } => query.is_loading(),
    }
  }

  fn refetch(&mut self) {
    match self {
      ViewState::List { query, .. } => query.refetch(),
      ViewState::Detail { query, .. } => query.refetch(),
    }
  }
}

/// Main application state
pub struct App<A> {
  /// Navigation stack - root is always at index 0
  view_stack: Vec<ViewState>,

  /// Query factories for the API
  queries: Queries<A>,

  /// Shared executor; every view fetches through it
  executor: QueryExecutor,

  /// One-off message shown under the next render
  status: Option<String>,

  /// Whether to quit
  should_quit: bool,
}

impl<A: ResourceApi> App<A> {
  pub fn new(queries: Queries<A>, executor: QueryExecutor, resource: Resource) -> Self {
    let root = list_view(&queries, &executor, resource, PageState::first(), None);
    Self {
      view_stack: vec![root],
      queries,
      executor,
      status: None,
      should_quit: false,
    }
  }

  /// Start at a given list window, e.g. one read back from a URL query.
  pub fn with_page(mut self, page: PageState, search: Option<String>) -> Self {
    let resource = self.current().resource();
    self.view_stack = vec![list_view(&self.queries, &self.executor, resource, page, search)];
    self
  }

  pub async fn run(&mut self) -> Result<()> {
    let mut events = EventHandler::new(Duration::from_millis(100));
    self.run_with(&mut events).await
  }

  pub async fn run_with(&mut self, events: &mut EventHandler) -> Result<()> {
    self.current_mut().fetch_if_idle();
    self.draw()?;

    while !self.should_quit {
      match events.next().await {
        Some(Event::Line(line)) => {
          self.handle_line(&line).await;
          self.draw()?;
        }
        Some(Event::Tick) => {
          if self.poll() {
            self.draw()?;
          }
        }
        Some(Event::Closed) | None => break,
      }
    }

    Ok(())
  }

  pub fn should_quit(&self) -> bool {
    self.should_quit
  }

  pub fn depth(&self) -> usize {
    self.view_stack.len()
  }

  pub fn current(&self) -> &ViewState {
    // The stack never pops its root
    &self.view_stack[self.view_stack.len() - 1]
  }

  fn current_mut(&mut self) -> &mut ViewState {
    let last = self.view_stack.len() - 1;
    &mut self.view_stack[last]
  }

  /// Poll the visible view. Returns `true` when it needs a redraw.
  pub fn poll(&mut self) -> bool {
    self.current_mut().poll()
  }

  /// Wait for the visible view to settle, polling every few milliseconds.
  pub async fn settle(&mut self) {
    while self.current().is_loading() {
      tokio::time::sleep(Duration::from_millis(5)).await;
      self.poll();
    }
    self.poll();
  }

  pub async fn handle_line(&mut self, line: &str) {
    let command = commands::parse_command(line);
    debug!(?command, "prompt command");

    if let Err(e) = self.handle_command(command).await {
      self.status = Some(format!("error: {e}"));
    }
  }

  async fn handle_command(&mut self, command: PromptCommand) -> Result<()> {
    match command {
      PromptCommand::Next => self.turn_page(Direction::Forward),
      PromptCommand::Previous => self.turn_page(Direction::Backward),
      PromptCommand::Open(n) => {
        let (resource, id) = match self.current() {
          ViewState::List { resource, query, .. } => {
            let page = query.data().ok_or_else(|| eyre!("nothing loaded yet"))?;
            let item = n
              .checked_sub(1)
              .and_then(|i| page.items.get(i))
              .ok_or_else(|| eyre!("no item {n} on this page"))?;
            (*resource, item.id.clone())
          }
          ViewState::Detail { .. } => return Err(eyre!("open works on a list")),
        };
        self.push_detail(resource, id);
        Ok(())
      }
      PromptCommand::Get(id) => {
        let resource = self.current().resource();
        self.push_detail(resource, id);
        Ok(())
      }
      PromptCommand::Back => {
        if self.view_stack.len() > 1 {
          self.view_stack.pop();
          // Served from cache unless it went stale meanwhile
          self.current_mut().fetch_if_stale();
        }
        Ok(())
      }
      PromptCommand::Refresh => {
        self.current_mut().refetch();
        Ok(())
      }
      PromptCommand::Search(search) => {
        let resource = self.current().resource();
        self.replace_root(resource, PageState::first(), search);
        Ok(())
      }
      PromptCommand::Switch(name) => {
        let resource =
          commands::resolve_resource(&name).ok_or_else(|| eyre!("unknown resource '{name}'"))?;
        self.replace_root(resource, PageState::first(), None);
        Ok(())
      }
      PromptCommand::Set { field, value } => self.update_field(field, value).await,
      PromptCommand::Help => {
        self.status = Some(commands::HELP.to_string());
        Ok(())
      }
      PromptCommand::Quit => {
        self.should_quit = true;
        Ok(())
      }
      PromptCommand::Redraw => Ok(()),
      PromptCommand::Unknown(line) => Err(eyre!("unknown command '{line}' (h for help)")),
    }
  }

  /// Move the top list view one window forward or back, using the edge
  /// cursors of the window on screen.
  fn turn_page(&mut self, direction: Direction) -> Result<()> {
    let (resource, search, target) = match self.current() {
      ViewState::List {
        resource,
        page,
        search,
        query,
      } => {
        let data = query.data().ok_or_else(|| eyre!("nothing loaded yet"))?;
        let window = data.window(page.direction);
        let target = match direction {
          Direction::Forward => window.next_page(),
          _ => window.previous_page(),
        };
        (*resource, search.clone(), target)
      }
      ViewState::Detail { .. } => return Err(eyre!("paging works on a list")),
    };

    let target = target.ok_or_else(|| match direction {
      Direction::Forward => eyre!("already on the last page"),
      _ => eyre!("already on the first page"),
    })?;
    self.replace_top(resource, target, search);
    Ok(())
  }

  fn push_detail(&mut self, resource: Resource, id: String) {
    let mut view = detail_view(&self.queries, &self.executor, resource, id);
    view.fetch_if_idle();
    self.view_stack.push(view);
  }

  fn replace_top(&mut self, resource: Resource, page: PageState, search: Option<String>) {
    let mut view = list_view(&self.queries, &self.executor, resource, page, search);
    view.fetch_if_idle();
    *self.current_mut() = view;
  }

  fn replace_root(&mut self, resource: Resource, page: PageState, search: Option<String>) {
    let mut view = list_view(&self.queries, &self.executor, resource, page, search);
    view.fetch_if_idle();
    self.view_stack = vec![view];
  }

  /// Write one field of the open item, then drop every cached window of the
  /// resource so lists and searches show the new value.
  async fn update_field(&mut self, field: String, value: Value) -> Result<()> {
    let (resource, id) = match self.current() {
      ViewState::Detail { resource, id, .. } => (*resource, id.clone()),
      ViewState::List { .. } => return Err(eyre!("open an item before editing it")),
    };

    let mut fields = Map::new();
    fields.insert(field.clone(), value);
    self.queries.api().update_item(resource, id.clone(), fields).await?;

    let invalidated = self.executor.invalidate_matching(resource.route(), None);
    info!(%resource, %id, %field, invalidated, "item updated");

    self.current_mut().refetch();
    self.status = Some(format!("updated {field} on {resource} {id}"));
    Ok(())
  }

  fn draw(&mut self) -> Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(self.render().as_bytes())?;
    if let Some(status) = self.status.take() {
      writeln!(out, "{status}")?;
    }
    write!(out, "{}> ", self.current().resource())?;
    out.flush()?;
    Ok(())
  }

  /// Text of the visible view.
  pub fn render(&self) -> String {
    let mut out = String::new();
    let shop = ResourceQuery::Shop
      .key()
      .ok()
      .and_then(|key| self.executor.cached::<Shop>(&key));
    let header = shop.map(|s| s.name.clone()).unwrap_or_default();

    match self.current() {
      ViewState::List {
        resource,
        page,
        search,
        query,
      } => {
        let _ = write!(out, "── {header} {resource}");
        if let Some(search) = search {
          let _ = write!(out, " /{search}");
        }
        if !page.is_first() {
          let _ = write!(out, " ?{}", page.to_query());
        }
        out.push('\n');

        match query.state() {
          QueryState::Idle | QueryState::Loading => out.push_str("  loading...\n"),
          QueryState::Error(e) => {
            let _ = writeln!(out, "  failed: {e}");
          }
          QueryState::Success(data) => {
            render_items(&mut out, &data.items);
            let window = data.window(page.direction);
            let _ = writeln!(
              out,
              "  {}{}",
              if window.has_previous() { "[p]rev " } else { "" },
              if window.has_next() { "[n]ext" } else { "" }
            );
          }
        }
        if let Some(warning) = query.warning() {
          let _ = writeln!(out, "  (metadata unavailable: {warning})");
        }
      }
      ViewState::Detail {
        resource, id, query, ..
      } => {
        let _ = writeln!(out, "── {header} {resource} {id}");
        match query.state() {
          QueryState::Idle | QueryState::Loading => out.push_str("  loading...\n"),
          QueryState::Error(e) => {
            let _ = writeln!(out, "  failed: {e}");
          }
          QueryState::Success(item) => {
            let definitions = self.field_definitions(*resource);
            render_item(&mut out, item, &definitions);
          }
        }
      }
    }
    out
  }

  fn field_definitions(&self, resource: Resource) -> Vec<FieldDefinition> {
    ResourceQuery::FieldDefinitions { resource }
      .key()
      .ok()
      .and_then(|key: QueryKey| self.executor.cached::<Vec<FieldDefinition>>(&key))
      .map(|defs| defs.as_ref().clone())
      .unwrap_or_default()
  }
}

fn list_view<A: ResourceApi>(
  queries: &Queries<A>,
  executor: &QueryExecutor,
  resource: Resource,
  page: PageState,
  search: Option<String>,
) -> ViewState {
  let list_queries = queries.clone();
  let list_page = page.clone();
  let list_search = search.clone();
  let aux_queries = queries.clone();

  let query = Query::new(executor.clone(), move || {
    list_queries.list(resource, list_page.clone(), list_search.clone())
  })
  .with_auxiliaries(move || aux_queries.list_auxiliaries(resource));

  ViewState::List {
    resource,
    page,
    search,
    query,
  }
}

fn detail_view<A: ResourceApi>(
  queries: &Queries<A>,
  executor: &QueryExecutor,
  resource: Resource,
  id: String,
) -> ViewState {
  let detail_queries = queries.clone();
  let detail_id = id.clone();
  let query = Query::new(executor.clone(), move || detail_queries.detail(resource, &detail_id));
  ViewState::Detail { resource, id, query }
}

impl ViewState {
  fn fetch_if_idle(&mut self) {
    match self {
      ViewState::List { query, .. } if matches!(query.state(), QueryState::Idle) => query.fetch(),
      ViewState::Detail { query, .. } if matches!(query.state(), QueryState::Idle) => query.fetch(),
      _ => {}
    }
  }

  fn fetch_if_stale(&mut self) {
    match self {
      ViewState::List { query, .. } if query.is_stale() => query.fetch(),
      ViewState::Detail { query, .. } if query.is_stale() => query.fetch(),
      _ => {}
    }
  }
}

fn render_items(out: &mut String, items: &[Item]) {
  if items.is_empty() {
    out.push_str("  (no items)\n");
    return;
  }
  let width = items.len().to_string().len();
  for (i, item) in items.iter().enumerate() {
    let title = if item.title.is_empty() { "(untitled)" } else { item.title.as_str() };
    let _ = writeln!(out, "  {:>width$}. {}  [{}]", i + 1, title, item.id);
  }
}

fn render_item(out: &mut String, item: &Item, definitions: &[FieldDefinition]) {
  let _ = writeln!(out, "  {}", item.title);
  if let Some(updated_at) = &item.updated_at {
    let _ = writeln!(out, "  updated {updated_at}");
  }
  for (name, value) in &item.fields {
    let label = definitions
      .iter()
      .find(|d| &d.key == name)
      .map(|d| d.name.as_str())
      .unwrap_or(name);
    let _ = writeln!(out, "  {label}: {}", render_value(value));
  }
}

fn render_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => "-".to_string(),
    other => other.to_string(),
  }
}
