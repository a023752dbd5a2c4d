use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Map;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use resq::api::{ApiClient, Item, Page, Queries, Resource, ResourceApi};
use resq::app::App;
use resq::cache::{CacheStore, PrefetchCoordinator, QueryExecutor};
use resq::commands;
use resq::config::Config;
use resq::cursor::PageState;

#[derive(Parser, Debug)]
#[command(name = "resq")]
#[command(about = "Browse large remote resource collections through a cursor-aware query cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/resq/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Write logs to this file instead of stderr (filter with RESQ_LOG)
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Interactive browser (default)
  Browse {
    /// Resource to open, e.g. products or o
    resource: Option<String>,
    #[command(flatten)]
    position: PageArgs,
  },
  /// Print one list window
  List {
    resource: String,
    #[command(flatten)]
    position: PageArgs,
  },
  /// Print one item
  Get { resource: String, id: String },
  /// Update fields of one item: `resq edit products 42 title="Linen shirt"`
  Edit {
    resource: String,
    id: String,
    /// field=value pairs
    #[arg(required = true)]
    fields: Vec<String>,
  },
}

#[derive(clap::Args, Debug, Default)]
struct PageArgs {
  /// Page position as printed by `list`, e.g. "cursor=...&direction=1"
  #[arg(long)]
  page: Option<String>,

  /// Search term
  #[arg(short, long)]
  search: Option<String>,
}

impl PageArgs {
  fn state(&self) -> PageState {
    self
      .page
      .as_deref()
      .map(PageState::from_query)
      .unwrap_or_default()
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let client = ApiClient::new(&config)?;
  let queries = Queries::new(client, config.cache.stale_policy(), config.page_size);
  let executor = QueryExecutor::new(CacheStore::new().with_gc_time(config.cache.gc_time()));

  match args.command.unwrap_or(Command::Browse {
    resource: None,
    position: PageArgs::default(),
  }) {
    Command::Browse { resource, position: page } => {
      let name = resource.or_else(|| config.default_resource.clone());
      let resource = match name {
        Some(name) => resolve(&name)?,
        None => Resource::Products,
      };

      // Initialize and run the app
      let mut app = App::new(queries, executor, resource).with_page(page.state(), page.search.clone());
      app.run().await?;
    }
    Command::List { resource, position: page } => {
      let resource = resolve(&resource)?;
      let coordinator = PrefetchCoordinator::new(executor);
      let descriptor = queries.list(resource, page.state(), page.search.clone())?;
      let auxiliary = queries.list_auxiliaries(resource)?;

      let key = descriptor.key.clone();

      let data = match coordinator.prefetch(descriptor, auxiliary).await {
        Ok(data) => data,
        // Metadata is optional for a plain listing
        Err(e) => match coordinator.executor().cached::<Page<Item>>(&key) {
          Some(data) => {
            warn!(error = %e, "list metadata unavailable");
            data
          }
          None => return Err(e.into()),
        },
      };

      for item in &data.items {
        println!("{}\t{}", item.id, item.title);
      }
      let window = data.window(page.state().direction);
      if let Some(previous) = window.previous_page() {
        println!("previous: --page '{}'", previous.to_query());
      }
      if let Some(next) = window.next_page() {
        println!("next: --page '{}'", next.to_query());
      }
    }
    Command::Get { resource, id } => {
      let resource = resolve(&resource)?;
      let item = executor.fetch_query(queries.detail(resource, &id)?).await?;
      println!("{}", serde_json::to_string_pretty(&item.fields)?);
    }
    Command::Edit { resource, id, fields } => {
      let resource = resolve(&resource)?;
      let mut update = Map::new();
      for field in &fields {
        let (name, value) =
          commands::parse_assignment(field).ok_or_else(|| eyre!("expected field=value, got '{field}'"))?;
        update.insert(name, value);
      }

      let item = queries.api().update_item(resource, id, update).await?;
      executor.invalidate_matching(resource.route(), None);
      println!("{}", serde_json::to_string_pretty(&item.fields)?);
    }
  }

  Ok(())
}

fn resolve(name: &str) -> Result<Resource> {
  commands::resolve_resource(name).ok_or_else(|| eyre!("Unknown resource '{}'", name))
}

/// Log to stderr, or to `log_file` when given. RESQ_LOG sets the filter
/// (default `warn`).
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("RESQ_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

  match log_file {
    Some(path) => {
      let file_name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}
