mod commands;
mod config;

use clap::{CommandFactory, FromArgMatches, Parser};
use color_eyre::Result;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crudcache::cache::SqliteStorage;
use crudcache::{CacheStore, Client, HttpTransport};

use commands::{Action, ListOptions};
use config::{CacheBackend, Config};

#[derive(Parser, Debug)]
#[command(name = "crudcache")]
#[command(about = "Generic REST entity access with a client-side cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/crudcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Entity type, e.g. Invoice
  entity: String,

  /// Command to run (see below)
  command: String,

  /// Command arguments: an ID and/or a JSON body
  args: Vec<String>,

  /// Resource path when it differs from the entity type
  #[arg(long)]
  path: Option<String>,

  /// Zero-based page index for `list`
  #[arg(long, default_value_t = 0)]
  page: u32,

  /// Page size for `list` (default from config)
  #[arg(long)]
  size: Option<u32>,

  /// Example filter as a JSON object
  #[arg(long)]
  example: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let matches = Args::command()
    .after_help(format!("Commands:\n{}", commands::command_help()))
    .get_matches();
  let args = Args::from_arg_matches(&matches)?;

  let config = Config::load(args.config.as_deref())?;
  let _guard = init_tracing(&config);

  let list = ListOptions {
    page: args.page,
    size: args.size,
    example: args.example.clone(),
  };
  let action = Action::parse(&args.command, &args.args, &list)?;

  let cache = match config.cache.backend {
    CacheBackend::Memory => CacheStore::new(),
    CacheBackend::Sqlite => {
      let storage = match &config.cache.path {
        Some(path) => SqliteStorage::open(path)?,
        None => SqliteStorage::open_default()?,
      };
      CacheStore::with_storage(storage)?
    }
  };

  let transport = HttpTransport::new(
    &config.api.base_url,
    Duration::from_secs(config.api.timeout_secs),
  )?;
  let client = Client::new(transport, cache).with_page_size(config.page_size);
  let api = client.entity_at(&args.entity, args.path.as_deref().unwrap_or(&args.entity));

  info!(entity = %args.entity, command = %args.command, "running command");
  let output = action.run(&api).await?;
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}

/// Log to stderr, or to a daily file when `log_dir` is set. The guard must
/// live until exit so buffered lines are flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("crudcache=info"));

  match &config.log_dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "crudcache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Some(guard)
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      None
    }
  }
}
