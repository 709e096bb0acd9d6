mod cache;
mod config;
mod error;
mod network;
#[cfg(test)]
mod testing;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::Method;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cache::{CacheStore, LifecycleController, MemoryStore, ResourceRequest, SqliteStore};
use crate::config::{Backend, Config};
use crate::network::HttpFetcher;

type Controller = LifecycleController<dyn CacheStore, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(name = "offline-cache")]
#[command(about = "Offline-capable resource cache in front of a web origin")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-cache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache generation to use instead of the configured one
  #[arg(short, long, global = true)]
  generation: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Seed the current generation with the configured resources
  Install,
  /// Delete every generation except the current one
  Activate,
  /// Serve resources through the cache
  Fetch(FetchArgs),
  /// Install, activate, then fetch, all in one process
  Run(FetchArgs),
  /// List cache generations and their entry counts
  Buckets,
}

#[derive(clap::Args, Debug)]
struct FetchArgs {
  /// Request method
  #[arg(short = 'X', long, default_value = "GET")]
  method: String,

  /// Extra request header as "Name: value" (repeatable)
  #[arg(short = 'H', long = "header")]
  headers: Vec<String>,

  /// Write response bodies to stdout (the summary goes to stderr)
  #[arg(long)]
  body: bool,

  /// Locators to fetch, relative to the origin or absolute
  #[arg(required = true)]
  locators: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  if let Some(generation) = args.generation {
    config.generation = generation;
  }

  let _log_guard = init_tracing(&config)?;
  let controller = build_controller(&config)?;

  match args.command {
    Command::Install => install(&controller).await,
    Command::Activate => activate(&controller).await,
    Command::Fetch(fetch_args) => fetch(&controller, &fetch_args).await,
    Command::Run(fetch_args) => {
      install(&controller).await?;
      activate(&controller).await?;
      fetch(&controller, &fetch_args).await
    }
    Command::Buckets => buckets(&controller).await,
  }
}

/// Log to stderr, and to a daily rolling file when a log directory is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.log.filter))
    .map_err(|e| eyre!("Invalid log filter '{}': {}", config.log.filter, e))?;
  let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

  let registry = tracing_subscriber::registry().with(filter).with(stderr_layer);

  match &config.log.dir {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "offline-cache.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      registry
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(Some(guard))
    }
    None => {
      registry
        .try_init()
        .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
      Ok(None)
    }
  }
}

fn build_controller(config: &Config) -> Result<Controller> {
  let store: Arc<dyn CacheStore> = match config.cache.backend {
    Backend::Sqlite => {
      let path = config.cache_path()?;
      info!(path = %path.display(), "Opening cache database");
      Arc::new(SqliteStore::open(&path)?)
    }
    Backend::Memory => Arc::new(MemoryStore::new()),
  };
  let fetcher = Arc::new(HttpFetcher::new(&config.origin)?);

  Ok(
    LifecycleController::new(store, fetcher, config.generation.clone(), config.seed.clone())
      .with_max_age(config.cache.max_age()),
  )
}

async fn install(controller: &Controller) -> Result<()> {
  let report = controller.install().await?;
  println!(
    "Seeded {} resources into {}",
    report.stored.len(),
    report.bucket
  );
  Ok(())
}

async fn activate(controller: &Controller) -> Result<()> {
  let pruned = controller.activate().await?;
  if pruned.is_empty() {
    println!("No stale generations");
  } else {
    for name in pruned {
      println!("Deleted {}", name);
    }
  }
  Ok(())
}

async fn fetch(controller: &Controller, args: &FetchArgs) -> Result<()> {
  let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", args.method, e))?;
  let headers = args
    .headers
    .iter()
    .map(|h| parse_header(h))
    .collect::<Result<Vec<_>>>()?;

  let requests: Vec<ResourceRequest> = args
    .locators
    .iter()
    .map(|locator| {
      headers.iter().fold(
        ResourceRequest::get(locator.as_str()).with_method(method.clone()),
        |request, (name, value)| request.with_header(name.as_str(), value.as_str()),
      )
    })
    .collect();

  // Dispatches are independent; run them all at once.
  let results = join_all(requests.iter().map(|r| controller.dispatch(r))).await;

  let mut stdout = std::io::stdout().lock();
  let mut failed = 0;
  for (request, result) in requests.iter().zip(results) {
    match result {
      Ok(served) => {
        let mut summary = format!(
          "{} {:<7} {} ({} bytes, {})",
          served.data.status,
          served.source,
          request.locator,
          served.data.body.len(),
          served.data.header("content-type").unwrap_or("no content-type")
        );
        if let Some(cached_at) = served.cached_at {
          summary.push_str(&format!(" cached {}", cached_at.format("%Y-%m-%d %H:%M:%S")));
        }
        if args.body {
          eprintln!("{}", summary);
          stdout.write_all(&served.data.body)?;
        } else {
          writeln!(stdout, "{}", summary)?;
        }
      }
      Err(e) => {
        failed += 1;
        eprintln!("FAILED  {}: {}", request.locator, e);
      }
    }
  }
  stdout.flush()?;

  if failed > 0 {
    return Err(eyre!("{} of {} requests failed", failed, requests.len()));
  }
  Ok(())
}

async fn buckets(controller: &Controller) -> Result<()> {
  let store = controller.store();
  let names = store.bucket_names().await?;
  if names.is_empty() {
    println!("No buckets");
    return Ok(());
  }

  for name in names {
    let bucket = store.open_bucket(&name).await?;
    let entries = store.keys(&bucket).await?.len();
    let marker = if name == controller.generation() { "*" } else { " " };
    println!("{} {} ({} entries)", marker, name, entries);
  }
  Ok(())
}

/// Parse a "Name: value" header argument.
fn parse_header(raw: &str) -> Result<(String, String)> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| eyre!("Header '{}' must look like 'Name: value'", raw))?;
  let name = name.trim();
  if name.is_empty() {
    return Err(eyre!("Header '{}' has an empty name", raw));
  }
  Ok((name.to_string(), value.trim().to_string()))
}
