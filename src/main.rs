use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use quillsync::cache::{Generation, ResponseCache};
use quillsync::outbox::{Outbox, WriteKind};
use quillsync::router::{RoutePolicy, Router};
use quillsync::sync::{DrainOutcome, DrainTrigger, HttpRemoteWriter, SyncCoordinator};
use quillsync::{config, http};

#[derive(Parser, Debug)]
#[command(name = "quillsync")]
#[command(about = "Local-first offline and sync engine for the Quill journaling app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/quillsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show pending outbox records per kind
  Status,
  /// Deliver pending outbox records to the backend
  Drain,
  /// Purge synced records older than the retention horizon
  Sweep,
  /// Precache the critical resource set, then sweep superseded cache
  /// generations
  Install,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  match args.command {
    Command::Status => status(&config),
    Command::Drain => drain(&config).await,
    Command::Sweep => sweep(&config),
    Command::Install => install(&config).await,
  }
}

fn open_outbox(config: &config::Config) -> Result<Outbox> {
  Outbox::open(&config.storage.database_path()?)
}

fn status(config: &config::Config) -> Result<()> {
  let outbox = open_outbox(config)?;

  for kind in [WriteKind::JournalWrite, WriteKind::HabitCompletion] {
    let pending = outbox.list_unsynced(Some(kind))?;
    println!("{:>5}  {}", pending.len(), kind);
  }

  Ok(())
}

async fn drain(config: &config::Config) -> Result<()> {
  let outbox = Arc::new(open_outbox(config)?);
  let writer = HttpRemoteWriter::new(&config.api);
  let coordinator = SyncCoordinator::new(outbox, writer)
    .with_retention(Duration::days(config.retention_days));

  match coordinator.drain(DrainTrigger::AppStart).await {
    DrainOutcome::Completed(report) => {
      println!(
        "delivered {}/{} pending records ({} failed, {} swept)",
        report.delivered, report.attempted, report.failed, report.swept
      );
    }
    DrainOutcome::AlreadyRunning => println!("a drain is already running"),
  }

  Ok(())
}

fn sweep(config: &config::Config) -> Result<()> {
  let outbox = open_outbox(config)?;
  let cutoff = Utc::now() - Duration::days(config.retention_days);
  let swept = outbox.sweep_synced_before(cutoff)?;
  println!("purged {} synced records", swept);
  Ok(())
}

async fn install(config: &config::Config) -> Result<()> {
  let cache = ResponseCache::open(&config.storage.database_path()?)?;
  let generation = Generation::new(config.cache.generation_name());
  let policy = RoutePolicy {
    api_patterns: config.api.patterns.clone(),
    precache_urls: config.cache.precache_urls(),
    offline_document: config.cache.resource_url(&config.cache.offline_document),
  };

  let router = Router::new(cache, generation, policy);
  let client = reqwest::Client::new();

  let installed = router
    .install(|request| {
      let client = client.clone();
      let request = request.clone();
      async move { http::fetch(&client, &request).await }
    })
    .await?;

  let swept = router.activate()?;
  println!(
    "precached {} resources into {}; swept {} stale generations",
    installed,
    config.cache.generation_name(),
    swept.len()
  );

  Ok(())
}
