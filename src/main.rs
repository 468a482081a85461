use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use fieldguide::cache::{CacheStorage, GateOutcome};
use fieldguide::config::Config;
use fieldguide::scheduler::ResyncScheduler;
use fieldguide::sync::SyncOutcome;
use fieldguide::FieldGuide;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fieldguide")]
#[command(about = "Offline-first content cache for the field guide")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fieldguide/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Check the cache version, then sync every resource
  Sync,
  /// Full fetch of one resource
  Fetch { name: String },
  /// Print the cached data of a resource
  Show { name: String },
  /// Print the local path of a media asset
  Media { name: String, asset: String },
  /// List known resources
  Resources,
  /// Show cache version and per-resource sync state
  Status,
  /// Delete all cached data and media
  Wipe,
  /// Keep syncing in the background until interrupted
  Watch,
}

/// Log to a daily file so stdout stays clean for command output.
fn init_logging() -> Result<WorkerGuard> {
  let log_dir = Config::log_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "fieldguide.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fieldguide=info")),
    )
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

fn describe(outcome: &SyncOutcome) -> String {
  match outcome {
    SyncOutcome::Fetched { items } => format!("fetched {} item(s)", items),
    SyncOutcome::Reconciled { fetched, deleted } => {
      format!("{} updated, {} deleted", fetched, deleted)
    }
    SyncOutcome::UpToDate => "up to date".to_string(),
    SyncOutcome::Failed { error, fell_back } => {
      let source = if *fell_back { "using cached copy" } else { "no cached copy" };
      format!("failed ({}): {}", source, error)
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _log_guard = init_logging()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let guide = FieldGuide::from_config(&config)?;

  match args.command {
    Command::Sync => {
      if let GateOutcome::Invalidated { previous } = guide.initialize() {
        println!(
          "Cache reset (was {}, now {})",
          previous.as_deref().unwrap_or("unversioned"),
          config.app.version_marker()
        );
      }
      let report = guide.resync_all(|message| println!("{}", message)).await;
      for (name, outcome) in &report.outcomes {
        println!("  {:<20} {}", name, describe(outcome));
      }
    }
    Command::Fetch { name } => {
      guide.initialize();
      match guide.fetch(&name).await {
        Some(outcome) => println!("{}: {}", name, describe(&outcome)),
        None => return Err(eyre!("Unknown resource: {}", name)),
      }
    }
    Command::Show { name } => {
      guide.initialize();
      match guide.get(&name) {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => println!("{}: not cached", name),
      }
    }
    Command::Media { name, asset } => {
      guide.initialize();
      match guide.get_media_path(&name, &asset) {
        Some(path) => println!("{}", path.display()),
        None => return Err(eyre!("No media path for {} in {}", asset, name)),
      }
    }
    Command::Resources => {
      for desc in guide.registry().iter() {
        let kind = if desc.is_collection { "collection" } else { "singleton" };
        println!("{:<20} {:<11} {}", desc.name, kind, desc.endpoint);
      }
    }
    Command::Status => {
      let marker = guide.storage().read_version_marker();
      println!(
        "Cache dir: {}\nCache version: {} (app {}, {})",
        guide.storage().dir().display(),
        marker.as_deref().unwrap_or("none"),
        config.app.version_marker(),
        if guide.is_cache_version_valid() { "valid" } else { "stale" }
      );
      guide.hydrate();
      for desc in guide.registry().iter() {
        let state = match (guide.get(desc.name), guide.last_sync_timestamp(desc.name)) {
          (None, _) => "not cached".to_string(),
          (Some(_), Some(ts)) => format!("synced through {}", ts),
          (Some(_), None) => "cached".to_string(),
        };
        println!("  {:<20} {}", desc.name, state);
      }
    }
    Command::Wipe => {
      guide.clear();
      println!("Cache cleared");
    }
    Command::Watch => {
      guide.initialize();
      let scheduler = ResyncScheduler::from_config(&config.sync);
      println!("Syncing every {}s, Ctrl-C to stop", config.sync.interval_secs);
      scheduler
        .run_until(&guide, async {
          let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    }
  }

  Ok(())
}
