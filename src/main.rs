use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use labdash::config::Config;
use labdash::format::format_bytes;
use labdash::history::storage::{KeyValueStore, SledStore};
use labdash::history::{ChunkedHistoryStore, LoadedHistoryItem, Migration, CHUNK_SIZE};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// History database directory (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Read only this config file instead of the global and local ones
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one or more visited urls
    Add {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print history, newest first
    List {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Remove entries matching url and timestamp in one chunk
    Remove {
        #[arg(long)]
        chunk: usize,
        #[arg(long)]
        url: String,
        #[arg(long)]
        t: i64,
    },
    /// Delete all history
    Clear,
    /// Import a flat JSON history list from the old unchunked format
    Import { file: PathBuf },
    /// Show chunk usage
    Stats,
}

type Store = ChunkedHistoryStore<SledStore>;

fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            eprintln!("Failed to load config: {}, using defaults", e);
            Config::default()
        }),
    };
    init_logging(&config);

    let db_path = args.db.clone().unwrap_or_else(|| config.db_path());
    let backend = SledStore::open(&db_path)
        .with_context(|| format!("opening history db at {}", db_path.display()))?;
    let mut store = ChunkedHistoryStore::open_with(backend, config.history.compression_level)?;
    report_migration(store.migration());

    run(&mut store, args.command)?;
    store.backend_mut().flush()?;
    Ok(())
}

fn init_logging(config: &Config) {
    let fallback = config.log.filter.as_deref().unwrap_or("warn");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .compact()
        .init();
}

fn report_migration(outcome: &Migration) {
    match outcome {
        Migration::NotNeeded => {}
        Migration::Migrated { items, skipped } => {
            info!(items, skipped, "legacy history migrated")
        }
        Migration::Retained(e) => warn!(error = %e, "legacy history left in place"),
        Migration::Discarded(e) => warn!(error = %e, "legacy history discarded"),
    }
}

fn run(store: &mut Store, command: Command) -> Result<()> {
    match command {
        Command::Add { urls } => {
            if urls.len() == 1 {
                store.add(&urls[0])?;
            } else {
                store.add_bulk(urls)?;
            }
        }
        Command::List { limit, json } => {
            let mut items = store.get_all();
            if let Some(limit) = limit {
                items.truncate(limit);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for item in &items {
                    println!("{}", render_item(item));
                }
            }
        }
        Command::Remove { chunk, url, t } => {
            let removed = store.remove(&LoadedHistoryItem {
                chunk_id: chunk,
                url,
                t,
            })?;
            println!("Removed {} entries", removed);
        }
        Command::Clear => {
            store.clear()?;
            println!("History cleared");
        }
        Command::Import { file } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            serde_json::from_str::<serde_json::Value>(&content)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            match store.import_legacy(content.as_bytes())? {
                Migration::Migrated { items, skipped } => {
                    println!("Imported {} entries ({} skipped)", items, skipped)
                }
                other => println!("Nothing imported: {:?}", other),
            }
        }
        Command::Stats => {
            let capacities = store.capacities();
            let used: u64 = capacities
                .iter()
                .map(|cap| u64::from(CHUNK_SIZE.saturating_sub(*cap)))
                .sum();
            println!("Chunks:     {}", capacities.len());
            println!("Entries:    {}", used);
            println!("Free slots: {:?}", capacities);
            println!("Stored:     {}", format_bytes(store.stored_bytes(), 1));
            println!(
                "On disk:    {}",
                format_bytes(store.backend().size_on_disk()?, 1)
            );
        }
    }
    Ok(())
}

fn render_item(item: &LoadedHistoryItem) -> String {
    let when = chrono::DateTime::from_timestamp(item.t, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| item.t.to_string());
    format!("[{}] {}  {}", item.chunk_id, when, item.url)
}
