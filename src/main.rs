use clap::{Args, Parser, Subcommand};
use promptvault::config::{self, Config};
use promptvault::control::IndexControl;
use promptvault::engine::{EngineConfig, IndexEngine, RootJob, RootSpec};
use promptvault::index::RootSnapshot;
use promptvault::normalize::BoardRegistry;
use promptvault::query::{self, Facets, Query, Range};
use promptvault::source::FsSource;
use promptvault::store::{JsonSnapshotStore, SnapshotStore};
use promptvault::{output, parse};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "promptvault")]
#[command(about = "Index and search the generation metadata of AI-generated images")]
#[command(long_about = "\
Index and search the generation metadata of AI-generated images

Prompts, models, LoRAs and sampler settings are read from the metadata that
ComfyUI, InvokeAI and Automatic1111-style tools embed in PNG and JPEG files.
Each indexed directory (a root) keeps a snapshot; re-indexing only re-parses
files whose modification time changed.

  promptvault index ~/ai-images --recursive
  promptvault query ~/ai-images --recursive --text castle --model sdxl
  promptvault facets ~/ai-images --recursive
  promptvault inspect ~/ai-images/00042.png

Run 'promptvault gen-config' to generate a documented promptvault.toml.")]
#[command(version)]
struct Cli {
    /// Config file (default: ./promptvault.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot store directory (overrides store_dir)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

/// Which roots a command works on.
#[derive(Args, Clone)]
struct RootArgs {
    /// Root directories
    #[arg(required = true)]
    roots: Vec<PathBuf>,

    /// Include subdirectories. A recursive and a flat index of the same
    /// directory are separate snapshots.
    #[arg(short, long)]
    recursive: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Index roots, re-parsing only new and changed files
    Index {
        #[command(flatten)]
        roots: RootArgs,

        /// Parallel parse workers (overrides processing.max_workers)
        #[arg(long)]
        workers: Option<usize>,

        /// Files per batch (overrides processing.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Show every parsing stage for individual files
    Inspect {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the normalized record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search indexed roots
    Query {
        #[command(flatten)]
        roots: RootArgs,

        #[command(flatten)]
        filters: QueryArgs,

        /// Print hits as JSON
        #[arg(long)]
        json: bool,
    },
    /// Count models, LoRAs, schedulers and boards across indexed roots
    Facets {
        #[command(flatten)]
        roots: RootArgs,
    },
    /// Print a stock promptvault.toml with all options documented
    GenConfig,
}

#[derive(Args, Clone)]
struct QueryArgs {
    /// Case-insensitive text anywhere in the metadata
    #[arg(long, default_value = "")]
    text: String,
    /// Model name (repeat to match any of several)
    #[arg(long = "model")]
    models: Vec<String>,
    /// LoRA name (repeat to match any of several)
    #[arg(long = "lora")]
    loras: Vec<String>,
    /// Sampler / scheduler name (repeat to match any of several)
    #[arg(long = "scheduler")]
    schedulers: Vec<String>,
    #[arg(long)]
    min_steps: Option<u32>,
    #[arg(long)]
    max_steps: Option<u32>,
    #[arg(long)]
    min_cfg: Option<f64>,
    #[arg(long)]
    max_cfg: Option<f64>,
    /// Modified on or after (YYYY-MM-DD, UTC)
    #[arg(long, value_parser = query::parse_date)]
    since: Option<chrono::NaiveDate>,
    /// Modified on or before (YYYY-MM-DD, UTC)
    #[arg(long, value_parser = query::parse_date)]
    until: Option<chrono::NaiveDate>,
}

impl QueryArgs {
    fn into_query(self) -> Query {
        Query {
            text: self.text,
            models: self.models,
            loras: self.loras,
            schedulers: self.schedulers,
            steps: Range::new(self.min_steps, self.max_steps),
            cfg_scale: Range::new(self.min_cfg, self.max_cfg),
            modified: Range::new(self.since, self.until),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match cli.command {
        Command::Index {
            roots,
            workers,
            batch_size,
        } => {
            let mut config = config::load_config(cli.config.as_deref())?;
            if workers.is_some() {
                config.processing.max_workers = workers;
            }
            if batch_size.is_some() {
                config.processing.batch_size = batch_size;
            }
            config.validate()?;
            run_index(&config, cli.store.as_deref(), &roots)?;
        }
        Command::Inspect { files, json } => {
            let boards = BoardRegistry::new();
            for file in &files {
                let bytes = std::fs::read(file)?;
                let inspection = parse::inspect_image(&bytes, &boards);
                if json {
                    println!("{}", serde_json::to_string_pretty(&inspection.record)?);
                } else {
                    output::print_inspection(file, &inspection);
                }
            }
        }
        Command::Query {
            roots,
            filters,
            json,
        } => {
            let config = config::load_config(cli.config.as_deref())?;
            let query = filters.into_query();
            query.validate()?;
            let snapshots = load_snapshots(&store_for(&config, cli.store.as_deref()), &roots)?;
            let refs: Vec<&RootSnapshot> = snapshots.iter().collect();
            let hits = query::search(&refs, &query);
            if json {
                let hits: Vec<serde_json::Value> = hits
                    .iter()
                    .map(|hit| {
                        serde_json::json!({
                            "root": hit.root.root_path,
                            "entry": hit.entry,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                output::print_query_hits(&hits);
            }
        }
        Command::Facets { roots } => {
            let config = config::load_config(cli.config.as_deref())?;
            let snapshots = load_snapshots(&store_for(&config, cli.store.as_deref()), &roots)?;
            let refs: Vec<&RootSnapshot> = snapshots.iter().collect();
            output::print_facets(&Facets::aggregate(&refs));
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Index every root concurrently, printing progress as it arrives.
///
/// Ctrl-C cancels all roots; batches merged so far are still committed.
fn run_index(
    config: &Config,
    store: Option<&Path>,
    roots: &RootArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let engine = IndexEngine::new(
        FsSource::new(&config.scan.extensions),
        store_for(config, store),
        EngineConfig::from_config(config),
    )?;

    let jobs: Vec<RootJob> = roots
        .roots
        .iter()
        .map(|path| RootJob {
            root: RootSpec::new(root_key(path), roots.recursive),
            control: Arc::new(IndexControl::new()),
        })
        .collect();

    let controls: Vec<Arc<IndexControl>> =
        jobs.iter().map(|job| Arc::clone(&job.control)).collect();
    ctrlc::set_handler(move || {
        for control in &controls {
            control.cancel();
        }
    })?;

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_index_event(&event) {
                println!("{}", line);
            }
        }
    });
    let results = engine.index_roots(&jobs, Some(tx));
    printer.join().map_err(|_| "progress printer panicked")?;

    output::print_index_summary(&results);
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if failed > 0 {
        return Err(format!("{failed} of {} roots failed", results.len()).into());
    }
    Ok(())
}

fn store_for(config: &Config, flag: Option<&Path>) -> JsonSnapshotStore {
    match flag {
        Some(dir) => JsonSnapshotStore::new(dir),
        None => JsonSnapshotStore::new(&config.store_dir),
    }
}

/// Canonical form of a root path, so `./a` and `/abs/a` share a snapshot.
/// A path that cannot be resolved is kept as given; listing reports it.
fn root_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Latest committed snapshot of each root. Roots never indexed are skipped
/// with a warning.
fn load_snapshots(
    store: &JsonSnapshotStore,
    roots: &RootArgs,
) -> Result<Vec<RootSnapshot>, Box<dyn std::error::Error>> {
    let mut snapshots = Vec::new();
    for path in &roots.roots {
        let key = root_key(path);
        match store.get(&key, roots.recursive)? {
            Some(snapshot) => snapshots.push(snapshot),
            None => warn!(
                root = %key.display(),
                recursive = roots.recursive,
                "root not indexed yet"
            ),
        }
    }
    Ok(snapshots)
}
