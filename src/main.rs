//! CLI interface for the vector store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use vecsim::vector::{encode_floats, FloatList};
use vecsim::{Shard, ShardCountAdapter, SnapshotManager, StoreConfig, SumAggregator};

#[derive(Parser)]
#[command(name = "vecsim")]
#[command(about = "Exact cosine vector store with snapshot persistence", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory holding the snapshot
    #[arg(long, env = "VECSIM_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Vector dimension
    #[arg(long, env = "VECSIM_DIMENSION")]
    dimension: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert random vectors
    Seed {
        /// Number of vectors to insert
        #[arg(short, long, default_value = "1000")]
        count: usize,
        /// Progress is reported every `batch` inserts
        #[arg(short, long, default_value = "1000")]
        batch: usize,
        /// Key prefix
        #[arg(short, long, default_value = "key")]
        prefix: String,
    },
    /// Run a similarity query
    Query {
        /// Number of results to return
        #[arg(short, long, default_value = "5")]
        k: i64,
        /// Key filter (`*`, an exact key, or a glob)
        #[arg(short, long)]
        filter: Option<String>,
        /// Query vector as comma-separated values; random if omitted
        #[arg(short, long)]
        vector: Option<String>,
    },
    /// Report the number of resident vectors
    Count,
    /// Delete keys
    Del {
        keys: Vec<String>,
    },
    /// Remove every key
    Flush,
}

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(dimension) = cli.dimension {
        config.dimension = dimension;
    }
    config.validate()?;
    Ok(config)
}

fn random_vector(dimension: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..dimension).map(|_| rng.gen::<f32>()).collect()
}

fn run(shard: &mut Shard, manager: &SnapshotManager, command: Commands) -> Result<()> {
    let dimension = shard.dimension();
    match command {
        Commands::Seed {
            count,
            batch,
            prefix,
        } => {
            let batch = batch.max(1);
            let start = Instant::now();
            for i in 0..count {
                let key = format!("{}{}", prefix, i);
                shard.add(&key, &encode_floats(&random_vector(dimension)))?;
                if (i + 1) % batch == 0 {
                    tracing::info!(inserted = i + 1, total = count, "seeding");
                }
            }
            let stats = shard.save(manager)?;
            println!(
                "Inserted {} vectors in {:.2?} ({} resident, {} bytes on disk)",
                count,
                start.elapsed(),
                stats.records,
                stats.bytes
            );
        }
        Commands::Query { k, filter, vector } => {
            let query = match vector {
                Some(csv) => csv.parse::<FloatList>()?.0,
                None => random_vector(dimension),
            };
            let start = Instant::now();
            let response = shard.sim(k, filter.as_deref(), &encode_floats(&query))?;
            let elapsed = start.elapsed();

            if response.results.is_empty() {
                println!("No results found");
            } else {
                println!("Top {} results:", response.results.len());
                for (i, result) in response.results.iter().enumerate() {
                    println!("{}. {} (score: {:.6})", i + 1, result.key, result.score);
                }
            }
            for error in &response.errors {
                eprintln!("shard error: {}", error);
            }
            println!("Query took {:.2?}", elapsed);
        }
        Commands::Count => {
            let mut aggregator = SumAggregator::new();
            let adapter = ShardCountAdapter::new("local", shard);
            adapter.report(&mut aggregator)?;
            println!(
                "{} vectors ({} keys total)",
                aggregator.total(),
                adapter.host_dbsize()
            );
        }
        Commands::Del { keys } => {
            let removed = shard.del(&keys);
            shard.save(manager)?;
            println!("Deleted {} of {} keys", removed, keys.len());
        }
        Commands::Flush => {
            let released = shard.flush();
            shard.save(manager)?;
            println!("Flushed {} vectors", released);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vecsim={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;
    let manager = SnapshotManager::new(&config.data_dir)
        .with_context(|| format!("opening data dir {}", config.data_dir.display()))?;
    let mut shard = Shard::load(config, &manager).context("loading snapshot")?;

    run(&mut shard, &manager, cli.command)
}
