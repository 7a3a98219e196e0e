//! CLI command definitions for circuit-forge.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::{info, warn};

use crate::circuit::content_hash;
use crate::composer::{Composer, RuleTable};
use crate::dedup::DuplicateDetector;
use crate::features::{FeatureExtractor, StaticFeatureExtractor};
use crate::generators::{GeneratorId, GeneratorRegistry};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{PipelineConfig, PipelineManager, PipelineStats};
use crate::remote::{HttpRemoteStore, InMemoryRemoteStore, RemoteStore, DEFAULT_PAGE_SIZE};

/// Default duplicate cache location.
const DEFAULT_CACHE_FILE: &str = "circuit_hashes_cache.json";

/// Compose, deduplicate and persist synthetic quantum circuits.
#[derive(Parser)]
#[command(name = "circuit-forge")]
#[command(about = "Compose, deduplicate and persist a corpus of synthetic quantum circuits")]
#[command(version)]
#[command(
    long_about = "circuit-forge composes circuits from a registry of construction kinds with a self-adjusting probability model, drops duplicates by content hash, stores new circuits locally and uploads them to a remote store.\n\nExample usage:\n  circuit-forge run --workers 4 --batch-size 16 --iterations 10 --remote memory"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the generation pipeline.
    Run(RunArgs),

    /// Rebuild the duplicate cache from the remote store.
    ///
    /// Must not run while a pipeline is using the same cache file.
    Reconcile(ReconcileArgs),

    /// Print duplicate cache statistics as JSON.
    CacheStats(CacheStatsArgs),

    /// Compose one circuit and print its summary without storing it.
    Sample(SampleArgs),
}

/// Remote store selection shared by several commands.
#[derive(clap::Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Remote store: `none`, `memory`, or an http(s) base URL.
    #[arg(long, default_value = "none", env = "FORGE_REMOTE")]
    pub remote: String,

    /// Bearer token for an HTTP remote store.
    #[arg(long, env = "FORGE_REMOTE_TOKEN", hide_env_values = true)]
    pub remote_token: Option<String>,
}

/// Arguments for `circuit-forge run`. Unset flags fall back to `FORGE_*`
/// environment variables, then to built-in defaults.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Worker pool size.
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Tasks per batch.
    #[arg(short = 'b', long)]
    pub batch_size: Option<usize>,

    /// Stop after this many batches.
    #[arg(short = 'n', long)]
    pub iterations: Option<u64>,

    /// Buffered results that trigger an upload.
    #[arg(long)]
    pub upload_threshold: Option<usize>,

    /// Base seed.
    #[arg(short = 's', long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub min_width: Option<usize>,

    #[arg(long)]
    pub max_width: Option<usize>,

    #[arg(long)]
    pub min_depth: Option<usize>,

    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Probability of stopping before each step after the first.
    #[arg(long)]
    pub stopping_prob: Option<f64>,

    /// Maximum construction steps per composite.
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Append measurements to every construction step.
    #[arg(long)]
    pub measure: bool,

    /// YAML rule table replacing the built-in rules.
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Duplicate cache file.
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// Local artifact directory.
    #[arg(short = 'o', long)]
    pub local_dir: Option<PathBuf>,

    /// Measurement timeout in seconds.
    #[arg(long)]
    pub measurement_timeout: Option<u64>,

    /// Resync the duplicate cache from the remote store at startup.
    #[arg(long)]
    pub force_refresh: bool,

    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Write Prometheus metrics to this file on exit.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Print final statistics as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Applies the flags that were given on top of `config`.
    pub fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(workers) = self.workers {
            config.num_workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(iterations) = self.iterations {
            config.max_iterations = Some(iterations);
        }
        if let Some(threshold) = self.upload_threshold {
            config.upload_threshold = threshold;
        }
        if let Some(seed) = self.seed {
            config.base_params.seed = seed;
        }
        if let Some(min_width) = self.min_width {
            config.base_params.min_width = min_width;
        }
        if let Some(max_width) = self.max_width {
            config.base_params.max_width = max_width;
        }
        if let Some(min_depth) = self.min_depth {
            config.base_params.min_depth = min_depth;
        }
        if let Some(max_depth) = self.max_depth {
            config.base_params.max_depth = max_depth;
        }
        if let Some(prob) = self.stopping_prob {
            config.stopping_prob = prob;
        }
        if let Some(steps) = self.max_steps {
            config.max_steps = steps;
        }
        if self.measure {
            config.base_params.measure = true;
        }
        if let Some(rules) = &self.rules {
            config.rules_file = Some(rules.clone());
        }
        if let Some(cache_file) = &self.cache_file {
            config.cache_file = cache_file.clone();
        }
        if let Some(local_dir) = &self.local_dir {
            config.local_dir = local_dir.clone();
        }
        if let Some(secs) = self.measurement_timeout {
            config.measurement_timeout = Duration::from_secs(secs);
        }
        if self.force_refresh {
            config.force_refresh = true;
        }
        config
    }
}

/// Arguments for `circuit-forge reconcile`.
#[derive(Parser, Debug)]
pub struct ReconcileArgs {
    /// Duplicate cache file.
    #[arg(long, default_value = DEFAULT_CACHE_FILE, env = "FORGE_CACHE_FILE")]
    pub cache_file: PathBuf,

    /// Remote listing page size.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

/// Arguments for `circuit-forge cache-stats`.
#[derive(Parser, Debug)]
pub struct CacheStatsArgs {
    /// Duplicate cache file.
    #[arg(long, default_value = DEFAULT_CACHE_FILE, env = "FORGE_CACHE_FILE")]
    pub cache_file: PathBuf,
}

/// Arguments for `circuit-forge sample`.
#[derive(Parser, Debug)]
pub struct SampleArgs {
    /// Seed for selection and construction.
    #[arg(short = 's', long, default_value_t = 5_000_000)]
    pub seed: u64,

    /// Restrict the registry to these kinds (comma-separated, e.g. qft,qpe,ghz).
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// YAML rule table replacing the built-in rules.
    #[arg(long)]
    pub rules: Option<PathBuf>,

    #[arg(long, default_value_t = crate::composer::DEFAULT_STOPPING_PROB)]
    pub stopping_prob: f64,

    #[arg(long, default_value_t = crate::composer::DEFAULT_MAX_STEPS)]
    pub max_steps: usize,

    #[arg(long, default_value_t = 8)]
    pub max_width: usize,

    #[arg(long, default_value_t = 20)]
    pub max_depth: usize,

    /// Include the full circuit in the output.
    #[arg(long)]
    pub circuit: bool,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Reconcile(args) => run_reconcile_command(args).await,
        Commands::CacheStats(args) => run_cache_stats_command(args).await,
        Commands::Sample(args) => run_sample_command(args),
    }
}

/// Builds the remote store named by `--remote`.
pub fn build_remote(args: &RemoteArgs) -> anyhow::Result<Option<Arc<dyn RemoteStore>>> {
    let spec = args.remote.trim();
    match spec {
        "" | "none" => Ok(None),
        "memory" => Ok(Some(Arc::new(InMemoryRemoteStore::new()))),
        url if url.starts_with("http://") || url.starts_with("https://") => {
            let store = HttpRemoteStore::new(url, args.remote_token.clone())
                .with_context(|| format!("Failed to create remote store for {}", url))?;
            Ok(Some(Arc::new(store)))
        }
        other => bail!(
            "Unknown remote '{}': expected none, memory, or an http(s) URL",
            other
        ),
    }
}

fn load_rules(path: Option<&Path>) -> anyhow::Result<RuleTable> {
    match path {
        Some(path) => RuleTable::from_file(path)
            .with_context(|| format!("Failed to load rule table from {}", path.display())),
        None => Ok(RuleTable::default()),
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let config = args.apply(PipelineConfig::from_env()?);
    let remote = build_remote(&args.remote)?;
    init_metrics().context("Failed to initialize metrics")?;

    let mut manager = PipelineManager::from_config(config)?;
    if let Some(remote) = remote {
        manager = manager.with_remote(remote);
    }

    let shutdown = manager.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current batch");
            shutdown.shutdown();
        }
    });

    let stats = manager.run().await?;

    if let Some(path) = &args.metrics_file {
        std::fs::write(path, export_metrics())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
        info!(path = %path.display(), "Wrote metrics");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats_json(&stats))?);
    } else {
        print_stats(&stats);
    }
    Ok(())
}

fn stats_json(stats: &PipelineStats) -> serde_json::Value {
    json!({
        "stats": stats,
        "success_rate": stats.success_rate(),
        "rate_per_minute": stats.rate_per_minute(),
        "upload_success_rate": stats.upload_success_rate(),
    })
}

fn print_stats(stats: &PipelineStats) {
    println!("Batches:     {}", stats.batches);
    println!(
        "Processed:   {} ({} succeeded, {} failed, {} duplicates)",
        stats.processed, stats.succeeded, stats.failed, stats.duplicates
    );
    println!("Success:     {:.1}%", stats.success_rate() * 100.0);
    println!("Rate:        {:.1}/min", stats.rate_per_minute());
    println!(
        "Uploads:     {} ok, {} failed",
        stats.uploaded, stats.upload_failed
    );
}

// ============================================================================
// Cache Commands
// ============================================================================

async fn run_reconcile_command(args: ReconcileArgs) -> anyhow::Result<()> {
    let remote = build_remote(&args.remote)?
        .ok_or_else(|| anyhow!("reconcile needs a remote store (--remote)"))?;

    let mut detector = DuplicateDetector::new(&args.cache_file).with_page_size(args.page_size);
    let report = detector.initialize(Some(&*remote), true).await;
    if let Some(error) = report.remote_error {
        bail!("Remote store unavailable, cache left unchanged: {}", error);
    }

    info!(
        fetched = ?report.fetched_from_remote,
        cache = %args.cache_file.display(),
        "Reconciled duplicate cache"
    );
    println!("{}", serde_json::to_string_pretty(&detector.stats())?);
    Ok(())
}

async fn run_cache_stats_command(args: CacheStatsArgs) -> anyhow::Result<()> {
    let mut detector = DuplicateDetector::new(&args.cache_file);
    let report = detector.initialize(None, false).await;
    if !report.loaded_from_cache {
        warn!(cache = %args.cache_file.display(), "No readable cache file");
    }
    println!("{}", serde_json::to_string_pretty(&detector.stats())?);
    Ok(())
}

// ============================================================================
// Sample Command
// ============================================================================

fn run_sample_command(args: SampleArgs) -> anyhow::Result<()> {
    let mut registry = GeneratorRegistry::with_default_templates();
    if !args.only.is_empty() {
        let ids = args
            .only
            .iter()
            .map(|name| name.parse::<GeneratorId>())
            .collect::<Result<Vec<_>, _>>()?;
        registry = registry.restricted_to(&ids);
    }
    let rules = load_rules(args.rules.as_deref())?;
    let composer = Composer::new(Arc::new(registry), Arc::new(rules))
        .with_stopping_prob(args.stopping_prob)
        .with_max_steps(args.max_steps);

    let base = crate::generators::BaseParams {
        max_width: args.max_width,
        max_depth: args.max_depth,
        ..crate::generators::BaseParams::default()
    }
    .with_seed(args.seed);
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let composition = composer.generate(&base, &mut rng);
    let circuit = &composition.circuit;

    let mut output = json!({
        "seed": args.seed,
        "selected": composition.selected,
        "merged": composition.merged,
        "dropped": composition.dropped,
        "name": circuit.name(),
        "width": circuit.width(),
        "depth": circuit.depth(),
        "size": circuit.size(),
        "hash": content_hash(circuit),
        "features": StaticFeatureExtractor.extract(circuit)?,
    });
    if args.circuit {
        output["circuit"] = serde_json::to_value(circuit)?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["circuit-forge", "run"]).expect("should parse");
        match cli.command {
            Commands::Run(args) => {
                assert!(args.workers.is_none());
                assert!(!args.measure);
                assert!(args.metrics_file.is_none());
                let config = args.apply(PipelineConfig::default());
                assert_eq!(config.num_workers, 5);
                assert_eq!(config.batch_size, 10);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_overrides() {
        let cli = Cli::try_parse_from([
            "circuit-forge",
            "run",
            "-w",
            "3",
            "-b",
            "6",
            "-n",
            "2",
            "--seed",
            "42",
            "--max-width",
            "8",
            "--measure",
            "--cache-file",
            "/tmp/c.json",
            "--remote",
            "memory",
            "--metrics-file",
            "/tmp/metrics.prom",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.remote.remote, "memory");
                let config = args.apply(PipelineConfig::default());
                assert_eq!(config.num_workers, 3);
                assert_eq!(config.batch_size, 6);
                assert_eq!(config.max_iterations, Some(2));
                assert_eq!(config.base_params.seed, 42);
                assert_eq!(config.base_params.max_width, 8);
                assert!(config.base_params.measure);
                assert_eq!(config.cache_file, PathBuf::from("/tmp/c.json"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_sample_only_list() {
        let cli = Cli::try_parse_from(["circuit-forge", "sample", "--only", "qft,qpe", "-s", "7"])
            .expect("should parse");
        match cli.command {
            Commands::Sample(args) => {
                assert_eq!(args.only, vec!["qft".to_string(), "qpe".to_string()]);
                assert_eq!(args.seed, 7);
            }
            _ => panic!("Expected Sample command"),
        }
    }

    #[test]
    fn test_build_remote() {
        let args = |remote: &str| RemoteArgs {
            remote: remote.to_string(),
            remote_token: None,
        };
        assert!(build_remote(&args("none")).unwrap().is_none());
        assert_eq!(
            build_remote(&args("memory")).unwrap().unwrap().describe(),
            "memory"
        );
        assert!(build_remote(&args("https://store.example.com/api"))
            .unwrap()
            .is_some());
        assert!(build_remote(&args("ftp://nope")).is_err());
    }

    #[test]
    fn test_sample_command_runs() {
        let args = SampleArgs {
            seed: 3,
            only: vec!["ghz".to_string(), "qft".to_string()],
            rules: None,
            stopping_prob: 0.3,
            max_steps: 3,
            max_width: 4,
            max_depth: 4,
            circuit: true,
        };
        assert!(run_sample_command(args).is_ok());
    }

    #[test]
    fn test_sample_rejects_unknown_kind() {
        let args = SampleArgs {
            seed: 3,
            only: vec!["teleport".to_string()],
            rules: None,
            stopping_prob: 0.3,
            max_steps: 3,
            max_width: 4,
            max_depth: 4,
            circuit: false,
        };
        assert!(run_sample_command(args).is_err());
    }
}
