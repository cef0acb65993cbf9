//! Trace-replay front-end for `coherence-sim` (spec §6.1 / §4.14): builds a
//! hierarchy from a TOML configuration and either validates it (`check`) or
//! replays a line-oriented trace through it (`run`), printing per-run
//! hit/miss/invalidation counts.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use coherence_sim::{CoreHandle, Geometry, HierarchyConfig, NullMonitor};

#[derive(Parser, Debug)]
#[command(name = "coherence-sim-cli", about = "Build and drive a cache-coherence hierarchy")]
struct Cli {
    /// Emit trace-level protocol logs in addition to the default summary.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a hierarchy configuration without running anything.
    Check {
        #[arg(long)]
        config: PathBuf,
    },
    /// Build a hierarchy and replay a trace through it.
    Run {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        trace: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("trace")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &PathBuf) -> Result<HierarchyConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading configuration file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing configuration file {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Check { config } => check(&config),
        Command::Run { config, trace } => run(&config, &trace),
    }
}

fn check(config_path: &PathBuf) -> Result<()> {
    let cfg = load_config(config_path)?;
    match cfg.build(Arc::new(NullMonitor)) {
        Ok(h) => {
            println!("configuration valid: {} cache(s) wired", h.caches.len());
            Ok(())
        }
        Err(e) => bail!("configuration invalid: {e}"),
    }
}

/// `<cache_name> <op> <addr_hex>`, one instruction per line; blank lines and
/// `#`-prefixed lines are ignored. `op` is one of `read`, `write`, `prefetch`,
/// `flush`, `writeback`.
fn run(config_path: &PathBuf, trace_path: &PathBuf) -> Result<()> {
    let cfg = load_config(config_path)?;
    let geometries: HashMap<String, Geometry> = cfg
        .caches
        .iter()
        .map(|c| (c.name.clone(), Geometry::new(cfg.block_bits, c.index_bits)))
        .collect();

    let monitor = Arc::new(coherence_sim::CountingMonitor::new());
    let hierarchy = cfg
        .build(Arc::clone(&monitor) as Arc<dyn coherence_sim::Monitor>)
        .context("building hierarchy from configuration")?;

    let trace = fs::read_to_string(trace_path)
        .with_context(|| format!("reading trace file {}", trace_path.display()))?;

    let mut core_ids: HashMap<&str, u8> = HashMap::new();
    let mut lines_executed = 0u64;

    for (lineno, raw) in trace.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let cache_name = parts
            .next()
            .with_context(|| format!("trace line {}: missing cache name", lineno + 1))?;
        let op = parts
            .next()
            .with_context(|| format!("trace line {}: missing operation", lineno + 1))?;
        let addr_text = parts
            .next()
            .with_context(|| format!("trace line {}: missing address", lineno + 1))?;
        let addr = u64::from_str_radix(addr_text.trim_start_matches("0x"), 16)
            .with_context(|| format!("trace line {}: invalid hex address `{addr_text}`", lineno + 1))?;

        let cache = hierarchy
            .get(cache_name)
            .with_context(|| format!("trace line {}: unknown cache `{cache_name}`", lineno + 1))?;
        let geom = *geometries
            .get(cache_name)
            .with_context(|| format!("trace line {}: no geometry for `{cache_name}`", lineno + 1))?;

        let next_id = core_ids.len() as u8;
        let core_id = *core_ids.entry(cache_name).or_insert(next_id);
        let handle = CoreHandle::new(cache.as_ref(), geom, core_id);

        match op {
            "read" => {
                handle.read(addr);
            }
            "write" => {
                handle.write(addr, &vec![0xAAu8; 1usize << geom.block_bits]);
            }
            "prefetch" => handle.prefetch(addr),
            "flush" => handle.flush(addr),
            "writeback" => handle.writeback(addr),
            other => bail!("trace line {}: unknown operation `{other}`", lineno + 1),
        }
        lines_executed += 1;
    }

    println!("replayed {lines_executed} instruction(s)");
    println!(
        "hits={} misses={} invalidations={}",
        monitor.hits(),
        monitor.misses(),
        monitor.invalidations()
    );
    Ok(())
}
