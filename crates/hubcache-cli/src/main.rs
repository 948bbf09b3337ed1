use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use hubcache_core::{
    plan_deletion, scan_hub, CacheConfig, CacheReport, DedupCache, HubCache, RevisionId,
};

#[derive(Parser)]
#[command(
    name = "hubcache",
    about = "Inspect and maintain the local hub and dedup caches",
    version
)]
struct HubcacheCli {
    /// Increase log verbosity (-v: debug, -vv: trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inventory the cache: sizes, revisions, refs, corruption warnings.
    Scan {
        /// Emit the full report as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Delete revisions and whatever storage only they use.
    Delete {
        /// Revision ids to remove; unknown ids are ignored.
        #[arg(required = true)]
        revisions: Vec<String>,

        /// Print the plan without executing it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Expire old shards and re-enforce the chunk cache size bound.
    Sweep,
}

fn main() -> Result<()> {
    let cli = HubcacheCli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let config = CacheConfig::from_env()?;
    match cli.command {
        Command::Scan { json } => scan(&config, json, cli.quiet),
        Command::Delete { revisions, dry_run } => delete(&config, &revisions, dry_run, cli.quiet),
        Command::Sweep => sweep(&config, cli.quiet),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("hubcache={level},hubcache_core={level},hubcache_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn scan(config: &CacheConfig, json: bool, quiet: bool) -> Result<()> {
    let hub = HubCache::open(&config.hub_root)?;
    let mut report = scan_hub(&hub)?;

    let dedup = DedupCache::open(config)?;
    report.warnings.extend(dedup.shards().verify());

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &CacheReport) {
    for repo in &report.repositories {
        println!("{}  {}", repo.id, human_bytes(repo.size_bytes));
        for revision in &repo.revisions {
            println!(
                "  {}  {}",
                revision.revision,
                human_bytes(revision.size_bytes)
            );
        }
        for (name, target) in &repo.refs {
            println!("  {name} -> {target}");
        }
    }
    println!(
        "total: {} across {} repositories",
        human_bytes(report.total_bytes),
        report.repositories.len()
    );
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
}

fn delete(config: &CacheConfig, revisions: &[String], dry_run: bool, quiet: bool) -> Result<()> {
    let hub = HubCache::open(&config.hub_root)?;
    let revisions: Vec<RevisionId> = revisions.iter().map(RevisionId::new).collect();
    let plan = plan_deletion(&hub, &revisions)?;

    if plan.is_empty() {
        if !quiet {
            println!("nothing to delete");
        }
        return Ok(());
    }

    if !quiet {
        for (path, size) in plan.paths_to_delete() {
            println!("rm {} ({})", path.display(), human_bytes(*size));
        }
        for path in plan.refs_to_delete() {
            println!("rm {}", path.display());
        }
        println!(
            "would free {}",
            human_bytes(plan.expected_bytes_freed())
        );
    }
    if dry_run {
        return Ok(());
    }

    let summary = plan.execute();
    if !quiet {
        println!(
            "freed {} ({} entries skipped)",
            human_bytes(summary.freed_bytes),
            summary.skipped_paths
        );
    }
    Ok(())
}

fn sweep(config: &CacheConfig, quiet: bool) -> Result<()> {
    let dedup = DedupCache::open(config)?;
    let shards = dedup.shards().sweep_expired()?;
    let chunks = dedup.chunks().enforce_limit()?;
    if !quiet {
        println!(
            "swept {} expired shards ({}), evicted {} chunks ({})",
            shards.swept,
            human_bytes(shards.swept_bytes),
            chunks.evicted,
            human_bytes(chunks.evicted_bytes)
        );
    }
    Ok(())
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
