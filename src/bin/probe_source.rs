//! Source onboarding probe.
//!
//! **Usage:**
//! ```bash
//! probe-source OCCITANIE_SORTIES      # dump 5 raw records of one source
//! probe-source --all                  # run one aggregation, print per-source report + stats
//! probe-source --list                 # list configured source keys
//! ```

use anyhow::{bail, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use occitanie_events::{
    ingest::config::load_config_default,
    settings::DebugFlag,
    EventAggregator,
};

/// Inspect an upstream open-data source
#[derive(Parser, Debug)]
#[clap(name = "probe-source")]
#[clap(about = "Dump raw sample records or run one aggregation against the configured sources")]
struct Args {
    /// Source key to sample (e.g. OCCITANIE_SORTIES)
    key: Option<String>,

    /// Run a full aggregation instead of sampling one source
    #[clap(long, conflicts_with = "key")]
    all: bool,

    /// List configured sources and exit
    #[clap(long)]
    list: bool,

    /// Verbose per-record logging (same as the persisted `debug_events` flag)
    #[clap(long, env = "EVENTS_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let cfg = load_config_default()?;
    let agg = EventAggregator::from_config(&cfg, DebugFlag::new(args.debug))?;

    if args.list {
        for s in agg.sources() {
            println!("{:<24} {:<11} max={:<5} {}", s.key, s.category, s.max_items, s.name);
        }
        return Ok(());
    }

    if args.all {
        let run = agg.run().await;
        for r in &run.sources {
            match &r.error {
                None => println!("OK   {:<24} {:>5} events  {} pages", r.key, r.events, r.pages),
                Some(e) => println!("FAIL {:<24} {:>5} events  {e}", r.key, r.events),
            }
        }
        let stats = agg.get_event_stats(&run.events);
        println!(
            "\n{} events ({} duplicates removed)\n{}",
            run.events.len(),
            run.duplicates,
            serde_json::to_string_pretty(&stats)?
        );
        return Ok(());
    }

    let Some(key) = args.key else {
        bail!("pass a source KEY, --all or --list");
    };
    let sample = agg.test_api(&key).await?;
    println!("{}", serde_json::to_string_pretty(&sample)?);
    Ok(())
}
