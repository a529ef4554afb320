//! CLI entry point for plume_daq.
//!
//! Loads settings, spawns one producer task per configured instrument, and
//! runs the consumer loop until Ctrl+C (or an optional duration elapses).
//! Results land as CSV files in the output directory.
//!
//! # Usage
//!
//! Acquire with the default config:
//! ```bash
//! plume_daq run
//! ```
//!
//! Acquire with a named config into a specific results directory, stopping
//! after ten minutes:
//! ```bash
//! plume_daq run --config harbor_day5 --out plume_results/day5 --duration 600
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plume_daq")]
#[command(about = "Headless plume detection and emission-factor analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire from the configured instruments and analyze in real time
    Run {
        /// Config name under config/ (without extension)
        #[arg(long)]
        config: Option<String>,

        /// Output directory for CSV records
        #[arg(long, default_value = "plume_results")]
        out: PathBuf,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            out,
            duration,
        } => run_session(config.as_deref(), &out, duration).await,
    }
}

#[cfg(not(feature = "storage_csv"))]
async fn run_session(_: Option<&str>, _: &std::path::Path, _: Option<u64>) -> Result<()> {
    anyhow::bail!("CSV persistence is compiled out; rebuild with --features storage_csv")
}

#[cfg(feature = "storage_csv")]
async fn run_session(
    config: Option<&str>,
    out: &std::path::Path,
    duration: Option<u64>,
) -> Result<()> {
    use plume_daq::channel::ChannelRegistry;
    use plume_daq::config::Settings;
    use plume_daq::engine::PlumeEngine;
    use plume_daq::sink::CsvSink;
    use plume_daq::{instrument, trace};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{mpsc, watch};
    use tracing::info;

    let settings = Settings::new(config)?;
    trace::init_from_settings(&settings)?;

    let registry = Arc::new(ChannelRegistry::new(
        &settings.registry_seed(),
        &settings.detection.primary_instrument,
    )?);
    let sink = CsvSink::create(out, &registry, &settings)?;

    let (tx, rx) = mpsc::channel(settings.acquisition.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut producers = Vec::new();
    for spec in &settings.instruments {
        let instr = instrument::build(spec)?;
        info!(name = %spec.name, kind = %spec.kind, "starting producer");
        producers.push(instrument::spawn_producer(
            instr,
            tx.clone(),
            shutdown_rx.clone(),
        ));
    }
    drop(tx);

    let mut engine = PlumeEngine::new(&settings, registry, rx, Box::new(sink))?;
    let engine_shutdown = shutdown_rx.clone();
    let engine_task = tokio::spawn(async move { engine.run(engine_shutdown).await });

    info!(
        session = %settings.application.name,
        instruments = settings.instruments.len(),
        out = %out.display(),
        "acquisition started"
    );

    match duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    info!("stop requested; draining");
    let _ = shutdown_tx.send(true);
    futures::future::join_all(producers).await;
    engine_task.await??;
    Ok(())
}
