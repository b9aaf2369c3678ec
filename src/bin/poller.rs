use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::Parser;
use fleet_poller::{
    config::{Config, build_source, read_config_file},
    source::Source,
    values::Value,
};
use tokio::spawn;
use tracing::{debug, error, info, instrument, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Run a single cycle per source and exit
    #[arg(long)]
    once: bool,

    /// Enable trace logging
    #[arg(short, long)]
    verbose: bool,
}

/// One line of output per source cycle
#[derive(Debug, serde::Serialize)]
struct CycleRecord<'a> {
    source: &'a str,
    timestamp: DateTime<Utc>,
    labels: &'a [String],
    values: &'a [Value],
}

fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::DEBUG
    };
    let filter = filter::Targets::new()
        .with_targets(vec![("fleet_poller", level), ("poller", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    dispatch_sources(&config, args.once).await;

    Ok(())
}

async fn dispatch_sources(config: &Config, once: bool) {
    let mut handles = vec![];
    for source_config in &config.sources {
        let source = match build_source(source_config).await {
            Ok(source) => source,
            Err(e) => {
                error!("skipping source {}: {e:#}", source_config.display_name());
                continue;
            }
        };

        handles.push(spawn(source_loop(
            source,
            source_config.interval(),
            once,
        )));
    }

    if handles.is_empty() {
        error!("no sources to poll");
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!("{e}");
        }
    }
}

#[instrument(skip_all, fields(source = %source.name()))]
async fn source_loop(mut source: Box<dyn Source>, interval: Duration, once: bool) {
    debug!("polling every {}s", interval.as_secs());
    let mut interval = tokio::time::interval(interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match source.probe().await {
            Ok(data) => {
                let record = CycleRecord {
                    source: source.name(),
                    timestamp: Utc::now(),
                    labels: data.labels(),
                    values: data.values(),
                };
                match serde_json::to_string(&record) {
                    Ok(line) => println!("{line}"),
                    Err(e) => error!("failed to serialize cycle: {e}"),
                }
                info!("cycle finished with {} values", data.len());
            }
            Err(e) => error!("cycle failed: {e}"),
        }

        if once {
            return;
        }
    }
}
