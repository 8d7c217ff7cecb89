//! brokerloc - resolve, inspect and clear the visitor location used by the
//! broker-comparison site, plus a couple of maintenance utilities.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use brokerloc_core::api::HttpClient;
use brokerloc_core::geo::{
    BigDataCloudGeocoder, DeviceLocator, FixedLocator, IpGeolocationClient, NoDeviceLocator,
    PositionOptions,
};
use brokerloc_core::models::broker::filter_min_deposit;
use brokerloc_core::models::{BrokerRecord, BrokerSortColumn};
use brokerloc_core::perf::{self, MetricName};
use brokerloc_core::search::match_brokers;
use brokerloc_core::{
    Config, FileStore, LocationCache, LocationProvider, LocationResolver, ProviderOptions,
    RequestOutcome,
};

const USAGE: &str = "\
Usage: brokerloc <command> [options]

Commands:
  locate [--coords LAT,LNG[,ACC]] [--no-cache]   Resolve and print the current location
  show                                           Print the cached location and its age
  clear                                          Remove the cached location
  vitals NAME=VALUE...                           Rate Web Vitals samples (LCP, INP, CLS, FCP, TTFB)
  brokers FILE [--sort trust|spread|rating] [--min-deposit N] [--query TEXT]
                                                 Normalize and list broker records";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Value following `flag`, if the flag is present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => match args.get(i + 1) {
            Some(value) => Ok(Some(value.as_str())),
            None => bail!("{} needs a value", flag),
        },
        None => Ok(None),
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    let config = Config::load()
        .context("Failed to load configuration")?
        .with_env();

    match command.as_str() {
        "locate" => locate(&config, rest).await,
        "show" => show(&config),
        "clear" => clear(&config),
        "vitals" => vitals(rest),
        "brokers" => brokers(rest),
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

fn location_cache(config: &Config) -> Result<LocationCache> {
    let store = Arc::new(FileStore::new(config.cache_dir()?)?);
    Ok(LocationCache::new(store).with_ttl(config.cache_ttl()))
}

fn build_resolver(
    config: &Config,
    cache: LocationCache,
    coords: Option<&str>,
) -> Result<LocationResolver> {
    let http = HttpClient::with_timeout(config.request_timeout())?;

    let device: Arc<dyn DeviceLocator> = match coords.or(config.device_coords.as_deref()) {
        Some(coords) => Arc::new(FixedLocator::parse(coords)?),
        None => Arc::new(NoDeviceLocator),
    };

    let resolver = LocationResolver::new(
        device,
        Arc::new(BigDataCloudGeocoder::new(http.clone())),
        IpGeolocationClient::new(http),
        cache,
    )
    .with_position_options(PositionOptions {
        timeout: config.request_timeout(),
        ..PositionOptions::default()
    });
    Ok(resolver)
}

async fn locate(config: &Config, args: &[String]) -> Result<()> {
    let cache = location_cache(config)?;
    let resolver = Arc::new(build_resolver(config, cache.clone(), flag_value(args, "--coords")?)?);
    let no_cache = has_flag(args, "--no-cache");

    let mut provider = LocationProvider::mount(
        resolver,
        ProviderOptions {
            auto_detect: config.auto_detect,
            skip_restore: no_cache,
        },
    )
    .await;

    if let Some(outcome) = provider.auto_detect_finished().await {
        info!(?outcome, "Auto-detect finished");
    }

    let state = provider.state();
    if state.location.is_none() && state.error.is_none() {
        if let RequestOutcome::Failed(err) = provider.request_location().await {
            bail!(err);
        }
    }

    let state = provider.state();
    match state.location {
        Some(location) => {
            println!("{}", serde_json::to_string_pretty(&location)?);
            eprintln!(
                "{} via {} ({})",
                location.place_display(),
                location.source,
                cache.freshness_display(&location)
            );
            Ok(())
        }
        None => match state.error {
            Some(err) => bail!(err),
            None => bail!("Location request did not complete"),
        },
    }
}

fn show(config: &Config) -> Result<()> {
    let cache = location_cache(config)?;
    match cache.load() {
        Some(location) => {
            println!("{}", serde_json::to_string_pretty(&location)?);
            eprintln!("cached, {}", cache.freshness_display(&location));
        }
        None => eprintln!("No cached location"),
    }
    Ok(())
}

fn clear(config: &Config) -> Result<()> {
    location_cache(config)?.clear()?;
    eprintln!("Cached location cleared");
    Ok(())
}

fn vitals(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("vitals needs at least one NAME=VALUE sample");
    }

    let monitor = perf::global();
    monitor.start();
    monitor.on_metric(Box::new(|metric| {
        println!("{:<5} {:>10.3}  {}", metric.name, metric.value, metric.rating);
    }));

    for sample in args {
        let (name, value) = sample
            .split_once('=')
            .with_context(|| format!("Expected NAME=VALUE, got '{}'", sample))?;
        let name: MetricName = name.parse()?;
        let value: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", name, value))?;
        monitor.record(name, value);
    }

    println!("score {}", monitor.score());
    monitor.stop();
    Ok(())
}

fn brokers(args: &[String]) -> Result<()> {
    let Some(file) = args.first().filter(|a| !a.starts_with("--")) else {
        bail!("brokers needs a JSON file");
    };
    let contents = std::fs::read_to_string(Path::new(file))
        .with_context(|| format!("Failed to read {}", file))?;
    let rows: Vec<serde_json::Value> =
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", file))?;

    let mut records = BrokerRecord::from_values(rows);
    if let Some(min) = flag_value(args, "--min-deposit")? {
        let min: f64 = min.parse().with_context(|| format!("Invalid deposit '{}'", min))?;
        records = filter_min_deposit(records, min);
    }
    if let Some(query) = flag_value(args, "--query")? {
        records = match_brokers(&records, query);
    }

    let column: BrokerSortColumn = match flag_value(args, "--sort")? {
        Some(col) => col.parse()?,
        None => BrokerSortColumn::default(),
    };
    column.sort(&mut records);

    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
