//! closefetch CLI: fetch historical closing prices grouped by date.
//!
//! Commands:
//! - `fetch`: look up closing prices for `DATE=SYM,SYM` groups or a JSON request file
//! - `init-config`: print the default TOML configuration
//!
//! Logs go to stderr (`RUST_LOG` filter, `CLOSEFETCH_LOG_FORMAT=json` for
//! JSON lines); results go to stdout.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use closefetch_core::{
    FetchConfig, FetchReport, PriceFetcher, PriceProvider, PriceResult, ProviderKind,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "closefetch",
    about = "closefetch: batched historical closing prices by date"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch closing prices, one upstream lookup per date.
    Fetch {
        /// Date groups as DATE=SYM[,SYM...] (e.g., 2023-01-03=AAPL,MSFT).
        groups: Vec<String>,

        /// JSON request file: {"2023-01-03": ["AAPL", "MSFT"], ...}.
        #[arg(long)]
        request: Option<PathBuf>,

        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Serve prices from a CSV file instead of the network.
        #[arg(long)]
        offline_csv: Option<PathBuf>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Print failed and unpriced lookups to stderr.
        #[arg(long, default_value_t = false)]
        report: bool,
    },
    /// Print the default configuration as TOML.
    InitConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            groups,
            request,
            config,
            offline_csv,
            format,
            report,
        } => run_fetch(groups, request, config, offline_csv, format, report),
        Commands::InitConfig => {
            print!("{}", FetchConfig::default().to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing() {
    let log_format =
        std::env::var("CLOSEFETCH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn run_fetch(
    groups: Vec<String>,
    request_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    offline_csv: Option<PathBuf>,
    format: OutputFormat,
    report: bool,
) -> Result<()> {
    let request = collect_request(&groups, request_path.as_deref())?;
    if request.is_empty() {
        tracing::info!("empty request, nothing to fetch");
    }

    let mut config = match &config_path {
        Some(path) => FetchConfig::from_file(path)?,
        None => FetchConfig::default(),
    };
    if let Some(csv_path) = offline_csv {
        config.provider.kind = ProviderKind::Csv;
        config.provider.csv_path = Some(csv_path);
    }

    let provider = config.build_provider()?;
    tracing::info!(provider = provider.name(), dates = request.len(), "fetching closing prices");
    let fetcher = PriceFetcher::new(provider).with_fields(config.fetch.price_fields.clone());
    let result = fetcher.fetch_report(&request);

    if !result.failures.is_empty() {
        tracing::warn!(
            failed_dates = result.failures.len(),
            "some dates could not be fetched and are missing from the output"
        );
    }
    if report {
        print_report(&result);
    }

    write_output(std::io::stdout().lock(), format, &result.prices)
}

/// Merge the JSON request file (if any) with command-line date groups.
fn collect_request(
    groups: &[String],
    request_path: Option<&Path>,
) -> Result<BTreeMap<NaiveDate, Vec<String>>> {
    let mut request = match request_path {
        Some(path) => load_request(path)?,
        None => BTreeMap::new(),
    };
    for group in groups {
        let (date, symbols) = parse_group(group)?;
        request.entry(date).or_default().extend(symbols);
    }
    Ok(request)
}

fn write_output<W: Write>(mut out: W, format: OutputFormat, prices: &PriceResult) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, prices)?;
            writeln!(out)?;
        }
        OutputFormat::Csv => write_csv(out, prices)?,
    }
    Ok(())
}

fn load_request(path: &Path) -> Result<BTreeMap<NaiveDate, Vec<String>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read request file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("parse request file {}", path.display()))
}

/// Parse `DATE=SYM[,SYM...]`. Blank symbols are ignored; an empty list is
/// allowed and simply produces no lookup.
fn parse_group(arg: &str) -> Result<(NaiveDate, Vec<String>)> {
    let Some((date, symbols)) = arg.split_once('=') else {
        bail!("expected DATE=SYM[,SYM...], got '{arg}'");
    };
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date in '{arg}'"))?;
    let symbols = symbols
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    Ok((date, symbols))
}

fn write_csv<W: Write>(out: W, prices: &PriceResult) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["date", "symbol", "price"])?;
    for (date, by_symbol) in prices {
        for (symbol, price) in by_symbol {
            writer.write_record([date.to_string(), symbol.clone(), price.to_string()])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn print_report(report: &FetchReport) {
    eprintln!(
        "request {}: {} upstream calls, {} prices over {} dates",
        report.fingerprint.short(),
        report.upstream_calls,
        report.priced_count(),
        report.prices.len()
    );
    for failure in &report.failures {
        eprintln!(
            "  FAIL {} [{}]: {}",
            failure.date,
            failure.symbols.join(","),
            failure.error
        );
    }
    for (date, symbols) in &report.unpriced {
        eprintln!("  NO PRICE {date}: {}", symbols.join(","));
    }
}
