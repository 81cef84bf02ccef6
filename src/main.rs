use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vcp_screener::dataset::parse_date;
use vcp_screener::report;
use vcp_screener::signals::{PerformanceReport, SIGNALS_FILE};
use vcp_screener::synthetic::sample_dataset;
use vcp_screener::{MarketDataset, ScanConfig, Scanner, Signal, SignalStore};

#[derive(Parser, Debug)]
#[command(name = "vcp-screener")]
#[command(about = "Daily volatility contraction pattern screener and signal tracker")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Print verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON file overriding default thresholds
    #[arg(short, long, global = true, env = "VCP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Screen the universe and reconcile tracked signals
    Scan {
        /// Directory with prices.csv (and optionally tickers.csv, flows.csv)
        #[arg(short, long, env = "VCP_DATA_DIR", default_value = "data")]
        data_dir: PathBuf,

        /// Directory holding signals.csv
        #[arg(short, long, env = "VCP_STATE_DIR", default_value = "state")]
        state_dir: PathBuf,

        /// Directory for latest.json and dated report history
        #[arg(short, long, env = "VCP_REPORT_DIR", default_value = "reports")]
        report_dir: PathBuf,

        /// As-of date (YYYY-MM-DD or YYYYMMDD); defaults to the latest session in the data
        #[arg(short = 'D', long)]
        date: Option<String>,

        /// Skip writing the scan report
        #[arg(long)]
        no_report: bool,

        /// Override universe.max_results
        #[arg(short = 'n', long)]
        max_results: Option<usize>,

        /// Override universe.min_avg_dollar_volume
        #[arg(long, env = "VCP_MIN_DOLLAR_VOLUME")]
        min_dollar_volume: Option<f64>,
    },

    /// List tracked signals
    Signals {
        #[arg(short, long, env = "VCP_STATE_DIR", default_value = "state")]
        state_dir: PathBuf,

        /// Include closed signals
        #[arg(short, long)]
        all: bool,
    },

    /// Win rate and returns over the signal history
    Performance {
        #[arg(short, long, env = "VCP_STATE_DIR", default_value = "state")]
        state_dir: PathBuf,
    },

    /// Summarise stored scan reports
    History {
        #[arg(short, long, env = "VCP_REPORT_DIR", default_value = "reports")]
        report_dir: PathBuf,

        /// Date filter: "20250915", "202509" or "20250901:20251120"
        #[arg(short = 'D', long)]
        date: Option<String>,
    },

    /// Write a synthetic dataset for trying the scanner without real data
    Synth {
        #[arg(short, long, default_value = "data")]
        output_dir: PathBuf,

        /// Number of tickers
        #[arg(short, long, default_value = "40")]
        tickers: usize,

        #[arg(long, default_value = "42")]
        seed: u64,

        /// First session (YYYY-MM-DD)
        #[arg(long, default_value = "2025-01-06")]
        start: String,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_level = if args.verbose { "vcp_screener=debug" } else { "vcp_screener=info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => ScanConfig::load(path).with_context(|| format!("Failed to load config {:?}", path))?,
        None => ScanConfig::default(),
    };

    match args.command {
        Commands::Scan { data_dir, state_dir, report_dir, date, no_report, max_results, min_dollar_volume } => {
            if let Some(n) = max_results {
                config.universe.max_results = n;
            }
            if let Some(v) = min_dollar_volume {
                config.universe.min_avg_dollar_volume = v;
            }
            run_scan(config, &data_dir, &state_dir, &report_dir, date.as_deref(), no_report)?;
        }
        Commands::Signals { state_dir, all } => {
            run_signals(&state_dir, all)?;
        }
        Commands::Performance { state_dir } => {
            let store = open_store(&state_dir)?;
            print!("{}", PerformanceReport::from_signals(store.signals()));
        }
        Commands::History { report_dir, date } => {
            run_history(&report_dir, date.as_deref())?;
        }
        Commands::Synth { output_dir, tickers, seed, start } => {
            let start = parse_date(&start).with_context(|| format!("Invalid start date {:?}", start))?;
            let dataset = sample_dataset(seed, tickers, start);
            dataset.save_dir(&output_dir)?;
            info!(
                "Wrote {} synthetic tickers to {:?} (last session {:?})",
                dataset.len(),
                output_dir,
                dataset.latest_date()
            );
        }
    }

    Ok(())
}

fn open_store(state_dir: &Path) -> Result<SignalStore> {
    let path = state_dir.join(SIGNALS_FILE);
    SignalStore::open(&path).with_context(|| format!("Failed to open signal store {:?}", path))
}

fn run_scan(
    config: ScanConfig,
    data_dir: &Path,
    state_dir: &Path,
    report_dir: &Path,
    date: Option<&str>,
    no_report: bool,
) -> Result<()> {
    let scanner = Scanner::new(config)?;
    let dataset = MarketDataset::load_dir(data_dir)
        .with_context(|| format!("Failed to load market data from {:?}", data_dir))?;
    if dataset.is_empty() {
        warn!("No usable tickers in {:?}", data_dir);
    }

    let as_of = match date {
        Some(raw) => match parse_date(raw) {
            Some(d) => d,
            None => bail!("Invalid date {:?}, expected YYYY-MM-DD or YYYYMMDD", raw),
        },
        None => dataset.latest_date().unwrap_or_else(today_in_seoul),
    };

    let mut store = open_store(state_dir)?;
    let result = scanner.scan(&dataset, &mut store, as_of)?;
    print!("{}", result);

    if !no_report {
        report::save_report(&result, report_dir)?;
    }
    Ok(())
}

fn today_in_seoul() -> NaiveDate {
    Utc::now().with_timezone(&chrono_tz::Asia::Seoul).date_naive()
}

fn print_signal(s: &Signal) {
    let ret = s.return_pct().map(|r| format!("{:+.1}%", r)).unwrap_or_else(|| "-".to_string());
    println!(
        "{:<8} {:<11} {:>10} {:>10} {:>10} {:>10} {:>6.1} {:>8} {}",
        s.ticker,
        s.state.to_string(),
        s.detected_date,
        s.entry_price,
        s.stop_loss,
        s.last_close,
        s.score,
        ret,
        s.close_reason.map(|r| r.to_string()).unwrap_or_default()
    );
}

fn run_signals(state_dir: &Path, all: bool) -> Result<()> {
    let store = open_store(state_dir)?;
    let signals: Vec<&Signal> = if all {
        store.signals().iter().collect()
    } else {
        store.open_signals().collect()
    };

    if signals.is_empty() {
        println!("No {}signals", if all { "" } else { "open " });
        return Ok(());
    }

    println!(
        "{:<8} {:<11} {:>10} {:>10} {:>10} {:>10} {:>6} {:>8} {}",
        "TICKER", "STATE", "DETECTED", "ENTRY", "STOP", "LAST", "SCORE", "RETURN", "REASON"
    );
    for s in signals {
        print_signal(s);
    }
    Ok(())
}

fn run_history(report_dir: &Path, date: Option<&str>) -> Result<()> {
    let reports = report::load_history(report_dir, date)?;
    if reports.is_empty() {
        println!("No scan reports in {:?}", report_dir);
        return Ok(());
    }

    println!(
        "{:<10} {:>9} {:>9} {:>10} {:>7} {:>9} {:>11} {:>7} {:>5}",
        "DATE", "UNIVERSE", "EVALUATED", "CANDIDATES", "NEW", "CONFIRMED", "INVALIDATED", "EXPIRED", "OPEN"
    );
    for r in &reports {
        println!(
            "{:<10} {:>9} {:>9} {:>10} {:>7} {:>9} {:>11} {:>7} {:>5}",
            r.as_of.to_string(),
            r.stats.universe,
            r.stats.evaluated,
            r.stats.candidates,
            r.created.len(),
            r.confirmed.len(),
            r.invalidated.len(),
            r.expired.len(),
            r.stats.open_signals
        );
    }
    Ok(())
}
