//! tsundoku - local order intake host
//!
//! Reads one message per stdin line, registers the ISBNs it finds against
//! a JSON catalog into a CSV sheet, and prints replies to stdout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;

use tsundoku_core::{FileStore, SystemClock, TsundokuResult};
use tsundoku_runtime::{
    init_logging, CatalogLookup, CsvSheet, EgressSetting, InboundMessage, MessageHandle, Runtime,
    RuntimeConfig, SessionStart, StdoutChat,
};
use tsundoku_throttle::{EgressProbe, NoProbe, StaticProbe, StunProbe};

/// Register ISBNs found in chat messages
#[derive(Parser, Debug)]
#[command(name = "tsundoku")]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON catalog used for lookups (overrides TSUNDOKU_CATALOG)
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// CSV file rows are appended to (overrides TSUNDOKU_SHEET)
    #[arg(long)]
    sheet: Option<PathBuf>,

    /// Directory for cooldown and startup records (overrides TSUNDOKU_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,

    /// Requester name written to each row
    #[arg(long, default_value = "stdin")]
    author: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match RuntimeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tsundoku: {}", e);
            return ExitCode::from(2);
        }
    };
    if let Some(path) = cli.catalog.clone() {
        config.catalog_path = path;
    }
    if let Some(path) = cli.sheet.clone() {
        config.sheet_path = path;
    }
    if let Some(path) = cli.data_dir.clone() {
        config.data_dir = path;
    }
    config.log.json |= cli.json_logs;

    if let Err(e) = init_logging(&config.log) {
        eprintln!("tsundoku: {}", e);
        return ExitCode::from(2);
    }

    match run(config, &cli.author).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RuntimeConfig, author: &str) -> TsundokuResult<ExitCode> {
    let probe: Arc<dyn EgressProbe> = match &config.egress {
        EgressSetting::Off => Arc::new(NoProbe),
        EgressSetting::Stun => Arc::new(StunProbe::new()),
        EgressSetting::Fixed(ip) => Arc::new(StaticProbe(ip.clone())),
    };
    let lookup = Arc::new(CatalogLookup::load(&config.catalog_path).await?);
    tracing::info!(books = lookup.len(), "catalog loaded");

    let runtime = Runtime::build(
        &config,
        Arc::new(SystemClock),
        Arc::new(FileStore::new(&config.data_dir)),
        probe,
        lookup,
        Arc::new(CsvSheet::new(&config.sheet_path)),
        Arc::new(StdoutChat),
    );

    if let SessionStart::Exit { after, failed } = runtime.start_session().await {
        tracing::warn!(
            sleep_secs = after.as_secs(),
            "not connecting; sleeping before exit"
        );
        sleep(after).await;
        return Ok(if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;
    while let Some(text) = lines.next_line().await? {
        line_no += 1;
        if text.trim().is_empty() {
            continue;
        }
        let message = InboundMessage {
            handle: MessageHandle(format!("line {}", line_no)),
            author: author.to_string(),
            text,
        };
        let report = runtime.process(&message).await;

        if report.rate_limited {
            let wait = runtime.cooldown_remaining().unwrap_or_default();
            tracing::warn!(
                wait_secs = wait.as_secs(),
                "rate limited; sleeping out the cooldown, then exiting"
            );
            sleep(wait).await;
            return Ok(ExitCode::SUCCESS);
        }
    }

    let stats = runtime.stats();
    tracing::info!(
        attempts = stats.attempts,
        successes = stats.successes,
        failures = stats.failures,
        throttles = stats.throttles,
        "input exhausted"
    );
    Ok(ExitCode::SUCCESS)
}
