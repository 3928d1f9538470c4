use anyhow::Result;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use proxy_sentinel::{
    config::{FileConfig, Overrides, RunSettings, DEFAULT_CONFIG_PATH},
    error::{SetupError, StoreError},
    logging,
    proxy::{BatchReport, BatchRunner, ProgressSink, ProxyChecker, ProxyParser, VerdictRecord},
    report::{self, RunSummary, TIMESTAMP_FORMAT},
    store::GoogleSheetsStore,
    tui::ProxyCheckerApp,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

/// Number of newly broken proxies listed in the summary
const MAX_LISTED_CHANGES: usize = 10;

/// Checks the proxies listed in a spreadsheet and writes the results back
#[derive(Parser)]
#[command(name = "proxy-sentinel", version)]
#[command(about = "Checks the proxies listed in a spreadsheet and writes the results back")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every proxy and write the results (default)
    Check(SheetArgs),
    /// Check every proxy with a live terminal UI
    Tui(SheetArgs),
    /// Print the normalized form of each proxy in a file
    Normalize {
        /// File with one proxy per line
        input: PathBuf,
    },
    /// Write a config file template
    InitConfig {
        #[arg(default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
}

#[derive(Args, Default)]
struct SheetArgs {
    /// JSON config file (defaults to ./config.json when present)
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,
    /// Service account key file
    #[arg(short, long)]
    credentials: Option<PathBuf>,
    /// Spreadsheet key from the sheet URL
    #[arg(short = 'k', long)]
    spreadsheet_key: Option<String>,
    /// Worksheet name
    #[arg(short, long)]
    worksheet: Option<String>,
    #[arg(long)]
    proxy_column: Option<String>,
    #[arg(long)]
    status_column: Option<String>,
    #[arg(long)]
    message_column: Option<String>,
    #[arg(long)]
    date_column: Option<String>,
    #[arg(long)]
    previous_status_column: Option<String>,
    /// First data row
    #[arg(long)]
    start_row: Option<u32>,
    /// Seconds to wait between proxies
    #[arg(short, long)]
    delay: Option<f64>,
    /// Require most endpoints to succeed and a latency ceiling
    #[arg(long, overrides_with = "no_strict")]
    strict: bool,
    /// Accept a proxy when any endpoint succeeds
    #[arg(long, overrides_with = "strict")]
    no_strict: bool,
    /// Do not record previous statuses or report transitions
    #[arg(long)]
    no_track_changes: bool,
    /// Per-request timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,
    /// Test endpoint for lenient mode (can specify multiple)
    #[arg(long = "test-url")]
    test_urls: Vec<String>,
    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

impl SheetArgs {
    fn overrides(&self) -> Overrides {
        let strict = match (self.strict, self.no_strict) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        Overrides {
            credentials_file: self.credentials.clone(),
            spreadsheet_key: self.spreadsheet_key.clone(),
            worksheet_name: self.worksheet.clone(),
            proxy_column: self.proxy_column.clone(),
            status_column: self.status_column.clone(),
            message_column: self.message_column.clone(),
            date_column: self.date_column.clone(),
            previous_status_column: self.previous_status_column.clone(),
            start_row: self.start_row,
            delay: self.delay,
            strict,
            track_changes: self.no_track_changes.then_some(false),
            timeout: self.timeout,
            test_urls: self.test_urls.clone(),
        }
    }

    fn settings(&self) -> Result<RunSettings, SetupError> {
        let file = FileConfig::discover(self.config.as_deref())?;
        RunSettings::resolve(&file, &self.overrides())
    }
}

/// Prints progress lines while a batch runs
struct ConsoleSink;

impl ProgressSink for ConsoleSink {
    fn on_start(&mut self, index: usize, total: usize, proxy: &str) {
        println!("[{}/{}] checking: {}", index + 1, total, proxy);
    }

    fn on_verdict(&mut self, _index: usize, _total: usize, verdict: &VerdictRecord) {
        println!("  result: {} - {}", verdict.status(), verdict.message);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Check(args)) => {
            logging::init(args.log_level.as_deref().unwrap_or("info"));
            run_check(args).await
        }
        None => {
            logging::init("info");
            run_check(SheetArgs::default()).await
        }
        Some(Commands::Tui(args)) => {
            logging::init(args.log_level.as_deref().unwrap_or("warn"));
            run_tui(args).await
        }
        Some(Commands::Normalize { input }) => {
            logging::init("warn");
            normalize(input)
        }
        Some(Commands::InitConfig { path }) => {
            logging::init("warn");
            init_config(path)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn connect(settings: &RunSettings) -> Result<(GoogleSheetsStore, Vec<String>)> {
    let store = GoogleSheetsStore::connect(
        &settings.credentials_file,
        &settings.spreadsheet_key,
        &settings.worksheet_name,
    )
    .await?;
    let proxies = report::read_proxies(&store, &settings.layout).await?;
    Ok((store, proxies))
}

async fn run_check(args: SheetArgs) -> Result<ExitCode> {
    let settings = args.settings()?;
    let (store, proxies) = connect(&settings).await?;
    if proxies.is_empty() {
        println!("No proxies found in column {}", settings.layout.proxy);
        return Ok(ExitCode::SUCCESS);
    }

    let checker = &settings.checker;
    println!(
        "Loaded {} proxies from '{}'",
        proxies.len(),
        settings.worksheet_name
    );
    println!(
        "Mode: {} | endpoints: {} | timeout: {:.1}s | delay: {:.1}s",
        if checker.strict { "strict" } else { "lenient" },
        checker.endpoints().len(),
        checker.timeout.as_secs_f64(),
        checker.pacing_delay.as_secs_f64()
    );
    println!();

    let runner = BatchRunner::new(ProxyChecker::with_config(checker.clone()));
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let batch = runner.run(&proxies, &mut ConsoleSink, &cancel).await;
    if !batch.is_complete() {
        print_interrupted(&batch);
        return Ok(ExitCode::FAILURE);
    }

    persist(&store, &settings, &batch).await
}

async fn run_tui(args: SheetArgs) -> Result<ExitCode> {
    let settings = args.settings()?;
    let (store, proxies) = connect(&settings).await?;
    if proxies.is_empty() {
        println!("No proxies found in column {}", settings.layout.proxy);
        return Ok(ExitCode::SUCCESS);
    }

    let runner = BatchRunner::new(ProxyChecker::with_config(settings.checker.clone()));
    let mut app = ProxyCheckerApp::new(proxies, runner);
    let batch = app.run().await?;
    if !batch.is_complete() {
        print_interrupted(&batch);
        return Ok(ExitCode::SUCCESS);
    }

    persist(&store, &settings, &batch).await
}

async fn persist(
    store: &GoogleSheetsStore,
    settings: &RunSettings,
    batch: &BatchReport,
) -> Result<ExitCode> {
    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let summary = report::persist_run(
        store,
        &settings.layout,
        &batch.verdicts,
        settings.track_changes,
        &timestamp,
    )
    .await?;

    print_summary(&summary);
    if summary.became_invalid.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "Results: {} valid, {} invalid ({} total)",
        summary.valid, summary.invalid, summary.total
    );

    let changed = &summary.became_invalid;
    if changed.is_empty() {
        return;
    }
    println!();
    println!("{} proxies went from valid to invalid:", changed.len());
    for proxy in changed.iter().take(MAX_LISTED_CHANGES) {
        println!("  - {}", proxy);
    }
    if changed.len() > MAX_LISTED_CHANGES {
        println!("  ... and {} more", changed.len() - MAX_LISTED_CHANGES);
    }
}

fn print_interrupted(batch: &BatchReport) {
    println!();
    println!(
        "Stopped after {}/{} proxies ({} valid, {} invalid); results were not written",
        batch.verdicts.len(),
        batch.total,
        batch.valid_count(),
        batch.invalid_count()
    );
}

fn normalize(input: PathBuf) -> Result<ExitCode> {
    let records = ProxyParser::parse_file(&input)?;
    for record in &records {
        match &record.host_identity {
            Some(identity) => println!("{} -> {} [{}]", record.raw, record.normalized(), identity),
            None => println!("{} -> {}", record.raw, record.normalized()),
        }
    }
    eprintln!("Normalized {} proxies from {:?}", records.len(), input);
    Ok(ExitCode::SUCCESS)
}

fn init_config(path: PathBuf) -> Result<ExitCode> {
    FileConfig::write_template(&path)?;
    println!("Wrote config template to {}", path.display());
    println!("Set spreadsheet_key and credentials_file, then run `proxy-sentinel check`.");
    Ok(ExitCode::SUCCESS)
}

fn print_error(err: &anyhow::Error) {
    eprintln!("error: {:#}", err);
    let hint = if let Some(setup) = err.downcast_ref::<SetupError>() {
        setup.hint()
    } else if let Some(store) = err.downcast_ref::<StoreError>() {
        store.hint()
    } else {
        None
    };
    if let Some(hint) = hint {
        eprintln!("hint: {}", hint);
    }
}
