use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use clip_harvest::batch::{BatchCoordinator, BatchResult};
use clip_harvest::blob::{BlobStore, HttpBlobStore};
use clip_harvest::catalog::{PgCatalog, resolve_keys};
use clip_harvest::config::{BlobSource, ConfigLoader, Overrides};
use clip_harvest::domain::{MarkerPolicy, ObjectKey, RecordFilters, TimeWindow};
use clip_harvest::error::{ErrorKind, HarvestError};
use clip_harvest::guard::{CancelToken, ConcurrencyGuard};
use clip_harvest::output::{ConsoleOutput, JsonOutput, OutputMode};
use clip_harvest::s3::S3BlobStore;
use clip_harvest::store::TargetDir;

#[derive(Parser)]
#[command(name = "clip-harvest")]
#[command(about = "Download catalogued recordings from a blob store into a local directory")]
#[command(version)]
struct Cli {
    /// Start of the recording window, e.g. '2022-05-22 21:30:00'
    #[arg(long)]
    from: String,

    /// End of the recording window (inclusive)
    #[arg(long)]
    to: String,

    #[arg(long)]
    bucket: Option<String>,

    /// Directory to save to
    #[arg(long)]
    path: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(long)]
    dbname: Option<String>,

    /// Only recordings of this customer (0 = all)
    #[arg(long, alias = "customer_id", default_value_t = 0)]
    customer_id: i64,

    /// Only recordings of this device (0 = all)
    #[arg(long, alias = "device_id", default_value_t = 0)]
    device_id: i64,

    #[arg(long)]
    config: Option<String>,

    /// Maximum number of downloads in flight
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    region: Option<String>,

    /// Fetch with unsigned GETs under this base URL instead of signed S3 requests
    #[arg(long)]
    endpoint: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Stop admitting and abort transfers after this many seconds
    #[arg(long)]
    batch_timeout: Option<u64>,

    #[arg(long, value_enum)]
    marker_policy: Option<MarkerPolicy>,

    /// Resolve and print keys without downloading
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    non_interactive: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(3),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<HarvestError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error.kind() {
        ErrorKind::Resolution => 2,
        ErrorKind::LocalIo | ErrorKind::RemoteFetch | ErrorKind::Cancelled | ErrorKind::Config => 1,
    }
}

/// `Ok(false)` means the batch ran but some objects were not retrieved.
fn run() -> miette::Result<bool> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let started = Instant::now();
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let window = TimeWindow::parse(&cli.from, &cli.to)?;
    let filters = RecordFilters::from_flags(cli.customer_id, cli.device_id);
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let settings = ConfigLoader::resolve_settings(
        config,
        Overrides {
            host: cli.host,
            port: cli.port,
            user: cli.user,
            password: cli.password,
            dbname: cli.dbname,
            bucket: cli.bucket,
            region: cli.region,
            endpoint: cli.endpoint,
            target_dir: cli.path,
            concurrency: cli.concurrency,
            request_timeout_secs: cli.request_timeout,
            batch_timeout_secs: cli.batch_timeout,
            marker_policy: cli.marker_policy,
        },
    )?;

    let keys = {
        let catalog = PgCatalog::connect(&settings.database)?;
        resolve_keys(&catalog, &settings.key_resolver(), &window, &filters)?
    };

    if cli.dry_run {
        match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_keys(&keys).into_diagnostic()?,
            OutputMode::Interactive => ConsoleOutput::print_keys(&keys).into_diagnostic()?,
        }
        return Ok(true);
    }

    let cancel = settings
        .batch_timeout
        .map(CancelToken::with_timeout)
        .unwrap_or_default();
    let target = TargetDir::new(settings.target_dir.clone());
    let guard = ConcurrencyGuard::new(settings.concurrency)?;

    let result = match settings.blob_source() {
        BlobSource::S3 { bucket, region } => {
            let store = S3BlobStore::connect(&bucket, &region, settings.request_timeout)?;
            harvest(store, target, cancel, &guard, &keys, output_mode)?
        }
        BlobSource::Http { base_url } => {
            let store = HttpBlobStore::new(&base_url, settings.request_timeout)?;
            harvest(store, target, cancel, &guard, &keys, output_mode)?
        }
    };
    tracing::debug!(
        total_secs = started.elapsed().as_secs_f64(),
        "run finished"
    );
    Ok(result.is_complete())
}

fn harvest<B: BlobStore>(
    store: B,
    target: TargetDir,
    cancel: CancelToken,
    guard: &ConcurrencyGuard,
    keys: &[ObjectKey],
    output_mode: OutputMode,
) -> miette::Result<BatchResult> {
    let coordinator = BatchCoordinator::with_cancel(store, target, cancel);
    let result = match output_mode {
        OutputMode::NonInteractive => {
            let result = coordinator.run(keys, guard, &JsonOutput)?;
            JsonOutput::print_batch(&result).into_diagnostic()?;
            result
        }
        OutputMode::Interactive => {
            println!("downloading {} files", keys.len());
            let result = coordinator.run(keys, guard, &ConsoleOutput)?;
            ConsoleOutput::print_summary(&result);
            result
        }
    };
    Ok(result)
}
