use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use eumds::{
    BoundingBox, Client, DEFAULT_COLLECTION, DownloadOptions, MAX_WORKERS, Query, RetryPolicy,
    parse_datetime, search,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Search for data on the EUMETSAT Data Store and download it.
///
/// The access key can also come from the EUM_ACCESS_KEY environment variable or
/// a `key:` line in .eumdsrc.
#[derive(Debug, Parser)]
#[command(name = "search-download", version, about, long_about = None)]
struct Cli {
    /// EUMETSAT access key, `consumer_key:consumer_secret` or the base64 credential.
    #[arg(long)]
    access_key: Option<String>,

    /// Root of the Data Store API [default: EUM_API_URL or https://api.eumetsat.int/].
    #[arg(long)]
    api_url: Option<String>,

    /// Start of the sensing window: YYYYMMDD, YYYYMMDDHHMM or RFC 3339 (UTC).
    #[arg(long, required_unless_present = "list_collections")]
    start: Option<String>,

    /// End of the sensing window, same formats as --start.
    #[arg(long, required_unless_present = "list_collections")]
    end: Option<String>,

    /// Collection to search.
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    collection: String,

    /// Directory the products are saved into.
    #[arg(long, short, default_value = ".")]
    output: PathBuf,

    #[arg(long, allow_negative_numbers = true)]
    min_lon: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    min_lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    max_lon: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    max_lat: Option<f64>,

    /// Simultaneous downloads.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=MAX_WORKERS as i64))]
    workers: u8,

    /// Retries per request after the first attempt.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Seconds a download may go without receiving data before it is retried.
    #[arg(long, default_value_t = 120, value_parser = clap::value_parser!(u64).range(1..))]
    stall_timeout: u64,

    /// Delete and report downloads smaller than this many bytes.
    #[arg(long)]
    min_file_size: Option<u64>,

    /// Print matching product identifiers without downloading.
    #[arg(long)]
    search_only: bool,

    /// Print available collections and exit.
    #[arg(long, conflicts_with = "search_only")]
    list_collections: bool,

    /// Hide progress bars.
    #[arg(long)]
    no_progress: bool,

    /// More logging (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match execute(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// `Ok(false)` when at least one product failed.
fn execute(cli: Cli) -> Result<bool> {
    let retry = RetryPolicy {
        max_retries: cli.retries,
        ..RetryPolicy::default()
    };
    let client = Client::new(cli.api_url.clone(), cli.access_key.clone())?
        .with_retry(retry)
        .with_stall_timeout(Duration::from_secs(cli.stall_timeout))
        .with_progress(!cli.no_progress);

    if cli.list_collections {
        for (id, summary) in client.collections()? {
            println!("{}: {}", id, summary.trim());
        }
        return Ok(true);
    }

    let query = build_query(&cli)?;

    if cli.search_only {
        let session = client.authenticate()?;
        let mut count = 0usize;
        for product in search(&session, query) {
            println!("{}", product?.id);
            count += 1;
        }
        info!("a total of {} product(s) have been found", count);
        return Ok(true);
    }

    let mut options = DownloadOptions::new(&cli.output).with_workers(usize::from(cli.workers));
    if let Some(min) = cli.min_file_size {
        options = options.with_min_file_size(min);
    }

    let report = eumds::run(&client, query, &options)?;
    info!("{}", report);
    if !report.is_success() {
        error!("{} product(s) failed", report.failed());
    }
    Ok(report.is_success())
}

fn build_query(cli: &Cli) -> Result<Query> {
    // clap enforces both unless --list-collections, which returned earlier.
    let start = cli.start.as_deref().context("--start is required")?;
    let end = cli.end.as_deref().context("--end is required")?;

    let mut query = Query::new(
        cli.collection.as_str(),
        parse_datetime(start).context("invalid --start")?,
        parse_datetime(end).context("invalid --end")?,
    )?;
    if let Some(bbox) = BoundingBox::from_parts(cli.min_lon, cli.min_lat, cli.max_lon, cli.max_lat)? {
        query = query.with_bbox(bbox);
    }
    Ok(query)
}
