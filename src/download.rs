//! Fetches products into the output directory.
//!
//! Bytes are streamed into `<name>.zip.part` and only renamed to `<name>.zip`
//! once the expected length has arrived, so a final file on disk is always
//! complete. Leftover part files are resumed with a `Range` request.

use indicatif::ProgressBar;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, RANGE};
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::Session;
use crate::client::Client;
use crate::error::{Error, Result, format_api_error};
use crate::search::ProductReference;
use crate::util::{backoff, content_range_start, content_range_total};

const DOWNLOAD_PATH: &str = "data/download/products/";
const PART_SUFFIX: &str = "part";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded { bytes: u64 },
    AlreadyPresent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub product_id: String,
    pub path: PathBuf,
    pub status: DownloadStatus,
}

impl DownloadResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, DownloadStatus::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub output_dir: PathBuf,
    /// Simultaneous downloads, 1 to [`MAX_WORKERS`](crate::MAX_WORKERS).
    pub workers: usize,
    /// Completed files smaller than this are deleted and reported as failed.
    /// Tiny payloads usually mean an error page was served instead of data.
    pub min_file_size: Option<u64>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            workers: 1,
            min_file_size: None,
        }
    }
}

impl DownloadOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_min_file_size(mut self, bytes: u64) -> Self {
        self.min_file_size = Some(bytes);
        self
    }
}

/// Where `product` is stored under `output_dir`.
pub fn local_path(output_dir: &Path, product: &ProductReference) -> PathBuf {
    output_dir.join(product.file_name())
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(".");
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

pub(crate) fn download_url(client: &Client, id: &str) -> Result<String> {
    let base = client.endpoint(DOWNLOAD_PATH);
    let mut url = Url::parse(&base)
        .map_err(|e| Error::Config(format!("invalid download url {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("download url {} cannot take a path", base)))?
        .pop_if_empty()
        .push(id);
    Ok(url.into())
}

/// Downloads one product unless a complete copy already exists.
///
/// Per-item problems are reported through [`DownloadStatus::Failed`]; only a
/// rejected credential comes back as `Err`, since it would fail every item.
pub fn download_product(
    session: &mut Session,
    product: &ProductReference,
    options: &DownloadOptions,
) -> Result<DownloadResult> {
    fetch_product(session, product, options, None)
}

pub(crate) fn fetch_product(
    session: &mut Session,
    product: &ProductReference,
    options: &DownloadOptions,
    progress: Option<&ProgressBar>,
) -> Result<DownloadResult> {
    let target = local_path(&options.output_dir, product);
    let result = |status| DownloadResult {
        product_id: product.id.clone(),
        path: target.clone(),
        status,
    };

    if target.exists() {
        info!(product = %product.id, path = %target.display(), "file exists, skipping");
        return Ok(result(DownloadStatus::AlreadyPresent));
    }

    match fetch_with_retries(session, product, &target, options, progress) {
        Ok(bytes) => {
            info!(product = %product.id, bytes, path = %target.display(), "downloaded");
            Ok(result(DownloadStatus::Downloaded { bytes }))
        }
        Err(err @ Error::Auth(_)) => Err(err),
        Err(err) => {
            let reason = match err {
                Error::Download { reason, .. } => reason,
                other => other.to_string(),
            };
            warn!(product = %product.id, "download failed: {}", reason);
            Ok(result(DownloadStatus::Failed(reason)))
        }
    }
}

fn fetch_with_retries(
    session: &mut Session,
    product: &ProductReference,
    target: &Path,
    options: &DownloadOptions,
    progress: Option<&ProgressBar>,
) -> Result<u64> {
    let url = download_url(session.client(), &product.id)?;
    let part = part_path(target);
    let policy = session.client().retry();

    let mut attempt = 0u32;
    let mut sleep = policy.initial_backoff;
    let mut refreshed = false;
    loop {
        let err = match fetch_once(session, &url, &part, progress) {
            Ok(()) => return finalize(product, &part, target, options.min_file_size),
            // A token can be revoked mid-run; renew it once before giving up.
            Err(Error::Auth(msg)) if !refreshed => {
                warn!(product = %product.id, "download rejected, renewing access token: {}", msg);
                refreshed = true;
                session.refresh()?;
                continue;
            }
            Err(err) if err.is_transient() => err,
            Err(err) => return Err(err),
        };

        if attempt >= policy.max_retries {
            return Err(Error::Download {
                id: product.id.clone(),
                reason: format!("gave up after {} attempt(s): {}", attempt + 1, err),
            });
        }
        attempt += 1;
        warn!(
            product = %product.id,
            attempt,
            "{}; retrying in {:?}",
            err,
            sleep
        );
        thread::sleep(sleep);
        sleep = backoff(sleep, policy.max_backoff);
    }
}

/// One request: resumes `part` if it has content and streams the body into it.
/// `Ok` means the expected length was reached.
fn fetch_once(
    session: &mut Session,
    url: &str,
    part: &Path,
    progress: Option<&ProgressBar>,
) -> Result<()> {
    let offset = fs::metadata(part).map(|m| m.len()).unwrap_or(0);
    let bearer = session.bearer()?.to_string();

    // Bounds the wait for the reply and for each body read.
    let mut req = session
        .client()
        .http()
        .get(url)
        .bearer_auth(bearer)
        .timeout(session.client().stall_timeout());
    if offset > 0 {
        debug!(part = %part.display(), offset, "resuming partial download");
        req = req.header(RANGE, format!("bytes={}-", offset));
    }
    let mut resp = req.send()?;

    let status = resp.status();
    let append = match status {
        StatusCode::PARTIAL_CONTENT => {
            let resumed_at = resp
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(content_range_start);
            if let Some(at) = resumed_at.filter(|&at| at != offset) {
                if offset > 0 {
                    fs::remove_file(part)?;
                }
                return Err(Error::Network(format!(
                    "server resumed at byte {} instead of {}, partial file discarded",
                    at, offset
                )));
            }
            true
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            fs::remove_file(part)?;
            return Err(Error::Network(
                "server refused to resume, partial file discarded".to_string(),
            ));
        }
        s if s.is_success() => false,
        s => {
            let body = resp.text().unwrap_or_default();
            return Err(format_api_error(s, url, &body));
        }
    };
    let start = if append { offset } else { 0 };

    let expected = resp
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(content_range_total)
        .or_else(|| resp.content_length().map(|len| len + start));

    let mut out = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(part)?;

    if let Some(pb) = progress {
        if let Some(total) = expected {
            pb.set_length(total);
        }
        pb.set_position(start);
    }

    let mut written = start;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match resp.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                out.flush()?;
                return Err(Error::Network(format!(
                    "download interrupted after {} byte(s): {}",
                    written, e
                )));
            }
        };
        out.write_all(&buf[..n])?;
        written += n as u64;
        if let Some(pb) = progress {
            pb.inc(n as u64);
        }
    }
    out.flush()?;

    match expected {
        Some(total) if written < total => Err(Error::Network(format!(
            "connection closed after {} of {} byte(s)",
            written, total
        ))),
        _ => Ok(()),
    }
}

fn finalize(
    product: &ProductReference,
    part: &Path,
    target: &Path,
    min_file_size: Option<u64>,
) -> Result<u64> {
    let size = fs::metadata(part)?.len();
    if let Some(min) = min_file_size {
        if size < min {
            fs::remove_file(part)?;
            return Err(Error::Download {
                id: product.id.clone(),
                reason: format!(
                    "bad file of {} byte(s), below the {} byte minimum; possible credential problem",
                    size, min
                ),
            });
        }
    }
    fs::rename(part, target)?;
    Ok(size)
}
