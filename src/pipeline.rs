//! authenticate -> search -> download, with an optional bounded worker pool.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::{error, info, warn};

use crate::auth::Session;
use crate::client::Client;
use crate::download::{DownloadOptions, DownloadResult, DownloadStatus, fetch_product};
use crate::error::{Error, Result};
use crate::query::Query;
use crate::search::{ProductReference, search};

/// Upper bound on simultaneous downloads.
pub const MAX_WORKERS: usize = 8;

/// Outcome of a run, one entry per product in search order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub results: Vec<DownloadResult>,
}

impl RunReport {
    pub fn downloaded(&self) -> usize {
        self.count(|s| matches!(s, DownloadStatus::Downloaded { .. }))
    }

    pub fn already_present(&self) -> usize {
        self.count(|s| matches!(s, DownloadStatus::AlreadyPresent))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DownloadStatus::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &DownloadResult> {
        self.results.iter().filter(|r| r.is_failure())
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, f: impl Fn(&DownloadStatus) -> bool) -> usize {
        self.results.iter().filter(|r| f(&r.status)).count()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} product(s): {} downloaded, {} already present, {} failed",
            self.results.len(),
            self.downloaded(),
            self.already_present(),
            self.failed()
        )?;
        for result in self.failures() {
            if let DownloadStatus::Failed(reason) = &result.status {
                write!(f, "\n  {}: {}", result.product_id, reason)?;
            }
        }
        Ok(())
    }
}

/// Authenticates, collects every match for `query`, then downloads them.
///
/// Fails only on fatal errors (credentials, query, configuration, output
/// directory); per-item failures are in the report.
pub fn run(client: &Client, query: Query, options: &DownloadOptions) -> Result<RunReport> {
    let session = client.authenticate()?;
    let products = search(&session, query).collect::<Result<Vec<_>>>()?;
    info!("a total of {} product(s) have been found", products.len());
    download_all(&session, products, options)
}

/// Downloads `products` with up to `options.workers` threads.
///
/// Products that map onto the same local file are fetched once, for the first
/// occurrence in search order.
pub fn download_all(
    session: &Session,
    products: Vec<ProductReference>,
    options: &DownloadOptions,
) -> Result<RunReport> {
    fs::create_dir_all(&options.output_dir)?;
    let products = unique_targets(products);
    if products.is_empty() {
        return Ok(RunReport::default());
    }

    let total = products.len();
    let workers = options.workers.clamp(1, MAX_WORKERS).min(total);
    let progress = Progress::new(session.client().progress(), total as u64);

    let queue = Mutex::new(products.into_iter().enumerate());
    let results: Mutex<Vec<(usize, DownloadResult)>> = Mutex::new(Vec::with_capacity(total));
    let abort = AtomicBool::new(false);
    let fatal: Mutex<Option<Error>> = Mutex::new(None);

    thread::scope(|scope| {
        for _ in 0..workers {
            let mut session = session.clone();
            let (queue, results, abort, fatal, progress) =
                (&queue, &results, &abort, &fatal, &progress);
            scope.spawn(move || {
                while !abort.load(Ordering::SeqCst) {
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                    let Some((index, product)) = next else { break };

                    let bar = progress.item(&product.id);
                    let outcome = fetch_product(&mut session, &product, options, bar.as_ref());
                    if let Some(bar) = bar {
                        bar.finish_and_clear();
                    }

                    match outcome {
                        Ok(result) => {
                            results
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push((index, result));
                            progress.overall.inc(1);
                        }
                        Err(err) => {
                            error!(product = %product.id, "stopping all downloads: {}", err);
                            abort.store(true, Ordering::SeqCst);
                            fatal
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get_or_insert(err);
                        }
                    }
                }
            });
        }
    });
    progress.overall.finish_and_clear();

    if let Some(err) = fatal.into_inner().unwrap_or_else(PoisonError::into_inner) {
        return Err(err);
    }

    let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    results.sort_by_key(|(index, _)| *index);
    Ok(RunReport {
        results: results.into_iter().map(|(_, r)| r).collect(),
    })
}

fn unique_targets(products: Vec<ProductReference>) -> Vec<ProductReference> {
    let mut seen = HashSet::new();
    products
        .into_iter()
        .filter(|product| {
            let fresh = seen.insert(product.file_name());
            if !fresh {
                warn!(product = %product.id, "same local file as an earlier product, skipping");
            }
            fresh
        })
        .collect()
}

struct Progress {
    multi: Option<MultiProgress>,
    overall: ProgressBar,
}

impl Progress {
    fn new(enabled: bool, total: u64) -> Self {
        if !enabled {
            return Self {
                multi: None,
                overall: ProgressBar::hidden(),
            };
        }

        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());
        let overall = multi.add(ProgressBar::new(total));
        overall.set_style(
            ProgressStyle::with_template("{prefix:>10} [{bar:30}] {pos}/{len} products ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        overall.set_prefix("total");
        Self {
            multi: Some(multi),
            overall,
        }
    }

    fn item(&self, id: &str) -> Option<ProgressBar> {
        let multi = self.multi.as_ref()?;
        let pb = multi.add(ProgressBar::new(0));
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} {msg} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        pb.set_message(id.to_string());
        Some(pb)
    }
}
