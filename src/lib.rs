//! A small Rust client for the EUMETSAT Data Store.
//!
//! This crate implements a search-and-download flow:
//! exchange an access key for a token, search the catalog for one collection and
//! time window, then download every matching product into a directory.
//!
//! ## Quick start
//! - Configure authentication via environment variables (`EUM_ACCESS_KEY`, optionally
//!   `EUM_API_URL`) or a `.eumdsrc` file (supported in the current directory and in
//!   your home directory).
//! - Build a [`Query`] and hand it to [`run`].
//!
//! ```no_run
//! use eumds::{Client, DownloadOptions, Query, parse_datetime};
//!
//! fn main() -> eumds::Result<()> {
//!     let client = Client::from_env()?;
//!     let query = Query::new(
//!         "EO:EUM:DAT:MSG:MSG15-RSS",
//!         parse_datetime("202101050000")?,
//!         parse_datetime("202101051200")?,
//!     )?;
//!     let report = eumds::run(&client, query, &DownloadOptions::new("sat_data"))?;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```
//!
//! Downloads are idempotent: a product whose file already exists in the output
//! directory is skipped, and interrupted downloads resume from their `.part` file.

#![forbid(unsafe_code)]

mod auth;
mod client;
mod collections;
mod config;
mod download;
mod error;
mod pipeline;
mod query;
mod search;
mod util;

pub use auth::{Session, Token};
pub use client::{Client, ClientConfig, DEFAULT_API_URL, RetryPolicy};
pub use collections::list_collections;
pub use download::{DownloadOptions, DownloadResult, DownloadStatus, download_product, local_path};
pub use error::{Error, Result};
pub use pipeline::{MAX_WORKERS, RunReport, download_all, run};
pub use query::{BoundingBox, DEFAULT_COLLECTION, Query, parse_datetime};
pub use search::{ProductReference, SearchPages, search};
