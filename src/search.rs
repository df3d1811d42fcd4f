//! Catalog search as a lazy, page-crossing iterator.

use serde::Deserialize;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use tracing::{debug, warn};

use crate::auth::Session;
use crate::error::Result;
use crate::query::Query;
use crate::util::sanitize_file_stem;

const SEARCH_PATH: &str = "data/search-products/os";

#[derive(Debug, Deserialize)]
struct SearchReply {
    #[serde(default)]
    properties: Option<ReplyProperties>,
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct ReplyProperties {
    #[serde(default, rename = "totalResults")]
    total_results: u64,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    properties: FeatureProperties,
}

#[derive(Debug, Default, Deserialize)]
struct FeatureProperties {
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default, rename = "parentIdentifier")]
    parent_identifier: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default, rename = "productInformation")]
    product_information: Option<ProductInformation>,
}

#[derive(Debug, Deserialize)]
struct ProductInformation {
    // Reported in kilobytes.
    #[serde(default)]
    size: Option<f64>,
}

/// A product found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductReference {
    /// Catalog identifier, unique within the Data Store.
    pub id: String,
    /// Parent collection, when the catalog reports it.
    pub collection: Option<String>,
    /// Approximate size from the catalog. Informational only.
    pub size_bytes: Option<u64>,
    /// Sensing interval as reported, e.g. `2021-01-05T00:00:00Z/2021-01-05T00:15:00Z`.
    pub sensing: Option<String>,
}

impl ProductReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            collection: None,
            size_bytes: None,
            sensing: None,
        }
    }

    /// Local file name; a pure function of the identifier.
    pub fn file_name(&self) -> String {
        format!("{}.zip", sanitize_file_stem(&self.id))
    }

    fn from_feature(feature: Feature) -> Option<Self> {
        let props = feature.properties;
        let id = props
            .identifier
            .or(feature.id)
            .filter(|id| !id.trim().is_empty())?;
        let size_bytes = props
            .product_information
            .and_then(|info| info.size)
            .filter(|kb| kb.is_finite() && *kb >= 0.0)
            .map(|kb| (kb * 1024.0).round() as u64);

        Some(Self {
            id,
            collection: props.parent_identifier,
            size_bytes,
            sensing: props.date,
        })
    }
}

/// Lazy sequence of [`ProductReference`]s matching a [`Query`].
///
/// Pages are requested on demand by start index. The iterator ends when the
/// reported total is reached or a page comes back empty; after an error it
/// yields nothing more.
#[derive(Debug)]
pub struct SearchPages {
    session: Session,
    query: Query,
    url: String,
    cursor: u64,
    total: Option<u64>,
    buffer: VecDeque<ProductReference>,
    done: bool,
}

/// Starts a search. No request is made until the first item is pulled.
pub fn search(session: &Session, query: Query) -> SearchPages {
    SearchPages {
        url: session.client().endpoint(SEARCH_PATH),
        session: session.clone(),
        query,
        cursor: 0,
        total: None,
        buffer: VecDeque::new(),
        done: false,
    }
}

impl SearchPages {
    /// Total reported by the catalog, known after the first page.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    fn fetch_page(&mut self) -> Result<()> {
        let params = self.query.params(self.cursor);
        let bearer = self.session.bearer()?.to_string();
        let reply: SearchReply = self
            .session
            .client()
            .get_json(&self.url, &params, Some(&bearer))?;

        let total = reply.properties.map(|p| p.total_results).unwrap_or(0);
        self.total = Some(total);

        let returned = reply.features.len() as u64;
        debug!(
            collection = self.query.collection(),
            start_index = self.cursor,
            returned,
            total,
            "catalog page"
        );
        if returned == 0 {
            self.done = true;
            return Ok(());
        }
        self.cursor += returned;

        for feature in reply.features {
            match ProductReference::from_feature(feature) {
                Some(product) => self.buffer.push_back(product),
                None => warn!("skipping catalog entry without an identifier"),
            }
        }
        Ok(())
    }
}

impl Iterator for SearchPages {
    type Item = Result<ProductReference>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(product) = self.buffer.pop_front() {
                return Some(Ok(product));
            }
            if self.done {
                return None;
            }
            if let Some(total) = self.total {
                if self.cursor >= total {
                    self.done = true;
                    return None;
                }
            }
            if let Err(err) = self.fetch_page() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

impl FusedIterator for SearchPages {}
