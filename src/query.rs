//! Validated catalog queries.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{Error, Result};

/// IASI Level 1C, the collection the command line searches when none is given.
pub const DEFAULT_COLLECTION: &str = "EO:EUM:DAT:METOP:IASIL1C-ALL";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Geographic search box in degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    min_lon: f64,
    min_lat: f64,
    max_lon: f64,
    max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self> {
        let lon_ok = |v: f64| (-180.0..=180.0).contains(&v);
        let lat_ok = |v: f64| (-90.0..=90.0).contains(&v);

        if !(lon_ok(min_lon) && lon_ok(max_lon)) {
            return Err(Error::Query(format!(
                "longitudes must lie in [-180, 180], got {} and {}",
                min_lon, max_lon
            )));
        }
        if !(lat_ok(min_lat) && lat_ok(max_lat)) {
            return Err(Error::Query(format!(
                "latitudes must lie in [-90, 90], got {} and {}",
                min_lat, max_lat
            )));
        }
        if min_lon > max_lon || min_lat > max_lat {
            return Err(Error::Query(format!(
                "bounding box minimum ({}, {}) exceeds maximum ({}, {})",
                min_lon, min_lat, max_lon, max_lat
            )));
        }

        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Builds a box from optional edges: all four or none.
    pub fn from_parts(
        min_lon: Option<f64>,
        min_lat: Option<f64>,
        max_lon: Option<f64>,
        max_lat: Option<f64>,
    ) -> Result<Option<Self>> {
        match (min_lon, min_lat, max_lon, max_lat) {
            (None, None, None, None) => Ok(None),
            (Some(a), Some(b), Some(c), Some(d)) => Self::new(a, b, c, d).map(Some),
            _ => Err(Error::Query(
                "a bounding box needs all of min_lon, min_lat, max_lon and max_lat".to_string(),
            )),
        }
    }

    pub(crate) fn to_param(self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

/// A search over one collection and sensing-time window.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    bbox: Option<BoundingBox>,
    page_size: Option<u32>,
}

impl Query {
    pub fn new(
        collection: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        let collection = collection.into().trim().to_string();
        if collection.is_empty() {
            return Err(Error::Query("collection identifier is empty".to_string()));
        }
        if start > end {
            return Err(Error::Query(format!(
                "start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }

        Ok(Self {
            collection,
            start,
            end,
            bbox: None,
            page_size: None,
        })
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Items requested per catalog page. The server's default applies otherwise.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.bbox
    }

    pub(crate) fn params(&self, start_index: u64) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("format", "json".to_string()),
            ("pi", self.collection.clone()),
            ("dtstart", self.start.format(TIMESTAMP_FORMAT).to_string()),
            ("dtend", self.end.format(TIMESTAMP_FORMAT).to_string()),
        ];
        if let Some(bbox) = self.bbox {
            params.push(("bbox", bbox.to_param()));
        }
        if let Some(c) = self.page_size {
            params.push(("c", c.to_string()));
        }
        params.push(("si", start_index.to_string()));
        params
    }
}

/// Parses `YYYYMMDD`, `YYYYMMDDHHMM` or an RFC 3339 timestamp as UTC.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    let digits = s.chars().all(|c| c.is_ascii_digit());

    let parsed = match s.len() {
        12 if digits => NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M")
            .ok()
            .map(|dt| dt.and_utc()),
        8 if digits => NaiveDate::parse_from_str(s, "%Y%m%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc()),
        _ => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
    };

    parsed.ok_or_else(|| {
        Error::Query(format!(
            "`{}` is not a date; use YYYYMMDD, YYYYMMDDHHMM or RFC 3339",
            s
        ))
    })
}
