use reqwest::StatusCode;
use thiserror::Error;

use crate::util::retriable_status;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The access key is missing or was rejected. Fatal to the whole run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The catalog refused the query parameters.
    #[error("invalid query: {0}")]
    Query(String),

    /// Transport failure or retriable status that outlived its retries.
    #[error("network error: {0}")]
    Network(String),

    /// A single product could not be fetched.
    #[error("download of {id} failed: {reason}")]
    Download { id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to decode reply from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_))
    }

    /// Errors that must stop the run instead of being recorded per item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Query(_) | Error::Config(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

// Token endpoint replies {"error":..,"error_description":..}; the data API uses
// {"message":..} or {"title":..,"detail":..}.
#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct ApiErrorResponse {
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) error_description: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
}

impl ApiErrorResponse {
    fn summary(&self, raw: &str) -> String {
        let parts: Vec<&str> = [
            self.error.as_deref(),
            self.error_description.as_deref(),
            self.title.as_deref(),
            self.message.as_deref(),
            self.detail.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect();

        if parts.is_empty() {
            raw.trim().chars().take(200).collect()
        } else {
            parts.join(": ")
        }
    }
}

/// Classifies a non-success reply into the error taxonomy.
pub(crate) fn format_api_error(status: StatusCode, url: &str, body: &str) -> Error {
    let parsed = serde_json::from_str::<ApiErrorResponse>(body).unwrap_or_default();
    let message = parsed.summary(body);

    let invalid_client = parsed.error.as_deref() == Some("invalid_client");
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN || invalid_client {
        return Error::Auth(format!(
            "the Data Store rejected the credentials (HTTP {}).\n- Check the consumer key and secret on the EUMETSAT API key page\n- The key may be given as `key:secret` or as the base64 basic credential\n\nServer message: {}\nrequest: {}",
            status.as_u16(),
            message,
            url
        ));
    }

    if status == StatusCode::NOT_FOUND {
        return Error::Query(format!(
            "not found (HTTP 404) for url ({}).\n- Check the collection or product identifier and the configured API url\n{}",
            url, message
        ));
    }

    if retriable_status(status.as_u16()) || status.is_server_error() {
        return Error::Network(format!(
            "HTTP {} for url ({}) {}",
            status.as_u16(),
            url,
            message
        ));
    }

    Error::Query(format!(
        "HTTP {} for url ({}) {}",
        status.as_u16(),
        url,
        message
    ))
}
