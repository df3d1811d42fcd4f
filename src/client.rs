use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{self, Session};
use crate::collections;
use crate::config::load_config;
use crate::error::{Error, Result, format_api_error};
use crate::util::{backoff, retriable_status, urljoin};

/// Root of the EUMETSAT Data Store API.
pub const DEFAULT_API_URL: &str = "https://api.eumetsat.int/";

#[derive(Clone)]
pub struct ClientConfig {
    /// API root, typically `https://api.eumetsat.int/`.
    pub url: String,
    /// Access key.
    ///
    /// Supported formats:
    /// - `<CONSUMER_KEY>:<CONSUMER_SECRET>`
    /// - the base64 basic credential shown on the EUMETSAT API key page
    pub key: Option<String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Bounded exponential backoff used for every remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }
}

#[derive(Clone)]
pub struct Client {
    url: String,
    key: Option<String>,

    timeout: Duration,
    stall_timeout: Duration,
    retry: RetryPolicy,
    token_refresh: Duration,
    progress: bool,

    http: HttpClient,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("stall_timeout", &self.stall_timeout)
            .field("retry", &self.retry)
            .field("token_refresh", &self.token_refresh)
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client from `EUM_API_URL` / `EUM_ACCESS_KEY` and/or `.eumdsrc`.
    ///
    /// This is equivalent to `Client::new(None, None)`.
    pub fn from_env() -> Result<Self> {
        Self::new(None, None)
    }

    /// Creates a client using (in order of precedence):
    /// - explicit `url`/`key` arguments
    /// - environment variables `EUM_API_URL` / `EUM_ACCESS_KEY`
    /// - config file from `EUMDS_RC` or `.eumdsrc`
    pub fn new(url: Option<String>, key: Option<String>) -> Result<Self> {
        Self::with_config(load_config(url, key)?)
    }

    pub fn with_config(cfg: ClientConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("eumds/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("eumds")),
        );

        // Product downloads can run for a long time, so no client-wide deadline. API
        // calls get a per-request timeout and downloads a per-read stall timeout.
        let http = HttpClient::builder()
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        let url = cfg.url.trim().to_string();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "API url must start with http:// or https://, got `{}`",
                url
            )));
        }

        Ok(Self {
            url,
            key: cfg.key,
            timeout: Duration::from_secs(60),
            stall_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            token_refresh: Duration::from_secs(20 * 60),
            progress: true,
            http,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// How long a download may wait for its reply or for the next chunk of body
    /// before the attempt is abandoned and retried.
    pub fn with_stall_timeout(mut self, stall: Duration) -> Self {
        self.stall_timeout = stall;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Maximum token age before it is requested again.
    pub fn with_token_refresh(mut self, refresh: Duration) -> Self {
        self.token_refresh = refresh;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    pub fn progress(&self) -> bool {
        self.progress
    }

    pub(crate) fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub(crate) fn token_refresh(&self) -> Duration {
        self.token_refresh
    }

    pub(crate) fn http(&self) -> &HttpClient {
        &self.http
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        urljoin(&self.url, path)
    }

    /// Exchanges the access key for a bearer token.
    pub fn authenticate(&self) -> Result<Session> {
        auth::authenticate(self)
    }

    /// Lists the collections offered by the Data Store as `id -> abstract`.
    pub fn collections(&self) -> Result<BTreeMap<String, String>> {
        collections::list_collections(self)
    }

    pub(crate) fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        bearer: Option<&str>,
    ) -> Result<T> {
        let resp = self.robust_request(|| {
            let mut req = self.http.get(url).query(query).timeout(self.timeout);
            if let Some(token) = bearer {
                req = req.bearer_auth(token);
            }
            req
        })?;
        self.read_json(resp, url)
    }

    pub(crate) fn read_json<T: DeserializeOwned>(&self, resp: Response, url: &str) -> Result<T> {
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(format_api_error(status, url, &text));
        }

        serde_json::from_str::<T>(&text).map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn stall_timeout(&self) -> Duration {
        self.stall_timeout
    }

    /// Sends the request built by `build`, retrying transport failures and
    /// retriable statuses with exponential backoff.
    ///
    /// The last reply is returned as-is once retries run out, so callers still see
    /// the server's error body.
    pub(crate) fn robust_request<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut tries = 0u32;
        let mut sleep = self.retry.initial_backoff;
        loop {
            match build().send() {
                Ok(resp) => {
                    let status = resp.status();
                    if retriable_status(status.as_u16()) && tries < self.retry.max_retries {
                        tries += 1;
                        warn!(
                            url = %resp.url(),
                            status = status.as_u16(),
                            attempt = tries,
                            "retriable reply, backing off for {:?}",
                            sleep
                        );
                        thread::sleep(sleep);
                        sleep = backoff(sleep, self.retry.max_backoff);
                        continue;
                    }
                    debug!(url = %resp.url(), status = status.as_u16(), "reply");
                    return Ok(resp);
                }
                Err(err) => {
                    if tries >= self.retry.max_retries {
                        return Err(Error::Network(format!("could not connect: {}", err)));
                    }
                    tries += 1;
                    warn!(attempt = tries, "request failed: {}, backing off for {:?}", err, sleep);
                    thread::sleep(sleep);
                    sleep = backoff(sleep, self.retry.max_backoff);
                }
            }
        }
    }
}
