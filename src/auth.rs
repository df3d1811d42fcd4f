//! Access-key to bearer-token exchange.

use reqwest::blocking::RequestBuilder;
use reqwest::header::AUTHORIZATION;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::util::split_key_basic;

/// Tokens are renewed this long before the server says they expire, or at half
/// their lifetime when that is shorter.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, serde::Deserialize)]
struct TokenReply {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
pub struct Token {
    value: String,
    issued: Instant,
    lifetime: Option<Duration>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("issued", &self.issued)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl Token {
    pub fn secret(&self) -> &str {
        &self.value
    }

    /// Server-reported lifetime, if the token endpoint sent one.
    pub fn lifetime(&self) -> Option<Duration> {
        self.lifetime
    }

    fn is_stale(&self, refresh: Duration) -> bool {
        self.stale_at_age(self.issued.elapsed(), refresh)
    }

    fn stale_at_age(&self, age: Duration, refresh: Duration) -> bool {
        let limit = match self.lifetime {
            Some(lifetime) => refresh.min(lifetime - EXPIRY_MARGIN.min(lifetime / 2)),
            None => refresh,
        };
        age >= limit
    }
}

/// An authenticated client: everything needed to issue catalog and download requests.
///
/// Cheap to clone; each download worker owns its own copy and renews its token
/// independently.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    token: Token,
}

impl Session {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Current bearer token, renewed first if it is older than the refresh interval.
    pub fn bearer(&mut self) -> Result<&str> {
        if self.token.is_stale(self.client.token_refresh()) {
            info!("access token is stale, requesting a new one");
            self.refresh()?;
        }
        Ok(self.token.secret())
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.token = request_token(&self.client)?;
        Ok(())
    }
}

pub(crate) fn authenticate(client: &Client) -> Result<Session> {
    let token = request_token(client)?;
    info!("retrieved access token from the Data Store");
    Ok(Session {
        client: client.clone(),
        token,
    })
}

fn request_token(client: &Client) -> Result<Token> {
    let key = client
        .key()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            Error::Auth(
                "no access key supplied. Pass --access-key, set the EUM_ACCESS_KEY environment variable or add `key:` to .eumdsrc"
                    .to_string(),
            )
        })?;

    let url = client.endpoint("token");
    let resp = client.robust_request(|| {
        apply_basic(client.http().post(&url), key)
            .form(&[("grant_type", "client_credentials")])
            .timeout(client.request_timeout())
    })?;

    // Any rejection of the token request is a credential problem, whatever the status.
    let reply: TokenReply = client.read_json(resp, &url).map_err(|e| match e {
        Error::Query(msg) => Error::Auth(msg),
        other => other,
    })?;

    if reply.access_token.trim().is_empty() {
        return Err(Error::Auth("token endpoint returned an empty token".to_string()));
    }
    debug!(expires_in = ?reply.expires_in, "token issued");

    Ok(Token {
        value: reply.access_token,
        issued: Instant::now(),
        lifetime: reply.expires_in.map(Duration::from_secs),
    })
}

fn apply_basic(req: RequestBuilder, key: &str) -> RequestBuilder {
    if let Some((consumer_key, secret)) = split_key_basic(key) {
        req.basic_auth(consumer_key, Some(secret))
    } else {
        req.header(AUTHORIZATION, format!("Basic {}", key))
    }
}
