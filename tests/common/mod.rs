//! Fake Data Store endpoints shared by the integration tests.
#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use eumds::{Client, ClientConfig, ProductReference, Query, RetryPolicy};
use mockito::{Matcher, Mock, Server};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const TOKEN: &str = "tok-123";
pub const COLLECTION: &str = "EO:EUM:DAT:MSG:HRSEVIRI";
/// base64("key:secret")
pub const BASIC: &str = "Basic a2V5OnNlY3JldA==";

pub fn client(server: &Server) -> Client {
    client_with_key(server, Some("key:secret"))
}

pub fn client_with_key(server: &Server, key: Option<&str>) -> Client {
    client_for(&server.url(), key)
}

pub fn client_for(url: &str, key: Option<&str>) -> Client {
    Client::with_config(ClientConfig {
        url: url.to_string(),
        key: key.map(str::to_string),
    })
    .unwrap()
    .with_retry(RetryPolicy::new(
        2,
        Duration::from_millis(1),
        Duration::from_millis(4),
    ))
    .with_progress(false)
}

pub fn query() -> Query {
    Query::new(
        COLLECTION,
        Utc.with_ymd_and_hms(2021, 1, 5, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2021, 1, 5, 12, 0, 0).unwrap(),
    )
    .unwrap()
}

pub fn mock_token(server: &mut Server) -> Mock {
    token_mock(server).create()
}

/// Token endpoint accepting `key:secret`, not yet registered.
pub fn token_mock(server: &mut Server) -> Mock {
    server
        .mock("POST", "/token")
        .match_header("authorization", BASIC)
        .match_body(Matcher::UrlEncoded(
            "grant_type".into(),
            "client_credentials".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"access_token":"{}","token_type":"Bearer","expires_in":3600}}"#,
            TOKEN
        ))
}

pub fn search_page(total: u64, ids: &[&str]) -> String {
    let features: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| {
            serde_json::json!({
                "type": "Feature",
                "id": id,
                "properties": {
                    "identifier": id,
                    "parentIdentifier": COLLECTION,
                    "date": "2021-01-05T00:00:09.000Z/2021-01-05T00:12:41.000Z",
                    "productInformation": { "size": 1.0 }
                }
            })
        })
        .collect();

    serde_json::json!({
        "type": "FeatureCollection",
        "properties": { "totalResults": total, "itemsPerPage": ids.len() },
        "features": features
    })
    .to_string()
}

pub fn mock_search_page(server: &mut Server, start_index: u64, total: u64, ids: &[&str]) -> Mock {
    search_page_mock(server, start_index, total, ids).create()
}

/// Catalog page for `start_index`, not yet registered.
pub fn search_page_mock(server: &mut Server, start_index: u64, total: u64, ids: &[&str]) -> Mock {
    server
        .mock("GET", "/data/search-products/os")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("pi".into(), COLLECTION.into()),
            Matcher::UrlEncoded("format".into(), "json".into()),
            Matcher::UrlEncoded("si".into(), start_index.to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(search_page(total, ids))
}

pub fn product_path(id: &str) -> String {
    format!("/data/download/products/{}", id)
}

pub fn mock_product(server: &mut Server, id: &str, body: &str) -> Mock {
    product_mock(server, id, body).create()
}

/// Successful download of `id`, not yet registered.
pub fn product_mock(server: &mut Server, id: &str, body: &str) -> Mock {
    server
        .mock("GET", product_path(id).as_str())
        .match_header("authorization", format!("Bearer {}", TOKEN).as_str())
        .with_status(200)
        .with_header("content-type", "application/zip")
        .with_body(body)
}

pub fn products(ids: &[&str]) -> Vec<ProductReference> {
    ids.iter().map(|id| ProductReference::new(*id)).collect()
}

/// One scripted reply of [`RawServer`], written byte for byte.
pub struct RawReply {
    bytes: Vec<u8>,
    hold: Duration,
}

impl RawReply {
    pub fn new(status: &str, headers: &[(&str, &str)], body: &str) -> Self {
        Self::truncated(status, headers, body, body.len())
    }

    /// Announces `declared` bytes of body but only sends `body`.
    pub fn truncated(status: &str, headers: &[(&str, &str)], body: &str, declared: usize) -> Self {
        let mut head = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
            status, declared
        );
        for (name, value) in headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("\r\n");
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(body.as_bytes());
        Self {
            bytes,
            hold: Duration::ZERO,
        }
    }

    pub fn token() -> Self {
        Self::new(
            "200 OK",
            &[("Content-Type", "application/json")],
            &format!(r#"{{"access_token":"{}","expires_in":3600}}"#, TOKEN),
        )
    }

    /// Keeps the socket open, silently, for `hold` after writing.
    pub fn held(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }
}

/// HTTP server that answers the n-th connection with the n-th scripted reply,
/// for transport failures a mock server cannot produce.
pub struct RawServer {
    pub url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl RawServer {
    pub fn start(replies: Vec<RawReply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&requests);
        thread::spawn(move || {
            for reply in replies {
                let Ok((stream, _)) = listener.accept() else { return };
                let log = Arc::clone(&log);
                thread::spawn(move || serve_raw(stream, reply, &log));
            }
        });

        Self { url, requests }
    }

    /// Request heads received so far, lower-cased.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve_raw(mut stream: TcpStream, reply: RawReply, log: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut head = String::new();
    let mut body_len = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
        let line = line.to_ascii_lowercase();
        if let Some(v) = line.strip_prefix("content-length:") {
            body_len = v.trim().parse().unwrap_or(0);
        }
        head.push_str(&line);
    }
    let mut body = vec![0u8; body_len];
    let _ = reader.read_exact(&mut body);
    log.lock().unwrap().push(head);

    let _ = stream.write_all(&reply.bytes);
    let _ = stream.flush();
    thread::sleep(reply.hold);
}
