use serde::Deserialize;
use std::collections::BTreeMap;

use crate::client::Client;
use crate::error::Result;

const NAVIGATOR_PATH: &str = "product-navigator/csw/record/_search";

#[derive(Debug, Deserialize)]
struct NavigatorReply {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: Record,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(default, rename = "abstract")]
    summary: Option<String>,
}

/// Every collection the product navigator knows about, keyed by identifier.
///
/// The navigator is public, so no token is needed.
pub fn list_collections(client: &Client) -> Result<BTreeMap<String, String>> {
    let url = client.endpoint(NAVIGATOR_PATH);
    let params = [
        ("_source_include", "id,abstract".to_string()),
        ("size", "500".to_string()),
    ];
    let reply: NavigatorReply = client.get_json(&url, &params, None)?;
    Ok(into_map(reply))
}

fn into_map(reply: NavigatorReply) -> BTreeMap<String, String> {
    reply
        .hits
        .hits
        .into_iter()
        .map(|hit| (hit.source.id, hit.source.summary.unwrap_or_default()))
        .collect()
}
