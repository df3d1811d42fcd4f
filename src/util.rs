use std::time::Duration;

pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

/// Doubles the delay, capped at `max`.
pub(crate) fn backoff(current: Duration, max: Duration) -> Duration {
    let next = current.saturating_mul(2);
    if next > max { max } else { next }
}

/// Splits `consumer_key:consumer_secret` into its two halves.
///
/// A pre-encoded basic credential never contains a colon, so `None` means the key
/// should be sent verbatim.
pub(crate) fn split_key_basic(key: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = key.splitn(2, ':').collect();
    if parts.len() == 2 && !parts[0].trim().is_empty() && !parts[1].trim().is_empty() {
        Some((parts[0].trim().to_string(), parts[1].trim().to_string()))
    } else {
        None
    }
}

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Maps a product identifier onto a file stem that is valid on every platform.
pub(crate) fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // "." and ".." would escape the output directory once joined.
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        format!("product{}", stem.replace('.', "_"))
    } else {
        stem
    }
}

/// Parses the total length out of a `Content-Range: bytes a-b/total` header value.
pub(crate) fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().rsplit_once('/')?;
    total.trim().parse().ok()
}

/// First byte position of a `Content-Range: bytes a-b/total` header value.
pub(crate) fn content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}
