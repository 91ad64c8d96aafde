//! Minimal HTTP/1.x head parsing for the opening handshake.
//!
//! This is not a general HTTP implementation. It tokenizes exactly one
//! request (or response) head: a start line followed by header lines,
//! terminated by an empty line. Bodies, chunked transfer, and header
//! folding are out of scope; the WebSocket upgrade never needs them.
//!
//! Header names are folded to lowercase at parse time and a repeated
//! header keeps the last value seen. The upgrade checks only ever ask
//! whether a value mentions a word, so value matching is a
//! case-insensitive substring test ([`Request::header_contains`]):
//! `Connection: keep-alive, Upgrade` and `Connection: keep-alive-upgrade`
//! both count as requesting an upgrade.

use std::collections::HashMap;

use thiserror::Error;

/// Errors from tokenizing an HTTP head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HttpError {
    /// The head was not valid UTF-8.
    #[error("head is not valid UTF-8")]
    NotUtf8,

    /// The head contained no start line.
    #[error("empty head")]
    Empty,

    /// The request line did not have `METHOD TARGET VERSION` shape.
    #[error("malformed request line")]
    BadRequestLine,

    /// The status line did not have `VERSION CODE [REASON]` shape.
    #[error("malformed status line")]
    BadStatusLine,

    /// A header line was missing its `:` separator.
    #[error("malformed header line")]
    BadHeader,
}

fn parse_headers<'a>(
    lines: impl Iterator<Item = &'a str>,
) -> Result<HashMap<String, String>, HttpError> {
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or(HttpError::BadHeader)?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
    Ok(headers)
}

fn header_contains(headers: &HashMap<String, String>, name: &str, needle: &str) -> bool {
    headers
        .get(name)
        .map(|value| value.to_ascii_lowercase().contains(needle))
        .unwrap_or(false)
}

/// A parsed HTTP request head.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method, as sent (case preserved).
    pub method: String,
    /// Request target, usually an origin-form path.
    pub target: String,
    /// Protocol version string, e.g. `HTTP/1.1`.
    pub version: String,
    headers: HashMap<String, String>,
}

impl Request {
    /// Parses a request head from bytes.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpError`] describing the first malformed line.
    pub fn parse(data: &[u8]) -> Result<Self, HttpError> {
        let text = std::str::from_utf8(data).map_err(|_| HttpError::NotUtf8)?;
        let mut lines = text.lines();

        let request_line = lines.next().ok_or(HttpError::Empty)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(HttpError::BadRequestLine)?.to_string();
        let target = parts.next().ok_or(HttpError::BadRequestLine)?.to_string();
        let version = parts.next().ok_or(HttpError::BadRequestLine)?.to_string();
        if parts.next().is_some() {
            return Err(HttpError::BadRequestLine);
        }

        let headers = parse_headers(lines)?;
        Ok(Self {
            method,
            target,
            version,
            headers,
        })
    }

    /// Gets a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns `true` when the named header exists and its value
    /// contains `needle`, compared case-insensitively. This is a plain
    /// substring test, not token-list membership: `my-websocket`
    /// contains `websocket`.
    #[must_use]
    pub fn header_contains(&self, name: &str, needle: &str) -> bool {
        header_contains(
            &self.headers,
            &name.to_ascii_lowercase(),
            &needle.to_ascii_lowercase(),
        )
    }

    /// Returns `true` when the version string is `HTTP/major.minor`
    /// with a version at or above the given one. Unparseable versions
    /// compare as below everything.
    #[must_use]
    pub fn version_at_least(&self, major: u32, minor: u32) -> bool {
        let Some(rest) = self.version.strip_prefix("HTTP/") else {
            return false;
        };
        let Some((maj, min)) = rest.split_once('.') else {
            return false;
        };
        match (maj.parse::<u32>(), min.parse::<u32>()) {
            (Ok(maj), Ok(min)) => (maj, min) >= (major, minor),
            _ => false,
        }
    }
}

/// A parsed HTTP response head.
#[derive(Debug, Clone)]
pub struct Response {
    /// Numeric status code.
    pub status: u16,
    /// Reason phrase, possibly empty.
    pub reason: String,
    headers: HashMap<String, String>,
}

impl Response {
    /// Parses a response head from bytes.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpError`] describing the first malformed line.
    pub fn parse(data: &[u8]) -> Result<Self, HttpError> {
        let text = std::str::from_utf8(data).map_err(|_| HttpError::NotUtf8)?;
        let mut lines = text.lines();

        let status_line = lines.next().ok_or(HttpError::Empty)?;
        let mut parts = status_line.splitn(3, ' ');
        let _version = parts.next().ok_or(HttpError::BadStatusLine)?;
        let status: u16 = parts
            .next()
            .ok_or(HttpError::BadStatusLine)?
            .parse()
            .map_err(|_| HttpError::BadStatusLine)?;
        let reason = parts.next().unwrap_or("").to_string();

        let headers = parse_headers(lines)?;
        Ok(Self {
            status,
            reason,
            headers,
        })
    }

    /// Gets a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns `true` when the named header exists and its value
    /// contains `needle`, compared case-insensitively. This is a plain
    /// substring test, not token-list membership: `my-websocket`
    /// contains `websocket`.
    #[must_use]
    pub fn header_contains(&self, name: &str, needle: &str) -> bool {
        header_contains(
            &self.headers,
            &name.to_ascii_lowercase(),
            &needle.to_ascii_lowercase(),
        )
    }
}
