//! Opening handshake (RFC 6455 section 4).
//!
//! A client opens with an HTTP/1.1 GET carrying the upgrade headers
//! and a random base64 nonce:
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! The server answers with the nonce hashed into an accept token:
//!
//! ```http
//! HTTP/1.1 101 WebSocket Accept
//! Upgrade: WebSocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```
//!
//! [`ServerUpgrade`] validates requests in a fixed order so a bad
//! request always yields the same error; [`ClientUpgrade`] builds the
//! request and checks the response. The key is only required to be
//! present: the accept token is computed over whatever value the
//! client sent.

use base64::Engine;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::http::{HttpError, Request, Response};

/// Fixed GUID appended to the client key before hashing (RFC 6455
/// section 1.3).
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` token for a client key:
/// base64 of the SHA-1 of the key concatenated with the protocol GUID.
///
/// # Example
///
/// ```
/// use tidepool::ws::handshake::compute_accept_key;
///
/// let accept = compute_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Generates the random 16-byte nonce for a client handshake.
fn generate_client_key() -> String {
    let mut key = [0u8; 16];
    getrandom::getrandom(&mut key).expect("OS RNG unavailable");
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Reasons an opening handshake is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The request method was not GET.
    #[error("handshake method must be GET, got {0}")]
    WrongMethod(String),

    /// The request used an HTTP version below 1.1.
    #[error("incompatible HTTP version: {0}")]
    IncompatibleVersion(String),

    /// A required header was absent.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// The Upgrade header value did not mention websocket.
    #[error("Upgrade header does not request websocket")]
    InvalidUpgradeHeader,

    /// The Connection header value did not mention an upgrade.
    #[error("Connection header does not request an upgrade")]
    InvalidConnectionHeader,

    /// Sec-WebSocket-Version was present but not 13.
    #[error("incompatible WebSocket version: {0}")]
    IncompatibleWsVersion(String),

    /// Sec-WebSocket-Key was absent.
    #[error("no Sec-WebSocket-Key provided")]
    MissingKey,

    /// The head could not be tokenized as HTTP at all.
    #[error("malformed handshake request: {0}")]
    BadRequest(#[from] HttpError),

    /// The head grew past the configured limit without terminating.
    #[error("handshake head of {size} bytes exceeds limit of {max}")]
    RequestTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Client side: the server did not answer 101.
    #[error("expected status 101, got {0}")]
    WrongStatus(u16),

    /// Client side: the accept token did not match the sent key.
    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptMismatch {
        /// Token computed from the key we sent.
        expected: String,
        /// Token the server returned.
        actual: String,
    },
}

/// Server-side handshake validator.
///
/// Holds the subprotocols this server is willing to speak; an empty
/// list means none are ever negotiated.
#[derive(Debug, Clone, Default)]
pub struct ServerUpgrade {
    protocols: Vec<String>,
}

impl ServerUpgrade {
    /// Creates a validator with no supported subprotocols.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a supported subprotocol, in preference order.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Validates an upgrade request.
    ///
    /// Checks run in a fixed order: method, HTTP version, Upgrade
    /// header, Connection header, WebSocket version, key presence. The
    /// first failure wins, so a request that is wrong in several ways
    /// reports the earliest check.
    ///
    /// # Errors
    ///
    /// Returns the [`HandshakeError`] for the first failed check.
    pub fn validate(&self, request: &Request) -> Result<Accept, HandshakeError> {
        if request.method != "GET" {
            return Err(HandshakeError::WrongMethod(request.method.clone()));
        }

        if !request.version_at_least(1, 1) {
            return Err(HandshakeError::IncompatibleVersion(request.version.clone()));
        }

        if request.header("upgrade").is_none() {
            return Err(HandshakeError::MissingHeader("Upgrade"));
        }
        if !request.header_contains("upgrade", "websocket") {
            return Err(HandshakeError::InvalidUpgradeHeader);
        }

        if request.header("connection").is_none() {
            return Err(HandshakeError::MissingHeader("Connection"));
        }
        if !request.header_contains("connection", "upgrade") {
            return Err(HandshakeError::InvalidConnectionHeader);
        }

        let version = request
            .header("sec-websocket-version")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Version"))?;
        if version != "13" {
            return Err(HandshakeError::IncompatibleWsVersion(version.to_string()));
        }

        let client_key = request
            .header("sec-websocket-key")
            .ok_or(HandshakeError::MissingKey)?;

        let protocol = request.header("sec-websocket-protocol").and_then(|requested| {
            let requested: Vec<&str> = requested.split(',').map(str::trim).collect();
            self.protocols
                .iter()
                .find(|p| requested.contains(&p.as_str()))
                .cloned()
        });

        Ok(Accept {
            accept_key: compute_accept_key(client_key),
            protocol,
        })
    }
}

/// A validated upgrade, ready to answer.
#[derive(Debug, Clone)]
pub struct Accept {
    /// Computed `Sec-WebSocket-Accept` token.
    pub accept_key: String,
    /// Negotiated subprotocol, if any.
    pub protocol: Option<String>,
}

impl Accept {
    /// Renders the 101 response. The status line and header spelling
    /// are fixed; only the accept token and the optional subprotocol
    /// vary.
    #[must_use]
    pub fn response_bytes(&self) -> Vec<u8> {
        let mut response = String::from(
            "HTTP/1.1 101 WebSocket Accept\r\n\
             Upgrade: WebSocket\r\n\
             Connection: Upgrade\r\n",
        );

        response.push_str("Sec-WebSocket-Accept: ");
        response.push_str(&self.accept_key);
        response.push_str("\r\n");

        if let Some(ref protocol) = self.protocol {
            response.push_str("Sec-WebSocket-Protocol: ");
            response.push_str(protocol);
            response.push_str("\r\n");
        }

        response.push_str("\r\n");
        response.into_bytes()
    }
}

/// Client-side handshake: builds the upgrade request and verifies the
/// server's answer against the key that was sent.
#[derive(Debug, Clone)]
pub struct ClientUpgrade {
    host: String,
    path: String,
    key: String,
    protocols: Vec<String>,
}

impl ClientUpgrade {
    /// Creates a handshake for the given Host header value and request
    /// path, with a fresh random key.
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            key: generate_client_key(),
            protocols: Vec::new(),
        }
    }

    /// Adds a subprotocol to offer.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// The base64 nonce this handshake sends.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Renders the upgrade request.
    #[must_use]
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.path, self.host, self.key
        );

        if !self.protocols.is_empty() {
            request.push_str("Sec-WebSocket-Protocol: ");
            request.push_str(&self.protocols.join(", "));
            request.push_str("\r\n");
        }

        request.push_str("\r\n");
        request.into_bytes()
    }

    /// Verifies the server's response. Returns the subprotocol the
    /// server selected, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] when the status is not 101, the
    /// upgrade headers are wrong, or the accept token does not match
    /// the key.
    pub fn verify(&self, response: &Response) -> Result<Option<String>, HandshakeError> {
        if response.status != 101 {
            return Err(HandshakeError::WrongStatus(response.status));
        }

        if response.header("upgrade").is_none() {
            return Err(HandshakeError::MissingHeader("Upgrade"));
        }
        if !response.header_contains("upgrade", "websocket") {
            return Err(HandshakeError::InvalidUpgradeHeader);
        }

        if response.header("connection").is_none() {
            return Err(HandshakeError::MissingHeader("Connection"));
        }
        if !response.header_contains("connection", "upgrade") {
            return Err(HandshakeError::InvalidConnectionHeader);
        }

        let actual = response
            .header("sec-websocket-accept")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;
        let expected = compute_accept_key(&self.key);
        if actual != expected {
            return Err(HandshakeError::AcceptMismatch {
                expected,
                actual: actual.to_string(),
            });
        }

        Ok(response.header("sec-websocket-protocol").map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    fn validate(raw: &[u8]) -> Result<Accept, HandshakeError> {
        let request = Request::parse(raw)?;
        ServerUpgrade::new().validate(&request)
    }

    #[test]
    fn test_compute_accept_key() {
        // Worked example from RFC 6455 section 1.3.
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_generate_client_key_is_16_bytes() {
        let key = generate_client_key();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&key)
            .unwrap();
        assert_eq!(decoded.len(), 16);
    }

    #[test]
    fn test_validate_sample_request() {
        let accept = validate(SAMPLE_REQUEST).unwrap();
        assert_eq!(accept.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(accept.protocol.is_none());
    }

    #[test]
    fn test_response_bytes_exact() {
        let accept = validate(SAMPLE_REQUEST).unwrap();
        let expected = b"HTTP/1.1 101 WebSocket Accept\r\n\
            Upgrade: WebSocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
            \r\n";
        assert_eq!(accept.response_bytes(), expected.to_vec());
    }

    #[test]
    fn test_rejects_non_get() {
        let raw = b"POST /chat HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert_eq!(
            validate(raw).unwrap_err(),
            HandshakeError::WrongMethod("POST".to_string())
        );
    }

    #[test]
    fn test_rejects_old_http_version() {
        let raw = b"GET /chat HTTP/1.0\r\nUpgrade: websocket\r\n\r\n";
        assert_eq!(
            validate(raw).unwrap_err(),
            HandshakeError::IncompatibleVersion("HTTP/1.0".to_string())
        );
    }

    #[test]
    fn test_rejects_missing_upgrade_header() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(
            validate(raw).unwrap_err(),
            HandshakeError::MissingHeader("Upgrade")
        );
    }

    #[test]
    fn test_rejects_wrong_upgrade_value() {
        let raw = b"GET /chat HTTP/1.1\r\nUpgrade: h2c\r\nConnection: Upgrade\r\n\r\n";
        assert_eq!(
            validate(raw).unwrap_err(),
            HandshakeError::InvalidUpgradeHeader
        );
    }

    #[test]
    fn test_rejects_wrong_connection_value() {
        let raw = b"GET /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: keep-alive\r\n\
            \r\n";
        assert_eq!(
            validate(raw).unwrap_err(),
            HandshakeError::InvalidConnectionHeader
        );
    }

    #[test]
    fn test_rejects_wrong_ws_version() {
        let raw = b"GET /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 8\r\n\
            Sec-WebSocket-Key: abc\r\n\
            \r\n";
        assert_eq!(
            validate(raw).unwrap_err(),
            HandshakeError::IncompatibleWsVersion("8".to_string())
        );
    }

    #[test]
    fn test_rejects_missing_key() {
        let raw = b"GET /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";
        assert_eq!(validate(raw).unwrap_err(), HandshakeError::MissingKey);
    }

    #[test]
    fn test_check_order_reports_earliest_failure() {
        // Wrong method AND missing every header: method wins.
        let raw = b"DELETE /chat HTTP/1.1\r\n\r\n";
        assert_eq!(
            validate(raw).unwrap_err(),
            HandshakeError::WrongMethod("DELETE".to_string())
        );
    }

    #[test]
    fn test_key_is_not_inspected_beyond_presence() {
        // Not base64 and not 16 bytes, but present. Accepted, and the
        // token is computed over the literal value.
        let raw = b"GET /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            Sec-WebSocket-Key: definitely not base64!\r\n\
            \r\n";
        let accept = validate(raw).unwrap();
        assert_eq!(
            accept.accept_key,
            compute_accept_key("definitely not base64!")
        );
    }

    #[test]
    fn test_connection_header_token_list() {
        let raw = b"GET /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: keep-alive, Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        assert!(validate(raw).is_ok());
    }

    #[test]
    fn test_upgrade_matching_is_substring() {
        // The checks are substring tests on the lowercased values, so
        // compound values still count as requesting a websocket
        // upgrade.
        let raw = b"GET /chat HTTP/1.1\r\n\
            Upgrade: my-websocket\r\n\
            Connection: keep-alive-upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            \r\n";
        let accept = validate(raw).unwrap();
        assert_eq!(accept.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_protocol_negotiation() {
        let raw = b"GET /chat HTTP/1.1\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Protocol: superchat, chat\r\n\
            \r\n";
        let request = Request::parse(raw).unwrap();

        let accept = ServerUpgrade::new()
            .protocol("chat")
            .validate(&request)
            .unwrap();
        assert_eq!(accept.protocol.as_deref(), Some("chat"));
        let text = String::from_utf8(accept.response_bytes()).unwrap();
        assert!(text.contains("Sec-WebSocket-Protocol: chat\r\n"));

        // No overlap: no protocol selected, header not emitted.
        let accept = ServerUpgrade::new()
            .protocol("graphql-ws")
            .validate(&request)
            .unwrap();
        assert!(accept.protocol.is_none());
        let text = String::from_utf8(accept.response_bytes()).unwrap();
        assert!(!text.contains("Sec-WebSocket-Protocol"));
    }

    #[test]
    fn test_client_server_roundtrip() {
        let client = ClientUpgrade::new("server.example.com", "/chat").protocol("chat");

        let request = Request::parse(&client.request_bytes()).unwrap();
        let accept = ServerUpgrade::new().protocol("chat").validate(&request).unwrap();

        let response = Response::parse(&accept.response_bytes()).unwrap();
        let negotiated = client.verify(&response).unwrap();
        assert_eq!(negotiated.as_deref(), Some("chat"));
    }

    #[test]
    fn test_client_rejects_wrong_status() {
        let client = ClientUpgrade::new("example.com", "/");
        let response = Response::parse(b"HTTP/1.1 403 Forbidden\r\n\r\n").unwrap();
        assert_eq!(
            client.verify(&response).unwrap_err(),
            HandshakeError::WrongStatus(403)
        );
    }

    #[test]
    fn test_client_rejects_tampered_accept() {
        let client = ClientUpgrade::new("example.com", "/");
        let response = Response::parse(
            b"HTTP/1.1 101 WebSocket Accept\r\n\
            Upgrade: WebSocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Accept: bm90IHRoZSByaWdodCBoYXNo\r\n\
            \r\n",
        )
        .unwrap();
        assert!(matches!(
            client.verify(&response).unwrap_err(),
            HandshakeError::AcceptMismatch { .. }
        ));
    }
}
