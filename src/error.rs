//! Connection-level error types.
//!
//! Per-subsystem failures have their own enums ([`HttpError`],
//! [`FrameError`], [`HandshakeError`]); everything funnels into
//! [`Disconnect`], the single reason attached to a connection when it
//! leaves the reactor.

use std::io;

use thiserror::Error;

use crate::http::HttpError;
use crate::ws::frame::FrameError;
use crate::ws::handshake::HandshakeError;

/// Why a connection was closed and removed from the reactor.
///
/// Every closed-connection notification carries exactly one of these.
/// [`Disconnect::Remote`] and [`Disconnect::Local`] are orderly
/// shutdowns; the remaining variants are failures.
#[derive(Debug, Error)]
pub enum Disconnect {
    /// The peer shut the stream down cleanly (end of stream on read).
    #[error("peer closed the connection")]
    Remote,

    /// This side closed the connection deliberately, for example after
    /// completing a close handshake.
    #[error("connection closed locally")]
    Local,

    /// The underlying transport failed.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),

    /// The opening handshake was rejected.
    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeError),

    /// The peer violated the framing protocol after the handshake.
    #[error("protocol violation: {0}")]
    Frame(#[from] FrameError),
}

impl Disconnect {
    /// Returns `true` for orderly shutdowns, `false` for failures.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Remote | Self::Local)
    }
}

impl From<HttpError> for Disconnect {
    fn from(err: HttpError) -> Self {
        Self::Handshake(HandshakeError::BadRequest(err))
    }
}
