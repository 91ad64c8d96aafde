//! Tidepool: a single-threaded readiness reactor with a from-scratch
//! WebSocket stack.
//!
//! # Overview
//!
//! Tidepool multiplexes many non-blocking connections on one thread.
//! A [`Reactor`] owns every connection, polls their file descriptors
//! for read readiness, and hands arriving bytes to each connection's
//! [`ConnectionHandler`]. Nothing here is async: callbacks run inline
//! on the reactor thread, and handlers write back through the same
//! [`Transport`] the bytes came in on.
//!
//! On top of that sits an RFC 6455 WebSocket implementation built from
//! first principles: an incremental frame decoder that accepts
//! arbitrarily fragmented input, a handshake validator for both sides
//! of the upgrade, and per-connection engines that expose the usual
//! `on_open`/`on_message`/`on_close` callback surface.
//!
//! # Design Rules
//!
//! - **One thread, no locks**: all connections live on the reactor
//!   thread; only [`StopHandle`] may be used from outside it
//! - **Stable identities**: connections are keyed by ids that are never
//!   reused, so a close during dispatch cannot misroute an event
//! - **Deferred removal**: closed connections are reaped once per
//!   iteration, never mid-dispatch
//! - **Errors are reasons**: every connection teardown carries a
//!   [`Disconnect`] explaining why, and handlers hear it exactly once
//!
//! # Module Structure
//!
//! - [`reactor`]: the run loop, readiness polling, and the registry
//! - [`transport`]: the byte-transport trait and TCP implementations
//! - [`handler`]: connection handler and factory traits
//! - [`ws`]: WebSocket framing, handshake, and connection engines
//! - [`http`]: the minimal HTTP/1.1 head parser the handshake uses
//! - [`codec`]: incremental encoder/decoder traits
//! - [`error`]: the [`Disconnect`] reason type

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod codec;
pub mod error;
pub mod handler;
pub mod http;
pub mod reactor;
pub mod transport;
pub mod ws;

// Re-exports for convenient access to core types
pub use error::Disconnect;
pub use handler::{factory_fn, ConnectionHandler, HandlerFactory};
pub use reactor::{Reactor, StopHandle};
pub use transport::{TcpAcceptor, TcpConnection, Transport, TransportRead};
pub use ws::{WsClientFactory, WsConfig, WsHandler, WsLink, WsServerFactory};
