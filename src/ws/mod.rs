//! RFC 6455 WebSocket protocol stack.
//!
//! Three layers, each usable on its own:
//!
//! - [`frame`] — the wire codec: incremental frame decoding, masking,
//!   fragmentation reassembly, and close payload handling.
//! - [`handshake`] — the HTTP upgrade: request validation on the server
//!   side, accept-key verification on the client side.
//! - [`engine`] — per-connection state machines tying the two together
//!   behind the reactor's [`ConnectionHandler`](crate::ConnectionHandler)
//!   interface.
//!
//! Most applications only touch the engine layer: implement
//! [`WsHandler`], wrap it in a [`WsServerFactory`] or
//! [`WsClientFactory`], and hand that to the reactor.

pub mod engine;
pub mod frame;
pub mod handshake;

pub use engine::{
    WsClientEngine, WsClientFactory, WsConfig, WsHandler, WsLink, WsServerEngine, WsServerFactory,
};
pub use frame::{
    CloseCode, ClosePayload, Frame, FrameCodec, FrameError, Message, MessageAssembler, Opcode,
    Role, WsDecoder, WsEvent,
};
pub use handshake::{compute_accept_key, Accept, ClientUpgrade, HandshakeError, ServerUpgrade};
