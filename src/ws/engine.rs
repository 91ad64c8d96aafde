//! Per-connection WebSocket state machines.
//!
//! [`WsServerEngine`] and [`WsClientEngine`] adapt the frame codec and
//! handshake validators into [`ConnectionHandler`]s the reactor can
//! drive. Each connection starts in a connecting state that buffers
//! bytes until the HTTP head terminator, runs its side of the upgrade,
//! and then feeds everything (including bytes that arrived glued to the
//! handshake) through the frame decoder.
//!
//! User code implements [`WsHandler`] and talks back through the
//! [`WsLink`] passed to every callback. Protocol violations surface as
//! [`Disconnect`] reasons through the reactor's close path, never as
//! silently dropped frames.

use std::io;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::codec::Encoder;
use crate::error::Disconnect;
use crate::handler::{ConnectionHandler, HandlerFactory};
use crate::http::{Request, Response};
use crate::transport::Transport;

use super::frame::{
    CloseCode, ClosePayload, Frame, FrameCodec, Message, MessageAssembler, Role, WsDecoder,
    WsEvent,
};
use super::handshake::{ClientUpgrade, HandshakeError, ServerUpgrade};

/// Cap on the buffered HTTP head while a handshake is in progress.
const MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

/// Tuning knobs shared by server and client engines.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Answer pings automatically before `on_ping` runs.
    pub auto_pong: bool,
    /// Per-frame payload limit for received frames.
    pub max_frame_size: usize,
    /// Reassembled message limit for received messages.
    pub max_message_size: usize,
    /// Subprotocols offered (client) or supported (server), in
    /// preference order.
    pub protocols: Vec<String>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            auto_pong: true,
            max_frame_size: FrameCodec::DEFAULT_MAX_FRAME_SIZE,
            max_message_size: MessageAssembler::DEFAULT_MAX_MESSAGE_SIZE,
            protocols: Vec::new(),
        }
    }
}

/// Lifecycle of one WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WsState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Application callbacks for one WebSocket connection.
///
/// All methods default to no-ops; implement the ones the application
/// cares about. Callbacks run on the reactor thread and must not block.
pub trait WsHandler {
    /// The handshake completed and frames may flow.
    fn on_open(&mut self, _link: &mut WsLink<'_>) {}

    /// A complete text message arrived.
    fn on_message(&mut self, _link: &mut WsLink<'_>, _text: &str) {}

    /// A complete binary message arrived.
    fn on_binary(&mut self, _link: &mut WsLink<'_>, _data: &Bytes) {}

    /// A ping arrived. When [`WsConfig::auto_pong`] is set the reply was
    /// already sent by the time this runs.
    fn on_ping(&mut self, _link: &mut WsLink<'_>, _payload: &Bytes) {}

    /// A pong arrived.
    fn on_pong(&mut self, _link: &mut WsLink<'_>, _payload: &Bytes) {}

    /// The connection is over.
    ///
    /// For a peer-initiated close this carries the peer's close payload.
    /// A connection torn down without a close frame reports code 1006
    /// with the disconnect reason as text. Fires exactly once.
    fn on_close(&mut self, _payload: &ClosePayload) {}
}

/// Outbound half of a WebSocket connection, lent to callbacks.
///
/// Send failures also mark the transport faulted, so a handler that
/// ignores the returned error still gets a disconnect notification with
/// the real cause on the next reactor pass.
pub struct WsLink<'a> {
    transport: &'a mut dyn Transport,
    encoder: &'a mut FrameCodec,
    state: &'a mut WsState,
    protocol: Option<&'a str>,
}

impl WsLink<'_> {
    /// Negotiated subprotocol, if the handshake agreed on one.
    #[must_use]
    pub const fn protocol(&self) -> Option<&str> {
        self.protocol
    }

    /// Sends a text message.
    pub fn send_text(&mut self, text: &str) -> io::Result<()> {
        self.send(Frame::text(Bytes::copy_from_slice(text.as_bytes())))
    }

    /// Sends a binary message.
    pub fn send_binary(&mut self, data: &[u8]) -> io::Result<()> {
        self.send(Frame::binary(Bytes::copy_from_slice(data)))
    }

    /// Sends a ping. The payload must fit a control frame (125 bytes).
    pub fn send_ping(&mut self, payload: &[u8]) -> io::Result<()> {
        self.send(Frame::ping(Bytes::copy_from_slice(payload)))
    }

    /// Sends a pong, normally only needed when
    /// [`WsConfig::auto_pong`] is off.
    pub fn send_pong(&mut self, payload: &[u8]) -> io::Result<()> {
        self.send(Frame::pong(Bytes::copy_from_slice(payload)))
    }

    /// Starts a close handshake.
    ///
    /// Sends a close frame and stops accepting new messages; the
    /// connection finishes when the peer echoes the close. Codes that
    /// must not appear on the wire (1005, 1006) are replaced with
    /// normal closure. No-op unless the connection is open.
    pub fn close(&mut self, code: CloseCode, reason: &str) -> io::Result<()> {
        if *self.state != WsState::Open {
            return Ok(());
        }
        let code = if code.is_sendable() {
            code
        } else {
            debug!(code = u16::from(code), "close code is reserved; sending normal closure");
            CloseCode::Normal
        };
        send_frame(
            self.transport,
            self.encoder,
            ClosePayload::new(code, reason).to_frame(),
        )?;
        *self.state = WsState::Closing;
        Ok(())
    }

    fn send(&mut self, frame: Frame) -> io::Result<()> {
        if *self.state != WsState::Open {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "websocket is not open",
            ));
        }
        send_frame(self.transport, self.encoder, frame)
    }
}

/// Encodes one frame and writes it out in full.
fn send_frame(
    transport: &mut dyn Transport,
    encoder: &mut FrameCodec,
    frame: Frame,
) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(frame.payload.len() + 14);
    encoder
        .encode(frame, &mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    transport.write_all(&buf)
}

/// State shared by the server and client engines once frames flow.
struct WsCore<H> {
    handler: H,
    auto_pong: bool,
    state: WsState,
    decoder: WsDecoder,
    encoder: FrameCodec,
    protocol: Option<String>,
}

impl<H: WsHandler> WsCore<H> {
    fn new(role: Role, config: &WsConfig, handler: H) -> Self {
        Self {
            handler,
            auto_pong: config.auto_pong,
            state: WsState::Connecting,
            decoder: WsDecoder::new(role)
                .max_frame_size(config.max_frame_size)
                .max_message_size(config.max_message_size),
            encoder: FrameCodec::new(role),
            protocol: None,
        }
    }

    /// Completes the handshake: flips to open and runs `on_open`.
    fn open(&mut self, transport: &mut dyn Transport, protocol: Option<String>) {
        self.state = WsState::Open;
        self.protocol = protocol;
        debug!(protocol = ?self.protocol, "websocket open");
        let mut link = WsLink {
            transport,
            encoder: &mut self.encoder,
            state: &mut self.state,
            protocol: self.protocol.as_deref(),
        };
        self.handler.on_open(&mut link);
    }

    fn drive_frames(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect> {
        let events = self.decoder.feed(data)?;
        for event in events {
            match self.state {
                WsState::Open => {}
                WsState::Closing => {
                    // Only the peer's close matters once ours is sent.
                    if !matches!(event, WsEvent::Close(_)) {
                        continue;
                    }
                }
                WsState::Connecting | WsState::Closed => break,
            }
            match event {
                WsEvent::Message(Message::Text(text)) => {
                    let mut link = WsLink {
                        transport: &mut *transport,
                        encoder: &mut self.encoder,
                        state: &mut self.state,
                        protocol: self.protocol.as_deref(),
                    };
                    self.handler.on_message(&mut link, &text);
                }
                WsEvent::Message(Message::Binary(bytes)) => {
                    let mut link = WsLink {
                        transport: &mut *transport,
                        encoder: &mut self.encoder,
                        state: &mut self.state,
                        protocol: self.protocol.as_deref(),
                    };
                    self.handler.on_binary(&mut link, &bytes);
                }
                WsEvent::Ping(payload) => {
                    if self.auto_pong {
                        send_frame(transport, &mut self.encoder, Frame::pong(payload.clone()))?;
                    }
                    let mut link = WsLink {
                        transport: &mut *transport,
                        encoder: &mut self.encoder,
                        state: &mut self.state,
                        protocol: self.protocol.as_deref(),
                    };
                    self.handler.on_ping(&mut link, &payload);
                }
                WsEvent::Pong(payload) => {
                    let mut link = WsLink {
                        transport: &mut *transport,
                        encoder: &mut self.encoder,
                        state: &mut self.state,
                        protocol: self.protocol.as_deref(),
                    };
                    self.handler.on_pong(&mut link, &payload);
                }
                WsEvent::Close(payload) => {
                    self.handler.on_close(&payload);
                    let echo_needed = self.state == WsState::Open;
                    self.state = WsState::Closed;
                    if echo_needed {
                        let echo = payload.code.map_or_else(ClosePayload::empty, |code| {
                            ClosePayload {
                                code: Some(code),
                                reason: String::new(),
                            }
                        });
                        send_frame(transport, &mut self.encoder, echo.to_frame())?;
                    }
                    transport.close();
                    break;
                }
            }
        }
        Ok(())
    }

    /// Transport-level teardown without a close frame.
    fn closed(&mut self, reason: &Disconnect) {
        if self.state == WsState::Closed {
            // The close frame already reported through on_close.
            return;
        }
        self.state = WsState::Closed;
        let payload = ClosePayload {
            code: Some(CloseCode::Abnormal.into()),
            reason: reason.to_string(),
        };
        self.handler.on_close(&payload);
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

/// Server side of a WebSocket connection.
///
/// Buffers the upgrade request, validates it, writes the accept
/// response, and then decodes frames. Handshake failures close the
/// connection without writing anything back.
pub struct WsServerEngine<H> {
    core: WsCore<H>,
    upgrade: ServerUpgrade,
    buf: BytesMut,
}

impl<H: WsHandler> WsServerEngine<H> {
    /// Creates an engine awaiting a client's upgrade request.
    pub fn new(config: &WsConfig, handler: H) -> Self {
        let mut upgrade = ServerUpgrade::new();
        for protocol in &config.protocols {
            upgrade = upgrade.protocol(protocol.clone());
        }
        Self {
            core: WsCore::new(Role::Server, config, handler),
            upgrade,
            buf: BytesMut::new(),
        }
    }

    fn drive_handshake(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect> {
        self.buf.extend_from_slice(data);
        let Some(body_start) = find_header_end(&self.buf) else {
            if self.buf.len() > MAX_HANDSHAKE_BYTES {
                return Err(HandshakeError::RequestTooLarge {
                    size: self.buf.len(),
                    max: MAX_HANDSHAKE_BYTES,
                }
                .into());
            }
            return Ok(());
        };

        // Bytes past the head belong to the first frames.
        let trailing = self.buf.split_off(body_start);
        let request = Request::parse(&self.buf)?;
        self.buf.clear();

        let accept = self.upgrade.validate(&request)?;
        transport.write_all(&accept.response_bytes())?;
        self.core.open(transport, accept.protocol);

        if trailing.is_empty() {
            Ok(())
        } else {
            self.core.drive_frames(transport, &trailing)
        }
    }
}

impl<H: WsHandler> ConnectionHandler for WsServerEngine<H> {
    fn connected(&mut self, _transport: &mut dyn Transport) {
        trace!("awaiting websocket handshake");
    }

    fn data_received(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect> {
        match self.core.state {
            WsState::Connecting => self.drive_handshake(transport, data),
            WsState::Open | WsState::Closing => self.core.drive_frames(transport, data),
            WsState::Closed => Ok(()),
        }
    }

    fn connection_closed(&mut self, reason: &Disconnect) {
        self.core.closed(reason);
    }
}

/// Client side of a WebSocket connection.
///
/// Writes the upgrade request as soon as the transport connects,
/// verifies the server's response against the nonce it sent, and then
/// decodes frames. Outgoing frames are masked, as the protocol requires
/// of clients.
pub struct WsClientEngine<H> {
    core: WsCore<H>,
    upgrade: ClientUpgrade,
    buf: BytesMut,
}

impl<H: WsHandler> WsClientEngine<H> {
    /// Creates an engine that will upgrade `host`/`path` once connected.
    pub fn new(config: &WsConfig, host: impl Into<String>, path: impl Into<String>, handler: H) -> Self {
        let mut upgrade = ClientUpgrade::new(host, path);
        for protocol in &config.protocols {
            upgrade = upgrade.protocol(protocol.clone());
        }
        Self {
            core: WsCore::new(Role::Client, config, handler),
            upgrade,
            buf: BytesMut::new(),
        }
    }

    fn drive_handshake(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect> {
        self.buf.extend_from_slice(data);
        let Some(body_start) = find_header_end(&self.buf) else {
            if self.buf.len() > MAX_HANDSHAKE_BYTES {
                return Err(HandshakeError::RequestTooLarge {
                    size: self.buf.len(),
                    max: MAX_HANDSHAKE_BYTES,
                }
                .into());
            }
            return Ok(());
        };

        let trailing = self.buf.split_off(body_start);
        let response = Response::parse(&self.buf)?;
        self.buf.clear();

        let protocol = self.upgrade.verify(&response)?;
        self.core.open(transport, protocol);

        if trailing.is_empty() {
            Ok(())
        } else {
            self.core.drive_frames(transport, &trailing)
        }
    }
}

impl<H: WsHandler> ConnectionHandler for WsClientEngine<H> {
    fn connected(&mut self, transport: &mut dyn Transport) {
        if let Err(e) = transport.write_all(&self.upgrade.request_bytes()) {
            warn!(error = %e, "could not send upgrade request");
        }
    }

    fn data_received(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect> {
        match self.core.state {
            WsState::Connecting => self.drive_handshake(transport, data),
            WsState::Open | WsState::Closing => self.core.drive_frames(transport, data),
            WsState::Closed => Ok(()),
        }
    }

    fn connection_closed(&mut self, reason: &Disconnect) {
        self.core.closed(reason);
    }
}

/// [`HandlerFactory`] for WebSocket servers: one engine per accepted
/// peer, handlers minted by a closure.
pub struct WsServerFactory<F> {
    config: WsConfig,
    make: F,
}

impl<F, H> WsServerFactory<F>
where
    F: FnMut() -> H,
    H: WsHandler + 'static,
{
    /// Creates a factory minting one handler per accepted connection.
    pub fn new(config: WsConfig, make: F) -> Self {
        Self { config, make }
    }
}

impl<F, H> HandlerFactory for WsServerFactory<F>
where
    F: FnMut() -> H,
    H: WsHandler + 'static,
{
    fn handler(&mut self) -> Box<dyn ConnectionHandler> {
        Box::new(WsServerEngine::new(&self.config, (self.make)()))
    }
}

/// [`HandlerFactory`] for an outbound WebSocket connection.
pub struct WsClientFactory<F> {
    config: WsConfig,
    host: String,
    path: String,
    make: F,
}

impl<F, H> WsClientFactory<F>
where
    F: FnMut() -> H,
    H: WsHandler + 'static,
{
    /// Creates a factory for a client connection to `host`/`path`.
    pub fn new(config: WsConfig, host: impl Into<String>, path: impl Into<String>, make: F) -> Self {
        Self {
            config,
            host: host.into(),
            path: path.into(),
            make,
        }
    }
}

impl<F, H> HandlerFactory for WsClientFactory<F>
where
    F: FnMut() -> H,
    H: WsHandler + 'static,
{
    fn handler(&mut self) -> Box<dyn ConnectionHandler> {
        Box::new(WsClientEngine::new(
            &self.config,
            self.host.clone(),
            self.path.clone(),
            (self.make)(),
        ))
    }
}
