//! WebSocket framing according to RFC 6455.
//!
//! Wire layout (RFC 6455 section 5.2): two base bytes carrying
//! FIN/RSV/opcode and MASK/len7, then 2 or 8 extended big-endian length
//! bytes when len7 is 126 or 127, then a 4-byte masking key when MASK
//! is set, then the payload. Masking XORs payload byte `i` with key
//! byte `i % 4`, so applying the same key twice restores the original.
//!
//! [`FrameCodec`] decodes one frame at a time from an accumulating
//! buffer and encodes outgoing frames. [`MessageAssembler`] stitches
//! fragmented data frames back into messages. [`WsDecoder`] combines
//! the two and turns raw socket chunks into [`WsEvent`]s, latching the
//! first protocol error it sees.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::codec::{Decoder, Encoder};

/// Framing-layer protocol violations.
///
/// All variants are terminal: once one is produced for a connection,
/// no further frames from that peer are trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A reserved header bit was set and no extension was negotiated.
    #[error("reserved bits set without a negotiated extension")]
    ReservedBitsSet,

    /// The opcode nibble named a reserved value.
    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),

    /// A client-to-server frame arrived without the mask bit.
    #[error("frame from client is not masked")]
    UnmaskedFrame,

    /// A server-to-client frame arrived with the mask bit set.
    #[error("frame from server is masked")]
    MaskedFrame,

    /// A control frame declared a payload longer than 125 bytes.
    #[error("control frame payload exceeds 125 bytes")]
    ControlFrameTooLarge,

    /// A control frame arrived without its FIN bit.
    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,

    /// A continuation frame arrived with no fragmented message open.
    #[error("continuation frame without a message in progress")]
    UnexpectedContinuation,

    /// A new data frame arrived while a fragmented message was open.
    #[error("data frame interleaved with an unfinished message")]
    OverlappingMessage,

    /// A reassembled text message was not valid UTF-8.
    #[error("text message is not valid UTF-8")]
    InvalidTextEncoding,

    /// A frame or message exceeded the configured size limit.
    #[error("payload of {size} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Declared or accumulated payload size.
        size: u64,
        /// Configured limit that was exceeded.
        max: usize,
    },

    /// A close frame carried exactly one payload byte, or a reason that
    /// was not valid UTF-8.
    #[error("malformed close frame payload")]
    InvalidClosePayload,
}

/// Frame opcode (the low nibble of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation = 0x0,
    /// Text data frame.
    Text = 0x1,
    /// Binary data frame.
    Binary = 0x2,
    // 0x3-0x7 reserved for future data frames
    /// Close control frame.
    Close = 0x8,
    /// Ping control frame.
    Ping = 0x9,
    /// Pong control frame.
    Pong = 0xA,
    // 0xB-0xF reserved for future control frames
}

impl Opcode {
    /// Returns `true` for Close, Ping, and Pong.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns `true` for Continuation, Text, and Binary.
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }

    /// Parses an opcode nibble.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidOpcode`] for reserved values.
    pub const fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(FrameError::InvalidOpcode(value)),
        }
    }
}

/// A single decoded or outgoing frame.
///
/// Reserved bits are validated during decode and never surface here;
/// frames built for sending always have them clear.
#[derive(Debug, Clone)]
pub struct Frame {
    /// FIN bit: this frame completes its message.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Masking key the payload arrived under, if any. Decoded payloads
    /// are already unmasked.
    pub mask_key: Option<[u8; 4]>,
    /// Payload data.
    pub payload: Bytes,
}

impl Frame {
    fn data(fin: bool, opcode: Opcode, payload: Bytes) -> Self {
        Self {
            fin,
            opcode,
            mask_key: None,
            payload,
        }
    }

    /// Creates a final text frame.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::data(true, Opcode::Text, payload.into())
    }

    /// Creates a final binary frame.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::data(true, Opcode::Binary, payload.into())
    }

    /// Creates a message fragment. The first fragment carries the data
    /// opcode, later ones [`Opcode::Continuation`], and only the last
    /// has `fin` set.
    #[must_use]
    pub fn fragment(fin: bool, opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self::data(fin, opcode, payload.into())
    }

    /// Creates a ping frame.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::data(true, Opcode::Ping, payload.into())
    }

    /// Creates a pong frame.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::data(true, Opcode::Pong, payload.into())
    }
}

/// Which side of the connection a codec speaks for.
///
/// RFC 6455 requires client-to-server frames to be masked and
/// server-to-client frames to be unmasked; the codec enforces both
/// directions based on its role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Masks outgoing frames, rejects masked incoming ones.
    Client,
    /// Sends unmasked, rejects unmasked incoming frames.
    Server,
}

/// Applies the XOR mask in place. Self-inverse.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

fn generate_mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key).expect("OS RNG unavailable");
    key
}

/// Decode progress for one frame. Header fields survive across calls
/// so a frame split over many reads resumes where it stopped.
#[derive(Debug)]
enum DecodeState {
    /// Waiting for the two base header bytes.
    Header,
    /// Reading a 2- or 8-byte extended length.
    ExtendedLength {
        fin: bool,
        opcode: Opcode,
        masked: bool,
        bytes_needed: usize,
    },
    /// Reading the 4-byte masking key.
    MaskKey {
        fin: bool,
        opcode: Opcode,
        payload_len: u64,
    },
    /// Reading the payload.
    Payload {
        fin: bool,
        opcode: Opcode,
        mask_key: Option<[u8; 4]>,
        payload_len: u64,
    },
}

/// Incremental frame codec for one direction of a connection.
#[derive(Debug)]
pub struct FrameCodec {
    role: Role,
    max_frame_size: usize,
    state: DecodeState,
}

impl FrameCodec {
    /// Default per-frame payload limit (16 MiB).
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

    /// Creates a codec for the given role.
    #[must_use]
    pub const fn new(role: Role) -> Self {
        Self {
            role,
            max_frame_size: Self::DEFAULT_MAX_FRAME_SIZE,
            state: DecodeState::Header,
        }
    }

    /// Creates a client-role codec.
    #[must_use]
    pub const fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Creates a server-role codec.
    #[must_use]
    pub const fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Sets the per-frame payload limit.
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    fn check_frame_size(&self, payload_len: u64) -> Result<(), FrameError> {
        if payload_len > self.max_frame_size as u64 {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    const fn after_length(
        fin: bool,
        opcode: Opcode,
        masked: bool,
        payload_len: u64,
    ) -> DecodeState {
        if masked {
            DecodeState::MaskKey {
                fin,
                opcode,
                payload_len,
            }
        } else {
            DecodeState::Payload {
                fin,
                opcode,
                mask_key: None,
                payload_len,
            }
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match &self.state {
                DecodeState::Header => {
                    if src.len() < 2 {
                        return Ok(None);
                    }

                    let first_byte = src[0];
                    let second_byte = src[1];

                    let fin = (first_byte & 0x80) != 0;
                    let rsv = first_byte & 0x70;
                    let opcode_raw = first_byte & 0x0F;
                    let masked = (second_byte & 0x80) != 0;
                    let payload_len_7 = second_byte & 0x7F;

                    // Validation order: reserved bits, opcode, masking
                    // direction, control frame constraints. Nothing is
                    // consumed until the header is fully accepted.
                    if rsv != 0 {
                        return Err(FrameError::ReservedBitsSet);
                    }

                    let opcode = Opcode::from_u8(opcode_raw)?;

                    match self.role {
                        Role::Server if !masked => return Err(FrameError::UnmaskedFrame),
                        Role::Client if masked => return Err(FrameError::MaskedFrame),
                        _ => {}
                    }

                    if opcode.is_control() {
                        if !fin {
                            return Err(FrameError::FragmentedControlFrame);
                        }
                        // len7 of 126 or 127 would also announce more
                        // than 125 bytes, so this covers extended
                        // lengths as well.
                        if payload_len_7 > 125 {
                            return Err(FrameError::ControlFrameTooLarge);
                        }
                    }

                    let _ = src.split_to(2);

                    match payload_len_7 {
                        0..=125 => {
                            let payload_len = u64::from(payload_len_7);
                            self.check_frame_size(payload_len)?;
                            self.state = Self::after_length(fin, opcode, masked, payload_len);
                        }
                        126 => {
                            self.state = DecodeState::ExtendedLength {
                                fin,
                                opcode,
                                masked,
                                bytes_needed: 2,
                            };
                        }
                        127 => {
                            self.state = DecodeState::ExtendedLength {
                                fin,
                                opcode,
                                masked,
                                bytes_needed: 8,
                            };
                        }
                        _ => unreachable!(),
                    }
                }

                DecodeState::ExtendedLength {
                    fin,
                    opcode,
                    masked,
                    bytes_needed,
                } => {
                    if src.len() < *bytes_needed {
                        return Ok(None);
                    }

                    let payload_len = if *bytes_needed == 2 {
                        let bytes = src.split_to(2);
                        u64::from(u16::from_be_bytes([bytes[0], bytes[1]]))
                    } else {
                        let bytes = src.split_to(8);
                        u64::from_be_bytes([
                            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6],
                            bytes[7],
                        ])
                    };

                    let (fin, opcode, masked) = (*fin, *opcode, *masked);

                    if let Err(err) = self.check_frame_size(payload_len) {
                        // The length bytes are already consumed.
                        self.state = DecodeState::Header;
                        return Err(err);
                    }

                    self.state = Self::after_length(fin, opcode, masked, payload_len);
                }

                DecodeState::MaskKey {
                    fin,
                    opcode,
                    payload_len,
                } => {
                    if src.len() < 4 {
                        return Ok(None);
                    }

                    let mask_bytes = src.split_to(4);
                    let mut mask_key = [0u8; 4];
                    mask_key.copy_from_slice(&mask_bytes);

                    let (fin, opcode, payload_len) = (*fin, *opcode, *payload_len);
                    self.state = DecodeState::Payload {
                        fin,
                        opcode,
                        mask_key: Some(mask_key),
                        payload_len,
                    };
                }

                DecodeState::Payload {
                    fin,
                    opcode,
                    mask_key,
                    payload_len,
                } => {
                    let payload_len_usize = *payload_len as usize;
                    if src.len() < payload_len_usize {
                        return Ok(None);
                    }

                    let mut payload = src.split_to(payload_len_usize);
                    if let Some(key) = mask_key {
                        apply_mask(&mut payload, *key);
                    }

                    let frame = Frame {
                        fin: *fin,
                        opcode: *opcode,
                        mask_key: *mask_key,
                        payload: payload.freeze(),
                    };

                    self.state = DecodeState::Header;
                    return Ok(Some(frame));
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let payload_len = frame.payload.len();

        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(FrameError::FragmentedControlFrame);
            }
            if payload_len > 125 {
                return Err(FrameError::ControlFrameTooLarge);
            }
        }

        let should_mask = self.role == Role::Client;

        let mut first_byte = frame.opcode as u8;
        if frame.fin {
            first_byte |= 0x80;
        }

        let mask_bit = if should_mask { 0x80 } else { 0 };

        let length_bytes = if payload_len > 65535 {
            8
        } else if payload_len > 125 {
            2
        } else {
            0
        };
        dst.reserve(2 + length_bytes + if should_mask { 4 } else { 0 } + payload_len);

        dst.put_u8(first_byte);
        if payload_len <= 125 {
            dst.put_u8(mask_bit | (payload_len as u8));
        } else if payload_len <= 65535 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        if should_mask {
            let mask_key = generate_mask_key();
            dst.put_slice(&mask_key);
            let mut masked = BytesMut::from(frame.payload.as_ref());
            apply_mask(&mut masked, mask_key);
            dst.put_slice(&masked);
        } else {
            dst.put_slice(&frame.payload);
        }

        Ok(())
    }
}

/// Close codes defined by RFC 6455 section 7.4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Endpoint is going away (1001).
    GoingAway = 1001,
    /// Protocol error (1002).
    ProtocolError = 1002,
    /// Unsupported data type (1003).
    Unsupported = 1003,
    /// No status code present (1005). Never sent on the wire.
    NoStatus = 1005,
    /// Abnormal closure (1006). Never sent on the wire.
    Abnormal = 1006,
    /// Payload inconsistent with message type (1007).
    InvalidPayload = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Message too big (1009).
    MessageTooBig = 1009,
    /// Internal server error (1011).
    InternalError = 1011,
}

impl CloseCode {
    /// Returns `true` when this code may appear in a close frame.
    #[must_use]
    pub const fn is_sendable(self) -> bool {
        !matches!(self, Self::NoStatus | Self::Abnormal)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code as Self
    }
}

/// Decoded close frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePayload {
    /// Status code, absent when the close frame had no payload.
    pub code: Option<u16>,
    /// Optional UTF-8 reason text.
    pub reason: String,
}

impl ClosePayload {
    /// A close payload with no code and no reason.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            code: None,
            reason: String::new(),
        }
    }

    /// A close payload with a code and reason text.
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            reason: reason.into(),
        }
    }

    /// Parses a close frame payload.
    ///
    /// An empty payload is legal; a single byte is not, and the reason
    /// text (bytes after the code) must be UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidClosePayload`] for a 1-byte payload
    /// or a non-UTF-8 reason.
    pub fn parse(payload: &[u8]) -> Result<Self, FrameError> {
        match payload.len() {
            0 => Ok(Self::empty()),
            1 => Err(FrameError::InvalidClosePayload),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| FrameError::InvalidClosePayload)?
                    .to_string();
                Ok(Self {
                    code: Some(code),
                    reason,
                })
            }
        }
    }

    /// Encodes this payload into a close frame.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        let payload = match self.code {
            Some(code) => {
                let mut buf = BytesMut::with_capacity(2 + self.reason.len());
                buf.put_u16(code);
                buf.put_slice(self.reason.as_bytes());
                buf.freeze()
            }
            None => Bytes::new(),
        };
        Frame::data(true, Opcode::Close, payload)
    }
}

/// A complete, reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
}

impl Message {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
        }
    }

    /// Returns `true` for a zero-length payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
struct PartialMessage {
    opcode: Opcode,
    data: BytesMut,
}

/// Reassembles fragmented data frames into messages.
///
/// Text payloads are validated as UTF-8 only once the final fragment
/// arrives, so multi-byte characters may straddle fragment boundaries.
#[derive(Debug)]
pub struct MessageAssembler {
    max_message_size: usize,
    partial: Option<PartialMessage>,
}

impl MessageAssembler {
    /// Default reassembled message limit (64 MiB).
    pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

    /// Creates an assembler with the default message limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_message_size: Self::DEFAULT_MAX_MESSAGE_SIZE,
            partial: None,
        }
    }

    /// Sets the reassembled message limit.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Returns `true` while fragments of an unfinished message are
    /// buffered.
    #[must_use]
    pub const fn has_partial(&self) -> bool {
        self.partial.is_some()
    }

    /// Feeds one data frame. Returns a message when the frame completes
    /// one. Control frames do not participate in reassembly and are
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::OverlappingMessage`],
    /// [`FrameError::UnexpectedContinuation`],
    /// [`FrameError::PayloadTooLarge`], or
    /// [`FrameError::InvalidTextEncoding`] on misuse of fragmentation,
    /// and [`FrameError::InvalidOpcode`] for a control frame.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, FrameError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.partial.is_some() {
                    return Err(FrameError::OverlappingMessage);
                }
                self.check_message_size(frame.payload.len())?;
                if frame.fin {
                    return Self::finish(frame.opcode, frame.payload).map(Some);
                }
                self.partial = Some(PartialMessage {
                    opcode: frame.opcode,
                    data: BytesMut::from(frame.payload.as_ref()),
                });
                Ok(None)
            }
            Opcode::Continuation => {
                // Take the partial so a size failure also discards it.
                let Some(mut partial) = self.partial.take() else {
                    return Err(FrameError::UnexpectedContinuation);
                };
                self.check_message_size(partial.data.len() + frame.payload.len())?;
                partial.data.extend_from_slice(&frame.payload);
                if frame.fin {
                    return Self::finish(partial.opcode, partial.data.freeze()).map(Some);
                }
                self.partial = Some(partial);
                Ok(None)
            }
            Opcode::Close | Opcode::Ping | Opcode::Pong => {
                Err(FrameError::InvalidOpcode(frame.opcode as u8))
            }
        }
    }

    fn check_message_size(&self, total: usize) -> Result<(), FrameError> {
        if total > self.max_message_size {
            return Err(FrameError::PayloadTooLarge {
                size: total as u64,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    fn finish(opcode: Opcode, payload: Bytes) -> Result<Message, FrameError> {
        match opcode {
            Opcode::Text => {
                let text = String::from_utf8(payload.to_vec())
                    .map_err(|_| FrameError::InvalidTextEncoding)?;
                Ok(Message::Text(text))
            }
            _ => Ok(Message::Binary(payload)),
        }
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Something the protocol engine reacts to: a complete message or a
/// control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// A complete text or binary message.
    Message(Message),
    /// A ping with its application payload.
    Ping(Bytes),
    /// A pong with its application payload.
    Pong(Bytes),
    /// A close frame with its decoded payload.
    Close(ClosePayload),
}

/// Streaming decoder from socket chunks to protocol events.
///
/// Control frames pass through immediately, even between fragments of
/// an unfinished message. The first protocol error latches: every later
/// [`feed`](Self::feed) returns the same error and no further bytes are
/// parsed.
#[derive(Debug)]
pub struct WsDecoder {
    codec: FrameCodec,
    assembler: MessageAssembler,
    buf: BytesMut,
    failed: Option<FrameError>,
}

impl WsDecoder {
    /// Creates a decoder for the given role with default size limits.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            codec: FrameCodec::new(role),
            assembler: MessageAssembler::new(),
            buf: BytesMut::new(),
            failed: None,
        }
    }

    /// Creates a server-side decoder (expects masked frames).
    #[must_use]
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Creates a client-side decoder (expects unmasked frames).
    #[must_use]
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Sets the per-frame payload limit.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.codec = self.codec.max_frame_size(size);
        self
    }

    /// Sets the reassembled message limit.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.assembler = self.assembler.max_message_size(size);
        self
    }

    /// Appends a socket chunk and returns every event it completes.
    ///
    /// # Errors
    ///
    /// Returns the first [`FrameError`] the stream produced. The error
    /// latches; subsequent calls return it again without parsing.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<WsEvent>, FrameError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        loop {
            match self.next_event() {
                Ok(Some(event)) => events.push(event),
                Ok(None) => break,
                Err(err) => {
                    self.failed = Some(err.clone());
                    return Err(err);
                }
            }
        }
        Ok(events)
    }

    fn next_event(&mut self) -> Result<Option<WsEvent>, FrameError> {
        loop {
            let Some(frame) = self.codec.decode(&mut self.buf)? else {
                return Ok(None);
            };
            match frame.opcode {
                Opcode::Ping => return Ok(Some(WsEvent::Ping(frame.payload))),
                Opcode::Pong => return Ok(Some(WsEvent::Pong(frame.payload))),
                Opcode::Close => {
                    let payload = ClosePayload::parse(&frame.payload)?;
                    return Ok(Some(WsEvent::Close(payload)));
                }
                _ => {
                    if let Some(message) = self.assembler.push(frame)? {
                        return Ok(Some(WsEvent::Message(message)));
                    }
                    // Non-final fragment: keep draining the buffer.
                }
            }
        }
    }
}
