//! Byte-stream codec traits.
//!
//! A [`Decoder`] turns an accumulating byte buffer into frames; an
//! [`Encoder`] turns frames into bytes appended to an output buffer.
//! Both operate on [`BytesMut`] so implementations can consume partial
//! input without copying and callers can reuse buffers across calls.
//!
//! The contract for [`Decoder::decode`] is incremental: return
//! `Ok(None)` when the buffer does not yet hold enough bytes to finish
//! a frame, `Ok(Some(frame))` once one completes. A decoder may take
//! bytes out of `src` before the frame is whole, provided everything
//! taken is carried in its own state so the next call resumes where
//! this one stopped. Callers loop until `Ok(None)` and then wait for
//! more input.

use bytes::BytesMut;

/// Decodes frames from a byte buffer, incrementally.
pub trait Decoder {
    /// The frame type produced by this decoder.
    type Item;
    /// The error type returned when the input violates the protocol.
    type Error;

    /// Attempts to decode a single frame from `src`.
    ///
    /// Returns `Ok(None)` on a short read. Implementations may consume
    /// bytes from `src` before a full frame is available, as long as
    /// any progress those bytes represent is held in the decoder's own
    /// state, so that decoding resumes cleanly when more input arrives.
    ///
    /// # Errors
    ///
    /// Returns the decoder's error type when `src` holds bytes that can
    /// never form a valid frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error>;
}

/// Encodes frames into a byte buffer.
pub trait Encoder<Item> {
    /// The error type returned when a frame cannot be encoded.
    type Error;

    /// Appends the wire encoding of `item` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns the encoder's error type when `item` is not
    /// representable on the wire.
    fn encode(&mut self, item: Item, dst: &mut BytesMut) -> Result<(), Self::Error>;
}
