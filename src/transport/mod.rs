//! Transport layer abstraction.
//!
//! A [`Transport`] is a non-blocking byte channel the reactor can poll for
//! readiness: a connected socket, a listening socket, or an in-memory test
//! double. The reactor never touches sockets directly; it drives transports
//! through this trait and hands the resulting bytes to the connection
//! handler.
//!
//! Reads never block. A transport with nothing buffered reports
//! [`TransportRead::NoData`] and the reactor waits for the next readiness
//! event. Listening transports yield accepted peers through
//! [`TransportRead::Incoming`] instead of bytes.

pub mod tcp;

pub use tcp::{TcpAcceptor, TcpConnection};

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;

use bytes::Bytes;

/// Outcome of a single non-blocking read from a [`Transport`].
#[derive(Debug)]
pub enum TransportRead {
    /// The transport is open but has nothing buffered right now.
    NoData,
    /// Bytes received from the peer.
    Data(Bytes),
    /// A listening transport accepted a new peer connection.
    Incoming(Box<dyn Transport>),
    /// The transport is finished. `None` means the peer shut down in an
    /// orderly fashion; `Some` carries the error that tore it down.
    Closed(Option<io::Error>),
}

impl TransportRead {
    /// Returns `true` for the [`TransportRead::Closed`] variant.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// A non-blocking byte transport driven by the reactor.
///
/// Implementations own their underlying resource and are responsible for
/// putting it into non-blocking mode before the reactor registers it.
pub trait Transport: fmt::Debug {
    /// Establishes the underlying resource.
    ///
    /// For outbound connections this performs the (blocking) connect and
    /// then switches the socket to non-blocking mode; for listeners it
    /// binds. Opening an already-open transport is a no-op.
    fn open(&mut self) -> io::Result<()>;

    /// Reads at most `max` bytes without blocking.
    ///
    /// Transient conditions (nothing buffered, interrupted syscall) surface
    /// as [`TransportRead::NoData`]. End of stream and read errors both
    /// surface as [`TransportRead::Closed`]; after that the transport is
    /// shut and [`Transport::is_open`] reports `false`.
    fn read(&mut self, max: usize) -> TransportRead;

    /// Writes a prefix of `data`, returning how many bytes were accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Writes all of `data`, retrying on partial writes.
    ///
    /// A full send buffer yields the thread and retries rather than
    /// surfacing `WouldBlock` to the caller; handlers that produce more
    /// than a socket buffer of output in one callback still make progress.
    fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    ));
                }
                Ok(n) => data = &data[n..],
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::yield_now();
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Shuts the transport down and releases the underlying resource.
    ///
    /// Closing an already-closed transport is a no-op.
    fn close(&mut self);

    /// Whether the transport currently holds a live resource.
    fn is_open(&self) -> bool;

    /// File descriptor for readiness registration, or `-1` when closed.
    fn raw_fd(&self) -> RawFd;

    /// Takes the error that shut this transport down outside of a read.
    ///
    /// Write failures close the transport from within a handler callback;
    /// the reactor only notices at reap time. The stashed fault lets the
    /// disconnect reason reflect the actual error instead of a generic
    /// local close.
    fn take_fault(&mut self) -> Option<io::Error> {
        None
    }
}
