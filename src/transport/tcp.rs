//! TCP transports: outbound connections and listening acceptors.
//!
//! [`TcpConnection`] wraps a `std::net::TcpStream` in non-blocking mode.
//! Outbound connects happen in [`Transport::open`] as a blocking call and
//! the socket switches to non-blocking before the reactor ever polls it.
//! [`TcpAcceptor`] wraps a `std::net::TcpListener` and surfaces accepted
//! peers as [`TransportRead::Incoming`], one per read call.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use super::{Transport, TransportRead};

/// A non-blocking TCP byte stream.
#[derive(Debug)]
pub struct TcpConnection {
    target: Option<String>,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    fault: Option<io::Error>,
}

impl TcpConnection {
    /// Creates an outbound connection to `target` (`host:port`).
    ///
    /// Nothing happens on the wire until [`Transport::open`] is called.
    #[must_use]
    pub fn connect(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            stream: None,
            peer: None,
            fault: None,
        }
    }

    /// Wraps an already-connected stream, switching it to non-blocking.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self {
            target: None,
            stream: Some(stream),
            peer,
            fault: None,
        })
    }

    /// Address of the connected peer, if known.
    #[must_use]
    pub const fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Transport for TcpConnection {
    fn open(&mut self) -> io::Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let target = self.target.as_deref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "connection has no target")
        })?;
        let stream = TcpStream::connect(target)?;
        stream.set_nonblocking(true)?;
        self.peer = stream.peer_addr().ok();
        debug!(target = %target, peer = ?self.peer, "tcp connection opened");
        self.stream = Some(stream);
        Ok(())
    }

    fn read(&mut self, max: usize) -> TransportRead {
        let Some(stream) = self.stream.as_mut() else {
            return TransportRead::Closed(None);
        };
        let mut buf = BytesMut::zeroed(max);
        match stream.read(&mut buf) {
            Ok(0) => {
                self.close();
                TransportRead::Closed(None)
            }
            Ok(n) => {
                buf.truncate(n);
                TransportRead::Data(buf.freeze())
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                TransportRead::NoData
            }
            Err(e) => {
                self.close();
                TransportRead::Closed(Some(e))
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is closed",
            ));
        };
        match stream.write(data) {
            Ok(n) => Ok(n),
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                Err(io::Error::new(e.kind(), "send buffer full"))
            }
            Err(e) => {
                // The reactor only learns about this at reap time; stash the
                // error so the disconnect reason carries it.
                self.fault = Some(io::Error::new(e.kind(), e.to_string()));
                self.close();
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            trace!(peer = ?self.peer, "tcp connection closed");
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    fn take_fault(&mut self) -> Option<io::Error> {
        self.fault.take()
    }
}

/// A non-blocking TCP listener that accepts peers on read.
#[derive(Debug)]
pub struct TcpAcceptor {
    addr: String,
    listener: Option<TcpListener>,
}

impl TcpAcceptor {
    /// Creates an acceptor for `addr` (`host:port`).
    ///
    /// The socket is bound by [`Transport::open`].
    #[must_use]
    pub fn bind(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            listener: None,
        }
    }

    /// The bound local address, once open.
    ///
    /// Useful after binding to port `0` to learn the assigned port.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }
}

impl Transport for TcpAcceptor {
    fn open(&mut self) -> io::Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(&self.addr)?;
        listener.set_nonblocking(true)?;
        debug!(addr = ?listener.local_addr().ok(), "tcp acceptor listening");
        self.listener = Some(listener);
        Ok(())
    }

    fn read(&mut self, _max: usize) -> TransportRead {
        let Some(listener) = self.listener.as_ref() else {
            return TransportRead::Closed(None);
        };
        match listener.accept() {
            Ok((stream, peer)) => match TcpConnection::from_stream(stream) {
                Ok(conn) => {
                    trace!(%peer, "accepted tcp connection");
                    TransportRead::Incoming(Box::new(conn))
                }
                Err(e) => {
                    warn!(%peer, error = %e, "could not prepare accepted connection");
                    TransportRead::NoData
                }
            },
            Err(ref e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted
                    || e.kind() == io::ErrorKind::ConnectionAborted =>
            {
                TransportRead::NoData
            }
            Err(e) => {
                self.close();
                TransportRead::Closed(Some(e))
            }
        }
    }

    fn write(&mut self, _data: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "listeners cannot send",
        ))
    }

    fn close(&mut self) {
        if let Some(listener) = self.listener.take() {
            trace!(addr = ?listener.local_addr().ok(), "tcp acceptor closed");
        }
    }

    fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    fn raw_fd(&self) -> RawFd {
        self.listener.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }
}
