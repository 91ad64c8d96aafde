//! Thin wrapper over the OS readiness facility.
//!
//! Built on the `polling` crate, which delivers oneshot events: once a
//! source fires it stays disarmed until [`Poll::rearm`] is called. Every
//! delivered event must therefore end in either a rearm or a
//! deregistration, or the connection goes silent forever.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

use polling::{Event, Poller};

use super::registry::ConnId;

/// Readiness events gathered by one wait call.
///
/// Unbounded on purpose: with oneshot delivery, an event that does not
/// fit in a capped buffer would leave its source disarmed with nobody
/// left to rearm it.
#[derive(Debug, Default)]
pub(crate) struct Events {
    inner: Vec<Event>,
}

impl Events {
    pub(crate) const fn new() -> Self {
        Self { inner: Vec::new() }
    }

    /// Connection ids that reported read readiness, in poll order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.inner.iter().map(|event| ConnId(event.key))
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Shared handle to the readiness poller.
///
/// Clones share one underlying poller; [`Poll::notify`] may be called
/// from any thread to interrupt a blocked [`Poll::wait`].
#[derive(Debug, Clone)]
pub(crate) struct Poll {
    poller: Arc<Poller>,
}

impl Poll {
    pub(crate) fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Arc::new(Poller::new()?),
        })
    }

    /// Registers a transport for read readiness under its connection id.
    pub(crate) fn register(&self, fd: RawFd, id: ConnId) -> io::Result<()> {
        self.poller.add(fd, Event::readable(id.0))
    }

    /// Re-arms read interest after a delivered event.
    pub(crate) fn rearm(&self, fd: RawFd, id: ConnId) -> io::Result<()> {
        self.poller.modify(fd, Event::readable(id.0))
    }

    /// Drops a transport from the poll set.
    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.poller.delete(fd)
    }

    /// Blocks until readiness, notification, or timeout.
    pub(crate) fn wait(&self, events: &mut Events, timeout: Duration) -> io::Result<usize> {
        events.inner.clear();
        self.poller.wait(&mut events.inner, Some(timeout))
    }

    /// Interrupts a blocked [`Poll::wait`]. Sticky: if no wait is in
    /// progress, the next one returns immediately.
    pub(crate) fn notify(&self) -> io::Result<()> {
        self.poller.notify()
    }
}
