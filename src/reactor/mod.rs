//! Single-threaded readiness reactor.
//!
//! One thread owns everything: the poll set, the connection registry, and
//! every handler. [`Reactor::run`] drains the pending-connect queue once,
//! then loops: block on readiness (bounded by a 500ms timeout), dispatch
//! each ready connection, and finish the iteration with a reconciliation
//! pass that reaps transports which closed outside the read path.
//!
//! Dispatch works against the id snapshot a poll returned. Closing a
//! connection mid-batch removes it from the registry, and later events
//! for it in the same batch look up to nothing; no other connection's
//! position shifts. Handlers may write to or close their transport from
//! any callback, but must not block: a stalled callback stalls every
//! other connection.
//!
//! [`StopHandle::stop`] is level-triggered. The flag is checked once per
//! iteration, so a stop requested from inside a callback lets the current
//! batch and its reap pass complete before the loop exits.

mod poll;
mod registry;

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::Disconnect;
use crate::handler::{ConnectionHandler, HandlerFactory};
use crate::transport::{Transport, TransportRead};

use poll::{Events, Poll};
use registry::{ConnId, Connection, Registry};

/// Bytes read from a ready transport per dispatch.
const READ_CHUNK: usize = 8192;

/// Upper bound on one blocking readiness wait.
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

struct PendingConnect {
    transport: Box<dyn Transport>,
    factory: Box<dyn HandlerFactory>,
}

/// What one readiness dispatch decided, applied after the registry
/// borrow is released.
enum ReadOutcome {
    Idle,
    Dispatched,
    Accept(Box<dyn Transport>),
    Close(Disconnect),
}

/// The event loop driving a set of connections.
pub struct Reactor {
    poll: Poll,
    registry: Registry,
    pending: VecDeque<PendingConnect>,
    stopped: Arc<AtomicBool>,
}

impl Reactor {
    /// Creates a reactor with an empty poll set.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            registry: Registry::new(),
            pending: VecDeque::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Queues a transport to be opened when [`Reactor::run`] starts.
    ///
    /// The queue is drained exactly once, in FIFO order, before the first
    /// poll. The factory's lifecycle hooks fire during the drain: a
    /// transport that fails to open reports through
    /// [`HandlerFactory::fail`] and never enters the poll set.
    pub fn enqueue_connect(
        &mut self,
        transport: impl Transport + 'static,
        factory: impl HandlerFactory + 'static,
    ) {
        self.pending.push_back(PendingConnect {
            transport: Box::new(transport),
            factory: Box::new(factory),
        });
    }

    /// A clonable handle that can stop the loop from a callback or from
    /// another thread.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stopped: Arc::clone(&self.stopped),
            poll: self.poll.clone(),
        }
    }

    /// Number of live connections, listeners included.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Opens queued connects, then runs the loop until stopped.
    ///
    /// Returns early only if the readiness wait itself fails; per
    /// connection errors close that connection and the loop keeps going.
    pub fn run(&mut self) -> io::Result<()> {
        self.drain_pending();
        self.reap();

        let mut events = Events::new();
        while !self.stopped.load(Ordering::SeqCst) {
            match self.poll.wait(&mut events, POLL_TIMEOUT) {
                Ok(_) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            for id in events.iter() {
                self.dispatch(id);
            }
            self.reap();
        }
        debug!("reactor stopped");
        Ok(())
    }

    fn drain_pending(&mut self) {
        while let Some(PendingConnect {
            mut transport,
            mut factory,
        }) = self.pending.pop_front()
        {
            factory.starting();
            if let Err(e) = transport.open() {
                warn!(error = %e, "connect failed");
                factory.fail(&e);
                continue;
            }
            factory.connected(transport.as_mut());
            let handler = factory.handler();
            let id = self.registry.insert(Connection {
                transport,
                factory: Some(factory),
                handler,
            });
            debug!(id = id.0, "connection opened");
            if let Some(conn) = self.registry.get_mut(id) {
                conn.handler.connected(conn.transport.as_mut());
            }
            self.register(id);
        }
    }

    fn dispatch(&mut self, id: ConnId) {
        let Some(conn) = self.registry.get_mut(id) else {
            // Closed earlier in this batch; the event is stale.
            return;
        };
        let outcome = match conn.transport.read(READ_CHUNK) {
            TransportRead::NoData => ReadOutcome::Idle,
            TransportRead::Data(data) => {
                trace!(id = id.0, len = data.len(), "data received");
                match conn.handler.data_received(conn.transport.as_mut(), &data) {
                    Ok(()) => ReadOutcome::Dispatched,
                    Err(reason) => ReadOutcome::Close(reason),
                }
            }
            TransportRead::Incoming(peer) => ReadOutcome::Accept(peer),
            TransportRead::Closed(cause) => {
                ReadOutcome::Close(cause.map_or(Disconnect::Remote, Disconnect::from))
            }
        };
        match outcome {
            ReadOutcome::Idle | ReadOutcome::Dispatched => self.rearm(id),
            ReadOutcome::Accept(peer) => {
                self.accept(id, peer);
                self.rearm(id);
            }
            ReadOutcome::Close(reason) => self.close_connection(id, reason),
        }
    }

    fn accept(&mut self, listener: ConnId, mut peer: Box<dyn Transport>) {
        let factory = self
            .registry
            .get_mut(listener)
            .and_then(|conn| conn.factory.as_mut());
        let handler = match factory {
            Some(factory) => factory.handler(),
            None => {
                warn!(
                    id = listener.0,
                    "transport yielded a peer but carries no factory; dropping it"
                );
                peer.close();
                return;
            }
        };
        let id = self.registry.insert(Connection {
            transport: peer,
            factory: None,
            handler,
        });
        debug!(id = id.0, listener = listener.0, "accepted connection");
        if let Some(conn) = self.registry.get_mut(id) {
            conn.handler.connected(conn.transport.as_mut());
        }
        self.register(id);
    }

    fn register(&mut self, id: ConnId) {
        let fd = match self.registry.get_mut(id) {
            Some(conn) => conn.transport.raw_fd(),
            None => return,
        };
        if fd < 0 {
            // The connected hook already closed it; the reap pass at the
            // end of this iteration takes over.
            return;
        }
        if let Err(e) = self.poll.register(fd, id) {
            warn!(id = id.0, error = %e, "could not register connection");
            self.close_connection(id, Disconnect::Transport(e));
        }
    }

    /// Oneshot interest: every delivered event must end here or in
    /// [`Reactor::close_connection`], or the connection goes silent.
    fn rearm(&mut self, id: ConnId) {
        let fd = match self.registry.get_mut(id) {
            Some(conn) => conn.transport.raw_fd(),
            None => return,
        };
        if fd < 0 {
            return;
        }
        if let Err(e) = self.poll.rearm(fd, id) {
            warn!(id = id.0, error = %e, "could not re-arm connection");
            self.close_connection(id, Disconnect::Transport(e));
        }
    }

    fn close_connection(&mut self, id: ConnId, reason: Disconnect) {
        let Some(mut conn) = self.registry.remove(id) else {
            return;
        };
        let fd = conn.transport.raw_fd();
        if fd >= 0 {
            if let Err(e) = self.poll.deregister(fd) {
                trace!(id = id.0, error = %e, "deregister failed");
            }
        }
        conn.transport.close();
        if reason.is_clean() {
            debug!(id = id.0, reason = %reason, "connection closed");
        } else {
            warn!(id = id.0, reason = %reason, "connection closed");
        }
        conn.handler.connection_closed(&reason);
        if let Some(factory) = conn.factory.as_mut() {
            factory.closed(&reason);
        }
    }

    /// Reconciliation pass: connections whose transport closed without
    /// going through the read path still get their closed notification,
    /// exactly once.
    fn reap(&mut self) {
        for id in self.registry.closed_ids() {
            let fault = self
                .registry
                .get_mut(id)
                .and_then(|conn| conn.transport.take_fault());
            let reason = fault.map_or(Disconnect::Local, Disconnect::from);
            self.close_connection(id, reason);
        }
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("connections", &self.registry.len())
            .field("pending", &self.pending.len())
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Stops a running [`Reactor`].
///
/// Sets the stop flag and wakes the poller, so a loop blocked in its
/// readiness wait exits promptly instead of waiting out the timeout.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    poll: Poll,
}

impl StopHandle {
    /// Requests a stop. The loop exits after finishing its current
    /// iteration, never mid-batch.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Err(e) = self.poll.notify() {
            warn!(error = %e, "could not wake the reactor for stop");
        }
    }
}
