//! Connection bookkeeping keyed by stable ids.
//!
//! The reactor dispatches a readiness batch against ids, not positions,
//! so removing one connection mid-batch can never shift or skip another.
//! Ids are minted from a monotonic counter and never reused; a stale id
//! from an earlier batch simply looks up to nothing.

use std::collections::HashMap;

use crate::handler::{ConnectionHandler, HandlerFactory};
use crate::transport::Transport;

/// Stable identity of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ConnId(pub(crate) usize);

/// One live connection: its transport, its handler, and (for transports
/// the reactor opened itself) the factory that built it. Peers accepted
/// on a listener carry no factory.
pub(crate) struct Connection {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) factory: Option<Box<dyn HandlerFactory>>,
    pub(crate) handler: Box<dyn ConnectionHandler>,
}

pub(crate) struct Registry {
    connections: HashMap<usize, Connection>,
    next_id: usize,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
        }
    }

    /// Adds a connection and mints its id.
    pub(crate) fn insert(&mut self, connection: Connection) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.connections.insert(id.0, connection);
        id
    }

    pub(crate) fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.connections.get_mut(&id.0)
    }

    pub(crate) fn remove(&mut self, id: ConnId) -> Option<Connection> {
        self.connections.remove(&id.0)
    }

    /// Ids of connections whose transport closed outside the read path.
    pub(crate) fn closed_ids(&self) -> Vec<ConnId> {
        self.connections
            .iter()
            .filter(|(_, conn)| !conn.transport.is_open())
            .map(|(&id, _)| ConnId(id))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Disconnect;
    use crate::transport::TransportRead;
    use std::io;
    use std::os::unix::io::RawFd;

    #[derive(Debug)]
    struct FlagTransport {
        open: bool,
    }

    impl Transport for FlagTransport {
        fn open(&mut self) -> io::Result<()> {
            self.open = true;
            Ok(())
        }

        fn read(&mut self, _max: usize) -> TransportRead {
            TransportRead::NoData
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            Ok(data.len())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn raw_fd(&self) -> RawFd {
            -1
        }
    }

    struct NoopHandler;

    impl ConnectionHandler for NoopHandler {
        fn data_received(
            &mut self,
            _transport: &mut dyn Transport,
            _data: &[u8],
        ) -> Result<(), Disconnect> {
            Ok(())
        }
    }

    fn connection(open: bool) -> Connection {
        Connection {
            transport: Box::new(FlagTransport { open }),
            factory: None,
            handler: Box::new(NoopHandler),
        }
    }

    #[test]
    fn ids_are_distinct_and_never_reused() {
        let mut registry = Registry::new();
        let first = registry.insert(connection(true));
        let second = registry.insert(connection(true));
        assert_ne!(first, second);

        registry.remove(first).unwrap();
        let third = registry.insert(connection(true));
        assert_ne!(third, first);
        assert_ne!(third, second);
    }

    #[test]
    fn removed_ids_look_up_to_nothing() {
        let mut registry = Registry::new();
        let id = registry.insert(connection(true));
        assert!(registry.get_mut(id).is_some());
        registry.remove(id).unwrap();
        assert!(registry.get_mut(id).is_none());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn closed_ids_reports_only_closed_transports() {
        let mut registry = Registry::new();
        let live = registry.insert(connection(true));
        let dead = registry.insert(connection(false));
        let closed = registry.closed_ids();
        assert_eq!(closed, vec![dead]);
        assert!(registry.get_mut(live).is_some());
        assert_eq!(registry.len(), 2);
    }
}
