//! Connection handlers and the factories that mint them.
//!
//! A [`ConnectionHandler`] owns the application logic for one connection:
//! the reactor calls it with the bytes it read and with lifecycle
//! notifications. A [`HandlerFactory`] is attached to a listening
//! transport and mints a fresh handler for every accepted peer.
//!
//! Handlers never see the poller. They receive the transport itself and
//! may write to it or close it from any callback; the reactor notices a
//! handler-initiated close on its next reconciliation pass.
//!
//! # Example
//!
//! An echo handler that mirrors every chunk back to the peer:
//!
//! ```
//! use tidepool::error::Disconnect;
//! use tidepool::handler::ConnectionHandler;
//! use tidepool::transport::Transport;
//!
//! struct Echo;
//!
//! impl ConnectionHandler for Echo {
//!     fn data_received(
//!         &mut self,
//!         transport: &mut dyn Transport,
//!         data: &[u8],
//!     ) -> Result<(), Disconnect> {
//!         transport.write_all(data)?;
//!         Ok(())
//!     }
//! }
//! ```

use std::io;

use crate::error::Disconnect;
use crate::transport::Transport;

/// Application logic for a single connection.
pub trait ConnectionHandler {
    /// Called once when the connection enters the reactor.
    ///
    /// For accepted peers this runs before the first byte is read; for
    /// outbound connections it runs right after the connect succeeds.
    fn connected(&mut self, _transport: &mut dyn Transport) {}

    /// Called with each chunk of bytes read from the transport.
    ///
    /// Returning an error disconnects the peer; the same reason is passed
    /// to [`ConnectionHandler::connection_closed`] afterwards.
    fn data_received(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect>;

    /// Called exactly once when the connection leaves the reactor.
    fn connection_closed(&mut self, _reason: &Disconnect) {}
}

/// Builds [`ConnectionHandler`]s and observes the lifecycle of the
/// transport it was attached to.
///
/// Every transport handed to the reactor comes with a factory. For an
/// outbound connection the factory mints that connection's handler; for a
/// listener it mints one handler per accepted peer. Accepted peers do not
/// get a factory of their own.
pub trait HandlerFactory {
    /// Called just before the reactor opens the factory's transport.
    fn starting(&mut self) {}

    /// Called when the factory's transport opened successfully, before
    /// its handler is minted.
    fn connected(&mut self, _transport: &mut dyn Transport) {}

    /// Produces a handler: for the factory's own connection, or for the
    /// next peer accepted on its listener.
    fn handler(&mut self) -> Box<dyn ConnectionHandler>;

    /// Called when the factory's transport fails to open. The transport
    /// is discarded without entering the reactor.
    fn fail(&mut self, _error: &io::Error) {}

    /// Called when the factory's own connection closes. Peers accepted
    /// on a listener report only through their handler.
    fn closed(&mut self, _reason: &Disconnect) {}
}

/// Wraps a closure as a [`HandlerFactory`].
///
/// Convenient for servers whose handlers carry no shared state:
///
/// ```
/// use tidepool::handler::{factory_fn, ConnectionHandler};
/// # use tidepool::error::Disconnect;
/// # use tidepool::transport::Transport;
/// # struct Echo;
/// # impl ConnectionHandler for Echo {
/// #     fn data_received(
/// #         &mut self,
/// #         transport: &mut dyn Transport,
/// #         data: &[u8],
/// #     ) -> Result<(), Disconnect> {
/// #         transport.write_all(data)?;
/// #         Ok(())
/// #     }
/// # }
/// let factory = factory_fn(|| Echo);
/// ```
pub fn factory_fn<H, F>(make: F) -> impl HandlerFactory
where
    H: ConnectionHandler + 'static,
    F: FnMut() -> H,
{
    struct FnFactory<F>(F);

    impl<H, F> HandlerFactory for FnFactory<F>
    where
        H: ConnectionHandler + 'static,
        F: FnMut() -> H,
    {
        fn handler(&mut self) -> Box<dyn ConnectionHandler> {
            Box::new((self.0)())
        }
    }

    FnFactory(make)
}
