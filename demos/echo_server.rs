//! A plain TCP echo server on the reactor.
//!
//! Every accepted connection gets its own handler that writes received
//! chunks straight back.
//!
//! # Running
//!
//! ```bash
//! cargo run --example echo_server
//! ```
//!
//! Then from another terminal: `nc 127.0.0.1 9000`.

use tidepool::{factory_fn, ConnectionHandler, Disconnect, Reactor, TcpAcceptor, Transport};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Echo;

impl ConnectionHandler for Echo {
    fn data_received(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect> {
        transport.write_all(data)?;
        Ok(())
    }

    fn connection_closed(&mut self, reason: &Disconnect) {
        info!(%reason, "peer left");
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut reactor = Reactor::new()?;
    reactor.enqueue_connect(TcpAcceptor::bind("127.0.0.1:9000"), factory_fn(|| Echo));
    info!("echo server listening on 127.0.0.1:9000");
    reactor.run()
}
