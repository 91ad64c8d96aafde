//! Sends one line to an echo server and prints the reply.
//!
//! Demonstrates the outbound-connect path: the same reactor that serves
//! listeners also drives client connections.
//!
//! # Running
//!
//! ```bash
//! cargo run --example echo_server   # in one terminal
//! cargo run --example echo_client   # in another
//! ```
//!
//! An alternative target can be given as the first argument.

use tidepool::{
    factory_fn, ConnectionHandler, Disconnect, Reactor, StopHandle, TcpConnection, Transport,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Greeter {
    stop: StopHandle,
}

impl ConnectionHandler for Greeter {
    fn connected(&mut self, transport: &mut dyn Transport) {
        if let Err(e) = transport.write_all(b"hello from tidepool\n") {
            warn!(error = %e, "could not send greeting");
        }
    }

    fn data_received(
        &mut self,
        transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect> {
        info!(reply = %String::from_utf8_lossy(data).trim_end(), "echo came back");
        transport.close();
        Ok(())
    }

    fn connection_closed(&mut self, reason: &Disconnect) {
        info!(%reason, "connection over");
        self.stop.stop();
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_owned());

    let mut reactor = Reactor::new()?;
    let stop = reactor.stop_handle();
    reactor.enqueue_connect(
        TcpConnection::connect(target),
        factory_fn(move || Greeter { stop: stop.clone() }),
    );
    reactor.run()
}
