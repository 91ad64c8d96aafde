//! A WebSocket echo server.
//!
//! Text and binary messages come back verbatim; pings are answered
//! automatically.
//!
//! # Running
//!
//! ```bash
//! cargo run --example ws_echo_server
//! ```
//!
//! Try it with [websocat](https://github.com/vi/websocat):
//!
//! ```bash
//! websocat ws://127.0.0.1:9001/
//! ```
//!
//! or from a browser console:
//!
//! ```text
//! s = new WebSocket("ws://127.0.0.1:9001/");
//! s.onmessage = (m) => console.log(m.data);
//! s.onopen = () => s.send("hello");
//! ```

use bytes::Bytes;
use tidepool::ws::ClosePayload;
use tidepool::{Reactor, TcpAcceptor, WsConfig, WsHandler, WsLink, WsServerFactory};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct Echo;

impl WsHandler for Echo {
    fn on_open(&mut self, link: &mut WsLink<'_>) {
        info!(protocol = ?link.protocol(), "client connected");
    }

    fn on_message(&mut self, link: &mut WsLink<'_>, text: &str) {
        if let Err(e) = link.send_text(text) {
            warn!(error = %e, "echo failed");
        }
    }

    fn on_binary(&mut self, link: &mut WsLink<'_>, data: &Bytes) {
        if let Err(e) = link.send_binary(data) {
            warn!(error = %e, "echo failed");
        }
    }

    fn on_close(&mut self, payload: &ClosePayload) {
        info!(code = ?payload.code, reason = %payload.reason, "client left");
    }
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut reactor = Reactor::new()?;
    reactor.enqueue_connect(
        TcpAcceptor::bind("127.0.0.1:9001"),
        WsServerFactory::new(WsConfig::default(), || Echo),
    );
    info!("websocket echo server on ws://127.0.0.1:9001/");
    reactor.run()
}
