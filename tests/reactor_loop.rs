//! Reactor Loop - E2E Tests
//!
//! Drives a real [`Reactor`] over localhost TCP sockets: plain echo
//! connections, reaping of dropped peers, and the full WebSocket stack
//! from accept through close handshake. The reactor runs on the test's
//! main thread; peers run on helper threads and stop the reactor
//! through a [`StopHandle`] when their part is done.

mod common;

use common::init_test_logging;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tidepool::ws::{CloseCode, ClosePayload, WsLink};
use tidepool::{
    factory_fn, ConnectionHandler, Disconnect, Reactor, StopHandle, TcpAcceptor, TcpConnection,
    Transport, WsClientFactory, WsConfig, WsHandler, WsServerFactory,
};

// ============================================================================
// Test Infrastructure
// ============================================================================

/// Binds a fresh localhost acceptor and returns it with its address.
fn open_acceptor() -> (TcpAcceptor, SocketAddr) {
    let mut acceptor = TcpAcceptor::bind("127.0.0.1:0");
    acceptor.open().expect("bind localhost");
    let addr = acceptor.local_addr().expect("bound address");
    (acceptor, addr)
}

fn connect_client(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect to reactor");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set read timeout");
    stream
}

/// Echoes every received chunk straight back.
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
}

// ============================================================================
// Plain TCP
// ============================================================================

#[test]
fn tcp_echo_round_trip() {
    init_test_logging();
    let (acceptor, addr) = open_acceptor();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.stop_handle();
    reactor.enqueue_connect(acceptor, factory_fn(|| Echo));

    let client = thread::spawn(move || {
        let mut stream = connect_client(addr);
        for payload in [&b"hello reactor"[..], &b"and again"[..]] {
            stream.write_all(payload).unwrap();
            let mut buf = vec![0u8; payload.len()];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(buf, payload);
        }
        handle.stop();
    });

    reactor.run().unwrap();
    client.join().unwrap();
}

#[test]
fn two_clients_are_echoed_independently() {
    init_test_logging();
    let (acceptor, addr) = open_acceptor();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.stop_handle();
    reactor.enqueue_connect(acceptor, factory_fn(|| Echo));

    let (done_tx, done_rx) = mpsc::channel();
    let mut clients = Vec::new();
    for payload in [&b"first client speaking"[..], &b"second one here"[..]] {
        let done = done_tx.clone();
        clients.push(thread::spawn(move || {
            let mut stream = connect_client(addr);
            stream.write_all(payload).unwrap();
            let mut buf = vec![0u8; payload.len()];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(buf, payload);
            done.send(()).unwrap();
        }));
    }

    let stopper = thread::spawn(move || {
        done_rx.recv().unwrap();
        done_rx.recv().unwrap();
        handle.stop();
    });

    reactor.run().unwrap();
    for client in clients {
        client.join().unwrap();
    }
    stopper.join().unwrap();
}

/// Records disconnect reasons and stops the reactor on the first one.
struct CloseRecorder {
    closed: Arc<Mutex<Vec<String>>>,
    stop: StopHandle,
}

impl ConnectionHandler for CloseRecorder {
    fn data_received(
        &mut self,
        _transport: &mut dyn Transport,
        _data: &[u8],
    ) -> Result<(), Disconnect> {
        Ok(())
    }

    fn connection_closed(&mut self, reason: &Disconnect) {
        self.closed.lock().unwrap().push(reason.to_string());
        self.stop.stop();
    }
}

#[test]
fn dropped_peer_is_reaped_and_reported_once() {
    init_test_logging();
    let (acceptor, addr) = open_acceptor();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.stop_handle();

    let closed = Arc::new(Mutex::new(Vec::new()));
    let factory = {
        let closed = Arc::clone(&closed);
        factory_fn(move || CloseRecorder {
            closed: Arc::clone(&closed),
            stop: handle.clone(),
        })
    };
    reactor.enqueue_connect(acceptor, factory);

    let client = thread::spawn(move || {
        let stream = connect_client(addr);
        // A touch of traffic proves the connection was registered
        // before the drop.
        (&stream).write_all(b"bye").unwrap();
        drop(stream);
    });

    reactor.run().unwrap();
    client.join().unwrap();

    assert_eq!(
        *closed.lock().unwrap(),
        vec!["peer closed the connection".to_owned()]
    );
    // Only the listener is left.
    assert_eq!(reactor.connection_count(), 1);
}

// ============================================================================
// WebSocket Over Real Sockets
// ============================================================================

#[derive(Default)]
struct Transcript {
    opened: usize,
    messages: Vec<String>,
    closes: Vec<Option<u16>>,
}

/// Server-side handler: records everything, echoes text messages.
struct RecordingEcho(Arc<Mutex<Transcript>>);

impl WsHandler for RecordingEcho {
    fn on_open(&mut self, _link: &mut WsLink<'_>) {
        self.0.lock().unwrap().opened += 1;
    }

    fn on_message(&mut self, link: &mut WsLink<'_>, text: &str) {
        self.0.lock().unwrap().messages.push(text.to_owned());
        link.send_text(text).unwrap();
    }

    fn on_close(&mut self, payload: &ClosePayload) {
        self.0.lock().unwrap().closes.push(payload.code);
    }
}

/// Reads one byte at a time so no frame bytes are swallowed with the
/// HTTP head.
fn read_http_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[test]
fn websocket_stack_against_a_raw_socket_client() {
    init_test_logging();
    let (acceptor, addr) = open_acceptor();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.stop_handle();

    let log = Arc::new(Mutex::new(Transcript::default()));
    let factory = {
        let log = Arc::clone(&log);
        WsServerFactory::new(WsConfig::default(), move || {
            RecordingEcho(Arc::clone(&log))
        })
    };
    reactor.enqueue_connect(acceptor, factory);

    let client = thread::spawn(move || {
        let mut stream = connect_client(addr);

        stream
            .write_all(
                b"GET /echo HTTP/1.1\r\n\
                  Host: example.com\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Version: 13\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  \r\n",
            )
            .unwrap();

        let head = read_http_head(&mut stream);
        assert!(head.starts_with("HTTP/1.1 101 WebSocket Accept\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));

        // RFC 6455 section 5.7: masked "Hello".
        stream
            .write_all(&[
                0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
            ])
            .unwrap();
        let mut echo = [0u8; 7];
        stream.read_exact(&mut echo).unwrap();
        assert_eq!(&echo, b"\x81\x05Hello");

        // Close with code 1000 (an all-zero mask key is still masked).
        stream
            .write_all(&[0x88, 0x82, 0x00, 0x00, 0x00, 0x00, 0x03, 0xe8])
            .unwrap();
        let mut close_echo = [0u8; 4];
        stream.read_exact(&mut close_echo).unwrap();
        assert_eq!(&close_echo, b"\x88\x02\x03\xe8");

        // The server hangs up after the close handshake.
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        handle.stop();
    });

    reactor.run().unwrap();
    client.join().unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.opened, 1);
    assert_eq!(log.messages, vec!["Hello".to_owned()]);
    assert_eq!(log.closes, vec![Some(1000)]);
}

/// Client-side handler for the loopback test: greets, then closes once
/// the echo returns, stopping the reactor when the close completes.
struct CloseAfterEcho {
    log: Arc<Mutex<Transcript>>,
    stop: StopHandle,
}

impl WsHandler for CloseAfterEcho {
    fn on_open(&mut self, link: &mut WsLink<'_>) {
        self.log.lock().unwrap().opened += 1;
        link.send_text("over the loopback").unwrap();
    }

    fn on_message(&mut self, link: &mut WsLink<'_>, text: &str) {
        self.log.lock().unwrap().messages.push(text.to_owned());
        link.close(CloseCode::Normal, "done").unwrap();
    }

    fn on_close(&mut self, payload: &ClosePayload) {
        self.log.lock().unwrap().closes.push(payload.code);
        self.stop.stop();
    }
}

#[test]
fn one_reactor_drives_both_ends_of_a_websocket() {
    init_test_logging();
    let (acceptor, addr) = open_acceptor();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.stop_handle();

    let server_log = Arc::new(Mutex::new(Transcript::default()));
    let server_factory = {
        let log = Arc::clone(&server_log);
        WsServerFactory::new(WsConfig::default(), move || {
            RecordingEcho(Arc::clone(&log))
        })
    };
    reactor.enqueue_connect(acceptor, server_factory);

    let client_log = Arc::new(Mutex::new(Transcript::default()));
    let client_factory = {
        let log = Arc::clone(&client_log);
        WsClientFactory::new(WsConfig::default(), addr.to_string(), "/echo", move || {
            CloseAfterEcho {
                log: Arc::clone(&log),
                stop: handle.clone(),
            }
        })
    };
    reactor.enqueue_connect(TcpConnection::connect(addr.to_string()), client_factory);

    reactor.run().unwrap();

    let server_log = server_log.lock().unwrap();
    assert_eq!(server_log.opened, 1);
    assert_eq!(server_log.messages, vec!["over the loopback".to_owned()]);
    assert_eq!(server_log.closes, vec![Some(1000)]);

    let client_log = client_log.lock().unwrap();
    assert_eq!(client_log.opened, 1);
    assert_eq!(client_log.messages, vec!["over the loopback".to_owned()]);
    assert_eq!(client_log.closes, vec![Some(1000)]);
}

// ============================================================================
// Stop Semantics
// ============================================================================

/// Stops the reactor from inside a data callback.
struct StopOnData {
    stop: StopHandle,
    got: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ConnectionHandler for StopOnData {
    fn data_received(
        &mut self,
        _transport: &mut dyn Transport,
        data: &[u8],
    ) -> Result<(), Disconnect> {
        self.got.lock().unwrap().push(data.to_vec());
        self.stop.stop();
        Ok(())
    }
}

#[test]
fn stopping_from_a_callback_returns_from_run() {
    init_test_logging();
    let (acceptor, addr) = open_acceptor();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.stop_handle();

    let got = Arc::new(Mutex::new(Vec::new()));
    let factory = {
        let got = Arc::clone(&got);
        factory_fn(move || StopOnData {
            stop: handle.clone(),
            got: Arc::clone(&got),
        })
    };
    reactor.enqueue_connect(acceptor, factory);

    let client = thread::spawn(move || {
        let mut stream = connect_client(addr);
        stream.write_all(b"enough").unwrap();
        // Hold the socket open; the reactor must exit anyway.
        thread::sleep(Duration::from_millis(50));
    });

    reactor.run().unwrap();
    client.join().unwrap();

    // Exactly one dispatch: the stop took effect before any further
    // readiness was served.
    let got = got.lock().unwrap();
    assert_eq!(got.len(), 1);
    assert!(b"enough".starts_with(got[0].as_slice()));
}

#[test]
fn stop_from_another_thread_interrupts_an_idle_reactor() {
    init_test_logging();
    let (acceptor, _addr) = open_acceptor();
    let mut reactor = Reactor::new().unwrap();
    let handle = reactor.stop_handle();
    reactor.enqueue_connect(acceptor, factory_fn(|| Echo));

    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.stop();
    });

    // No traffic at all: run() parks in poll until the notify lands.
    reactor.run().unwrap();
    stopper.join().unwrap();
}
