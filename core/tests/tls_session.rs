/*
 * tls_session.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration test for Gemini sessions over real TLS. Each test starts a local rustls
 * server on a thread with the self-signed certificates in tests/data and drives the client
 * through it: SNI, trust policies, status line handling, timeouts and cancellation.
 *
 * Run with:
 *   cargo test -p gemini_core --test tls_session -- --nocapture
 */

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use gemini_core::{
    fetch, Connector, PinnedCertificates, Session, SessionConfig, SessionState, WebPkiPolicy,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};

type ServerStream = StreamOwned<ServerConnection, TcpStream>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn load(cert_pem: &[u8], key_pem: &[u8]) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    let (_, cert) = pem_rfc7468::decode_vec(cert_pem).unwrap();
    let (label, key) = pem_rfc7468::decode_vec(key_pem).unwrap();
    assert_eq!(label, "PRIVATE KEY");
    (
        CertificateDer::from(cert),
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key)),
    )
}

fn localhost_cert() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    load(
        include_bytes!("data/localhost.cert.pem"),
        include_bytes!("data/localhost.key.pem"),
    )
}

fn other_cert() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
    load(
        include_bytes!("data/other.cert.pem"),
        include_bytes!("data/other.key.pem"),
    )
}

fn server_config(cert: CertificateDer<'static>, key: PrivateKeyDer<'static>) -> Arc<ServerConfig> {
    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    Arc::new(config)
}

/// What the server observed for one connection.
#[derive(Debug)]
struct Seen {
    sni: Option<String>,
    request: String,
}

/// How the server ends each connection after replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hangup {
    /// TLS close_notify, then TCP close.
    CloseNotify,
    /// TCP close only, as many servers do.
    Drop,
}

/// Accept `connections` connections on an ephemeral port. For each: read the request line,
/// report it, let `respond` write the reply, then close with close_notify.
fn spawn_server<F>(
    config: Arc<ServerConfig>,
    connections: usize,
    respond: F,
) -> (u16, mpsc::Receiver<Seen>)
where
    F: Fn(&mut ServerStream) + Send + 'static,
{
    spawn_server_with(config, connections, Hangup::CloseNotify, respond)
}

fn spawn_server_with<F>(
    config: Arc<ServerConfig>,
    connections: usize,
    hangup: Hangup,
    respond: F,
) -> (u16, mpsc::Receiver<Seen>)
where
    F: Fn(&mut ServerStream) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for _ in 0..connections {
            let Ok((sock, _)) = listener.accept() else {
                return;
            };
            let conn = ServerConnection::new(config.clone()).unwrap();
            let mut tls = StreamOwned::new(conn, sock);
            let mut request = String::new();
            if BufReader::new(&mut tls).read_line(&mut request).is_err() {
                // Client rejected the certificate or hung up.
                continue;
            }
            let sni = tls.conn.server_name().map(str::to_owned);
            let _ = tx.send(Seen { sni, request });
            respond(&mut tls);
            if hangup == Hangup::CloseNotify {
                tls.conn.send_close_notify();
            }
            let _ = tls.flush();
        }
    });
    (port, rx)
}

fn reply(bytes: &'static [u8]) -> impl Fn(&mut ServerStream) + Send + 'static {
    move |tls: &mut ServerStream| {
        let _ = tls.write_all(bytes);
    }
}

#[test]
fn status_and_body_with_sni() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let (port, seen) = spawn_server(
        server_config(cert, key),
        1,
        reply(b"20 text/gemini; lang=en\r\n# Hello\n=> /next Next\n"),
    );
    let connector = Connector::default_connector().unwrap();
    let request = format!("gemini://localhost:{}/", port);

    let mut session = Session::connect("localhost", Some(port), &request, connector).unwrap();
    assert_eq!(session.code(), 20);
    assert_eq!(session.meta(), "text/gemini; lang=en");
    assert!(session.channel().unwrap().peer_certificates().is_some());

    let mut body = String::new();
    session.body().read_to_string(&mut body).unwrap();
    assert_eq!(body, "# Hello\n=> /next Next\n");
    assert_eq!(session.state(), SessionState::BodyStreaming);
    assert!(!session.truncated());
    session.close().unwrap();
    session.close().unwrap();

    let seen = seen.recv().unwrap();
    assert_eq!(seen.sni.as_deref(), Some("localhost"));
    assert_eq!(seen.request, format!("{}\r\n", request));
}

#[test]
fn status_only_reply_has_empty_body() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let (port, _seen) = spawn_server(server_config(cert, key), 1, reply(b"20 text/plain\r\n"));
    let connector = Connector::default_connector().unwrap();

    let mut session =
        Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap();
    assert_eq!(session.code(), 20);
    assert_eq!(session.meta(), "text/plain");
    assert!(session.read_body_to_end().unwrap().is_empty());
    session.close().unwrap();
}

#[test]
fn tcp_close_without_close_notify_ends_body() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let config = server_config(cert, key);
    let connector = Connector::default_connector().unwrap();

    let (port, _seen) = spawn_server_with(config.clone(), 2, Hangup::Drop, reply(b"20 text/plain\r\n"));
    let mut session =
        Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap();
    assert_eq!(session.code(), 20);
    assert_eq!(session.meta(), "text/plain");
    assert!(session.read_body_to_end().unwrap().is_empty());
    assert!(session.truncated());
    session.close().unwrap();

    let mut session =
        Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap();
    let mut buf = Vec::new();
    session.body().read_to_end(&mut buf).unwrap();
    assert!(buf.is_empty());

    let (port, _seen) = spawn_server_with(
        config,
        2,
        Hangup::Drop,
        reply(b"20 text/gemini\r\nhello world\n"),
    );
    let mut session =
        Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap();
    assert_eq!(session.read_body_to_end().unwrap(), b"hello world\n");
    assert!(session.truncated());

    let mut session =
        Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap();
    let mut body = String::new();
    session.body().read_to_string(&mut body).unwrap();
    assert_eq!(body, "hello world\n");
    assert!(session.truncated());
}

#[test]
fn ip_literal_connects_without_sni() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let (port, seen) = spawn_server(server_config(cert, key), 1, reply(b"51 Not found\r\n"));
    let connector = Connector::default_connector().unwrap();

    let session =
        Session::connect("127.0.0.1", Some(port), "gemini://127.0.0.1/missing", connector).unwrap();
    assert_eq!(session.code(), 51);
    assert_eq!(session.meta(), "Not found");
    assert_eq!(seen.recv().unwrap().sni, None);
}

#[test]
fn malformed_status_over_tls() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let config = server_config(cert, key);
    let connector = Connector::default_connector().unwrap();

    let (port, _seen) = spawn_server(config.clone(), 1, reply(b"20text/plain\r\n"));
    let err = Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap_err();
    assert!(err.is_malformed(), "{err}");

    let (port, _seen) = spawn_server(config.clone(), 1, reply(b"OK text\r\n"));
    let err = Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap_err();
    assert!(err.is_malformed(), "{err}");

    let (port, _seen) = spawn_server(config.clone(), 1, |tls: &mut ServerStream| {
        let _ = tls.write_all(&[b'x'; 1028]);
    });
    let err = Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap_err();
    assert!(err.is_malformed(), "{err}");

    let (port, _seen) = spawn_server(config, 1, reply(b""));
    let err = Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap_err();
    assert!(err.is_malformed(), "{err}");
}

#[test]
fn fetch_sends_uri_as_request_line() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let (port, seen) = spawn_server(
        server_config(cert, key),
        1,
        reply(b"30 gemini://localhost/elsewhere\r\n"),
    );
    let connector = Connector::default_connector().unwrap();
    let uri = format!("gemini://localhost:{}/old?q=1", port);

    let session = fetch(&uri, connector).unwrap();
    assert_eq!(session.code(), 30);
    assert_eq!(session.meta(), "gemini://localhost/elsewhere");
    assert_eq!(seen.recv().unwrap().request, format!("{}\r\n", uri));
}

#[test]
fn pinned_policy_rejects_changed_certificate() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let fingerprint = PinnedCertificates::fingerprint(cert.as_ref());
    let (first_port, _seen) = spawn_server(server_config(cert, key), 2, reply(b"20 text/plain\r\n"));
    let (other, other_key) = other_cert();
    let (second_port, _seen2) = spawn_server(server_config(other, other_key), 1, reply(b"20 text/plain\r\n"));

    let pins = Arc::new(PinnedCertificates::new());
    let connector = SessionConfig::new()
        .with_policy(pins.clone())
        .connector()
        .unwrap();

    let session =
        Session::connect("localhost", Some(first_port), "gemini://localhost/", &connector).unwrap();
    assert_eq!(session.code(), 20);
    drop(session);
    assert_eq!(pins.pinned("localhost"), Some(fingerprint));

    // Same certificate again is fine.
    Session::connect("localhost", Some(first_port), "gemini://localhost/", &connector).unwrap();

    // Same host, different certificate.
    let err = Session::connect("localhost", Some(second_port), "gemini://localhost/", &connector)
        .unwrap_err();
    assert!(err.is_transport(), "{err}");
}

#[test]
fn webpki_policy_rejects_self_signed() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let (port, _seen) = spawn_server(server_config(cert, key), 1, reply(b"20 text/plain\r\n"));
    let connector = SessionConfig::new()
        .with_policy(Arc::new(WebPkiPolicy::new().unwrap()))
        .connector()
        .unwrap();

    let err = Session::connect("localhost", Some(port), "gemini://localhost/", &connector).unwrap_err();
    assert!(err.is_transport(), "{err}");
}

#[test]
fn read_timeout_bounds_a_silent_server() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let (port, _seen) = spawn_server(server_config(cert, key), 1, move |_tls: &mut ServerStream| {
        let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(10));
    });
    let connector = SessionConfig::new()
        .with_read_timeout(Duration::from_millis(200))
        .connector()
        .unwrap();

    let err = Session::connect("localhost", Some(port), "gemini://localhost/", &connector).unwrap_err();
    assert!(err.is_transport(), "{err}");
    let _ = release_tx.send(());
}

#[test]
fn cancel_unblocks_body_read() {
    init_tracing();
    let (cert, key) = localhost_cert();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Mutex::new(release_rx);
    let (port, _seen) = spawn_server(server_config(cert, key), 1, move |tls: &mut ServerStream| {
        let _ = tls.write_all(b"20 text/plain\r\npartial");
        let _ = tls.flush();
        let _ = release_rx.lock().unwrap().recv_timeout(Duration::from_secs(10));
    });
    let connector = Connector::default_connector().unwrap();

    let mut session =
        Session::connect("localhost", Some(port), "gemini://localhost/", connector).unwrap();
    let handle = session.cancel_handle().unwrap();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.cancel().unwrap();
    });

    // Either an error (no close_notify) or end of stream; it must not hang.
    let mut buf = Vec::new();
    let _ = session.body().read_to_end(&mut buf);
    canceller.join().unwrap();
    session.close().unwrap();
    assert!(session.cancel_handle().is_err());
    let _ = release_tx.send(());
}
