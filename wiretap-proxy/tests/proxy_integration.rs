//! Proxy-level integration tests: a trivial loopback TCP server stands in
//! for "the internet" while a real [`ProxyListener`] sits in front of it,
//! exercising plain forwarding, CONNECT tunneling, and MITM termination.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiretap_core::model::LogRecord;
use wiretap_proxy::{CaptureSink, CertificateManager, ProxyListener, ProxyOptions};

#[derive(Default)]
struct TestSink {
    records: Mutex<Vec<LogRecord>>,
}

impl CaptureSink for TestSink {
    fn capture(&self, record: LogRecord) {
        self.records.lock().unwrap().push(record);
    }
}

impl TestSink {
    fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }
}

/// Bind to an OS-assigned loopback port and hand back the address, without
/// holding the listener open — good enough for tests that need a port
/// number before the real listener (ProxyListener, rustls acceptor, ...)
/// takes ownership of it a moment later.
async fn reserve_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A one-shot HTTP/1.1 server: accepts a single connection, ignores the
/// request entirely beyond reading until the header terminator, and writes
/// back a fixed response carrying both a keep-alive header (hop-by-hop,
/// must not survive into a captured LogRecord) and an ordinary one.
async fn spawn_http_upstream(body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_request_head(&mut stream).await;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\nX-Upstream: yes\r\n\r\n{}",
            body.len(),
            body,
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        let _ = stream.shutdown().await;
    });
    addr
}

/// Reads and discards bytes up to the blank line ending the request head.
async fn read_request_head(stream: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if stream.read_exact(&mut byte).await.is_err() {
            break;
        }
        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }
}

async fn spawn_proxy(mitm_enabled: bool) -> (SocketAddr, Arc<TestSink>) {
    let addr = reserve_addr().await;
    let sink = Arc::new(TestSink::default());
    let certs = if mitm_enabled {
        Some(Arc::new(CertificateManager::generate().unwrap()))
    } else {
        None
    };
    let opts = ProxyOptions {
        listen_addr: addr,
        mitm_enabled,
        connect_timeout: Duration::from_secs(2),
        max_body_bytes: 65536,
    };
    let proxy = Arc::new(ProxyListener::new(opts, sink.clone(), certs).unwrap());
    tokio::spawn(proxy.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, sink)
}

async fn read_response(stream: &mut tokio::net::TcpStream) -> String {
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf[..n]).to_string()
}

#[tokio::test]
async fn forward_proxy_relays_and_strips_hop_by_hop_before_capture() {
    let upstream_addr = spawn_http_upstream("hello from upstream").await;
    let (proxy_addr, sink) = spawn_proxy(false).await;

    let client = reqwest::Client::builder()
        .proxy(reqwest::Proxy::http(format!("http://{proxy_addr}")).unwrap())
        .build()
        .unwrap();

    let resp = client
        .get(format!("http://{upstream_addr}/foo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "hello from upstream");

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.host, upstream_addr.to_string());
    assert_eq!(record.status, Some(200));

    let response_headers = record.response.as_ref().unwrap().headers.as_ref().unwrap();
    assert!(!response_headers.contains_key("connection"));
    assert!(response_headers.contains_key("x-upstream"));
}

#[tokio::test]
async fn unresolvable_request_target_returns_400() {
    let (proxy_addr, sink) = spawn_proxy(false).await;

    let mut stream = tokio::net::TcpStream::connect(proxy_addr).await.unwrap();
    stream
        .write_all(b"GET /no-host-header HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 400"), "got: {response}");
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn connect_tunnel_relays_bytes_and_captures_authority_with_port() {
    let echo_addr = reserve_addr().await;
    tokio::spawn(async move {
        let listener = TcpListener::bind(echo_addr).await.unwrap();
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        stream.write_all(&buf[..n]).await.unwrap();
    });

    let (proxy_addr, sink) = spawn_proxy(false).await;
    let mut stream = tokio::net::TcpStream::connect(proxy_addr).await.unwrap();
    let authority = echo_addr.to_string();
    stream
        .write_all(format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n").as_bytes())
        .await
        .unwrap();

    let mut head = [0u8; 64];
    let n = stream.read(&mut head).await.unwrap();
    assert!(String::from_utf8_lossy(&head[..n]).starts_with("HTTP/1.1 200"));

    stream.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 64];
    let n = stream.read(&mut echoed).await.unwrap();
    assert_eq!(&echoed[..n], b"ping");

    drop(stream);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "CONNECT");
    assert_eq!(records[0].host, authority);
    assert_eq!(records[0].status, Some(200));
}

#[tokio::test]
async fn connect_tunnel_dial_failure_captures_502() {
    let dead_addr = reserve_addr().await; // reserved then dropped, nothing listens here
    let (proxy_addr, sink) = spawn_proxy(false).await;

    let mut stream = tokio::net::TcpStream::connect(proxy_addr).await.unwrap();
    let authority = dead_addr.to_string();
    stream
        .write_all(format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let response = read_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 502"), "got: {response}");

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "CONNECT");
    assert_eq!(records[0].host, authority);
    assert_eq!(records[0].status, Some(502));
}

#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// The MITM acceptor terminates TLS from the client with a locally-minted
/// leaf cert, then re-originates the decrypted request upstream over a
/// *real* TLS connection via `ForwardProxy`. Our loopback stand-in only
/// speaks plain HTTP, so that re-dial fails and the exchange is captured
/// as a 502 — which is exactly what should happen, and still proves the
/// decrypted request (method, `host:port`, `https://` scheme) made it
/// through the TLS-terminating leg intact.
#[tokio::test]
async fn mitm_terminates_tls_and_captures_decrypted_request() {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let upstream_addr = reserve_addr().await; // reserved, never a TLS listener
    let (proxy_addr, sink) = spawn_proxy(true).await;

    let mut stream = tokio::net::TcpStream::connect(proxy_addr).await.unwrap();
    let authority = upstream_addr.to_string();
    stream
        .write_all(format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut head = [0u8; 64];
    let n = stream.read(&mut head).await.unwrap();
    assert!(String::from_utf8_lossy(&head[..n]).starts_with("HTTP/1.1 200"));

    let client_config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
    let server_name = rustls::pki_types::ServerName::try_from(upstream_addr.ip().to_string()).unwrap();
    let mut tls_stream = connector.connect(server_name, stream).await.unwrap();

    tls_stream
        .write_all(format!("GET /secret HTTP/1.1\r\nHost: {authority}\r\nConnection: close\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut buf = Vec::new();
    let _ = tls_stream.read_to_end(&mut buf).await;
    let response = String::from_utf8_lossy(&buf);
    assert!(response.starts_with("HTTP/1.1 502"), "got: {response}");

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].method, "GET");
    assert_eq!(records[0].host, authority);
    assert!(records[0].url.starts_with("https://"));
    assert_eq!(records[0].status, Some(502));
}
