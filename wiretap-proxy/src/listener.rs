//! Accepts client connections and dispatches each request: `CONNECT` goes to
//! the raw tunnel (or MITM, if enabled), everything else goes to the
//! forwarding proxy.

use crate::capture::CaptureSink;
use crate::cert::CertificateManager;
use crate::forward::ForwardProxy;
use crate::mitm::MitmProxy;
use crate::tunnel;
use crate::{full_body, BoxBody};
use http::{Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    pub listen_addr: SocketAddr,
    pub mitm_enabled: bool,
    pub connect_timeout: Duration,
    pub max_body_bytes: usize,
}

pub struct ProxyListener {
    opts: ProxyOptions,
    forward: Arc<ForwardProxy>,
    mitm: Option<Arc<MitmProxy>>,
}

impl ProxyListener {
    pub fn new(
        opts: ProxyOptions,
        sink: Arc<dyn CaptureSink>,
        certs: Option<Arc<CertificateManager>>,
    ) -> anyhow::Result<Self> {
        let forward = Arc::new(ForwardProxy::new(
            sink.clone(),
            opts.connect_timeout,
            opts.max_body_bytes,
        )?);

        let mitm = if opts.mitm_enabled {
            let certs = match certs {
                Some(certs) => certs,
                None => Arc::new(CertificateManager::generate()?),
            };
            Some(Arc::new(MitmProxy::new(certs, forward.clone())))
        } else {
            None
        };

        Ok(Self { opts, forward, mitm })
    }

    /// The CA certificate clients should trust, when MITM mode is enabled.
    pub fn ca_certificate_pem(&self) -> Option<&str> {
        self.mitm.as_deref().map(MitmProxy::ca_certificate_pem)
    }

    /// Bind and serve forever, spawning one task per accepted connection.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.opts.listen_addr).await?;
        tracing::info!(addr = %self.opts.listen_addr, "proxy listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let this = self.clone();
            tokio::spawn(async move {
                this.serve_connection(stream, peer).await;
            });
        }
    }

    async fn serve_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let io = TokioIo::new(stream);
        let forward = self.forward.clone();
        let mitm = self.mitm.clone();

        let service = service_fn(move |req| {
            let forward = forward.clone();
            let mitm = mitm.clone();
            async move { dispatch(req, forward, mitm).await }
        });

        if let Err(e) = hyper::server::conn::http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            tracing::trace!(%peer, error = %e, "client connection closed");
        }
    }
}

async fn dispatch(
    req: Request<Incoming>,
    forward: Arc<ForwardProxy>,
    mitm: Option<Arc<MitmProxy>>,
) -> Result<Response<BoxBody>, Infallible> {
    if req.method() == Method::CONNECT {
        return Ok(handle_connect(req, forward, mitm).await);
    }
    Ok(forward.handle(req, "http").await)
}

/// MITM mode never dials an upstream for the `CONNECT` itself (that happens
/// per decrypted request once TLS is terminated), so it always accepts
/// immediately. Plain tunneling dials the real upstream first and only
/// reports success to the client once that dial succeeds, per the
/// `HTTP/1.1 200`/`502` contract.
async fn handle_connect(
    req: Request<Incoming>,
    forward: Arc<ForwardProxy>,
    mitm: Option<Arc<MitmProxy>>,
) -> Response<BoxBody> {
    let started = Instant::now();
    let Some(authority) = req.uri().authority().map(|a| a.to_string()) else {
        return bad_request("CONNECT target must be host:port");
    };

    if let Some(mitm) = mitm {
        let on_upgrade = hyper::upgrade::on(req);
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => mitm.serve(upgraded, authority).await,
                Err(e) => tracing::debug!(error = %e, "CONNECT upgrade failed"),
            }
        });
        return connect_response(StatusCode::OK);
    }

    let sink = forward.sink();
    match TcpStream::connect(&authority).await {
        Ok(upstream) => {
            let on_upgrade = hyper::upgrade::on(req);
            tokio::spawn(async move {
                match on_upgrade.await {
                    Ok(upgraded) => tunnel::relay(upgraded, upstream, authority, started, sink).await,
                    Err(e) => tracing::debug!(error = %e, "CONNECT upgrade failed"),
                }
            });
            connect_response(StatusCode::OK)
        }
        Err(e) => {
            tracing::debug!(%authority, error = %e, "CONNECT upstream dial failed");
            tunnel::emit_dial_failure(&authority, started, sink.as_ref());
            connect_response(StatusCode::BAD_GATEWAY)
        }
    }
}

fn connect_response(status: StatusCode) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .body(full_body(&b""[..]))
        .unwrap()
}

fn bad_request(message: &str) -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(full_body(message.to_string()))
        .unwrap()
}
