//! TLS termination for `CONNECT` tunnels that opt into MITM capture: a
//! locally-issued leaf cert is presented to the client, decrypted traffic is
//! served as plain HTTP, and each request is re-originated upstream over a
//! fresh TLS connection by [`ForwardProxy`].

use crate::cert::CertificateManager;
use crate::forward::ForwardProxy;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

pub struct MitmProxy {
    certs: Arc<CertificateManager>,
    forward: Arc<ForwardProxy>,
}

impl MitmProxy {
    pub fn new(certs: Arc<CertificateManager>, forward: Arc<ForwardProxy>) -> Self {
        Self { certs, forward }
    }

    pub fn ca_certificate_pem(&self) -> &str {
        self.certs.ca_certificate_pem()
    }

    /// Terminate TLS on an already-upgraded `CONNECT` stream for `authority`
    /// and serve decrypted HTTP requests from it until the client or
    /// upstream closes the connection.
    pub async fn serve(&self, upgraded: hyper::upgrade::Upgraded, authority: String) {
        // Bare hostname only: an SNI/leaf-cert name never carries a port.
        // Request capture re-derives `host` (with port) downstream in
        // ForwardProxy::handle, which this call does not affect.
        let host = authority
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| authority.clone());

        let server_config = match self.certs.server_config_for(&host) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(%host, error = %e, "failed to generate MITM leaf certificate");
                return;
            }
        };

        let acceptor = TlsAcceptor::from(server_config);
        let tls_stream = match acceptor.accept(TokioIo::new(upgraded)).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(%host, error = %e, "TLS handshake with client failed");
                return;
            }
        };

        let io = TokioIo::new(tls_stream);
        let forward = self.forward.clone();
        let service = service_fn(move |req| {
            let forward = forward.clone();
            async move { Ok::<_, Infallible>(forward.handle(req, "https").await) }
        });

        if let Err(e) = hyper::server::conn::http1::Builder::new()
            .preserve_header_case(true)
            .title_case_headers(true)
            .serve_connection(io, service)
            .await
        {
            tracing::trace!(%host, error = %e, "MITM connection closed");
        }
    }
}
