//! Raw `CONNECT` tunneling: relay bytes between client and upstream without
//! touching TLS. A single [`LogRecord`] is emitted per tunnel, with
//! `method = "CONNECT"` and no captured bodies.

use crate::capture::CaptureSink;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use wiretap_core::model::{LogRecord, RequestPart};

fn record(authority: &str, status: u16, started: Instant) -> LogRecord {
    LogRecord {
        id: LogRecord::new_id(),
        ts: LogRecord::now_ms(),
        method: "CONNECT".to_string(),
        url: format!("https://{authority}"),
        host: authority.to_string(),
        path: "/".to_string(),
        status: Some(status),
        duration_ms: Some(started.elapsed().as_millis() as u64),
        request: RequestPart::default(),
        response: None,
    }
}

/// Relay bytes between the already-upgraded client connection and an
/// already-dialed upstream socket until either side closes, then emit the
/// tunnel's single `status: 200` LogRecord.
pub async fn relay(
    upgraded: hyper::upgrade::Upgraded,
    mut upstream: TcpStream,
    authority: String,
    started: Instant,
    sink: Arc<dyn CaptureSink>,
) {
    let mut client = TokioIo::new(upgraded);

    if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        // Client/upstream disconnects surface as plain EPIPE/ECONNRESET here;
        // they are the normal end of a tunnel, not a proxy failure.
        tracing::trace!(%authority, error = %e, "tunnel closed");
    }
    let _ = upstream.shutdown().await;

    sink.capture(record(&authority, 200, started));
}

/// Emitted when the upstream dial for a `CONNECT` fails before any upgrade
/// takes place; no bytes are ever relayed.
pub fn emit_dial_failure(authority: &str, started: Instant, sink: &dyn CaptureSink) {
    sink.capture(record(authority, 502, started));
}
