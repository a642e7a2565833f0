//! Intercepting HTTP(S) proxy: absolute-form/origin-form forwarding for
//! plain HTTP, raw `CONNECT` tunneling for HTTPS, and an optional MITM mode
//! that terminates TLS locally to capture encrypted bodies too.

pub mod capture;
pub mod cert;
pub mod forward;
pub mod listener;
pub mod mitm;
pub mod tunnel;

pub use capture::CaptureSink;
pub use cert::CertificateManager;
pub use listener::{ProxyListener, ProxyOptions};

use bytes::Bytes;
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full};

/// The body type served back to the connecting client on every code path.
pub type BoxBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// Wrap a fixed byte buffer as a [`BoxBody`].
pub fn full_body(bytes: impl Into<Bytes>) -> BoxBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}
