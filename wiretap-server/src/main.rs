//  wiretap — intercepting HTTP(S) capture/analysis proxy
//
//  Architecture: tokio multi-threaded runtime, one accept loop per client
//  connection on the proxy listener, a sibling axum task for the admin API.
//  Every captured exchange is sanitized once, then fanned out to the live
//  ring buffer and appended to whichever session is currently active.

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wiretap_admin::{AdminServer, AppState as AdminState};
use wiretap_core::config::WiretapConfig;
use wiretap_core::model::LogRecord;
use wiretap_proxy::{CaptureSink, CertificateManager, ProxyListener, ProxyOptions};
use wiretap_store::{RingBuffer, SessionStore};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(name = "wiretap", version, about = "Intercepting HTTP(S) capture/analysis proxy")]
struct Cli {
    /// Path to a YAML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG if set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Override the proxy listener address.
    #[arg(long)]
    proxy_addr: Option<std::net::SocketAddr>,

    /// Override the admin API listener address.
    #[arg(long)]
    admin_addr: Option<std::net::SocketAddr>,
}

/// Sanitizes every captured exchange, then fans it out to the live ring
/// buffer and the active session's append-only log.
struct Pipeline {
    ring: Arc<RingBuffer>,
    store: Arc<SessionStore>,
}

impl CaptureSink for Pipeline {
    fn capture(&self, record: LogRecord) {
        let sanitized = wiretap_core::sanitize::sanitize(&record);
        self.ring.push(sanitized.clone());
        if let Err(e) = self.store.append(&sanitized) {
            tracing::error!(error = %e, "failed to persist log record");
        }
    }
}

/// Load the MITM CA from explicit config paths, or fall back to a
/// `<cwd>/certs/` directory, generating and persisting a CA there the
/// first time so it survives restarts (and so a client only has to trust
/// it once).
fn load_or_generate_ca(cfg: &wiretap_core::config::ProxyConfig) -> anyhow::Result<CertificateManager> {
    if let (Some(cert_path), Some(key_path)) = (&cfg.ca_cert_path, &cfg.ca_key_path) {
        let cert_pem = std::fs::read_to_string(cert_path)?;
        let key_pem = std::fs::read_to_string(key_path)?;
        return Ok(CertificateManager::from_pem(&cert_pem, &key_pem)?);
    }

    let dir = PathBuf::from("certs");
    std::fs::create_dir_all(&dir)?;
    let cert_path = dir.join("ca-cert.pem");
    let key_path = dir.join("ca-key.pem");

    if cert_path.exists() && key_path.exists() {
        let cert_pem = std::fs::read_to_string(&cert_path)?;
        let key_pem = std::fs::read_to_string(&key_path)?;
        return Ok(CertificateManager::from_pem(&cert_pem, &key_pem)?);
    }

    let manager = CertificateManager::generate()?;
    std::fs::write(&cert_path, manager.ca_certificate_pem())?;
    std::fs::write(&key_path, manager.ca_private_key_pem())?;
    info!(dir = %dir.display(), "generated a new MITM CA");
    Ok(manager)
}

fn setup_signal_handler() {
    for sig in [libc::SIGTERM, libc::SIGINT] {
        unsafe {
            libc::signal(sig, signal_handler as libc::sighandler_t);
        }
    }
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    wiretap_observability::init_tracing(&cli.log_level);

    let mut config = WiretapConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.proxy_addr {
        config.proxy.listen_addr = addr;
    }
    if let Some(addr) = cli.admin_addr {
        config.admin.listen_addr = addr;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "wiretap starting");

    let store = Arc::new(SessionStore::new(&config.store.root_dir));
    store.init()?;
    let ring = Arc::new(RingBuffer::new(config.capture.ring_capacity));

    let sink: Arc<dyn CaptureSink> = Arc::new(Pipeline {
        ring: ring.clone(),
        store: store.clone(),
    });

    let certs = if config.proxy.mitm_enabled {
        Some(Arc::new(load_or_generate_ca(&config.proxy)?))
    } else {
        None
    };

    let proxy_opts = ProxyOptions {
        listen_addr: config.proxy.listen_addr,
        mitm_enabled: config.proxy.mitm_enabled,
        connect_timeout: Duration::from_millis(config.proxy.connect_timeout_ms),
        max_body_bytes: config.capture.max_body_bytes,
    };
    let proxy = Arc::new(ProxyListener::new(proxy_opts, sink, certs)?);
    if let Some(ca_pem) = proxy.ca_certificate_pem() {
        info!("MITM enabled; trust the CA certificate at certs/ca-cert.pem");
        tracing::debug!(ca_pem, "MITM CA certificate");
    }

    let admin_state = AdminState {
        ring: ring.clone(),
        store: store.clone(),
        subscriber_queue: config.capture.subscriber_queue,
    };
    let admin = AdminServer::new(config.admin.listen_addr, admin_state);

    info!(
        proxy_addr = %config.proxy.listen_addr,
        admin_addr = %config.admin.listen_addr,
        mitm_enabled = config.proxy.mitm_enabled,
        "wiretap is ready"
    );

    setup_signal_handler();

    let proxy_task = tokio::spawn(async move { proxy.run().await });
    let admin_task = tokio::spawn(async move { admin.start().await });

    tokio::select! {
        result = proxy_task => {
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "proxy listener failed");
            }
        }
        result = admin_task => {
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "admin API failed");
            }
        }
        _ = shutdown_requested() => {
            info!("shutdown signal received, draining");
        }
    }

    // Close the active session so its metadata reflects a clean stop, then
    // give in-flight exchanges a grace window before exiting.
    store.stop();
    tokio::time::sleep(Duration::from_secs(5)).await;

    info!("wiretap stopped");
    Ok(())
}

async fn shutdown_requested() {
    while !SHUTDOWN.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
