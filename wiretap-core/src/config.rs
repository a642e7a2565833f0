use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Top-level configuration for wiretap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WiretapConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy listener address (client-facing).
    #[serde(default = "default_proxy_addr")]
    pub listen_addr: SocketAddr,

    /// Terminate TLS on CONNECT tunnels with a locally-issued leaf cert,
    /// instead of relaying the raw bytes.
    #[serde(default)]
    pub mitm_enabled: bool,

    /// Path to a PEM-encoded CA certificate to use instead of generating
    /// an ephemeral, process-lifetime one.
    #[serde(default)]
    pub ca_cert_path: Option<String>,

    /// Path to the PEM-encoded private key matching `ca_cert_path`.
    #[serde(default)]
    pub ca_key_path: Option<String>,

    /// Upstream connect timeout (milliseconds).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Admin/control API listener address.
    #[serde(default = "default_admin_addr")]
    pub listen_addr: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Maximum bytes of a request/response body kept in a log record.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Number of most-recent log records kept in the live ring buffer.
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Bounded queue depth per live `/events` subscriber.
    #[serde(default = "default_subscriber_queue")]
    pub subscriber_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory under which session subdirectories are created.
    #[serde(default = "default_store_root")]
    pub root_dir: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_proxy_addr(),
            mitm_enabled: false,
            ca_cert_path: None,
            ca_key_path: None,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_admin_addr(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: default_max_body_bytes(),
            ring_capacity: default_ring_capacity(),
            subscriber_queue: default_subscriber_queue(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: default_store_root(),
        }
    }
}

fn default_proxy_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}

fn default_admin_addr() -> SocketAddr {
    "127.0.0.1:9900".parse().unwrap()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_ring_capacity() -> usize {
    2000
}

fn default_subscriber_queue() -> usize {
    256
}

fn default_store_root() -> String {
    "./data/sessions".to_string()
}

impl Default for WiretapConfig {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            admin: AdminConfig::default(),
            capture: CaptureConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl WiretapConfig {
    /// Load configuration from an optional YAML file, overridden by
    /// `WIRETAP_`-prefixed environment variables (e.g.
    /// `WIRETAP_PROXY__LISTEN_ADDR`).
    pub fn load(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Yaml::file(path));
            }
        } else if Path::new("wiretap.yaml").exists() {
            figment = figment.merge(Yaml::file("wiretap.yaml"));
        }

        figment = figment.merge(Env::prefixed("WIRETAP_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = WiretapConfig::default();
        assert_eq!(cfg.proxy.listen_addr.port(), 8080);
        assert_eq!(cfg.admin.listen_addr.port(), 9900);
        assert_eq!(cfg.capture.max_body_bytes, 65536);
        assert_eq!(cfg.capture.ring_capacity, 2000);
        assert!(!cfg.proxy.mitm_enabled);
    }

    #[test]
    fn load_with_missing_path_falls_back_to_defaults() {
        let cfg = WiretapConfig::load(Some(Path::new("/nonexistent/wiretap.yaml"))).unwrap();
        assert_eq!(cfg.store.root_dir, "./data/sessions");
    }
}
