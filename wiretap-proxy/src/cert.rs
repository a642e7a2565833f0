//! Process-lifetime CA and per-host leaf certificates for MITM TLS
//! termination. A new CA is minted at startup unless a PEM pair is
//! configured; leaf certs are generated on first use per hostname and
//! cached as ready-to-serve [`rustls::ServerConfig`]s.

use dashmap::DashMap;
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, Issuer, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::Arc;
use wiretap_core::error::CoreError;

fn map_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::CertificateGeneration(e.to_string())
}

fn root_ca_params(common_name: &str) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, DnValue::Utf8String(common_name.to_string()));
    params.key_usages = vec![
        rcgen::KeyUsagePurpose::KeyCertSign,
        rcgen::KeyUsagePurpose::CrlSign,
    ];
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params
}

/// Generates and caches TLS server configs for MITM termination.
pub struct CertificateManager {
    issuer: Issuer<'static, KeyPair>,
    ca_pem: String,
    ca_key_pem: String,
    cache: DashMap<String, Arc<rustls::ServerConfig>>,
}

impl CertificateManager {
    /// Mint a fresh, process-lifetime CA.
    pub fn generate() -> Result<Self, CoreError> {
        let params = root_ca_params("wiretap local CA");
        let key_pair = KeyPair::generate().map_err(map_err)?;
        let ca_key_pem = key_pair.serialize_pem();
        let ca_pem = params
            .self_signed(&key_pair)
            .map_err(map_err)?
            .pem();
        let issuer = Issuer::new(params, key_pair);
        Ok(Self {
            issuer,
            ca_pem,
            ca_key_pem,
            cache: DashMap::new(),
        })
    }

    /// Load a CA from a PEM certificate and PKCS8 private key pair.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CoreError> {
        let params = CertificateParams::from_ca_cert_pem(cert_pem).map_err(map_err)?;
        let key_pair = KeyPair::from_pem(key_pem).map_err(map_err)?;
        let ca_pem = cert_pem.to_string();
        let ca_key_pem = key_pem.to_string();
        let issuer = Issuer::new(params, key_pair);
        Ok(Self {
            issuer,
            ca_pem,
            ca_key_pem,
            cache: DashMap::new(),
        })
    }

    /// PEM-encoded CA certificate, so a client can be configured to trust it.
    pub fn ca_certificate_pem(&self) -> &str {
        &self.ca_pem
    }

    /// PEM-encoded CA private key, so a generated CA can be persisted for
    /// reuse across restarts.
    pub fn ca_private_key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// The rustls server config to present when terminating TLS for
    /// `hostname`, generating and caching a fresh leaf cert on first use.
    pub fn server_config_for(&self, hostname: &str) -> Result<Arc<rustls::ServerConfig>, CoreError> {
        if let Some(existing) = self.cache.get(hostname) {
            return Ok(existing.clone());
        }

        let mut leaf_params =
            CertificateParams::new(vec![hostname.to_string()]).map_err(map_err)?;
        leaf_params.distinguished_name = DistinguishedName::new();
        leaf_params
            .distinguished_name
            .push(DnType::CommonName, DnValue::Utf8String(hostname.to_string()));

        let leaf_key = KeyPair::generate().map_err(map_err)?;
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &self.issuer)
            .map_err(map_err)?;

        let cert_der: CertificateDer<'static> = leaf_cert.der().clone();
        let key_der: PrivateKeyDer<'static> =
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));

        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .map_err(map_err)?;

        let server_config = Arc::new(server_config);
        self.cache.insert(hostname.to_string(), server_config.clone());
        Ok(server_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_a_pem_ca() {
        let mgr = CertificateManager::generate().unwrap();
        assert!(mgr.ca_certificate_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn server_config_is_cached_per_hostname() {
        let mgr = CertificateManager::generate().unwrap();
        let a = mgr.server_config_for("example.com").unwrap();
        let b = mgr.server_config_for("example.com").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn different_hostnames_get_different_configs() {
        let mgr = CertificateManager::generate().unwrap();
        let a = mgr.server_config_for("a.example.com").unwrap();
        let b = mgr.server_config_for("b.example.com").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
