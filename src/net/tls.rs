use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest::{digest, SHA256};
use tracing::{info, warn};
use wtransport::Identity;

use crate::config::ServerConfig;

/// TLS identity for the WebTransport endpoint
pub struct TlsConfig {
    pub identity: Identity,
    /// Base64 SHA-256 of the leaf certificate (for the browser flag)
    pub cert_hash: String,
}

impl TlsConfig {
    /// PEM files when both paths are configured, otherwise a throwaway
    /// self-signed certificate for local development.
    pub async fn load(config: &ServerConfig) -> Result<Self> {
        match (&config.tls_cert_path, &config.tls_key_path) {
            (Some(cert_path), Some(key_path)) => {
                info!("Loading TLS certificate from {}", cert_path);
                Self::load_from_paths(cert_path, key_path).await
            }
            (None, None) => Self::self_signed(),
            _ => anyhow::bail!("TLS_CERT_PATH and TLS_KEY_PATH must be set together"),
        }
    }

    async fn load_from_paths(cert_path: &str, key_path: &str) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .context("Failed to load certificate from PEM files")?;
        Ok(Self::from_identity(identity))
    }

    /// Self-signed identity for localhost
    pub fn self_signed() -> Result<Self> {
        warn!("No TLS certificate configured, generating a self-signed one");
        let identity = Identity::self_signed(["localhost", "127.0.0.1", "::1"])
            .context("Failed to generate self-signed certificate")?;
        Ok(Self::from_identity(identity))
    }

    fn from_identity(identity: Identity) -> Self {
        let cert_hash = compute_cert_hash(&identity);
        info!("Certificate hash: {}", cert_hash);
        info!("Chrome flag: --ignore-certificate-errors-spki-list={}", cert_hash);
        Self { identity, cert_hash }
    }

    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }
}

fn compute_cert_hash(identity: &Identity) -> String {
    identity
        .certificate_chain()
        .as_slice()
        .first()
        .map(|cert| STANDARD.encode(digest(&SHA256, cert.der()).as_ref()))
        .unwrap_or_default()
}
