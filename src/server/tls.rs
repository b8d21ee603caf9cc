//! TLS and QUIC transport setup shared by all workers

use anyhow::{Context, Result};
use quinn::{IdleTimeout, ServerConfig, TransportConfig, VarInt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;

/// ALPN protocol spoken by the echo server
pub const ALPN_PROTOCOL: &[u8] = b"connmgr-echo";

/// Build the QUIC server configuration.
///
/// Idle connections are reaped by each worker's connection manager; the
/// transport idle timeout is only a backstop at twice that interval.
pub async fn build_server_config(config: &Config) -> Result<ServerConfig> {
    let (certs, key) = load_or_generate_certs(config).await?;

    // Both ring and aws-lc-rs end up in the dependency tree, so the provider
    // is chosen here rather than left to the process default
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut rustls_config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to build TLS config")?;
    rustls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let mut server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(rustls_config)?,
    ));

    let mut transport = TransportConfig::default();
    transport.max_concurrent_bidi_streams(VarInt::from_u32(config.quic.max_streams_per_conn));
    transport.max_concurrent_uni_streams(VarInt::from_u32(0));

    let backstop = Duration::from_secs(config.quic.idle_timeout_secs.saturating_mul(2));
    transport.max_idle_timeout(Some(
        IdleTimeout::try_from(backstop).context("Idle timeout out of range")?,
    ));

    if config.quic.keep_alive_secs > 0 {
        transport.keep_alive_interval(Some(Duration::from_secs(config.quic.keep_alive_secs)));
    }

    server_config.transport_config(Arc::new(transport));

    Ok(server_config)
}

/// Load certificates from files or generate self-signed
async fn load_or_generate_certs(
    config: &Config,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_path = std::path::Path::new(&config.tls.cert_path);
    let key_path = std::path::Path::new(&config.tls.key_path);

    if cert_path.exists() && key_path.exists() {
        info!(cert = %config.tls.cert_path, key = %config.tls.key_path, "Loading TLS certificates");

        let cert_pem = tokio::fs::read(cert_path)
            .await
            .context("Failed to read certificate file")?;
        let key_pem = tokio::fs::read(key_path)
            .await
            .context("Failed to read key file")?;

        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to parse certificates")?;

        let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
            .context("Failed to parse private key")?
            .ok_or_else(|| anyhow::anyhow!("No private key found in file"))?;

        Ok((certs, key))
    } else if config.tls.auto_generate {
        warn!("Generating self-signed certificate (not for production use)");
        self_signed()
    } else {
        anyhow::bail!(
            "TLS certificate not found at {} and auto_generate is disabled",
            config.tls.cert_path
        )
    }
}

fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .context("Failed to generate self-signed certificate")?;

    let cert_der = CertificateDer::from(cert.cert);
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));

    Ok((vec![cert_der], key_der))
}
