//! TLS configuration for the two ends of interception: the server side
//! (terminating the client with a minted leaf) and the client side
//! (re-originating TLS to the true upstream).

use crate::error::{Error, Result};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore, ServerConfig};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build the server-side TLS config used to terminate the client
/// connection with a minted leaf certificate. ALPN is restricted to
/// `http/1.1` only -- this crate never intercepts HTTP/2.
pub fn create_server_config(cert: Certificate, key: PrivateKey) -> Result<Arc<ServerConfig>> {
    let mut config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .map_err(|e| Error::TlsHandshake(format!("building server TLS config: {e}")))?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

/// Build the client-side TLS config used to dial the real upstream
/// origin. ALPN offers `http/1.1` only. Certificate validation uses the
/// system root store unless `skip_verify` is set -- a named, explicit
/// opt-in, never a default (see REDESIGN FLAGS).
pub fn create_client_config(skip_verify: bool) -> Result<Arc<ClientConfig>> {
    let mut config = if skip_verify {
        warn!("upstream certificate verification disabled (upstream_skip_verify = true)");
        ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(AcceptAllCertVerifier))
            .with_no_client_auth()
    } else {
        let mut root_store = RootCertStore::empty();
        add_system_root_certificates(&mut root_store)?;
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth()
    };

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

fn add_system_root_certificates(root_store: &mut RootCertStore) -> Result<()> {
    debug!("loading system root certificates");
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let mut added = 0;
            for cert_der in certs {
                if root_store.add(&Certificate(cert_der.to_vec())).is_ok() {
                    added += 1;
                }
            }
            info!(added, "system root certificates loaded");
        }
        Err(e) => {
            warn!(error = %e, "could not load system root certificates; trust store will be empty");
        }
    }
    Ok(())
}

/// Accepts any upstream certificate. Only reachable via the explicit
/// `upstream_skip_verify` configuration switch.
pub struct AcceptAllCertVerifier;

impl ServerCertVerifier for AcceptAllCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
