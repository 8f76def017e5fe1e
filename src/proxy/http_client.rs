//! Pooled upstream HTTP client used by the Replay path.
//!
//! The connection handler's own forwarding path does not use this --
//! it owns a raw per-tunnel outbound connection directly (see
//! `proxy::outbound`). This client exists for the Replay client (§4.8),
//! which dials the local proxy itself as an ordinary HTTP client would.
//! Pool parameters are taken verbatim from the original
//! `internal/proxy/client.go` `http.Transport` constants.

use crate::config::settings::HttpClientConfig;
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::HttpsConnectorBuilder;
use tracing::info;

pub type PooledClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

/// Build the pooled client the Replay path sends requests through.
/// ALPN is restricted to `http/1.1`, matching the rest of this crate's
/// TLS configuration.
pub fn build_pooled_client(config: &HttpClientConfig) -> PooledClient {
    info!(
        max_idle_conns = config.max_idle_conns,
        idle_timeout_secs = config.idle_timeout.as_secs(),
        "building pooled replay client"
    );

    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(config.dial_timeout));
    http.set_keepalive(Some(config.keep_alive_interval));
    http.enforce_http(false);

    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder()
        .pool_max_idle_per_host(config.max_idle_conns)
        .pool_idle_timeout(config.idle_timeout)
        .http2_only(false)
        .build(https)
}
