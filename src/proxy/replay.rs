//! Replay client (§4.8): re-drive a stored request through this proxy's
//! own data-plane listener and hand back the origin's response.
//!
//! No original Go source implements this end-to-end -- only the
//! lower-level dial/write/read-response primitive (`proxyClient.go`) the
//! distilled spec names. The CONNECT preamble and client-side TLS step
//! are this crate's own addition, grounded in the same nested
//! `hyper::client::conn::Builder::handshake` pattern the connection
//! handler already uses server-side for interception, and in this
//! crate's own `tls::create_client_config` for the client TLS config.

use crate::error::{Error, Result};
use crate::models::RequestData;
use crate::tls::config::create_client_config;
use crate::transcription::to_wire_headers;
use hyper::client::conn;
use hyper::{Body, Request, Response};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::info;

/// Re-drives stored requests through the proxy listening at `proxy_addr`,
/// exactly as an ordinary client would: CONNECT + TLS for `https`
/// targets, a direct absolute-form request otherwise.
pub struct ReplayClient {
    proxy_addr: SocketAddr,
}

impl ReplayClient {
    pub fn new(proxy_addr: SocketAddr) -> Self {
        Self { proxy_addr }
    }

    pub async fn replay(&self, request: &RequestData) -> Result<Response<Body>> {
        let (host, port) = target_of(request);
        info!(url = %reconstruct_url(request), host, port, "replaying stored request");

        if request.tls {
            self.replay_https(request, &host, port).await
        } else {
            self.replay_http(request, &host, port).await
        }
    }

    async fn replay_http(&self, request: &RequestData, host: &str, port: u16) -> Result<Response<Body>> {
        let stream = TcpStream::connect(self.proxy_addr).await.map_err(Error::Io)?;
        let (mut sender, connection) = conn::Builder::new()
            .handshake::<_, Body>(stream)
            .await
            .map_err(|e| Error::Replay(e.to_string()))?;
        tokio::spawn(async move {
            let _ = connection.await;
        });

        let url = format!("http://{host}:{port}{}", request.path);
        let req = build_request(request, &url)?;
        sender.send_request(req).await.map_err(|e| Error::Replay(e.to_string()))
    }

    async fn replay_https(&self, request: &RequestData, host: &str, port: u16) -> Result<Response<Body>> {
        let stream = TcpStream::connect(self.proxy_addr).await.map_err(Error::Io)?;
        let (mut sender, connection) = conn::Builder::new()
            .handshake::<_, Body>(stream)
            .await
            .map_err(|e| Error::Replay(e.to_string()))?;
        tokio::spawn(async move {
            let _ = connection.await;
        });

        let authority = format!("{host}:{port}");
        let connect_req = Request::builder()
            .method("CONNECT")
            .uri(&authority)
            .header("host", &authority)
            .body(Body::empty())
            .map_err(|e| Error::Replay(e.to_string()))?;

        let connect_resp = sender
            .send_request(connect_req)
            .await
            .map_err(|e| Error::Replay(e.to_string()))?;
        if connect_resp.status() != hyper::StatusCode::OK {
            return Err(Error::Replay(format!("CONNECT rejected: {}", connect_resp.status())));
        }

        let upgraded = hyper::upgrade::on(connect_resp).await.map_err(|e| Error::Replay(e.to_string()))?;

        // The proxy's minted leaf is signed by its own CA, which a
        // standalone replay client has no reason to trust separately --
        // the point of replay is re-driving the already-intercepted
        // request, not re-validating the interception itself.
        let client_config = create_client_config(true)?;
        let connector = TlsConnector::from(client_config);
        let server_name = rustls::ServerName::try_from(host)
            .map_err(|_| Error::Replay(format!("invalid SNI host: {host}")))?;
        let tls_stream = connector
            .connect(server_name, upgraded)
            .await
            .map_err(|e| Error::TlsHandshake(e.to_string()))?;

        let (mut inner_sender, inner_connection) = conn::Builder::new()
            .handshake::<_, Body>(tls_stream)
            .await
            .map_err(|e| Error::Replay(e.to_string()))?;
        tokio::spawn(async move {
            let _ = inner_connection.await;
        });

        let url = format!("https://{host}:{port}{}", request.path);
        let req = build_request(request, &url)?;
        inner_sender.send_request(req).await.map_err(|e| Error::Replay(e.to_string()))
    }
}

fn target_of(request: &RequestData) -> (String, u16) {
    if let Some((host, port)) = request.host.rsplit_once(':') {
        if let Ok(p) = port.parse() {
            return (host.to_string(), p);
        }
    }
    (request.host.clone(), if request.tls { 443 } else { 80 })
}

/// Reconstruct the absolute URL a stored request originally targeted:
/// `http://` for plain/port-80 requests, `https://` for TLS/port-443.
fn reconstruct_url(request: &RequestData) -> String {
    let (host, port) = target_of(request);
    let scheme = if request.tls { "https" } else { "http" };
    format!("{scheme}://{host}:{port}{}", request.path)
}

/// Build the outbound request for one leg of a replay: origin-form path,
/// wire headers reconstructed from the stored record (with `Cookie`
/// rebuilt from the separated cookies map), and the stored body.
fn build_request(request: &RequestData, absolute_url: &str) -> Result<Request<Body>> {
    let uri: hyper::Uri = absolute_url
        .parse()
        .map_err(|e| Error::Replay(format!("invalid replay URL {absolute_url}: {e}")))?;

    let mut builder = Request::builder()
        .method(request.method.as_str())
        .uri(uri);

    let wire_headers = to_wire_headers(&request.headers);
    for (name, value) in wire_headers.iter() {
        builder = builder.header(name, value);
    }

    if !request.cookies.is_empty() {
        let cookie_header = request
            .cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header("cookie", cookie_header);
    }

    builder
        .body(Body::from(request.body.clone()))
        .map_err(|e| Error::Replay(format!("building replay request: {e}")))
}
