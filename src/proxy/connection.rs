//! The per-connection handler: AwaitFirstRequest -> (on CONNECT)
//! EstablishTLS -> AwaitTunnelRequest -> ForwardRequest, repeated for
//! every request the client sends on this connection (§4.2).
//!
//! Grounded on the teacher's `ProxyServer::handle_connection` /
//! `TlsProxyServer::handle_tls_connection` pair (`proxy/server.rs`,
//! `tls/server.rs`): a `service_fn` closure wrapped in
//! `hyper::server::conn::Http::serve_connection(..).with_upgrades()`,
//! with the CONNECT branch calling `hyper::upgrade::on` and handing the
//! raw stream to a TLS acceptor before recursing into the same serving
//! loop. Rewired here onto `CertCache`, `OutboundConnection`,
//! `Repository`, and the transcription pipeline in place of the
//! teacher's `CertificateManager`/`HttpClient`.

use crate::app::AppContext;
use crate::error::{Error, Result};
use crate::models::{ProxyLog, RequestData, ResponseData};
use crate::proxy::idle::{drive_with_idle_timeout, IdleTracker, IdleWatchStream};
use crate::proxy::outbound::OutboundConnection;
use crate::tls::config::create_server_config;
use crate::transcription::{buffer_body, record_request, record_response};
use crate::utils::http::{build_bad_gateway_response, build_error_response, is_hop_by_hop_header, parse_connect_target};
use hyper::server::conn::Http;
use hyper::service::service_fn;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Everything a single client connection's requests share: which tunnel
/// they run inside (if any), who the client is, and the one outbound
/// connection kept alive across the requests sent through it.
struct ConnState {
    ctx: Arc<AppContext>,
    client_ip: IpAddr,
    client_port: u16,
    tls: bool,
    connect_authority: Option<(String, u16)>,
    outbound: tokio::sync::Mutex<OutboundConnection>,
}

/// Accept and serve one inbound TCP connection until the client closes
/// it, an I/O error occurs, or it sits idle past the configured timeout.
/// Errors are logged here, not propagated -- a single bad connection
/// must never take the acceptor down with it.
pub async fn handle(stream: TcpStream, remote_addr: SocketAddr, ctx: Arc<AppContext>) {
    let outbound = match OutboundConnection::new(&ctx.config.http_client, &ctx.config.tls) {
        Ok(o) => o,
        Err(e) => {
            error!(error = %e, "failed to build outbound connector for new connection");
            return;
        }
    };

    let idle_timeout = ctx.config.idle_timeout;
    let state = Arc::new(ConnState {
        ctx,
        client_ip: remote_addr.ip(),
        client_port: remote_addr.port(),
        tls: false,
        connect_authority: None,
        outbound: tokio::sync::Mutex::new(outbound),
    });

    if let Err(e) = serve(stream, state, idle_timeout).await {
        debug!(error = %e, remote = %remote_addr, "connection ended");
    }
}

/// Drive one HTTP/1.1 connection (plain or already TLS-terminated) over
/// `stream`, dispatching each request through `dispatch`.
async fn serve<S>(stream: S, state: Arc<ConnState>, idle_timeout: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let tracker = Arc::new(IdleTracker::new());
    let watched = IdleWatchStream::new(stream, Arc::clone(&tracker));

    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { dispatch(req, state).await }
    });

    let conn = Http::new()
        .http1_only(true)
        .serve_connection(watched, service)
        .with_upgrades();

    drive_with_idle_timeout(tracker, idle_timeout, async { conn.await.map_err(Error::from) }).await
}

async fn dispatch(req: Request<Body>, state: Arc<ConnState>) -> std::result::Result<Response<Body>, Infallible> {
    if req.method() == Method::CONNECT {
        if state.tls {
            warn!("rejecting nested CONNECT inside an already-intercepted tunnel");
            return Ok(build_error_response(StatusCode::BAD_REQUEST, "nested CONNECT not supported"));
        }
        return establish_tls(req, state).await;
    }
    forward_and_record(req, state).await
}

/// EstablishTLS: accept the CONNECT, respond 200, then take over the
/// upgraded raw stream -- mint (or reuse) a leaf certificate for the
/// requested SNI, terminate TLS toward the client, and recurse into
/// `serve` over the decrypted stream with `tls = true`.
async fn establish_tls(req: Request<Body>, state: Arc<ConnState>) -> std::result::Result<Response<Body>, Infallible> {
    let target = req.uri().to_string();
    let (host, port) = match parse_connect_target(&target) {
        Ok(pair) => pair,
        Err(msg) => {
            warn!(target, error = %msg, "rejecting malformed CONNECT target");
            return Ok(build_error_response(StatusCode::BAD_REQUEST, "invalid CONNECT target"));
        }
    };

    info!(host = %host, port, "CONNECT received, establishing interception");

    let ctx = Arc::clone(&state.ctx);
    let client_ip = state.client_ip;
    let client_port = state.client_port;
    let idle_timeout = ctx.config.idle_timeout;

    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(u) => u,
            Err(e) => {
                error!(error = %e, host, "CONNECT upgrade failed");
                return;
            }
        };

        let cert = match ctx.cert_cache.get_or_mint(&host).await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, host, "certificate mint failed, client will see a TLS failure");
                return;
            }
        };

        let server_config = match create_server_config(cert.cert().clone(), cert.key().clone()) {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, host, "building server TLS config failed");
                return;
            }
        };

        let acceptor = TlsAcceptor::from(server_config);
        let tls_stream = match acceptor.accept(upgraded).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, host, "TLS handshake with intercepting client failed");
                return;
            }
        };

        let outbound = match OutboundConnection::new(&ctx.config.http_client, &ctx.config.tls) {
            Ok(o) => o,
            Err(e) => {
                error!(error = %e, host, "failed to build outbound connector for intercepted tunnel");
                return;
            }
        };

        let tunnel_state = Arc::new(ConnState {
            ctx,
            client_ip,
            client_port,
            tls: true,
            connect_authority: Some((host.clone(), port)),
            outbound: tokio::sync::Mutex::new(outbound),
        });

        if let Err(e) = serve(tls_stream, tunnel_state, idle_timeout).await {
            debug!(error = %e, host, "intercepted tunnel ended");
        }
    });

    Ok(Response::builder().status(StatusCode::OK).body(Body::empty()).unwrap())
}

/// ForwardRequest: buffer the body, transcribe and persist the request,
/// forward the (header-filtered, origin-form) request upstream over the
/// connection's reused `OutboundConnection`, then transcribe, persist,
/// and relay the response back to the client.
async fn forward_and_record(req: Request<Body>, state: Arc<ConnState>) -> std::result::Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    let (_, body) = req.into_parts();

    let (body_bytes, fresh_body) = match buffer_body(body).await {
        Ok(pair) => pair,
        Err(e) => {
            return Ok(build_error_response(
                StatusCode::BAD_REQUEST,
                &format!("error reading request body: {e}"),
            ))
        }
    };

    let record_src = rebuild_request(&method, &uri, &headers);
    let connect_authority_str = state.connect_authority.as_ref().map(|(h, p)| format!("{h}:{p}"));
    let record = record_request(
        &record_src,
        &body_bytes,
        state.client_ip,
        state.client_port,
        state.tls,
        connect_authority_str.as_deref(),
        &state.ctx.config.transcription,
    );

    let (host, port) = resolve_target(
        headers.get("host").and_then(|v| v.to_str().ok()),
        state.connect_authority.as_ref(),
        &uri,
        state.tls,
    );

    let mut outbound_builder = Request::builder()
        .method(method.clone())
        .uri(uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"));
    let mut saw_host = false;
    for (name, value) in headers.iter() {
        if is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        if name.as_str().eq_ignore_ascii_case("host") {
            saw_host = true;
        }
        outbound_builder = outbound_builder.header(name, value);
    }
    if !saw_host {
        outbound_builder = outbound_builder.header("host", &record.host);
    }

    let outbound_req = match outbound_builder.body(fresh_body) {
        Ok(r) => r,
        Err(e) => {
            return Ok(build_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("building outbound request: {e}"),
            ))
        }
    };

    let send_result = {
        let mut outbound = state.outbound.lock().await;
        outbound.send(&host, port, state.tls, outbound_req).await
    };

    let response = match send_result {
        Ok(resp) => resp,
        Err(e) => {
            warn!(error = %e, host, port, "upstream forwarding failed");
            persist(&state, record, None);
            return Ok(build_bad_gateway_response(&e.to_string()));
        }
    };

    let (resp_parts, resp_body) = response.into_parts();
    let (resp_bytes, fresh_resp_body) = match buffer_body(resp_body).await {
        Ok(pair) => pair,
        Err(e) => {
            persist(&state, record, None);
            return Ok(build_error_response(
                StatusCode::BAD_GATEWAY,
                &format!("error reading upstream response body: {e}"),
            ));
        }
    };

    let record_resp_src = rebuild_response(resp_parts.status, &resp_parts.headers);
    let response_record = record_response(&record_resp_src, &resp_bytes, &state.ctx.config.transcription);

    persist(&state, record, Some(response_record));

    let mut out_builder = Response::builder().status(resp_parts.status);
    for (name, value) in resp_parts.headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            out_builder = out_builder.header(name, value);
        }
    }

    Ok(out_builder
        .body(fresh_resp_body)
        .unwrap_or_else(|_| build_error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to build client response")))
}

/// Persist the transcribed request/response pair off the hot path: spawn
/// the write rather than awaiting it here, so a slow or failing
/// repository write never delays the bytes already headed to the
/// client. Persistence failures are logged and otherwise ignored (§7).
fn persist(state: &Arc<ConnState>, request: RequestData, response: Option<ResponseData>) {
    let ctx = Arc::clone(&state.ctx);
    tokio::spawn(async move {
        let mut request = request;
        match ctx.repository.create_request(&request).await {
            Ok(id) => {
                request.id = Some(id);
                match response {
                    Some(mut response) => {
                        response.request_id = Some(id);
                        if let Err(e) = ctx.repository.create_response(&response).await {
                            warn!(error = %e, "persisting response failed; forwarding already completed");
                        }
                        let log = ProxyLog { request, response: Some(response), error: None };
                        if let Err(e) = crate::logging::log_transaction(&log) {
                            warn!(error = %e, "transaction trace log failed");
                        }
                    }
                    None => {
                        let log = ProxyLog { request, response: None, error: Some("upstream forwarding failed".into()) };
                        let _ = crate::logging::log_transaction(&log);
                    }
                }
            }
            Err(e) => warn!(error = %e, "persisting request failed; forwarding already completed"),
        }
    });
}

/// Reconstruct a header-only request for `transcription::record_request`,
/// which only reads method/uri/headers.
fn rebuild_request(method: &hyper::Method, uri: &hyper::Uri, headers: &hyper::HeaderMap) -> Request<Body> {
    let mut builder = Request::builder().method(method.clone()).uri(uri.clone());
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    builder.body(Body::empty()).expect("header-only request is always well-formed")
}

/// Reconstruct a header-only response for `transcription::record_response`.
fn rebuild_response(status: hyper::StatusCode, headers: &hyper::HeaderMap) -> Response<Body> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    builder.body(Body::empty()).expect("header-only response is always well-formed")
}

/// Determine the upstream host:port: the request's `Host` header first
/// (default port 443 when intercepted, 80 otherwise, if it carries no
/// explicit port), then the request-target's own authority (absolute-form
/// requests sent to a non-intercepting proxy), then the CONNECT
/// authority itself as a last resort.
fn resolve_target(
    host_header: Option<&str>,
    connect_authority: Option<&(String, u16)>,
    uri: &hyper::Uri,
    tls: bool,
) -> (String, u16) {
    if let Some(h) = host_header {
        if let Some((host, port)) = h.rsplit_once(':') {
            if let Ok(p) = port.parse::<u16>() {
                return (host.to_string(), p);
            }
        }
        return (h.to_string(), if tls { 443 } else { 80 });
    }
    if let Some(host) = uri.host() {
        return (host.to_string(), uri.port_u16().unwrap_or(if tls { 443 } else { 80 }));
    }
    if let Some((host, port)) = connect_authority {
        return (host.clone(), *port);
    }
    (String::new(), if tls { 443 } else { 80 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_target_prefers_explicit_host_port() {
        let uri: hyper::Uri = "/path".parse().unwrap();
        let (host, port) = resolve_target(Some("example.test:8443"), None, &uri, true);
        assert_eq!(host, "example.test");
        assert_eq!(port, 8443);
    }

    #[test]
    fn resolve_target_defaults_port_by_tls_flag() {
        let uri: hyper::Uri = "/path".parse().unwrap();
        assert_eq!(resolve_target(Some("example.test"), None, &uri, true), ("example.test".to_string(), 443));
        assert_eq!(resolve_target(Some("example.test"), None, &uri, false), ("example.test".to_string(), 80));
    }

    #[test]
    fn resolve_target_falls_back_to_connect_authority() {
        let uri: hyper::Uri = "/path".parse().unwrap();
        let authority = ("example.test".to_string(), 9443u16);
        let (host, port) = resolve_target(None, Some(&authority), &uri, true);
        assert_eq!(host, "example.test");
        assert_eq!(port, 9443);
    }
}
