//! The control-plane HTTP API: `GET /requests`, `GET /requests/{id}`,
//! `GET /repeat/{id}`, `GET /scan/{id}` (external interfaces table,
//! SPEC_FULL §6). Thin by design -- the interesting logic lives in
//! `Repository`, `ReplayClient`, and `scanner::scan`; this module is
//! just the router gluing them to a socket, in the same
//! `hyper::Server::bind(..).serve(make_service_fn(..))` shape the
//! teacher's own `ProxyServer::start` used for the data plane before
//! this crate moved that side onto an explicit `Acceptor`.

use crate::app::AppContext;
use crate::error::Result as CrateResult;
use crate::models::RequestData;
use crate::proxy::replay::ReplayClient;
use crate::proxy::scanner::{load_dictionary, scan};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Serve the control API at `addr` until the process exits. `proxy_addr`
/// is where `/repeat` and `/scan` dial back into this crate's own data
/// plane.
pub async fn run(addr: SocketAddr, ctx: Arc<AppContext>, proxy_addr: SocketAddr) -> CrateResult<()> {
    let make_svc = make_service_fn(move |_conn| {
        let ctx = Arc::clone(&ctx);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let ctx = Arc::clone(&ctx);
                async move { Ok::<_, Infallible>(route(req, ctx, proxy_addr).await) }
            }))
        }
    });

    info!(%addr, "control API listening");
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| crate::error::Error::RequestProcessing(e.to_string()))
}

async fn route(req: Request<Body>, ctx: Arc<AppContext>, proxy_addr: SocketAddr) -> Response<Body> {
    let path = req.uri().path().trim_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').collect();

    match (req.method(), segments.as_slice()) {
        (&Method::GET, ["requests"]) => list_requests(ctx).await,
        (&Method::GET, ["requests", id]) => request_detail(ctx, id).await,
        (&Method::GET, ["repeat", id]) => repeat(ctx, id, proxy_addr).await,
        (&Method::GET, ["scan", id]) => scan_handler(ctx, id, proxy_addr).await,
        _ => not_found(),
    }
}

fn bad_id(id: &str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Body::from(format!("invalid id: {id}")))
        .unwrap()
}

fn not_found() -> Response<Body> {
    Response::builder().status(StatusCode::NOT_FOUND).body(Body::empty()).unwrap()
}

fn server_error(e: impl std::fmt::Display) -> Response<Body> {
    error!(error = %e, "control API request failed");
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .body(Body::from(e.to_string()))
        .unwrap()
}

async fn list_requests(ctx: Arc<AppContext>) -> Response<Body> {
    match ctx.repository.list_requests(25).await {
        Ok(list) => {
            let body = serde_json::to_vec(&list).unwrap_or_default();
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        }
        Err(e) => server_error(e),
    }
}

async fn fetch_request(ctx: &Arc<AppContext>, id: &str) -> std::result::Result<Option<RequestData>, Response<Body>> {
    let id: i64 = id.parse().map_err(|_| bad_id(id))?;
    match ctx.repository.get_request(id).await {
        Ok(Some((request, _response))) => Ok(Some(request)),
        Ok(None) => Ok(None),
        Err(e) => Err(server_error(e)),
    }
}

async fn request_detail(ctx: Arc<AppContext>, id: &str) -> Response<Body> {
    match fetch_request(&ctx, id).await {
        Ok(Some(request)) => {
            let text = render_request_text(&request);
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain")
                .body(Body::from(text))
                .unwrap()
        }
        Ok(None) => not_found(),
        Err(resp) => resp,
    }
}

async fn repeat(ctx: Arc<AppContext>, id: &str, proxy_addr: SocketAddr) -> Response<Body> {
    let request = match fetch_request(&ctx, id).await {
        Ok(Some(request)) => request,
        Ok(None) => return not_found(),
        Err(resp) => return resp,
    };

    let replay = ReplayClient::new(proxy_addr);
    match replay.replay(&request).await {
        Ok(resp) => render_response(resp).await,
        Err(e) => server_error(e),
    }
}

async fn scan_handler(ctx: Arc<AppContext>, id: &str, proxy_addr: SocketAddr) -> Response<Body> {
    let Some(dict_path) = ctx.config.scanner.dict_file.clone() else {
        return server_error("no dictionary file configured for the scanner");
    };

    let request = match fetch_request(&ctx, id).await {
        Ok(Some(request)) => request,
        Ok(None) => return not_found(),
        Err(resp) => return resp,
    };

    let dictionary = match load_dictionary(&dict_path) {
        Ok(d) => d,
        Err(e) => return server_error(e),
    };

    let replay = ReplayClient::new(proxy_addr);
    match scan(&replay, &request, &dictionary).await {
        Ok(hits) => {
            let body = hits.into_iter().map(|h| h.suffix).collect::<Vec<_>>().join("\n");
            Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain")
                .body(Body::from(body))
                .unwrap()
        }
        Err(e) => server_error(e),
    }
}

fn render_request_text(request: &RequestData) -> String {
    let mut out = format!("{} {} HTTP/1.1\r\n", request.method, request.path);
    for (name, value) in request.headers.iter() {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    if !request.body.is_empty() {
        out.push_str(&String::from_utf8_lossy(&request.body));
    }
    out
}

async fn render_response(resp: Response<Body>) -> Response<Body> {
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap_or_default();

    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            out.push_str(&format!("{name}: {v}\r\n"));
        }
    }
    out.push_str("\r\n");
    out.push_str(&String::from_utf8_lossy(&body));

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain")
        .body(Body::from(out))
        .unwrap()
}
