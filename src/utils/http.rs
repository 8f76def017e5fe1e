//! HTTP wire-level helpers: hop-by-hop header filtering, cookie/form
//! parsing, CONNECT-target parsing, and error-response construction.

use crate::models::{HeaderMap as RecordHeaderMap, ParamMap};
use hyper::{Body, HeaderMap as HyperHeaderMap, Response, StatusCode};
use std::collections::HashMap;
use tracing::debug;

/// Headers meaningful only for a single connection hop; a proxy must not
/// forward them. `Proxy-Connection` is the non-standard header browsers
/// send to proxies and is the one the fidelity invariant calls out by name.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.to_lowercase().as_str())
}

/// Whether a header should cross the hop in either direction. The
/// fidelity invariant is that forwarded bytes equal the client's bytes
/// minus hop-by-hop headers -- nothing else is filtered.
pub fn should_forward_header(name: &str) -> bool {
    !is_hop_by_hop_header(name)
}

/// Convert a wire `hyper::HeaderMap` into the ordered record `HeaderMap`,
/// preserving duplicate names and wire order.
pub fn collect_headers(headers: &HyperHeaderMap) -> RecordHeaderMap {
    let mut out = RecordHeaderMap::new();
    for (name, value) in headers {
        if let Ok(value_str) = value.to_str() {
            out.push(name.as_str(), value_str);
        }
    }
    out
}

/// Parse a `Cookie` header into name/value pairs.
pub fn parse_cookies(cookie_header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if let Some(eq_pos) = cookie.find('=') {
            let name = cookie[..eq_pos].trim().to_string();
            let value = cookie[eq_pos + 1..].trim().to_string();
            cookies.insert(name, value);
        }
    }
    cookies
}

/// Parse `application/x-www-form-urlencoded` bytes into an ordered,
/// multi-valued param map.
pub fn parse_form_params(body: &[u8]) -> ParamMap {
    form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Parse a URL's query string into an ordered, multi-valued param map.
pub fn parse_query_params(query: &str) -> ParamMap {
    form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Parse `host:port` out of a CONNECT request-target.
pub fn parse_connect_target(target: &str) -> Result<(String, u16), String> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid CONNECT target: {target}"))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid CONNECT port in target: {target}"))?;
    Ok((host.to_string(), port))
}

pub fn build_error_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("Content-Type", "text/plain")
        .body(Body::from(message.to_string()))
        .expect("static error response is always well-formed")
}

pub fn build_bad_gateway_response(message: &str) -> Response<Body> {
    debug!(message, "upstream forwarding failed");
    build_error_response(StatusCode::BAD_GATEWAY, &format!("Proxy Error: {message}"))
}
