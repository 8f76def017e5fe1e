//! Transcription: turn a parsed request/response pair into the persisted
//! record shape, without blocking or altering the bytes actually
//! forwarded on the wire.
//!
//! Grounded on `internal/usecase/usecase.go`'s field-population order
//! (`Cookie` excluded from headers into the parallel cookies map,
//! `PostParams` populated only for urlencoded bodies, body read-then-
//! replace-with-fresh-reader) and `internal/models/request.go` /
//! `response.go` for field naming.

use crate::config::settings::TranscriptionConfig;
use crate::models::{HeaderMap, RequestData, ResponseData, TRUNCATED_HEADER};
use crate::utils::http::{
    collect_headers, is_hop_by_hop_header, parse_cookies, parse_form_params, parse_query_params,
};
use bytes::Bytes;
use hyper::{Body, Request, Response};
use std::net::IpAddr;
use tracing::debug;

/// Read a body to a byte buffer and hand back a fresh `Body` over the
/// same bytes so the caller can still forward it untouched -- consuming
/// a hyper body stream is unavoidable, so downstream consumers need a
/// freshly constructed reader, not the original.
pub async fn buffer_body(body: Body) -> crate::error::Result<(Bytes, Body)> {
    let bytes = hyper::body::to_bytes(body).await?;
    let fresh = Body::from(bytes.clone());
    Ok((bytes, fresh))
}

/// Cap `body` at `cap_bytes` for the persisted copy, returning the
/// (possibly truncated) stored slice and whether truncation occurred.
/// The caller forwards the full, untruncated `body` separately.
fn cap_for_storage(body: &Bytes, cap_bytes: usize) -> (Vec<u8>, bool) {
    if body.len() > cap_bytes {
        (body[..cap_bytes].to_vec(), true)
    } else {
        (body.to_vec(), false)
    }
}

/// Build a `RequestData` record from a request's parts plus the context
/// only the connection handler knows (client address, TLS flag, and
/// the CONNECT authority to fall back on for `Host` synthesis).
pub fn record_request(
    req: &Request<Body>,
    body: &Bytes,
    client_ip: IpAddr,
    client_port: u16,
    tls: bool,
    connect_authority: Option<&str>,
    config: &TranscriptionConfig,
) -> RequestData {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut record = RequestData::new(method, path.clone(), client_ip, client_port);
    record.tls = tls;

    let mut headers = collect_headers(req.headers());
    let cookie_values = headers.remove_all("cookie");
    for value in &cookie_values {
        record.cookies.extend(parse_cookies(value));
    }
    headers = strip_hop_by_hop(headers);

    if !headers.contains("host") {
        let host = connect_authority
            .map(|a| a.split(':').next().unwrap_or(a).to_string())
            .or_else(|| req.uri().host().map(str::to_string));
        if let Some(host) = host {
            headers.push("Host", host.clone());
            record.host = host;
        }
    } else {
        record.host = headers.get("host").unwrap_or_default().to_string();
    }
    record.headers = headers;

    if let Some(query) = req.uri().query() {
        record.query_params = parse_query_params(query);
    }

    let is_urlencoded = record
        .content_type()
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if is_urlencoded {
        record.form_params = parse_form_params(body);
    }

    let (stored_body, truncated) = cap_for_storage(body, config.body_cap_bytes);
    record.body = stored_body;
    if truncated {
        record.headers.push(TRUNCATED_HEADER, "true");
        debug!(path = %path, "request body truncated for storage");
    }

    record
}

/// Build a `ResponseData` record from a response's parts. Binary media
/// types skip body capture entirely (headers/status only).
pub fn record_response(
    resp: &Response<Body>,
    body: &Bytes,
    config: &TranscriptionConfig,
) -> ResponseData {
    let status = resp.status();
    let headers = strip_hop_by_hop(collect_headers(resp.headers()));
    let mut record = ResponseData::new(status.as_u16(), status.canonical_reason().unwrap_or("").to_string());
    record.headers = headers;

    if record.is_binary_skip() {
        debug!(status = %status, "binary response, skipping body capture");
        return record;
    }

    let (stored_body, truncated) = cap_for_storage(body, config.body_cap_bytes);
    record.body = stored_body;
    if truncated {
        record.headers.push(TRUNCATED_HEADER, "true");
    }

    record
}

/// Drop hop-by-hop headers from a header map before it is persisted --
/// the stored record should reflect what was actually relayed to the
/// origin, not connection-local framing the proxy consumed itself.
fn strip_hop_by_hop(headers: HeaderMap) -> HeaderMap {
    headers
        .into_iter()
        .filter(|(name, _)| !is_hop_by_hop_header(name))
        .collect()
}

/// Strip the headers a proxy must not forward and reconstruct the
/// record's `HeaderMap` into a fresh `hyper::HeaderMap` for the outbound
/// request -- used by the connection handler, not by transcription
/// itself, but kept alongside it since both operate on the same model.
pub fn to_wire_headers(headers: &HeaderMap) -> hyper::HeaderMap {
    let mut out = hyper::HeaderMap::new();
    for (name, value) in headers.iter() {
        if let (Ok(name), Ok(value)) = (
            hyper::header::HeaderName::try_from(name.as_str()),
            hyper::header::HeaderValue::try_from(value.as_str()),
        ) {
            out.append(name, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Request;

    fn config() -> TranscriptionConfig {
        TranscriptionConfig { body_cap_bytes: 16 }
    }

    #[test]
    fn excludes_cookie_header_into_cookies_map() {
        let req = Request::builder()
            .method("GET")
            .uri("/search?q=1")
            .header("Cookie", "a=1; b=2")
            .header("Host", "example.test")
            .body(Body::empty())
            .unwrap();
        let body = Bytes::new();
        let record = record_request(
            &req,
            &body,
            "127.0.0.1".parse().unwrap(),
            1234,
            false,
            None,
            &config(),
        );

        assert!(!record.headers.contains("cookie"));
        assert_eq!(record.cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(record.cookies.get("b").map(String::as_str), Some("2"));
        assert_eq!(record.query_params.iter().next(), Some(&("q".to_string(), "1".to_string())));
    }

    #[test]
    fn synthesizes_host_from_connect_authority_when_absent() {
        let req = Request::builder()
            .method("GET")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let body = Bytes::new();
        let record = record_request(
            &req,
            &body,
            "127.0.0.1".parse().unwrap(),
            1234,
            true,
            Some("example.test:443"),
            &config(),
        );

        assert_eq!(record.host, "example.test");
        assert_eq!(record.headers.get("Host"), Some("example.test"));
    }

    #[test]
    fn form_params_populated_only_for_urlencoded_body() {
        let req = Request::builder()
            .method("POST")
            .uri("/submit")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Body::empty())
            .unwrap();
        let body = Bytes::from_static(b"a=1&b=2");
        let record = record_request(
            &req,
            &body,
            "127.0.0.1".parse().unwrap(),
            1234,
            false,
            None,
            &config(),
        );
        assert_eq!(record.form_params.iter().count(), 2);

        let json_req = Request::builder()
            .method("POST")
            .uri("/submit")
            .header("Content-Type", "application/json")
            .body(Body::empty())
            .unwrap();
        let json_body = Bytes::from_static(b"{\"a\":1}");
        let json_record = record_request(
            &json_req,
            &json_body,
            "127.0.0.1".parse().unwrap(),
            1234,
            false,
            None,
            &config(),
        );
        assert!(json_record.form_params.is_empty());
    }

    #[test]
    fn body_over_cap_is_truncated_with_marker() {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let body = Bytes::from(vec![b'x'; 32]);
        let record = record_request(
            &req,
            &body,
            "127.0.0.1".parse().unwrap(),
            1234,
            false,
            None,
            &config(),
        );
        assert_eq!(record.body.len(), 16);
        assert!(record.is_truncated());
    }
}
