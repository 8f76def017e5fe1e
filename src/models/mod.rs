//! Data model: the request/response records transcription produces, and
//! the ordered, multi-valued header map they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Media types whose response bodies are never captured by transcription
/// (binary responses are recorded as headers/status only).
pub const BINARY_SKIP_CONTENT_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/x-protobuf",
];

/// Header name used to flag a body that was truncated at the transcription
/// size cap. The on-wire forwarding path is never truncated -- only the
/// persisted copy is.
pub const TRUNCATED_HEADER: &str = "X-Mitm-Proxy-Truncated";

/// An ordered, multi-valued header map.
///
/// `HashMap<String, String>` can't represent repeated header names or
/// preserve wire order, both of which the data model requires: the header
/// map must preserve the order observed on the wire for reproducible
/// replay. This is a thin `Vec<(String, String)>` wrapper: insertion order
/// is preserved and a name may appear more than once.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderMap(Vec<(String, String)>);

impl HeaderMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a header, preserving any existing entries with the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in wire order, case-insensitively.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.0
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Remove every entry named `name`, returning their values in order.
    pub fn remove_all(&mut self, name: &str) -> Vec<String> {
        let mut removed = Vec::new();
        self.0.retain(|(k, v)| {
            if k.eq_ignore_ascii_case(name) {
                removed.push(v.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for HeaderMap {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// A multi-valued, order-preserving param map (query string or decoded
/// form body).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamMap(Vec<(String, String)>);

impl ParamMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_grouped(&self) -> HashMap<String, Vec<String>> {
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in &self.0 {
            grouped.entry(k.clone()).or_default().push(v.clone());
        }
        grouped
    }
}

impl FromIterator<(String, String)> for ParamMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A recorded request: surrogate id, method, path+query (no scheme or
/// authority), TLS flag, ordered/multi-valued headers, cookies, decoded
/// query/form params, raw body, and creation timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestData {
    /// Surrogate id; `None` until persisted.
    pub id: Option<i64>,
    pub method: String,
    /// Path + query, e.g. `/search?q=1`. Never carries scheme/authority.
    pub path: String,
    pub tls: bool,
    pub headers: HeaderMap,
    pub cookies: HashMap<String, String>,
    pub query_params: ParamMap,
    pub form_params: ParamMap,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,

    // Forwarding-time context. Not part of the persisted record proper,
    // but convenient to carry alongside it through the handler pipeline.
    pub client_ip: IpAddr,
    pub client_port: u16,
    pub host: String,
}

impl RequestData {
    pub fn new(method: String, path: String, client_ip: IpAddr, client_port: u16) -> Self {
        Self {
            id: None,
            method,
            path,
            tls: false,
            headers: HeaderMap::new(),
            cookies: HashMap::new(),
            query_params: ParamMap::new(),
            form_params: ParamMap::new(),
            body: Vec::new(),
            created_at: Utc::now(),
            client_ip,
            client_port,
            host: String::new(),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    pub fn is_truncated(&self) -> bool {
        self.headers.contains(TRUNCATED_HEADER)
    }
}

/// A recorded response: surrogate id, FK to its request (unique), status,
/// headers, and raw body (omitted for binary media types).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseData {
    pub id: Option<i64>,
    pub request_id: Option<i64>,
    pub status_code: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl ResponseData {
    pub fn new(status_code: u16, status_text: String) -> Self {
        Self {
            id: None,
            request_id: None,
            status_code,
            status_text,
            headers: HeaderMap::new(),
            body: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Whether this response's content type is one transcription omits
    /// the body for.
    pub fn is_binary_skip(&self) -> bool {
        self.headers
            .get("content-type")
            .map(|ct| {
                let base = ct.split(';').next().unwrap_or(ct).trim();
                BINARY_SKIP_CONTENT_TYPES
                    .iter()
                    .any(|skip| skip.eq_ignore_ascii_case(base))
            })
            .unwrap_or(false)
    }
}

/// A full logged transaction: the request, the response (if one was
/// obtained), and an error description if forwarding failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyLog {
    pub request: RequestData,
    pub response: Option<ResponseData>,
    pub error: Option<String>,
}

/// The list-view projection the control API's `GET /requests` exposes:
/// `{id, method, path}`, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSummary {
    pub id: i64,
    pub method: String,
    pub path: String,
}
