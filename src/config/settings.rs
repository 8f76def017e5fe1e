//! Proxy server configuration settings

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the proxy server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy (data-plane) listening address.
    pub listen_addr: SocketAddr,

    /// Control API listening address (history listing/replay/scan face).
    pub control_addr: SocketAddr,

    /// Log level filter (`tracing_subscriber::EnvFilter` directive).
    pub log_level: String,

    /// TLS / certificate-minting configuration.
    pub tls: TlsConfig,

    /// Pooled upstream HTTP client configuration (used by the replay path).
    pub http_client: HttpClientConfig,

    /// Transcription body-capture configuration.
    pub transcription: TranscriptionConfig,

    /// History store configuration.
    pub repository: RepositoryConfig,

    /// Path scanner configuration.
    pub scanner: ScannerConfig,

    /// Per-connection idle read timeout.
    pub idle_timeout: Duration,

    /// Upstream dial timeout.
    pub dial_timeout: Duration,
}

/// TLS configuration for HTTPS interception and certificate minting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Directory holding the CA cert/key, the shared leaf private key, and
    /// minted per-domain leaf certs.
    pub cert_dir: PathBuf,

    /// Certificate organization name for the CA and minted leaves.
    pub cert_organization: String,

    /// Leaf certificate validity, in days (~10 years by default).
    pub leaf_validity_days: u32,

    /// Skip upstream certificate verification. A named, explicit opt-in --
    /// never enabled by default (see REDESIGN FLAGS).
    pub upstream_skip_verify: bool,
}

/// Pooled upstream HTTP client configuration, used by the Replay path.
/// Defaults mirror the original proxy's `http.Transport` constants exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    pub max_idle_conns: usize,
    pub idle_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub expect_continue_timeout: Duration,
    pub dial_timeout: Duration,
    pub keep_alive_interval: Duration,
}

/// Transcription's body-capture limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Bodies larger than this are stored truncated; forwarding itself is
    /// never truncated.
    pub body_cap_bytes: usize,
}

/// History store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// `sqlite://path/to/file.db`, or `sqlite::memory:` for an ephemeral
    /// in-process store (the default, convenient for tests).
    pub database_url: String,
}

/// Path scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Dictionary file of path suffixes, one per line. Required to serve
    /// `/scan/{id}`; absent otherwise.
    pub dict_file: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            control_addr: "0.0.0.0:8000".parse().unwrap(),
            log_level: "info".to_string(),
            tls: TlsConfig::default(),
            http_client: HttpClientConfig::default(),
            transcription: TranscriptionConfig::default(),
            repository: RepositoryConfig::default(),
            scanner: ScannerConfig::default(),
            idle_timeout: Duration::from_secs(60),
            dial_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_dir: PathBuf::from("./certs"),
            cert_organization: "mitm-proxy".to_string(),
            leaf_validity_days: 365 * 10,
            upstream_skip_verify: false,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_idle_conns: 100,
            idle_timeout: Duration::from_secs(90),
            tls_handshake_timeout: Duration::from_secs(10),
            expect_continue_timeout: Duration::from_secs(1),
            dial_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(30),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            body_cap_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self { dict_file: None }
    }
}

impl TlsConfig {
    pub fn ca_cert_path(&self) -> PathBuf {
        self.cert_dir.join("mitm-ca.crt")
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.cert_dir.join("mitm-ca.key")
    }

    pub fn leaf_key_path(&self) -> PathBuf {
        self.cert_dir.join("cert.key")
    }

    pub fn leaf_cert_path(&self, sni: &str) -> PathBuf {
        self.cert_dir.join(format!("{sni}.crt"))
    }
}
