//! TLS certificate management, minting, and interception configuration.

pub mod cache;
pub mod cert_gen;
pub mod config;

pub use cache::CertCache;
pub use cert_gen::{CertificateAuthority, CertificateData};
pub use config::{create_client_config, create_server_config, AcceptAllCertVerifier};
