//! Command-line interface for certificate management and proxy operations

pub mod cert;
pub mod server;

pub use cert::CertCommand;
pub use server::ServeArgs;

