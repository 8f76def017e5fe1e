//! The data-plane proxy: accept loop, per-connection state machine, the
//! outbound connection it forwards through, and the replay/scan tools
//! built on top of the same wire path.

pub mod acceptor;
pub mod connection;
pub mod http_client;
pub mod idle;
pub mod outbound;
pub mod replay;
pub mod scanner;

pub use acceptor::{Acceptor, ShutdownHandle};
