//! Utility functions for the proxy server

pub mod http;
pub mod time;

pub use http::*;
pub use time::*;
