//! mitm-proxy -- an HTTP/HTTPS man-in-the-middle intercepting proxy:
//! transparent TLS interception via an in-process CA, full
//! request/response transcription into a queryable history, and a
//! control API to list, repeat, and dictionary-scan recorded
//! transactions.

pub mod app;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod repository;
pub mod tls;
pub mod transcription;

pub mod buffer_pool;
pub mod utils;

pub use app::AppContext;
pub use config::settings::ProxyConfig;
pub use error::{Error, Result};
pub use logging::{
    init_logger_with_config, init_logger_with_env, log_debug, log_error, log_info, log_trace, log_warning,
};
pub use models::{ProxyLog, RequestData, ResponseData};

/// Run the proxy's data plane and control plane together until either
/// is asked to stop. Used by both binaries (`main.rs`'s default serve
/// and `main_cli.rs`'s `serve` subcommand) so there is exactly one place
/// that wires an `AppContext` to an `Acceptor` and the control API.
pub mod runtime {
    use crate::app::AppContext;
    use crate::config::settings::ProxyConfig;
    use crate::control;
    use crate::error::Result;
    use crate::proxy::Acceptor;
    use std::sync::Arc;

    pub async fn serve(config: ProxyConfig) -> Result<()> {
        let listen_addr = config.listen_addr;
        let control_addr = config.control_addr;

        let ctx = Arc::new(AppContext::new(config).await?);
        let acceptor = Acceptor::new(listen_addr, Arc::clone(&ctx));

        let control_ctx = Arc::clone(&ctx);
        let control_fut = control::run(control_addr, control_ctx, listen_addr);

        tokio::select! {
            res = acceptor.run() => res,
            res = control_fut => res,
        }
    }
}
