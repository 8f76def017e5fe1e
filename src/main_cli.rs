//! `mitm-proxy-cli`: clap-driven entry point exposing `serve` and `cert
//! generate|inspect|validate` subcommands.

use clap::{Parser, Subcommand};
use mitm_proxy::cli::{CertCommand, ServeArgs};
use mitm_proxy::{init_logger_with_env, log_error, log_info};
use tracing::error;

#[derive(Parser)]
#[command(name = "mitm-proxy-cli")]
#[command(about = "An HTTP/HTTPS intercepting proxy with TLS interception, history, and replay")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug logging (shorthand for --log-level debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy's data plane and control API.
    Serve(ServeArgs),

    /// Certificate management commands.
    #[command(subcommand)]
    Cert(CertCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // SAFETY: single-threaded at this point, before any runtime starts.
    unsafe {
        if cli.verbose {
            std::env::set_var("RUST_LOG", "debug");
        } else {
            std::env::set_var("RUST_LOG", &cli.log_level);
        }
    }
    init_logger_with_env();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Serve(args)) => {
            log_info!("starting mitm-proxy");
            if let Err(e) = args.run().await {
                log_error!("server error: {e}");
                error!("failed to start server: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Cert(cert_cmd)) => {
            if let Err(e) = cert_cmd.execute().await {
                log_error!("certificate command error: {e}");
                error!("certificate operation failed: {e}");
                std::process::exit(1);
            }
        }
        None => {
            log_info!("no subcommand given, starting with defaults (use --help to see subcommands)");
            let default_args = ServeArgs {
                config: None,
                listen_addr: None,
                control_addr: None,
                cert_dir: None,
                upstream_skip_verify: false,
                scan_dict: None,
                log_level: Some(cli.log_level),
            };
            if let Err(e) = default_args.run().await {
                log_error!("server error: {e}");
                error!("failed to start server: {e}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
