//! `mitm-proxy-cli serve` -- the CLI-driven counterpart to `main.rs`'s
//! default entry point, layering command-line overrides on top of an
//! optional config file.

use crate::config::settings::ProxyConfig;
use anyhow::{Context, Result};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Optional YAML config file; CLI flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Data-plane (proxy) listening address.
    #[arg(long)]
    pub listen_addr: Option<SocketAddr>,

    /// Control API listening address.
    #[arg(long)]
    pub control_addr: Option<SocketAddr>,

    /// Directory holding the CA cert/key and minted leaf certs.
    #[arg(long)]
    pub cert_dir: Option<PathBuf>,

    /// Skip upstream certificate verification. Off by default; only set
    /// this for deliberately testing against a host with a broken or
    /// self-signed certificate chain.
    #[arg(long, default_value = "false")]
    pub upstream_skip_verify: bool,

    /// Dictionary file for the path scanner (`GET /scan/{id}`).
    #[arg(long)]
    pub scan_dict: Option<PathBuf>,

    /// `tracing_subscriber::EnvFilter` directive.
    #[arg(long)]
    pub log_level: Option<String>,
}

impl ServeArgs {
    pub fn to_config(&self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => crate::config::load_from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(addr) = self.control_addr {
            config.control_addr = addr;
        }
        if let Some(dir) = &self.cert_dir {
            config.tls.cert_dir = dir.clone();
        }
        if self.upstream_skip_verify {
            config.tls.upstream_skip_verify = true;
        }
        if let Some(dict) = &self.scan_dict {
            config.scanner.dict_file = Some(dict.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }

    pub async fn run(&self) -> Result<()> {
        let config = self.to_config()?;

        info!(listen_addr = %config.listen_addr, control_addr = %config.control_addr, "starting mitm-proxy");
        if config.tls.upstream_skip_verify {
            tracing::warn!("upstream_skip_verify is enabled -- upstream TLS certificates will not be validated");
        }

        crate::runtime::serve(config).await.map_err(anyhow::Error::from)
    }
}
