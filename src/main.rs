//! Default entry point: load config.yml if present (else built-in
//! defaults), start logging, and run the proxy + control API until the
//! process is killed.

use mitm_proxy::{init_logger_with_config, log_info, ProxyConfig};

fn main() {
    let config = match std::fs::metadata("config.yml") {
        Ok(_) => mitm_proxy::config::load_from_file("config.yml").unwrap_or_else(|e| {
            eprintln!("failed to load config.yml: {e}");
            std::process::exit(1);
        }),
        Err(_) => ProxyConfig::default(),
    };

    init_logger_with_config(&config.log_level, true);

    log_info!("starting mitm-proxy: data plane {}", config.listen_addr);
    log_info!("control API: {}", config.control_addr);
    if config.tls.upstream_skip_verify {
        log_info!("upstream_skip_verify is enabled -- upstream certificates will not be validated");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("failed to build tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(e) = runtime.block_on(mitm_proxy::runtime::serve(config)) {
        eprintln!("mitm-proxy exited with error: {e}");
        std::process::exit(1);
    }
}
