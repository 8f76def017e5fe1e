//! Bind the data-plane listener and run the accept loop: one spawned
//! task per inbound connection, panic isolation via `JoinHandle`, and a
//! `ShutdownHandle` that unblocks a pending `accept()` rather than
//! merely flagging the loop to stop on its next iteration.
//!
//! Grounded on the teacher's `TlsProxyServer::create_reusable_tls_socket`
//! / `start` (`tls/server.rs`) for the `socket2`-based `SO_REUSEADDR`
//! bind and per-connection `tokio::spawn`, generalized to the plain
//! listener this crate's data plane always uses (TLS is established
//! per-tunnel after a CONNECT, not at the listener).

use crate::app::AppContext;
use crate::error::{Error, Result};
use crate::proxy::connection;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

pub struct Acceptor {
    listen_addr: SocketAddr,
    ctx: Arc<AppContext>,
    stopped: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl Acceptor {
    pub fn new(listen_addr: SocketAddr, ctx: Arc<AppContext>) -> Self {
        Self {
            listen_addr,
            ctx,
            stopped: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stopped: Arc::clone(&self.stopped),
            notify: Arc::clone(&self.shutdown_notify),
        }
    }

    /// Bind and accept connections until `shutdown()` is called. Each
    /// accepted connection runs in its own task; a panic inside one is
    /// caught via `JoinHandle::is_panic()` and logged, never propagated
    /// to the acceptor itself.
    pub async fn run(&self) -> Result<()> {
        let listener = bind(self.listen_addr)?;
        info!(addr = %self.listen_addr, "proxy listening");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notify.notified() => {
                    info!("shutdown requested, closing listener");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "accept() failed, retrying");
                            continue;
                        }
                    };

                    let ctx = Arc::clone(&self.ctx);
                    let handle = tokio::spawn(async move {
                        connection::handle(stream, remote_addr, ctx).await;
                    });

                    tokio::spawn(async move {
                        if let Err(join_err) = handle.await {
                            if join_err.is_panic() {
                                error!(error = ?join_err, "connection handler panicked; isolated, process continues");
                            }
                        }
                    });
                }
            }
        }
    }
}

/// A cloneable handle that tells a running `Acceptor` to stop accepting
/// new connections and unblocks its pending `accept()` call to do so
/// promptly, rather than waiting for the next incoming connection.
#[derive(Clone)]
pub struct ShutdownHandle {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None).map_err(Error::Io)?;
    socket.set_reuse_address(true).map_err(Error::Io)?;
    socket.set_nonblocking(true).map_err(Error::Io)?;
    socket.bind(&addr.into()).map_err(Error::Io)?;
    socket.listen(1024).map_err(Error::Io)?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).map_err(Error::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_handle_reports_state() {
        let stopped = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        let handle = ShutdownHandle { stopped, notify };
        assert!(!handle.is_shutdown());
        handle.shutdown();
        assert!(handle.is_shutdown());
    }
}
