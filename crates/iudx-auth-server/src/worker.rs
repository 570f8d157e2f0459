//! A single worker process.
//!
//! Startup is a two-state machine. [`Initializing`] holds nothing but the
//! configuration; [`Initializing::initialize`] loads the capability table,
//! opens the store and binds the shared port, producing a [`Serving`]
//! worker whose only operation is the accept loop. A worker that is not
//! serving has no listener to accept on.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

use iudx_auth::{AuthConfig, AuthService};

use crate::dispatch;

const LISTEN_BACKLOG: i32 = 1024;

/// A worker that has its configuration and nothing else.
#[derive(Debug)]
pub struct Initializing {
    config: AuthConfig,
}

/// A worker bound to its port with the service loaded.
#[derive(Debug)]
pub struct Serving {
    service: Arc<AuthService>,
    listener: TcpListener,
    timeout: Duration,
}

impl Initializing {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Load everything the worker needs and bind the listening socket.
    ///
    /// Must be called from within a tokio runtime.
    pub fn initialize(self) -> Result<Serving> {
        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let listen = self.config.listen;

        let service = AuthService::open(self.config).context("failed to load auth service")?;
        let std_listener =
            bind_shared(listen).with_context(|| format!("failed to bind {listen}"))?;
        let listener = TcpListener::from_std(std_listener)?;

        tracing::info!(addr = %listener.local_addr()?, "worker initialized");
        Ok(Serving {
            service: Arc::new(service),
            listener,
            timeout,
        })
    }
}

impl Serving {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("worker shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!("accept failed: {e}");
                            continue;
                        }
                    };

                    let service = Arc::clone(&self.service);
                    let timeout = self.timeout;
                    tokio::spawn(async move {
                        tracing::debug!(%peer, "connection opened");
                        if let Err(e) = dispatch::serve_connection(service, stream, timeout).await {
                            tracing::warn!(%peer, "connection closed with error: {e}");
                        }
                    });
                }
            }
        }
    }
}

/// Bind a non-blocking listener that other workers may bind as well.
fn bind_shared(addr: SocketAddr) -> std::io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}
