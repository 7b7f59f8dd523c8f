//! Inbound RPC serving.
//!
//! Every node role implements [`RpcHandler`]. [`dispatch`] wraps a handler
//! with the clock discipline shared by all roles: the request timestamp is
//! observed before anything else, `Ping` is answered for every role, and the
//! response is stamped with the post-handling clock value. The TCP server and
//! the in-process mock transport both go through it.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{read_frame, write_frame};
use super::message::{RequestBody, ResponseBody, RpcErrorInfo, RpcRequest, RpcResponse};
use crate::clock::LogicalClock;
use crate::config::RpcConfig;
use crate::error::Result;
use crate::metrics;

/// Request handling for one node role.
#[async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    /// The node's clock, observed and read by [`dispatch`].
    fn clock(&self) -> &LogicalClock;

    /// Handle a request whose timestamp has already been observed.
    ///
    /// Errors are sent back to the caller as [`ResponseBody::Error`].
    async fn handle(&self, request: RequestBody) -> Result<ResponseBody>;
}

/// Response for a request the role does not serve.
pub fn unsupported(request: &RequestBody) -> Result<ResponseBody> {
    Ok(ResponseBody::Error(RpcErrorInfo::unsupported(request)))
}

/// Observe, handle, stamp.
pub async fn dispatch<H: RpcHandler + ?Sized>(handler: &H, request: RpcRequest) -> RpcResponse {
    handler.clock().observe(request.timestamp);

    let kind = request.body.kind();
    let body = match request.body {
        RequestBody::Ping => ResponseBody::Pong,
        body => match handler.handle(body).await {
            Ok(body) => body,
            Err(e) => {
                debug!(request = kind, error = %e, "Request failed");
                ResponseBody::Error(e.to_rpc_error())
            }
        },
    };

    metrics::record_rpc_served(kind, !matches!(body, ResponseBody::Error(_)));

    RpcResponse {
        timestamp: handler.clock().read(),
        body,
    }
}

/// TCP front end for an [`RpcHandler`].
pub struct RpcServer<H> {
    handler: Arc<H>,
    listener: TcpListener,
    config: RpcConfig,
}

impl<H: RpcHandler> RpcServer<H> {
    /// Bind `addr` and serve `handler` on it.
    pub async fn bind(addr: &str, handler: Arc<H>, config: RpcConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener, handler, config))
    }

    /// Serve on an already bound listener.
    pub fn from_listener(listener: TcpListener, handler: Arc<H>, config: RpcConfig) -> Self {
        Self {
            handler,
            listener,
            config,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let local = self.listener.local_addr()?;
        info!(addr = %local, "RPC server listening");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept RPC connection");
                            continue;
                        }
                    };
                    let handler = self.handler.clone();
                    let max_frame_size = self.config.max_frame_size;
                    let conn_shutdown = shutdown.resubscribe();

                    tokio::spawn(async move {
                        metrics::ACTIVE_CONNECTIONS.inc();
                        if let Err(e) =
                            handle_connection(handler, stream, max_frame_size, conn_shutdown).await
                        {
                            debug!(peer = %peer, error = %e, "RPC connection closed with error");
                        }
                        metrics::ACTIVE_CONNECTIONS.dec();
                    });
                }
                _ = shutdown.recv() => {
                    info!(addr = %local, "RPC server shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Run in the background and return a handle to stop it.
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let join = tokio::spawn(self.run(shutdown_rx));
        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            join,
        })
    }
}

/// Serve frames on one connection until the peer closes it.
async fn handle_connection<H: RpcHandler>(
    handler: Arc<H>,
    mut stream: TcpStream,
    max_frame_size: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;

    loop {
        let request: RpcRequest = tokio::select! {
            frame = read_frame(&mut stream, max_frame_size) => match frame? {
                Some(request) => request,
                None => return Ok(()),
            },
            _ = shutdown.recv() => return Ok(()),
        };

        let response = dispatch(handler.as_ref(), request).await;
        write_frame(&mut stream, &response, max_frame_size).await?;
    }
}

/// A running [`RpcServer`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close open connections and wait for the accept loop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        match self.join.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(addr = %self.local_addr, error = %e, "RPC server exited with error"),
            Err(e) => warn!(addr = %self.local_addr, error = %e, "RPC server task panicked"),
        }
    }
}
