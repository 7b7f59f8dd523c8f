//! Outbound transport.
//!
//! [`Transport`] is the seam between node logic and the network: nodes only
//! ever talk to peers through an `Arc<dyn Transport>`, so tests can swap the
//! TCP implementation for an in-process one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::codec::{read_frame, write_frame};
use super::message::{RpcRequest, RpcResponse};
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::types::NodeAddress;

/// Delivers one request to a peer and returns its response.
///
/// Implementations must bound every call in time and report unreachable or
/// slow peers as [`Error::Transport`] / [`Error::Timeout`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, target: &NodeAddress, request: RpcRequest) -> Result<RpcResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, target: &NodeAddress, request: RpcRequest) -> Result<RpcResponse> {
        (**self).send(target, request).await
    }
}

/// One TCP connection per request, framed with [`super::codec`].
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    config: RpcConfig,
}

impl TcpTransport {
    pub fn new(config: RpcConfig) -> Self {
        Self { config }
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        target: &NodeAddress,
        request: &RpcRequest,
    ) -> Result<RpcResponse> {
        let max = self.config.max_frame_size;
        write_frame(stream, request, max)
            .await
            .map_err(|e| Error::transport(target, e))?;

        match read_frame(stream, max).await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(Error::transport(target, "connection closed before response")),
            Err(e) => Err(Error::transport(target, e)),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, target: &NodeAddress, request: RpcRequest) -> Result<RpcResponse> {
        let mut stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(target.as_str()),
        )
        .await
        .map_err(|_| Error::Timeout {
            target: target.clone(),
        })?
        .map_err(|e| Error::transport(target, e))?;

        stream
            .set_nodelay(true)
            .map_err(|e| Error::transport(target, e))?;

        timeout(
            self.config.request_timeout,
            self.exchange(&mut stream, target, &request),
        )
        .await
        .map_err(|_| Error::Timeout {
            target: target.clone(),
        })?
    }
}
