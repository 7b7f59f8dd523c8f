//! In-process transport for tests.
//!
//! Routes requests straight to registered [`RpcHandler`]s through the same
//! [`dispatch`] the TCP server uses, so clock stamping behaves exactly as on
//! the wire. Targets can be marked down to simulate crashes and partitions.
//!
//! # Example
//!
//! ```rust,ignore
//! let mock = MockTransport::new();
//! mock.register(coordinator.address().clone(), coordinator.clone());
//! mock.mark_down(&NodeAddress::from("127.0.0.1:9003"));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::error::{Error, Result};
use crate::rpc::{RequestBody, RpcHandler, RpcRequest, RpcResponse, Transport, dispatch};
use crate::types::NodeAddress;

#[derive(Default)]
struct Inner {
    handlers: DashMap<NodeAddress, Arc<dyn RpcHandler>>,
    down: DashSet<NodeAddress>,
    requests: DashMap<NodeAddress, Vec<RequestBody>>,
}

/// Shared in-process network. Clones see the same handlers and failures.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests for `address` to `handler`.
    pub fn register(&self, address: NodeAddress, handler: Arc<dyn RpcHandler>) {
        self.inner.handlers.insert(address, handler);
    }

    /// Remove `address` from the network entirely.
    pub fn unregister(&self, address: &NodeAddress) {
        self.inner.handlers.remove(address);
    }

    /// Fail every request to `address` until [`MockTransport::mark_up`].
    pub fn mark_down(&self, address: &NodeAddress) {
        self.inner.down.insert(address.clone());
    }

    pub fn mark_up(&self, address: &NodeAddress) {
        self.inner.down.remove(address);
    }

    pub fn is_down(&self, address: &NodeAddress) -> bool {
        self.inner.down.contains(address)
    }

    /// Requests sent to `address`, including failed ones.
    pub fn call_count(&self, address: &NodeAddress) -> usize {
        self.inner
            .requests
            .get(address)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Requests of kind `kind` (see [`RequestBody::kind`]) sent to `address`.
    pub fn call_count_of(&self, address: &NodeAddress, kind: &str) -> usize {
        self.inner
            .requests
            .get(address)
            .map(|r| r.iter().filter(|b| b.kind() == kind).count())
            .unwrap_or(0)
    }

    /// Every request sent to `address`, oldest first.
    pub fn requests_to(&self, address: &NodeAddress) -> Vec<RequestBody> {
        self.inner
            .requests
            .get(address)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn clear_requests(&self) {
        self.inner.requests.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, target: &NodeAddress, request: RpcRequest) -> Result<RpcResponse> {
        self.inner
            .requests
            .entry(target.clone())
            .or_default()
            .push(request.body.clone());

        if self.is_down(target) {
            return Err(Error::transport(target, "connection refused (marked down)"));
        }

        // Clone the handler out so no map guard is held across the await
        let handler = match self.inner.handlers.get(target) {
            Some(h) => h.value().clone(),
            None => return Err(Error::transport(target, "no route to host")),
        };

        Ok(dispatch(handler.as_ref(), request).await)
    }
}
