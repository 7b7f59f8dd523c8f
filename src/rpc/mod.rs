//! Node-to-node RPC.
//!
//! - [`message`]: wire types, each stamped with a Lamport timestamp
//! - [`codec`]: 4-byte big-endian length prefix + bincode
//! - [`transport`]: the [`Transport`] seam and [`TcpTransport`]
//! - [`server`]: [`RpcHandler`], [`dispatch`] and [`RpcServer`]
//! - [`client`]: [`RpcClient`], which ticks and observes the caller's clock

pub mod client;
pub mod codec;
pub mod message;
pub mod server;
pub mod transport;

pub use client::RpcClient;
pub use message::{RequestBody, ResponseBody, RpcErrorInfo, RpcErrorKind, RpcRequest, RpcResponse};
pub use server::{RpcHandler, RpcServer, ServerHandle, dispatch, unsupported};
pub use transport::{TcpTransport, Transport};
