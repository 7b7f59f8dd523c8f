//! Crate level errors.
//!
//! # Error Taxonomy
//!
//! - **Transport failures** ([`Error::Transport`], [`Error::Timeout`]): a peer was
//!   unreachable or did not answer in time. Always non-fatal. Background tasks log
//!   them and keep the state from the previous cycle; leader-change pushes are
//!   queued for bounded retry instead.
//! - **Authorization failures** ([`Error::Unauthorized`]): a subscriber asked for
//!   messages of a topic it is not subscribed to. Surfaced to the caller, never retried.
//! - **Remote failures** ([`Error::Remote`]): the peer answered with a structured
//!   [`RpcErrorInfo`]; the [`RpcErrorKind`] tells the caller what happened.
//! - **Log failures** ([`Error::Log`]): the external message log rejected a call.
//!   Request handlers report these as "upstream unavailable" to that caller only.
//!
//! Unknown topics are not errors: read paths return empty results.
//! An absent leader is not an error either: it is `None`.

use std::{io, result};

use thiserror::Error as ThisError;

use crate::rpc::{RpcErrorInfo, RpcErrorKind};
use crate::types::{NodeAddress, TopicName};

pub type Result<T> = result::Result<T, Error>;

/// Errors produced by node operations, the transport and the log boundary.
#[derive(Debug, ThisError)]
pub enum Error {
    /// The target could not be reached or the connection broke.
    #[error("Transport failure talking to {target}: {reason}")]
    Transport { target: NodeAddress, reason: String },

    /// The target did not answer within the configured timeout.
    #[error("Timed out talking to {target}")]
    Timeout { target: NodeAddress },

    /// Subscriber is not subscribed to the topic it tried to read.
    #[error("Subscriber {subscriber} is not subscribed to topic {topic}")]
    Unauthorized {
        subscriber: NodeAddress,
        topic: TopicName,
    },

    /// The peer answered with an error.
    #[error("Remote error ({:?}): {}", .0.kind, .0.message)]
    Remote(RpcErrorInfo),

    /// The peer answered with a response of the wrong shape.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The external message log failed.
    #[error("Message log error: {0}")]
    Log(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns true for failures that mean "the peer was unreachable".
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Timeout { .. })
    }

    /// Build a transport error from an I/O failure.
    pub fn transport(target: &NodeAddress, err: impl std::fmt::Display) -> Self {
        Error::Transport {
            target: target.clone(),
            reason: err.to_string(),
        }
    }

    /// Convert into the structured form carried on the wire.
    pub fn to_rpc_error(&self) -> RpcErrorInfo {
        let kind = match self {
            Error::Unauthorized { .. } => RpcErrorKind::Unauthorized,
            Error::Transport { .. } | Error::Timeout { .. } | Error::Log(_) => {
                RpcErrorKind::Unavailable
            }
            Error::Remote(info) => return info.clone(),
            _ => RpcErrorKind::Internal,
        };
        RpcErrorInfo::new(kind, self.to_string())
    }
}

impl From<RpcErrorInfo> for Error {
    fn from(info: RpcErrorInfo) -> Self {
        Error::Remote(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let target = NodeAddress::from("127.0.0.1:9001");
        assert!(Error::transport(&target, "connection refused").is_transport());
        assert!(Error::Timeout { target }.is_transport());
        assert!(!Error::Log("down".to_string()).is_transport());
        assert!(!Error::Config("bad".to_string()).is_transport());
    }

    #[test]
    fn test_unauthorized_maps_to_rpc_kind() {
        let err = Error::Unauthorized {
            subscriber: NodeAddress::from("127.0.0.1:7001"),
            topic: "news".to_string(),
        };
        let info = err.to_rpc_error();
        assert_eq!(info.kind, RpcErrorKind::Unauthorized);
        assert!(info.message.contains("news"));
    }

    #[test]
    fn test_log_failure_is_unavailable_upstream() {
        let info = Error::Log("broker down".to_string()).to_rpc_error();
        assert_eq!(info.kind, RpcErrorKind::Unavailable);
    }

    #[test]
    fn test_remote_error_round_trips_kind() {
        let original = RpcErrorInfo::new(RpcErrorKind::Unsupported, "nope");
        let err: Error = original.clone().into();
        assert_eq!(err.to_rpc_error(), original);
    }

    #[test]
    fn test_error_display() {
        let err = Error::Timeout {
            target: NodeAddress::from("10.0.0.1:9001"),
        };
        assert!(err.to_string().contains("10.0.0.1:9001"));
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_undecodable_frame_surfaces_as_io() {
        use crate::rpc::RpcRequest;
        use crate::rpc::codec::read_frame;
        use tokio::io::AsyncWriteExt;

        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0, 0, 1, 0xff]).await.unwrap();

        let err: Error = read_frame::<_, RpcRequest>(&mut b, 1024)
            .await
            .unwrap_err()
            .into();
        assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::InvalidData));
    }
}
