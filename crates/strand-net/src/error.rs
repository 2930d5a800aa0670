//! Reactor error types

use nix::errno::Errno;
use thiserror::Error;

/// Result alias for reactor operations
pub type NetResult<T> = Result<T, NetError>;

/// Errors surfaced by the networking layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetError {
    /// The peer shut its end of the connection
    #[error("peer closed the connection")]
    PeerClosed,

    /// Socket creation/bind/listen failure
    #[error("socket setup failed: {0}")]
    Setup(#[source] Errno),

    /// epoll registration or wait failure
    #[error("epoll operation failed: {0}")]
    Poll(#[source] Errno),

    /// Non-transient read/write failure on a connection
    #[error("connection io failed: {0}")]
    Io(#[source] Errno),
}
