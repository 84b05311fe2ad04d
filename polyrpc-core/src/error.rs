//! Error kinds shared by the framing engine, the codecs, and dispatch.
//!
//! Two families:
//! - [`DecodeError`]: the three framing outcomes a codec may return from
//!   `decode`. `NotEnoughData` is the only recoverable one.
//! - [`RpcError`]: everything past framing — serialization, dispatch,
//!   transport, and timeouts. Carries a [`BaiduRpcErrno`] mapping for the
//!   response meta.

use thiserror::Error;

/// Framing outcome of a single decode attempt.
///
/// Codecs classify, they never recover: the framing engine consumes
/// `NotEnoughData` (wait for more bytes) and, while the connection is
/// unbound, `BadSchema` (try the next candidate). Everything else is fatal
/// for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The accumulator does not yet hold one whole packet. Non-fatal; the
    /// cursor is untouched.
    #[error("not enough data")]
    NotEnoughData,

    /// The bytes do not match this codec's framing.
    #[error("bad schema")]
    BadSchema,

    /// The packet declares a body larger than [`MAX_BODY_SIZE`]. Always
    /// fatal.
    #[error("declared body size exceeds limit")]
    TooBigData,
}

/// Hard upper bound on a declared packet body: 512 MiB.
///
/// A header announcing more than this is a framing attack or a desync, not a
/// request; the connection is closed without reading the body.
pub const MAX_BODY_SIZE: u64 = 512 * 1024 * 1024;

/// Wire error codes carried in response meta, unchanged from the original
/// deployment. Values are part of the interoperability contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BaiduRpcErrno {
    /// The requested service is not registered.
    NoService = 1001,
    /// The requested method is not registered on the service.
    NoMethod = 1002,
    /// The request itself is malformed (bad meta, duplicate log id, ...).
    BadRequest = 1003,
    /// The call did not complete before its deadline.
    RpcTimedOut = 1008,
    /// The underlying connection failed.
    FailedSocket = 1009,
    /// An HTTP peer answered with a non-200 status.
    Http = 1010,
    /// The server failed internally while running user code.
    Internal = 2001,
    /// The response could not be parsed.
    BadResponse = 2002,
}

impl BaiduRpcErrno {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a wire value back to a known errno. Unknown values are preserved
    /// by callers as raw `i32`s; this is only for classification.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1001 => Some(Self::NoService),
            1002 => Some(Self::NoMethod),
            1003 => Some(Self::BadRequest),
            1008 => Some(Self::RpcTimedOut),
            1009 => Some(Self::FailedSocket),
            1010 => Some(Self::Http),
            2001 => Some(Self::Internal),
            2002 => Some(Self::BadResponse),
            _ => None,
        }
    }
}

/// Errors past the framing layer.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The codec recognized the packet but could not parse meta or body, or
    /// could not produce wire bytes from a packet.
    #[error("serialization failure: {0}")]
    Serialization(String),

    /// Dispatch found no target, or user code failed. Carried on the wire as
    /// a response with a non-zero error code.
    #[error("service exception (errno {code}): {message}")]
    Service { code: i32, message: String },

    /// The transport closed or the stream was reset. Cancels every
    /// outstanding request on the connection.
    #[error("network error: {0}")]
    Network(String),

    /// The call did not complete before its deadline. Local-only; never
    /// serialized.
    #[error("timed out")]
    Timeout,
}

impl RpcError {
    pub fn serialization(msg: impl Into<String>) -> Self {
        RpcError::Serialization(msg.into())
    }

    pub fn service(errno: BaiduRpcErrno, msg: impl Into<String>) -> Self {
        RpcError::Service {
            code: errno.code(),
            message: msg.into(),
        }
    }

    pub fn network(msg: impl Into<String>) -> Self {
        RpcError::Network(msg.into())
    }

    /// The errno written into response meta when this error is surfaced to
    /// the peer.
    pub fn errno(&self) -> i32 {
        match self {
            RpcError::Serialization(_) => BaiduRpcErrno::BadRequest.code(),
            RpcError::Service { code, .. } => *code,
            RpcError::Network(_) => BaiduRpcErrno::FailedSocket.code(),
            RpcError::Timeout => BaiduRpcErrno::RpcTimedOut.code(),
        }
    }
}
