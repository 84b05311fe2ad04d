//! Server and channel configuration.
//!
//! Plain builder-style option structs, passed explicitly — there is no
//! process-wide default the core reaches for implicitly.

use std::time::Duration;

use polyrpc_core::{CompressType, WireEncoding, MAX_BODY_SIZE};

/// Server-side options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Deadline applied when request meta carries none.
    pub default_timeout: Duration,
    /// Upper bound on declared packet bodies, enforced by every codec on
    /// the server's connections; clamped to the protocol maximum of
    /// 512 MiB.
    pub max_body_size: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            default_timeout: Duration::from_secs(30),
            max_body_size: MAX_BODY_SIZE,
        }
    }
}

impl ServerOptions {
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn max_body_size(mut self, bytes: u64) -> Self {
        self.max_body_size = bytes.min(MAX_BODY_SIZE);
        self
    }
}

/// Client channel options.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Per-call deadline, also sent in request meta.
    pub timeout: Duration,
    pub compress_type: CompressType,
    /// Body encoding for protocols that support both (HTTP).
    pub encoding: WireEncoding,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        ChannelOptions {
            timeout: Duration::from_secs(10),
            compress_type: CompressType::None,
            encoding: WireEncoding::Protobuf,
        }
    }
}

impl ChannelOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn compress_type(mut self, compress_type: CompressType) -> Self {
        self.compress_type = compress_type;
        self
    }

    pub fn encoding(mut self, encoding: WireEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}
