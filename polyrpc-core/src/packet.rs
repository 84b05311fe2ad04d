//! Raw and decoded packet types.
//!
//! [`RawPacket`] is what `decode` produces: opaque retained slices of the
//! accumulator, framing validated but nothing parsed. `decode_request` /
//! `decode_response` turn it into a [`RequestPacket`] / [`ResponsePacket`].
//! Slices are moved, never cloned, into the decoded packet so the backing
//! chunk is released exactly once when the packet is dropped.

use bytes::Bytes;

use crate::compress::CompressType;
use crate::error::DecodeError;

/// One framed packet, straight off the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    /// Protobuf meta for the binary family, the HTTP head for HTTP/1.1, a
    /// serialized [`crate::meta::GrpcMeta`] for gRPC. Empty for NSHead.
    pub meta: Bytes,
    /// The post-meta block: message, or `[message | attachment]`.
    pub body: Bytes,
    /// Present when the packet carried a server-push sub-header.
    pub push: Option<SpHead>,
}

/// Body encoding selected by the protocol (HTTP picks per-request from
/// `content-type`; everything else is protobuf).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireEncoding {
    #[default]
    Protobuf,
    Json,
}

/// Trace ids propagated from request meta into the call context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceIds {
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_span_id: u64,
}

/// A decoded request, ready for dispatch.
#[derive(Debug, Clone, Default)]
pub struct RequestPacket {
    /// Client-chosen 64-bit correlation id.
    pub log_id: u64,
    pub service_name: String,
    /// Method name, or the stringified method index for Hulu.
    pub method_key: String,
    pub compress_type: CompressType,
    pub encoding: WireEncoding,
    /// Serialized (possibly compressed) message bytes.
    pub body: Bytes,
    /// Opaque binary attachment; ownership transfers here from the raw
    /// packet.
    pub attachment: Option<Bytes>,
    /// Key/value attachment from meta.
    pub kv_attachment: Vec<(String, String)>,
    /// Per-call deadline from meta; `None` means use the server default.
    pub timeout_ms: Option<u64>,
    pub trace: TraceIds,
}

/// A decoded response.
#[derive(Debug, Clone, Default)]
pub struct ResponsePacket {
    pub log_id: u64,
    pub compress_type: CompressType,
    pub encoding: WireEncoding,
    /// Zero means success; non-zero values follow `BaiduRpcErrno`.
    pub error_code: i32,
    pub error_text: String,
    /// Serialized (possibly compressed) result; empty on error.
    pub body: Bytes,
    pub attachment: Option<Bytes>,
}

impl ResponsePacket {
    pub fn is_success(&self) -> bool {
        self.error_code == 0
    }

    /// An error response correlated to `log_id`, body-less.
    pub fn error(log_id: u64, error_code: i32, error_text: impl Into<String>) -> Self {
        ResponsePacket {
            log_id,
            error_code,
            error_text: error_text.into(),
            ..Default::default()
        }
    }
}

/// Marker word opening a server-push sub-header.
pub const SP_HEAD_MARKER: u32 = u32::from_le_bytes(*b"SPV1");

/// Serialized size of [`SpHead`].
pub const SP_HEAD_LEN: usize = 16;

/// Direction/role of a packet on a push-enabled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PushPacketType {
    /// Client-originated request (normal direction).
    Request = 0,
    /// Server reply to a normal request.
    Response = 1,
    /// Server-originated request, routed to a client-side callback.
    PushRequest = 2,
    /// Client reply to a push request.
    PushResponse = 3,
}

impl PushPacketType {
    fn from_byte(b: u8) -> Result<Self, DecodeError> {
        match b {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::PushRequest),
            3 => Ok(Self::PushResponse),
            _ => Err(DecodeError::BadSchema),
        }
    }

    /// Whether this packet parses as a request (normal or push).
    pub fn is_request(self) -> bool {
        matches!(self, Self::Request | Self::PushRequest)
    }
}

/// Server-push sub-header, inserted between the outer length-prefixed header
/// and the meta block.
///
/// Layout (little-endian): `marker: u32 | packet_type: u8 | reserved: [u8; 3]
/// | log_id: u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpHead {
    pub packet_type: PushPacketType,
    pub log_id: u64,
}

impl SpHead {
    pub fn encode(&self) -> [u8; SP_HEAD_LEN] {
        let mut out = [0u8; SP_HEAD_LEN];
        out[0..4].copy_from_slice(&SP_HEAD_MARKER.to_le_bytes());
        out[4] = self.packet_type as u8;
        out[8..16].copy_from_slice(&self.log_id.to_le_bytes());
        out
    }

    /// Whether `bytes` opens with the push marker word.
    pub fn present(bytes: &[u8]) -> bool {
        bytes.len() >= 4 && bytes[0..4] == SP_HEAD_MARKER.to_le_bytes()
    }

    pub fn decode(bytes: &[u8; SP_HEAD_LEN]) -> Result<Self, DecodeError> {
        let marker = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if marker != SP_HEAD_MARKER {
            return Err(DecodeError::BadSchema);
        }
        let packet_type = PushPacketType::from_byte(bytes[4])?;
        let log_id = u64::from_le_bytes([
            bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
        ]);
        Ok(SpHead { packet_type, log_id })
    }
}
