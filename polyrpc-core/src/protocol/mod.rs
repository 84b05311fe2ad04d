//! Protocol codecs.
//!
//! One codec per wire format, all implementing [`ProtocolCodec`]. Codecs are
//! stateless and reentrant; whatever a protocol needs to remember between
//! packets on one connection (HPACK tables, HTTP/2 stream states, control
//! frames owed to the peer) lives in the per-connection [`ConnContext`] owned
//! by the framing engine.

use bytes::{Bytes, BytesMut};

use crate::buffer::BufferStore;
use crate::error::{DecodeError, RpcError, MAX_BODY_SIZE};
use crate::packet::{RawPacket, RequestPacket, ResponsePacket, SpHead};

mod binary;

pub mod baidu;
pub mod grpc;
pub mod http;
pub mod hulu;
pub mod nshead;
pub mod sofa;

/// Identity of a wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolId {
    /// `"PRPC"` magic, big-endian sizes, protobuf meta.
    BaiduStd,
    /// `"HULU"` magic, little-endian sizes, method-by-index.
    Hulu,
    /// `"SOFA"` magic, little-endian sizes.
    Sofa,
    /// Fixed 36-byte header, id-routed bare body.
    NsHead,
    /// HTTP/1.1 with JSON or protobuf body.
    Http,
    /// gRPC over HTTP/2.
    Grpc,
}

impl ProtocolId {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolId::BaiduStd => "baidu_std",
            ProtocolId::Hulu => "hulu",
            ProtocolId::Sofa => "sofa",
            ProtocolId::NsHead => "nshead",
            ProtocolId::Http => "http",
            ProtocolId::Grpc => "grpc",
        }
    }
}

/// Detection order for unbound connections: most specific binary magics
/// first, then the HTTP/1.1 request-line heuristic, then the HTTP/2 preface.
pub const DETECT_ORDER: &[ProtocolId] = &[
    ProtocolId::BaiduStd,
    ProtocolId::Hulu,
    ProtocolId::Sofa,
    ProtocolId::NsHead,
    ProtocolId::Http,
    ProtocolId::Grpc,
];

/// The codec instance for a protocol id.
pub fn codec_for(id: ProtocolId) -> &'static dyn ProtocolCodec {
    match id {
        ProtocolId::BaiduStd => &baidu::BaiduStdCodec,
        ProtocolId::Hulu => &hulu::HuluCodec,
        ProtocolId::Sofa => &sofa::SofaCodec,
        ProtocolId::NsHead => &nshead::NsHeadCodec,
        ProtocolId::Http => &http::HttpCodec,
        ProtocolId::Grpc => &grpc::GrpcCodec,
    }
}

/// Encode a request carrying a push sub-header with the connection's bound
/// codec. Any length-prefixed protocol can carry push traffic; the others
/// cannot express the sub-header.
pub fn encode_request_with_push(
    id: ProtocolId,
    req: &RequestPacket,
    push: SpHead,
) -> Result<Bytes, RpcError> {
    match id {
        ProtocolId::BaiduStd => baidu::encode_request_with_push(req, push),
        ProtocolId::Hulu => hulu::encode_request_with_push(req, push),
        ProtocolId::Sofa => sofa::encode_request_with_push(req, push),
        other => Err(RpcError::serialization(format!(
            "server push requires a length-prefixed protocol, not {}",
            other.as_str()
        ))),
    }
}

/// Encode a response carrying a push sub-header with the connection's bound
/// codec.
pub fn encode_response_with_push(
    id: ProtocolId,
    resp: &ResponsePacket,
    push: SpHead,
) -> Result<Bytes, RpcError> {
    match id {
        ProtocolId::BaiduStd => baidu::encode_response_with_push(resp, push),
        ProtocolId::Hulu => hulu::encode_response_with_push(resp, push),
        ProtocolId::Sofa => sofa::encode_response_with_push(resp, push),
        other => Err(RpcError::serialization(format!(
            "server push requires a length-prefixed protocol, not {}",
            other.as_str()
        ))),
    }
}

/// Per-connection protocol state, owned by the framing engine and threaded
/// through `decode` / `decode_response`.
#[derive(Debug)]
pub struct ConnContext {
    /// HTTP/2 connection state; created by the gRPC codec when it recognizes
    /// the connection.
    pub(crate) grpc: Option<grpc::GrpcConn>,
    /// Connection-level frames owed to the peer (SETTINGS, acks,
    /// WINDOW_UPDATE). The transport drains these via the engine.
    pub(crate) control: BytesMut,
    /// A codec may pin the connection to itself before emitting the first
    /// packet (gRPC does, on preface + SETTINGS).
    pub(crate) latched: Option<ProtocolId>,
    /// Correlation ids of streams the peer reset; the owner fails the
    /// matching futures with a network error.
    pub(crate) reset_log_ids: Vec<u64>,
    /// Declared-body cap enforced by every codec. Never above the protocol
    /// ceiling of 512 MiB; servers may configure it lower.
    pub(crate) max_body_size: u64,
}

impl Default for ConnContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnContext {
    pub fn new() -> Self {
        ConnContext {
            grpc: None,
            control: BytesMut::new(),
            latched: None,
            reset_log_ids: Vec::new(),
            max_body_size: MAX_BODY_SIZE,
        }
    }

    /// Drain control bytes owed to the peer, if any.
    pub fn take_control(&mut self) -> Option<Bytes> {
        if self.control.is_empty() {
            None
        } else {
            Some(self.control.split().freeze())
        }
    }

    /// Drain correlation ids whose streams were reset by the peer.
    pub fn take_reset_log_ids(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.reset_log_ids)
    }

    pub(crate) fn push_control(&mut self, frame: &[u8]) {
        self.control.extend_from_slice(frame);
    }
}

/// The shared encode/decode contract consumed by the framing engine and the
/// dispatch adapter.
pub trait ProtocolCodec: Send + Sync {
    fn id(&self) -> ProtocolId;

    /// Try to cut one whole packet off the front of the accumulator.
    ///
    /// Prefix-safe: a legitimate short read is `NotEnoughData` (cursor
    /// preserved), never `BadSchema`. Bytes are only consumed together with
    /// a returned packet — except for connection-level negotiation frames
    /// whose effect is preserved in `ctx` (gRPC preface/SETTINGS).
    fn decode(
        &self,
        acc: &mut BufferStore,
        ctx: &mut ConnContext,
    ) -> Result<RawPacket, DecodeError>;

    /// Parse a raw packet into a request. Consumes the raw packet; its
    /// slices move into `req`.
    fn decode_request(&self, raw: RawPacket, req: &mut RequestPacket) -> Result<(), RpcError>;

    /// Parse a raw packet into a response.
    fn decode_response(
        &self,
        raw: RawPacket,
        ctx: &mut ConnContext,
    ) -> Result<ResponsePacket, RpcError>;

    /// Produce the wire bytes of a request. Fails with a serialization
    /// error before any bytes are written if the packet cannot be expressed
    /// in this protocol.
    fn encode_request(&self, req: &RequestPacket) -> Result<Bytes, RpcError>;

    /// Produce the wire bytes of a response.
    fn encode_response(&self, resp: &ResponsePacket) -> Result<Bytes, RpcError>;
}
