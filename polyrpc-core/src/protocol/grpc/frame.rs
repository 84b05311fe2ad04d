//! HTTP/2 frame plumbing and the gRPC message envelope.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// The HTTP/2 client connection preface.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Fixed frame header size.
pub const FRAME_HEADER_LEN: usize = 9;

/// Advertised and enforced maximum frame payload.
pub const MAX_FRAME_SIZE: usize = 16_384;

/// gRPC message envelope header: `[compressed_flag: u8][length: u32 BE]`.
pub const GRPC_ENVELOPE_LEN: usize = 5;

pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Parsed 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub length: usize,
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHead {
    pub fn parse(bytes: [u8; FRAME_HEADER_LEN]) -> FrameHead {
        FrameHead {
            length: usize::from(bytes[0]) << 16 | usize::from(bytes[1]) << 8 | usize::from(bytes[2]),
            kind: bytes[3],
            flags: bytes[4],
            stream_id: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]) & 0x7fff_ffff,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_HEADER_LEN] {
        let mut out = [0u8; FRAME_HEADER_LEN];
        out[0] = (self.length >> 16) as u8;
        out[1] = (self.length >> 8) as u8;
        out[2] = self.length as u8;
        out[3] = self.kind;
        out[4] = self.flags;
        out[5..9].copy_from_slice(&(self.stream_id & 0x7fff_ffff).to_be_bytes());
        out
    }
}

fn frame(kind: u8, frame_flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let head = FrameHead {
        length: payload.len(),
        kind,
        flags: frame_flags,
        stream_id,
    };
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&head.encode());
    out.extend_from_slice(payload);
    out
}

/// An empty SETTINGS frame, plain or ack.
pub fn settings_frame(ack: bool) -> Vec<u8> {
    let f = if ack { flags::ACK } else { 0 };
    frame(frame_type::SETTINGS, f, 0, &[])
}

pub fn ping_ack(payload: &[u8]) -> Vec<u8> {
    frame(frame_type::PING, flags::ACK, 0, payload)
}

pub fn window_update(stream_id: u32, increment: u32) -> Vec<u8> {
    frame(
        frame_type::WINDOW_UPDATE,
        0,
        stream_id,
        &(increment & 0x7fff_ffff).to_be_bytes(),
    )
}

pub fn rst_stream(stream_id: u32, error_code: u32) -> Vec<u8> {
    frame(frame_type::RST_STREAM, 0, stream_id, &error_code.to_be_bytes())
}

pub fn headers_frame(stream_id: u32, frame_flags: u8, block: &[u8]) -> Vec<u8> {
    frame(frame_type::HEADERS, frame_flags, stream_id, block)
}

/// Emit a payload as one or more DATA frames, each within the frame size
/// limit, with `END_STREAM` on the last.
pub fn data_frames(stream_id: u32, payload: &[u8], end_stream: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + FRAME_HEADER_LEN);
    let mut chunks = payload.chunks(MAX_FRAME_SIZE).peekable();
    if payload.is_empty() {
        let f = if end_stream { flags::END_STREAM } else { 0 };
        return frame(frame_type::DATA, f, stream_id, &[]);
    }
    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        let f = if last && end_stream { flags::END_STREAM } else { 0 };
        out.extend_from_slice(&frame(frame_type::DATA, f, stream_id, chunk));
    }
    out
}

/// Wrap a gRPC message in its envelope.
pub fn wrap_grpc_message(payload: &[u8], compressed: bool) -> Bytes {
    let mut out = BytesMut::with_capacity(GRPC_ENVELOPE_LEN + payload.len());
    out.put_u8(u8::from(compressed));
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    out.freeze()
}

/// Parse exactly one envelope spanning the whole buffer. A stream carries
/// exactly one request and one response, so trailing bytes are a schema
/// error.
pub fn parse_grpc_message(buf: &[u8]) -> Result<(bool, Bytes), DecodeError> {
    if buf.len() < GRPC_ENVELOPE_LEN {
        return Err(DecodeError::BadSchema);
    }
    let compressed = match buf[0] {
        0 => false,
        1 => true,
        _ => return Err(DecodeError::BadSchema),
    };
    let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if buf.len() != GRPC_ENVELOPE_LEN + length {
        return Err(DecodeError::BadSchema);
    }
    Ok((compressed, Bytes::copy_from_slice(&buf[GRPC_ENVELOPE_LEN..])))
}
