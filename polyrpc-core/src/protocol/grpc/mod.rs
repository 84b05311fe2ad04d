//! gRPC-over-HTTP/2 codec.
//!
//! The HTTP/2 layer is implemented in-codec as a byte-level state machine:
//! the accumulator contract requires a decoder that can be fed arbitrary
//! chunk boundaries and never owns the socket. Scope is exactly what gRPC
//! framing requires — preface, SETTINGS negotiation and acks, HEADERS (with
//! CONTINUATION), DATA, RST_STREAM, PING, GOAWAY, WINDOW_UPDATE. One stream
//! carries one request and one response.
//!
//! Connection-level frames are consumed as they arrive and their effect is
//! kept in [`GrpcConn`]; `NotEnoughData` is only ever returned with a
//! partial frame still buffered, so the no-consumption rule holds where it
//! matters. Frames the codec owes the peer (SETTINGS, acks, window updates)
//! are queued on the connection context for the transport to flush.
//!
//! For gRPC traffic the HTTP/2 stream id is the correlation id: the client
//! channel allocates odd, increasing log ids and uses them as stream ids
//! directly. Error codes on this wire ride in `grpc-status` unchanged.

mod frame;
mod hpack;
mod stream;

use std::collections::{HashMap, VecDeque};

use bytes::{Bytes, BytesMut};
use prost::Message;

use crate::buffer::BufferStore;
use crate::compress::CompressType;
use crate::error::{DecodeError, RpcError};
use crate::meta::{GrpcMeta, KvPair};
use crate::packet::{RawPacket, RequestPacket, ResponsePacket};
use crate::protocol::{ConnContext, ProtocolCodec, ProtocolId};

pub use frame::{
    data_frames, headers_frame, parse_grpc_message, settings_frame, wrap_grpc_message, FrameHead,
    GRPC_ENVELOPE_LEN, PREFACE,
};
pub use hpack::HpackDecoder;
pub use stream::{GrpcStream, HeadersOutcome, StreamState};

use frame::{flags, frame_type, FRAME_HEADER_LEN, MAX_FRAME_SIZE};

pub const CONTENT_TYPE_GRPC: &str = "application/grpc";

/// Headers whose names open with ':' or that belong to transport plumbing;
/// everything else is user metadata.
const RESERVED_HEADERS: &[&str] = &[
    "content-type",
    "te",
    "user-agent",
    "grpc-encoding",
    "grpc-accept-encoding",
    "grpc-timeout",
    "grpc-status",
    "grpc-message",
];

#[derive(Debug)]
struct Continuation {
    stream_id: u32,
    end_stream: bool,
    block: BytesMut,
}

/// Per-connection HTTP/2 state.
#[derive(Debug, Default)]
pub struct GrpcConn {
    decoder: HpackDecoder,
    streams: HashMap<u32, GrpcStream>,
    continuation: Option<Continuation>,
    ready: VecDeque<RawPacket>,
}

impl GrpcConn {
    fn stream(&mut self, id: u32) -> &mut GrpcStream {
        self.streams.entry(id).or_default()
    }
}

pub struct GrpcCodec;

impl GrpcCodec {
    /// Bytes a client writes before its first request: the connection
    /// preface followed by its SETTINGS.
    pub fn client_preamble() -> Bytes {
        let mut out = BytesMut::with_capacity(PREFACE.len() + FRAME_HEADER_LEN);
        out.extend_from_slice(PREFACE);
        out.extend_from_slice(&settings_frame(false));
        out.freeze()
    }

    /// Recognize the connection and pin it to this codec. Server side sees
    /// the preface; client side sees the peer's SETTINGS as the first frame.
    fn try_bind(acc: &mut BufferStore, ctx: &mut ConnContext) -> Result<(), DecodeError> {
        let readable = acc.readable_bytes();
        if readable == 0 {
            return Err(DecodeError::NotEnoughData);
        }
        let probe = acc.peek(readable.min(PREFACE.len()))?;

        if probe[..] == PREFACE[..probe.len()] {
            if readable < PREFACE.len() {
                return Err(DecodeError::NotEnoughData);
            }
            acc.skip(PREFACE.len())?;
            ctx.grpc = Some(GrpcConn::default());
            ctx.latched = Some(ProtocolId::Grpc);
            // Our side of the SETTINGS exchange.
            ctx.control.extend_from_slice(&settings_frame(false));
            tracing::debug!("http/2 preface received, connection pinned to grpc");
            return Ok(());
        }

        // Client side: the peer's first bytes must be a SETTINGS frame. A
        // legitimate frame header has a small length, so the first byte is
        // zero; anything else cannot become HTTP/2.
        if probe[0] != 0 {
            return Err(DecodeError::BadSchema);
        }
        if readable < FRAME_HEADER_LEN {
            return Err(DecodeError::NotEnoughData);
        }
        let head = FrameHead::parse(acc.peek_array::<FRAME_HEADER_LEN>(0)?);
        if head.kind != frame_type::SETTINGS
            || head.stream_id != 0
            || head.flags & flags::ACK != 0
            || head.length % 6 != 0
            || head.length > 1024
        {
            return Err(DecodeError::BadSchema);
        }
        ctx.grpc = Some(GrpcConn::default());
        ctx.latched = Some(ProtocolId::Grpc);
        Ok(())
    }
}

impl ProtocolCodec for GrpcCodec {
    fn id(&self) -> ProtocolId {
        ProtocolId::Grpc
    }

    fn decode(
        &self,
        acc: &mut BufferStore,
        ctx: &mut ConnContext,
    ) -> Result<RawPacket, DecodeError> {
        if ctx.grpc.is_none() {
            Self::try_bind(acc, ctx)?;
        }

        // Field-level borrows: the frame loop feeds control frames and
        // resets back to the context while holding the connection state.
        let ConnContext {
            grpc,
            control,
            reset_log_ids,
            max_body_size,
            ..
        } = ctx;
        let max_body_size = *max_body_size;
        let Some(conn) = grpc.as_mut() else {
            return Err(DecodeError::NotEnoughData);
        };

        loop {
            if let Some(pkt) = conn.ready.pop_front() {
                return Ok(pkt);
            }
            if acc.readable_bytes() < FRAME_HEADER_LEN {
                return Err(DecodeError::NotEnoughData);
            }
            let head = FrameHead::parse(acc.peek_array::<FRAME_HEADER_LEN>(0)?);
            if head.length > MAX_FRAME_SIZE * 4 {
                return Err(DecodeError::BadSchema);
            }
            if acc.readable_bytes() < FRAME_HEADER_LEN + head.length {
                return Err(DecodeError::NotEnoughData);
            }
            acc.skip(FRAME_HEADER_LEN)?;
            let payload = acc.read_retained_slice(head.length)?;
            process_frame(conn, head, payload, control, reset_log_ids, max_body_size)?;
        }
    }

    fn decode_request(&self, raw: RawPacket, req: &mut RequestPacket) -> Result<(), RpcError> {
        let meta = GrpcMeta::decode(&raw.meta[..])
            .map_err(|e| RpcError::serialization(format!("grpc meta: {e}")))?;

        if !meta.content_type.starts_with(CONTENT_TYPE_GRPC) {
            return Err(RpcError::serialization(format!(
                "unexpected content-type {:?}",
                meta.content_type
            )));
        }
        let path = meta.path.trim_start_matches('/');
        let mut parts = path.splitn(2, '/');
        let service = parts.next().unwrap_or("");
        let method = parts.next().unwrap_or("");
        if service.is_empty() || method.is_empty() {
            return Err(RpcError::serialization(format!(
                "grpc path {:?} does not name /service/method",
                meta.path
            )));
        }

        req.log_id = u64::from(meta.stream_id);
        req.service_name = service.to_string();
        req.method_key = method.to_string();
        req.compress_type = compress_type_from_grpc(meta.compressed, &meta.grpc_encoding)?;
        req.timeout_ms = meta.timeout_ms;
        req.kv_attachment = meta
            .metadata
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect();
        req.body = raw.body;
        Ok(())
    }

    fn decode_response(
        &self,
        raw: RawPacket,
        _ctx: &mut ConnContext,
    ) -> Result<ResponsePacket, RpcError> {
        let meta = GrpcMeta::decode(&raw.meta[..])
            .map_err(|e| RpcError::serialization(format!("grpc meta: {e}")))?;
        let status = meta
            .grpc_status
            .ok_or_else(|| RpcError::serialization("grpc response without grpc-status"))?;

        if status != 0 {
            return Ok(ResponsePacket::error(
                u64::from(meta.stream_id),
                status,
                meta.grpc_message,
            ));
        }
        Ok(ResponsePacket {
            log_id: u64::from(meta.stream_id),
            compress_type: compress_type_from_grpc(meta.compressed, &meta.grpc_encoding)?,
            body: raw.body,
            ..Default::default()
        })
    }

    fn encode_request(&self, req: &RequestPacket) -> Result<Bytes, RpcError> {
        let stream_id = stream_id_for(req.log_id)?;
        if req.attachment.is_some() {
            return Err(RpcError::serialization("grpc carries no attachment channel"));
        }

        let path = format!("/{}/{}", req.service_name, req.method_key);
        let timeout;
        let mut headers: Vec<(&str, &str)> = vec![
            (":method", "POST"),
            (":scheme", "http"),
            (":path", &path),
            (":authority", "polyrpc"),
            ("content-type", CONTENT_TYPE_GRPC),
            ("te", "trailers"),
        ];
        let encoding = grpc_encoding_name(req.compress_type);
        if !encoding.is_empty() {
            headers.push(("grpc-encoding", encoding));
        }
        if let Some(ms) = req.timeout_ms {
            timeout = format!("{ms}m");
            headers.push(("grpc-timeout", &timeout));
        }
        for (k, v) in &req.kv_attachment {
            headers.push((k, v));
        }

        let block = hpack::encode_headers(&headers);
        let envelope = wrap_grpc_message(&req.body, req.compress_type != CompressType::None);

        let mut out = BytesMut::new();
        out.extend_from_slice(&headers_frame(stream_id, flags::END_HEADERS, &block));
        out.extend_from_slice(&data_frames(stream_id, &envelope, true));
        Ok(out.freeze())
    }

    fn encode_response(&self, resp: &ResponsePacket) -> Result<Bytes, RpcError> {
        let stream_id = stream_id_for(resp.log_id)?;
        let mut out = BytesMut::new();

        if !resp.is_success() {
            // Trailers-only response.
            let status = resp.error_code.to_string();
            let block = hpack::encode_headers(&[
                (":status", "200"),
                ("content-type", CONTENT_TYPE_GRPC),
                ("grpc-status", &status),
                ("grpc-message", &resp.error_text),
            ]);
            out.extend_from_slice(&headers_frame(
                stream_id,
                flags::END_HEADERS | flags::END_STREAM,
                &block,
            ));
            return Ok(out.freeze());
        }

        let mut headers: Vec<(&str, &str)> = vec![
            (":status", "200"),
            ("content-type", CONTENT_TYPE_GRPC),
        ];
        let encoding = grpc_encoding_name(resp.compress_type);
        if !encoding.is_empty() {
            headers.push(("grpc-encoding", encoding));
        }
        let block = hpack::encode_headers(&headers);
        let envelope = wrap_grpc_message(&resp.body, resp.compress_type != CompressType::None);
        let trailers = hpack::encode_headers(&[("grpc-status", "0")]);

        out.extend_from_slice(&headers_frame(stream_id, flags::END_HEADERS, &block));
        out.extend_from_slice(&data_frames(stream_id, &envelope, false));
        out.extend_from_slice(&headers_frame(
            stream_id,
            flags::END_HEADERS | flags::END_STREAM,
            &trailers,
        ));
        Ok(out.freeze())
    }
}

fn process_frame(
    conn: &mut GrpcConn,
    head: FrameHead,
    payload: Bytes,
    control: &mut BytesMut,
    reset_log_ids: &mut Vec<u64>,
    max_body_size: u64,
) -> Result<(), DecodeError> {
    // While a header block is open only its CONTINUATION frames may arrive.
    if conn.continuation.is_some() && head.kind != frame_type::CONTINUATION {
        return Err(DecodeError::BadSchema);
    }

    match head.kind {
        frame_type::SETTINGS => {
            if head.stream_id != 0 {
                return Err(DecodeError::BadSchema);
            }
            if head.flags & flags::ACK != 0 {
                if head.length != 0 {
                    return Err(DecodeError::BadSchema);
                }
                return Ok(());
            }
            if head.length % 6 != 0 {
                return Err(DecodeError::BadSchema);
            }
            control.extend_from_slice(&settings_frame(true));
            Ok(())
        }
        frame_type::PING => {
            if head.stream_id != 0 || head.length != 8 {
                return Err(DecodeError::BadSchema);
            }
            if head.flags & flags::ACK == 0 {
                control.extend_from_slice(&frame::ping_ack(&payload));
            }
            Ok(())
        }
        frame_type::HEADERS => {
            if head.stream_id == 0 {
                return Err(DecodeError::BadSchema);
            }
            let block = strip_headers_padding(&payload, head.flags)?;
            let end_stream = head.flags & flags::END_STREAM != 0;
            if head.flags & flags::END_HEADERS == 0 {
                conn.continuation = Some(Continuation {
                    stream_id: head.stream_id,
                    end_stream,
                    block: BytesMut::from(block),
                });
                return Ok(());
            }
            let fields = conn.decoder.decode(block)?;
            headers_received(conn, head.stream_id, fields, end_stream)
        }
        frame_type::CONTINUATION => {
            let Some(mut cont) = conn.continuation.take() else {
                return Err(DecodeError::BadSchema);
            };
            if cont.stream_id != head.stream_id {
                return Err(DecodeError::BadSchema);
            }
            cont.block.extend_from_slice(&payload);
            if head.flags & flags::END_HEADERS == 0 {
                conn.continuation = Some(cont);
                return Ok(());
            }
            let fields = conn.decoder.decode(&cont.block)?;
            headers_received(conn, cont.stream_id, fields, cont.end_stream)
        }
        frame_type::DATA => {
            if head.stream_id == 0 {
                return Err(DecodeError::BadSchema);
            }
            let data = strip_data_padding(&payload, head.flags)?;
            let stream = conn
                .streams
                .get_mut(&head.stream_id)
                .ok_or(DecodeError::BadSchema)?;
            if stream.data.len() as u64 + data.len() as u64 > max_body_size {
                return Err(DecodeError::TooBigData);
            }
            let end_stream = head.flags & flags::END_STREAM != 0;
            let complete = stream.on_data(data, end_stream)?;

            // Keep the peer's flow-control window open.
            if !data.is_empty() {
                control.extend_from_slice(&frame::window_update(0, data.len() as u32));
                if !end_stream {
                    control
                        .extend_from_slice(&frame::window_update(head.stream_id, data.len() as u32));
                }
            }

            if complete {
                complete_request(conn, head.stream_id)?;
            }
            Ok(())
        }
        frame_type::RST_STREAM => {
            if head.stream_id == 0 || head.length != 4 {
                return Err(DecodeError::BadSchema);
            }
            conn.streams.remove(&head.stream_id);
            reset_log_ids.push(u64::from(head.stream_id));
            tracing::debug!(stream_id = head.stream_id, "grpc stream reset by peer");
            Ok(())
        }
        frame_type::GOAWAY | frame_type::WINDOW_UPDATE | frame_type::PRIORITY => Ok(()),
        frame_type::PUSH_PROMISE => Err(DecodeError::BadSchema),
        // Unknown frame types are ignored per HTTP/2.
        _ => Ok(()),
    }
}

fn headers_received(
    conn: &mut GrpcConn,
    stream_id: u32,
    fields: Vec<(String, String)>,
    end_stream: bool,
) -> Result<(), DecodeError> {
    match conn.stream(stream_id).on_headers(fields, end_stream)? {
        HeadersOutcome::Opened => Ok(()),
        HeadersOutcome::Complete => {
            // Headers-only exchanges are only meaningful as trailers-only
            // responses carrying a grpc-status.
            let stream = conn.stream(stream_id);
            if stream.header("grpc-status").is_none() {
                return Err(DecodeError::BadSchema);
            }
            complete_response(conn, stream_id)
        }
        HeadersOutcome::Trailers => complete_response(conn, stream_id),
    }
}

/// END_STREAM on DATA closes a request stream; responses end in trailers.
fn complete_request(conn: &mut GrpcConn, stream_id: u32) -> Result<(), DecodeError> {
    let Some(stream) = conn.streams.remove(&stream_id) else {
        return Err(DecodeError::BadSchema);
    };
    let Some(path) = stream.header(":path") else {
        return Err(DecodeError::BadSchema);
    };
    let (compressed, body) = parse_grpc_message(&stream.data)?;

    let meta = GrpcMeta {
        path: path.to_string(),
        content_type: stream.header("content-type").unwrap_or("").to_string(),
        grpc_status: None,
        grpc_message: String::new(),
        timeout_ms: stream.header("grpc-timeout").and_then(parse_grpc_timeout),
        compressed,
        stream_id,
        grpc_encoding: stream.header("grpc-encoding").unwrap_or("").to_string(),
        metadata: user_metadata(&stream.headers),
    };
    conn.ready.push_back(RawPacket {
        meta: Bytes::from(meta.encode_to_vec()),
        body,
        push: None,
    });
    Ok(())
}

fn complete_response(conn: &mut GrpcConn, stream_id: u32) -> Result<(), DecodeError> {
    let Some(stream) = conn.streams.remove(&stream_id) else {
        return Err(DecodeError::BadSchema);
    };
    let status_text = stream
        .trailer("grpc-status")
        .or_else(|| stream.header("grpc-status"))
        .ok_or(DecodeError::BadSchema)?;
    let grpc_status: i32 = status_text.parse().map_err(|_| DecodeError::BadSchema)?;
    let grpc_message = stream
        .trailer("grpc-message")
        .or_else(|| stream.header("grpc-message"))
        .unwrap_or("")
        .to_string();

    let (compressed, body) = if stream.data.is_empty() {
        (false, Bytes::new())
    } else {
        parse_grpc_message(&stream.data)?
    };

    let meta = GrpcMeta {
        path: String::new(),
        content_type: stream.header("content-type").unwrap_or("").to_string(),
        grpc_status: Some(grpc_status),
        grpc_message,
        timeout_ms: None,
        compressed,
        stream_id,
        grpc_encoding: stream.header("grpc-encoding").unwrap_or("").to_string(),
        metadata: Vec::new(),
    };
    conn.ready.push_back(RawPacket {
        meta: Bytes::from(meta.encode_to_vec()),
        body,
        push: None,
    });
    Ok(())
}

fn user_metadata(headers: &[(String, String)]) -> Vec<KvPair> {
    headers
        .iter()
        .filter(|(name, _)| !name.starts_with(':') && !RESERVED_HEADERS.contains(&name.as_str()))
        .map(|(name, value)| KvPair {
            key: name.clone(),
            value: value.clone(),
        })
        .collect()
}

fn strip_data_padding<'a>(payload: &'a [u8], frame_flags: u8) -> Result<&'a [u8], DecodeError> {
    if frame_flags & flags::PADDED == 0 {
        return Ok(payload);
    }
    let (&pad, rest) = payload.split_first().ok_or(DecodeError::BadSchema)?;
    let pad = usize::from(pad);
    if pad > rest.len() {
        return Err(DecodeError::BadSchema);
    }
    Ok(&rest[..rest.len() - pad])
}

fn strip_headers_padding<'a>(payload: &'a [u8], frame_flags: u8) -> Result<&'a [u8], DecodeError> {
    let mut block = strip_data_padding(payload, frame_flags)?;
    if frame_flags & flags::PRIORITY != 0 {
        if block.len() < 5 {
            return Err(DecodeError::BadSchema);
        }
        block = &block[5..];
    }
    Ok(block)
}

/// gRPC stream ids are client-initiated: odd, non-zero, 31-bit.
fn stream_id_for(log_id: u64) -> Result<u32, RpcError> {
    if log_id == 0 || log_id > 0x7fff_ffff || log_id % 2 == 0 {
        return Err(RpcError::serialization(format!(
            "grpc correlation ids must be odd 31-bit stream ids, got {log_id}"
        )));
    }
    Ok(log_id as u32)
}

fn grpc_encoding_name(ty: CompressType) -> &'static str {
    match ty {
        CompressType::None => "",
        CompressType::Snappy => "snappy",
        CompressType::Gzip => "gzip",
        CompressType::Zlib => "deflate",
    }
}

fn compress_type_from_grpc(compressed: bool, encoding: &str) -> Result<CompressType, RpcError> {
    if !compressed {
        return Ok(CompressType::None);
    }
    match encoding {
        "gzip" => Ok(CompressType::Gzip),
        "deflate" => Ok(CompressType::Zlib),
        "snappy" => Ok(CompressType::Snappy),
        other => Err(RpcError::serialization(format!(
            "unsupported grpc-encoding {other:?}"
        ))),
    }
}

/// `grpc-timeout` header: an integer and a unit letter.
fn parse_grpc_timeout(text: &str) -> Option<u64> {
    let (digits, unit) = text.split_at(text.len().checked_sub(1)?);
    let value: u64 = digits.parse().ok()?;
    let ms = match unit {
        "H" => value.checked_mul(3_600_000)?,
        "M" => value.checked_mul(60_000)?,
        "S" => value.checked_mul(1_000)?,
        "m" => value,
        "u" => value / 1_000,
        "n" => value / 1_000_000,
        _ => return None,
    };
    Some(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(acc: &mut BufferStore, bytes: &[u8]) {
        acc.append_slice(Bytes::copy_from_slice(bytes));
    }

    fn server_side_decode(wire: &[u8]) -> (RawPacket, ConnContext) {
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, &GrpcCodec::client_preamble());
        feed(&mut acc, wire);
        let raw = GrpcCodec.decode(&mut acc, &mut ctx).unwrap();
        assert_eq!(acc.readable_bytes(), 0);
        (raw, ctx)
    }

    fn sample_request() -> RequestPacket {
        RequestPacket {
            log_id: 1,
            service_name: "example_for_cpp.EchoService".into(),
            method_key: "Echo".into(),
            body: Bytes::from_static(b"prot"),
            ..Default::default()
        }
    }

    #[test]
    fn preface_pins_connection_and_queues_settings() {
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, PREFACE);
        assert_eq!(
            GrpcCodec.decode(&mut acc, &mut ctx),
            Err(DecodeError::NotEnoughData)
        );
        assert_eq!(ctx.latched, Some(ProtocolId::Grpc));
        assert!(ctx.take_control().is_some());
    }

    #[test]
    fn partial_preface_waits() {
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, &PREFACE[..10]);
        assert_eq!(
            GrpcCodec.decode(&mut acc, &mut ctx),
            Err(DecodeError::NotEnoughData)
        );
        assert!(ctx.latched.is_none());
        assert_eq!(acc.readable_bytes(), 10);
    }

    #[test]
    fn garbage_is_bad_schema() {
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, b"GARBAGE BYTES HERE");
        assert_eq!(
            GrpcCodec.decode(&mut acc, &mut ctx),
            Err(DecodeError::BadSchema)
        );
    }

    #[test]
    fn request_round_trip() {
        let wire = GrpcCodec.encode_request(&sample_request()).unwrap();
        let (raw, _) = server_side_decode(&wire);

        let mut back = RequestPacket::default();
        GrpcCodec.decode_request(raw, &mut back).unwrap();
        assert_eq!(back.log_id, 1);
        assert_eq!(back.service_name, "example_for_cpp.EchoService");
        assert_eq!(back.method_key, "Echo");
        assert_eq!(&back.body[..], b"prot");
        assert_eq!(back.compress_type, CompressType::None);
    }

    #[test]
    fn request_data_envelope_layout() {
        // DATA payload must be [0x00][len u32 BE][payload].
        let mut req = sample_request();
        req.body = Bytes::from_static(b"abcd");
        let wire = GrpcCodec.encode_request(&req).unwrap();

        // Walk frames to the DATA frame.
        let mut off = 0;
        loop {
            let head = FrameHead::parse(wire[off..off + 9].try_into().unwrap());
            if head.kind == frame_type::DATA {
                let payload = &wire[off + 9..off + 9 + head.length];
                assert_eq!(&payload[..5], &[0x00, 0x00, 0x00, 0x00, 0x04]);
                assert_eq!(&payload[5..], b"abcd");
                break;
            }
            off += 9 + head.length;
        }
    }

    #[test]
    fn response_round_trip_with_trailers() {
        let resp = ResponsePacket {
            log_id: 1,
            body: Bytes::from_static(b"result"),
            ..Default::default()
        };
        let wire = GrpcCodec.encode_response(&resp).unwrap();

        // Client side: SETTINGS first, then the response frames.
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, &settings_frame(false));
        feed(&mut acc, &wire);
        let raw = GrpcCodec.decode(&mut acc, &mut ctx).unwrap();
        assert_eq!(ctx.latched, Some(ProtocolId::Grpc));

        let back = GrpcCodec.decode_response(raw, &mut ctx).unwrap();
        assert!(back.is_success());
        assert_eq!(back.log_id, 1);
        assert_eq!(&back.body[..], b"result");
    }

    #[test]
    fn error_response_is_trailers_only() {
        let resp = ResponsePacket::error(3, 12, "unimplemented");
        let wire = GrpcCodec.encode_response(&resp).unwrap();
        let head = FrameHead::parse(wire[..9].try_into().unwrap());
        assert_eq!(head.kind, frame_type::HEADERS);
        assert_eq!(
            head.flags & (flags::END_HEADERS | flags::END_STREAM),
            flags::END_HEADERS | flags::END_STREAM
        );
        assert_eq!(wire.len(), 9 + head.length);

        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, &settings_frame(false));
        feed(&mut acc, &wire);
        let raw = GrpcCodec.decode(&mut acc, &mut ctx).unwrap();
        let back = GrpcCodec.decode_response(raw, &mut ctx).unwrap();
        assert_eq!(back.error_code, 12);
        assert_eq!(back.error_text, "unimplemented");
    }

    #[test]
    fn rst_stream_surfaces_reset_log_id() {
        let wire = GrpcCodec.encode_request(&sample_request()).unwrap();
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, &GrpcCodec::client_preamble());
        // Only the HEADERS frame, then a reset.
        let head = FrameHead::parse(wire[..9].try_into().unwrap());
        feed(&mut acc, &wire[..9 + head.length]);
        feed(&mut acc, &frame::rst_stream(1, 8));
        assert_eq!(
            GrpcCodec.decode(&mut acc, &mut ctx),
            Err(DecodeError::NotEnoughData)
        );
        assert_eq!(ctx.take_reset_log_ids(), vec![1]);
    }

    #[test]
    fn data_before_headers_is_bad_schema() {
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, &GrpcCodec::client_preamble());
        feed(&mut acc, &data_frames(5, b"stray", true));
        assert_eq!(
            GrpcCodec.decode(&mut acc, &mut ctx),
            Err(DecodeError::BadSchema)
        );
    }

    #[test]
    fn even_stream_id_rejected_at_encode() {
        let mut req = sample_request();
        req.log_id = 2;
        assert!(GrpcCodec.encode_request(&req).is_err());
    }

    #[test]
    fn split_frames_across_chunks() {
        let wire = GrpcCodec.encode_request(&sample_request()).unwrap();
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        feed(&mut acc, &GrpcCodec::client_preamble());

        let mut emitted = None;
        for chunk in wire.chunks(3) {
            feed(&mut acc, chunk);
            match GrpcCodec.decode(&mut acc, &mut ctx) {
                Ok(raw) => {
                    emitted = Some(raw);
                    break;
                }
                Err(DecodeError::NotEnoughData) => continue,
                Err(other) => unreachable!("unexpected error {other:?}"),
            }
        }
        let raw = emitted.expect("packet after final chunk");
        let mut back = RequestPacket::default();
        GrpcCodec.decode_request(raw, &mut back).unwrap();
        assert_eq!(back.method_key, "Echo");
    }

    #[test]
    fn timeout_header_round_trip() {
        assert_eq!(parse_grpc_timeout("5S"), Some(5_000));
        assert_eq!(parse_grpc_timeout("250m"), Some(250));
        assert_eq!(parse_grpc_timeout("2M"), Some(120_000));
        assert_eq!(parse_grpc_timeout("bogus"), None);

        let mut req = sample_request();
        req.timeout_ms = Some(750);
        let wire = GrpcCodec.encode_request(&req).unwrap();
        let (raw, _) = server_side_decode(&wire);
        let mut back = RequestPacket::default();
        GrpcCodec.decode_request(raw, &mut back).unwrap();
        assert_eq!(back.timeout_ms, Some(750));
    }

    #[test]
    fn custom_metadata_becomes_kv_attachment() {
        let mut req = sample_request();
        req.kv_attachment = vec![("x-caller".to_string(), "tester".to_string())];
        let wire = GrpcCodec.encode_request(&req).unwrap();
        let (raw, _) = server_side_decode(&wire);
        let mut back = RequestPacket::default();
        GrpcCodec.decode_request(raw, &mut back).unwrap();
        assert_eq!(
            back.kv_attachment,
            vec![("x-caller".to_string(), "tester".to_string())]
        );
    }
}
