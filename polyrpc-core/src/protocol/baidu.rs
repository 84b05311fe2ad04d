//! Baidu-std codec: `"PRPC"` magic, big-endian sizes, protobuf meta
//! envelope, trailing-attachment split, optional server-push sub-header.

use bytes::Bytes;
use prost::Message;

use crate::buffer::BufferStore;
use crate::compress::CompressType;
use crate::error::{DecodeError, RpcError};
use crate::meta::{KvPair, RpcMeta, RpcRequestMeta, RpcResponseMeta};
use crate::packet::{RawPacket, RequestPacket, ResponsePacket, SpHead, TraceIds};
use crate::protocol::binary::{decode_frame, encode_frame, SizeOrder};
use crate::protocol::{ConnContext, ProtocolCodec, ProtocolId};

pub(crate) const MAGIC: &[u8; 4] = b"PRPC";

pub struct BaiduStdCodec;

impl BaiduStdCodec {
    fn parse_meta(raw: &RawPacket) -> Result<RpcMeta, RpcError> {
        RpcMeta::decode(&raw.meta[..])
            .map_err(|e| RpcError::serialization(format!("baidu_std meta: {e}")))
    }

    /// Split the post-meta body into `[message | attachment]` by the
    /// trailing attachment size. Slices are moved out of the raw packet;
    /// nothing is cloned.
    fn split_attachment(
        body: Bytes,
        attachment_size: u32,
    ) -> Result<(Bytes, Option<Bytes>), RpcError> {
        let att = attachment_size as usize;
        if att == 0 {
            return Ok((body, None));
        }
        if att > body.len() {
            return Err(RpcError::serialization(format!(
                "attachment size {att} exceeds body size {}",
                body.len()
            )));
        }
        let message = body.slice(..body.len() - att);
        let attachment = body.slice(body.len() - att..);
        Ok((message, Some(attachment)))
    }

    pub(crate) fn build_request_meta(req: &RequestPacket) -> RpcMeta {
        RpcMeta {
            request: Some(RpcRequestMeta {
                service_name: req.service_name.clone(),
                method_name: req.method_key.clone(),
                log_id: req.log_id,
                trace_id: req.trace.trace_id,
                span_id: req.trace.span_id,
                parent_span_id: req.trace.parent_span_id,
                ext_fields: req
                    .kv_attachment
                    .iter()
                    .map(|(k, v)| KvPair {
                        key: k.clone(),
                        value: v.clone(),
                    })
                    .collect(),
                timeout_ms: req.timeout_ms.unwrap_or(0) as u32,
            }),
            response: None,
            compress_type: req.compress_type.code(),
            correlation_id: req.log_id,
            attachment_size: req.attachment.as_ref().map_or(0, |a| a.len() as u32),
        }
    }

    pub(crate) fn build_response_meta(resp: &ResponsePacket) -> RpcMeta {
        RpcMeta {
            request: None,
            response: Some(RpcResponseMeta {
                error_code: resp.error_code,
                error_text: resp.error_text.clone(),
            }),
            compress_type: resp.compress_type.code(),
            correlation_id: resp.log_id,
            attachment_size: resp.attachment.as_ref().map_or(0, |a| a.len() as u32),
        }
    }

    pub(crate) fn fill_request(raw: RawPacket, req: &mut RequestPacket) -> Result<(), RpcError> {
        let meta = Self::parse_meta(&raw)?;
        let request_meta = meta
            .request
            .ok_or_else(|| RpcError::serialization("baidu_std packet carries no request meta"))?;

        req.log_id = request_meta.log_id;
        req.service_name = request_meta.service_name;
        req.method_key = request_meta.method_name;
        req.compress_type = CompressType::from_code(meta.compress_type)?;
        req.kv_attachment = request_meta
            .ext_fields
            .into_iter()
            .map(|kv| (kv.key, kv.value))
            .collect();
        req.timeout_ms = (request_meta.timeout_ms > 0).then_some(request_meta.timeout_ms as u64);
        req.trace = TraceIds {
            trace_id: request_meta.trace_id,
            span_id: request_meta.span_id,
            parent_span_id: request_meta.parent_span_id,
        };

        let (message, attachment) = Self::split_attachment(raw.body, meta.attachment_size)?;
        req.body = message;
        req.attachment = attachment;
        Ok(())
    }

    pub(crate) fn build_response(raw: RawPacket) -> Result<ResponsePacket, RpcError> {
        let meta = Self::parse_meta(&raw)?;
        let response_meta = meta
            .response
            .ok_or_else(|| RpcError::serialization("baidu_std packet carries no response meta"))?;

        let (body, attachment) = Self::split_attachment(raw.body, meta.attachment_size)?;
        Ok(ResponsePacket {
            log_id: meta.correlation_id,
            compress_type: CompressType::from_code(meta.compress_type)?,
            error_code: response_meta.error_code,
            error_text: response_meta.error_text,
            body,
            attachment,
            ..Default::default()
        })
    }
}

/// Encode a request with a server-push sub-header (push-enabled
/// connections only).
pub fn encode_request_with_push(req: &RequestPacket, push: SpHead) -> Result<Bytes, RpcError> {
    let meta = BaiduStdCodec::build_request_meta(req).encode_to_vec();
    let mut parts: Vec<&[u8]> = vec![&req.body];
    if let Some(att) = &req.attachment {
        parts.push(att);
    }
    Ok(encode_frame(
        MAGIC,
        SizeOrder::BigEndian,
        Some(push),
        &meta,
        &parts,
    ))
}

/// Encode a response with a server-push sub-header.
pub fn encode_response_with_push(resp: &ResponsePacket, push: SpHead) -> Result<Bytes, RpcError> {
    let meta = BaiduStdCodec::build_response_meta(resp).encode_to_vec();
    let mut parts: Vec<&[u8]> = vec![&resp.body];
    if let Some(att) = &resp.attachment {
        parts.push(att);
    }
    Ok(encode_frame(
        MAGIC,
        SizeOrder::BigEndian,
        Some(push),
        &meta,
        &parts,
    ))
}

impl ProtocolCodec for BaiduStdCodec {
    fn id(&self) -> ProtocolId {
        ProtocolId::BaiduStd
    }

    fn decode(
        &self,
        acc: &mut BufferStore,
        ctx: &mut ConnContext,
    ) -> Result<RawPacket, DecodeError> {
        decode_frame(acc, MAGIC, SizeOrder::BigEndian, true, ctx.max_body_size)
    }

    fn decode_request(&self, raw: RawPacket, req: &mut RequestPacket) -> Result<(), RpcError> {
        Self::fill_request(raw, req)
    }

    fn decode_response(
        &self,
        raw: RawPacket,
        _ctx: &mut ConnContext,
    ) -> Result<ResponsePacket, RpcError> {
        Self::build_response(raw)
    }

    fn encode_request(&self, req: &RequestPacket) -> Result<Bytes, RpcError> {
        let meta = Self::build_request_meta(req).encode_to_vec();
        let mut parts: Vec<&[u8]> = vec![&req.body];
        if let Some(att) = &req.attachment {
            parts.push(att);
        }
        Ok(encode_frame(MAGIC, SizeOrder::BigEndian, None, &meta, &parts))
    }

    fn encode_response(&self, resp: &ResponsePacket) -> Result<Bytes, RpcError> {
        let meta = Self::build_response_meta(resp).encode_to_vec();
        let mut parts: Vec<&[u8]> = vec![&resp.body];
        if let Some(att) = &resp.attachment {
            parts.push(att);
        }
        Ok(encode_frame(MAGIC, SizeOrder::BigEndian, None, &meta, &parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(codec: &dyn ProtocolCodec, wire: Bytes) -> RawPacket {
        let mut acc = BufferStore::new();
        let mut ctx = ConnContext::new();
        acc.append_slice(wire);
        let raw = codec.decode(&mut acc, &mut ctx).unwrap();
        assert_eq!(acc.readable_bytes(), 0, "decode must consume the packet");
        raw
    }

    fn sample_request() -> RequestPacket {
        RequestPacket {
            log_id: 42,
            service_name: "echo.EchoService".into(),
            method_key: "Echo".into(),
            compress_type: CompressType::None,
            body: Bytes::from_static(b"payload"),
            kv_attachment: vec![("caller".into(), "tester".into())],
            timeout_ms: Some(500),
            ..Default::default()
        }
    }

    #[test]
    fn request_round_trip() {
        let codec = BaiduStdCodec;
        let req = sample_request();
        let wire = codec.encode_request(&req).unwrap();
        assert_eq!(&wire[0..4], b"PRPC");

        let raw = decode_one(&codec, wire);
        let mut back = RequestPacket::default();
        codec.decode_request(raw, &mut back).unwrap();
        assert_eq!(back.log_id, 42);
        assert_eq!(back.service_name, "echo.EchoService");
        assert_eq!(back.method_key, "Echo");
        assert_eq!(&back.body[..], b"payload");
        assert_eq!(back.kv_attachment, req.kv_attachment);
        assert_eq!(back.timeout_ms, Some(500));
        assert!(back.attachment.is_none());
    }

    #[test]
    fn attachment_split() {
        let codec = BaiduStdCodec;
        let mut req = sample_request();
        req.body = Bytes::from_static(b"8bytemsg");
        req.attachment = Some(Bytes::from_static(b"0123456789abcdef"));
        let wire = codec.encode_request(&req).unwrap();

        let raw = decode_one(&codec, wire);
        let mut back = RequestPacket::default();
        codec.decode_request(raw, &mut back).unwrap();
        assert_eq!(&back.body[..], b"8bytemsg");
        assert_eq!(&back.attachment.unwrap()[..], b"0123456789abcdef");
    }

    #[test]
    fn attachment_larger_than_body_fails() {
        let codec = BaiduStdCodec;
        let meta = RpcMeta {
            request: Some(RpcRequestMeta {
                service_name: "s".into(),
                method_name: "m".into(),
                ..Default::default()
            }),
            attachment_size: 100,
            ..Default::default()
        }
        .encode_to_vec();
        let wire = encode_frame(MAGIC, SizeOrder::BigEndian, None, &meta, &[b"short"]);

        let raw = decode_one(&codec, wire);
        let mut back = RequestPacket::default();
        let err = codec.decode_request(raw, &mut back).unwrap_err();
        assert!(matches!(err, RpcError::Serialization(_)));
    }

    #[test]
    fn response_round_trip() {
        let codec = BaiduStdCodec;
        let resp = ResponsePacket {
            log_id: 42,
            body: Bytes::from_static(b"result"),
            ..Default::default()
        };
        let wire = codec.encode_response(&resp).unwrap();
        let raw = decode_one(&codec, wire);
        let back = codec.decode_response(raw, &mut ConnContext::new()).unwrap();
        assert!(back.is_success());
        assert_eq!(back.log_id, 42);
        assert_eq!(&back.body[..], b"result");
    }

    #[test]
    fn error_response_round_trip() {
        let codec = BaiduStdCodec;
        let resp = ResponsePacket::error(7, 1002, "no such method");
        let wire = codec.encode_response(&resp).unwrap();
        let raw = decode_one(&codec, wire);
        let back = codec.decode_response(raw, &mut ConnContext::new()).unwrap();
        assert_eq!(back.error_code, 1002);
        assert_eq!(back.error_text, "no such method");
        assert!(!back.is_success());
    }

    #[test]
    fn push_request_round_trip() {
        use crate::packet::PushPacketType;
        let codec = BaiduStdCodec;
        let req = sample_request();
        let head = SpHead {
            packet_type: PushPacketType::PushRequest,
            log_id: req.log_id,
        };
        let wire = encode_request_with_push(&req, head).unwrap();
        let raw = decode_one(&codec, wire);
        assert_eq!(raw.push, Some(head));
        let mut back = RequestPacket::default();
        codec.decode_request(raw, &mut back).unwrap();
        assert_eq!(back.method_key, "Echo");
    }

    #[test]
    fn request_meta_on_response_path_fails() {
        let codec = BaiduStdCodec;
        let wire = codec.encode_request(&sample_request()).unwrap();
        let raw = decode_one(&codec, wire);
        assert!(codec.decode_response(raw, &mut ConnContext::new()).is_err());
    }
}
