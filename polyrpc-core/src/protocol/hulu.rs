//! Hulu codec: `"HULU"` magic, little-endian sizes, methods addressed by
//! index. The split marker is an offset (`user_message_size`), not a
//! trailing length.

use bytes::Bytes;
use prost::Message;

use crate::buffer::BufferStore;
use crate::compress::CompressType;
use crate::error::{DecodeError, RpcError};
use crate::meta::{HuluRpcRequestMeta, HuluRpcResponseMeta};
use crate::packet::{RawPacket, RequestPacket, ResponsePacket, SpHead};
use crate::protocol::binary::{decode_frame, encode_frame, SizeOrder};
use crate::protocol::{ConnContext, ProtocolCodec, ProtocolId};

pub(crate) const MAGIC: &[u8; 4] = b"HULU";

pub struct HuluCodec;

/// Split the body at `user_message_size`: `[message | attachment]`. Zero
/// means the whole body is the message.
fn split_at_marker(body: Bytes, marker: u32) -> Result<(Bytes, Option<Bytes>), RpcError> {
    let at = marker as usize;
    if at == 0 {
        return Ok((body, None));
    }
    if at > body.len() {
        return Err(RpcError::serialization(format!(
            "user message size {at} exceeds body size {}",
            body.len()
        )));
    }
    let attachment = (at < body.len()).then(|| body.slice(at..));
    Ok((body.slice(..at), attachment))
}

impl ProtocolCodec for HuluCodec {
    fn id(&self) -> ProtocolId {
        ProtocolId::Hulu
    }

    fn decode(
        &self,
        acc: &mut BufferStore,
        ctx: &mut ConnContext,
    ) -> Result<RawPacket, DecodeError> {
        decode_frame(acc, MAGIC, SizeOrder::LittleEndian, true, ctx.max_body_size)
    }

    fn decode_request(&self, raw: RawPacket, req: &mut RequestPacket) -> Result<(), RpcError> {
        let meta = HuluRpcRequestMeta::decode(&raw.meta[..])
            .map_err(|e| RpcError::serialization(format!("hulu request meta: {e}")))?;

        req.log_id = meta.log_id;
        req.service_name = meta.service_name;
        req.method_key = meta.method_index.to_string();
        req.compress_type = CompressType::from_code(meta.compress_type)?;

        let (message, attachment) = split_at_marker(raw.body, meta.user_message_size)?;
        req.body = message;
        req.attachment = attachment;
        Ok(())
    }

    fn decode_response(
        &self,
        raw: RawPacket,
        _ctx: &mut ConnContext,
    ) -> Result<ResponsePacket, RpcError> {
        let meta = HuluRpcResponseMeta::decode(&raw.meta[..])
            .map_err(|e| RpcError::serialization(format!("hulu response meta: {e}")))?;

        let (body, attachment) = split_at_marker(raw.body, meta.user_message_size)?;
        Ok(ResponsePacket {
            log_id: meta.correlation_id,
            compress_type: CompressType::from_code(meta.compress_type)?,
            error_code: meta.error_code,
            error_text: meta.error_text,
            body,
            attachment,
            ..Default::default()
        })
    }

    fn encode_request(&self, req: &RequestPacket) -> Result<Bytes, RpcError> {
        encode_request_frame(req, None)
    }

    fn encode_response(&self, resp: &ResponsePacket) -> Result<Bytes, RpcError> {
        encode_response_frame(resp, None)
    }
}

fn encode_request_frame(req: &RequestPacket, push: Option<SpHead>) -> Result<Bytes, RpcError> {
    // Hulu addresses methods by index. A non-numeric method key cannot
    // be expressed on this wire; fail before writing anything.
    let method_index: i32 = req.method_key.parse().map_err(|_| {
        RpcError::serialization(format!(
            "hulu requires a numeric method index, got {:?}",
            req.method_key
        ))
    })?;

    let user_message_size = req
        .attachment
        .as_ref()
        .map_or(0, |_| req.body.len() as u32);
    let meta = HuluRpcRequestMeta {
        service_name: req.service_name.clone(),
        method_index,
        correlation_id: req.log_id,
        log_id: req.log_id,
        compress_type: req.compress_type.code(),
        user_message_size,
        user_defined_info: String::new(),
    }
    .encode_to_vec();

    let mut parts: Vec<&[u8]> = vec![&req.body];
    if let Some(att) = &req.attachment {
        parts.push(att);
    }
    Ok(encode_frame(
        MAGIC,
        SizeOrder::LittleEndian,
        push,
        &meta,
        &parts,
    ))
}

fn encode_response_frame(resp: &ResponsePacket, push: Option<SpHead>) -> Result<Bytes, RpcError> {
    let user_message_size = resp
        .attachment
        .as_ref()
        .map_or(0, |_| resp.body.len() as u32);
    let meta = HuluRpcResponseMeta {
        error_code: resp.error_code,
        error_text: resp.error_text.clone(),
        correlation_id: resp.log_id,
        compress_type: resp.compress_type.code(),
        user_message_size,
    }
    .encode_to_vec();

    let mut parts: Vec<&[u8]> = vec![&resp.body];
    if let Some(att) = &resp.attachment {
        parts.push(att);
    }
    Ok(encode_frame(
        MAGIC,
        SizeOrder::LittleEndian,
        push,
        &meta,
        &parts,
    ))
}

/// Encode a request with a server-push sub-header (push-enabled
/// connections only).
pub fn encode_request_with_push(req: &RequestPacket, push: SpHead) -> Result<Bytes, RpcError> {
    encode_request_frame(req, Some(push))
}

/// Encode a response with a server-push sub-header.
pub fn encode_response_with_push(resp: &ResponsePacket, push: SpHead) -> Result<Bytes, RpcError> {
    encode_response_frame(resp, Some(push))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(wire: Bytes) -> RawPacket {
        let mut acc = BufferStore::new();
        acc.append_slice(wire);
        let raw = HuluCodec.decode(&mut acc, &mut ConnContext::new()).unwrap();
        assert_eq!(acc.readable_bytes(), 0);
        raw
    }

    #[test]
    fn sizes_are_little_endian() {
        let req = RequestPacket {
            log_id: 9,
            service_name: "echo.EchoService".into(),
            method_key: "0".into(),
            body: Bytes::from_static(b"payload"),
            ..Default::default()
        };
        let wire = HuluCodec.encode_request(&req).unwrap();
        let body_size = u32::from_le_bytes([wire[4], wire[5], wire[6], wire[7]]) as usize;
        let meta_size = u32::from_le_bytes([wire[8], wire[9], wire[10], wire[11]]) as usize;
        assert_eq!(wire.len(), 12 + body_size);
        assert_eq!(body_size, meta_size + b"payload".len());
    }

    #[test]
    fn request_round_trip_by_index() {
        let req = RequestPacket {
            log_id: 9,
            service_name: "echo.EchoService".into(),
            method_key: "3".into(),
            body: Bytes::from_static(b"payload"),
            ..Default::default()
        };
        let wire = HuluCodec.encode_request(&req).unwrap();
        let mut back = RequestPacket::default();
        HuluCodec.decode_request(decode_one(wire), &mut back).unwrap();
        assert_eq!(back.method_key, "3");
        assert_eq!(back.log_id, 9);
        assert_eq!(&back.body[..], b"payload");
    }

    #[test]
    fn non_numeric_method_fails_before_encoding() {
        let req = RequestPacket {
            method_key: "Echo".into(),
            ..Default::default()
        };
        let err = HuluCodec.encode_request(&req).unwrap_err();
        assert!(matches!(err, RpcError::Serialization(_)));
    }

    #[test]
    fn marker_splits_message_and_attachment() {
        let req = RequestPacket {
            log_id: 5,
            service_name: "s".into(),
            method_key: "0".into(),
            body: Bytes::from_static(b"8bytemsg"),
            attachment: Some(Bytes::from_static(b"0123456789abcdef")),
            ..Default::default()
        };
        let wire = HuluCodec.encode_request(&req).unwrap();
        let mut back = RequestPacket::default();
        HuluCodec.decode_request(decode_one(wire), &mut back).unwrap();
        assert_eq!(&back.body[..], b"8bytemsg");
        assert_eq!(&back.attachment.unwrap()[..], b"0123456789abcdef");
    }

    #[test]
    fn response_round_trip() {
        let resp = ResponsePacket {
            log_id: 11,
            body: Bytes::from_static(b"out"),
            ..Default::default()
        };
        let wire = HuluCodec.encode_response(&resp).unwrap();
        let back = HuluCodec
            .decode_response(decode_one(wire), &mut ConnContext::new())
            .unwrap();
        assert!(back.is_success());
        assert_eq!(back.log_id, 11);
        assert_eq!(&back.body[..], b"out");
    }

    #[test]
    fn push_request_round_trip() {
        use crate::packet::PushPacketType;
        let req = RequestPacket {
            log_id: 6,
            service_name: "client.Callback".into(),
            method_key: "0".into(),
            body: Bytes::from_static(b"ping"),
            ..Default::default()
        };
        let head = SpHead {
            packet_type: PushPacketType::PushRequest,
            log_id: 6,
        };
        let wire = encode_request_with_push(&req, head).unwrap();
        let raw = decode_one(wire);
        assert_eq!(raw.push, Some(head));
        let mut back = RequestPacket::default();
        HuluCodec.decode_request(raw, &mut back).unwrap();
        assert_eq!(back.method_key, "0");
        assert_eq!(&back.body[..], b"ping");
    }

    #[test]
    fn oversized_marker_fails() {
        let meta = HuluRpcRequestMeta {
            service_name: "s".into(),
            user_message_size: 64,
            ..Default::default()
        }
        .encode_to_vec();
        let wire = encode_frame(MAGIC, SizeOrder::LittleEndian, None, &meta, &[b"tiny"]);
        let mut back = RequestPacket::default();
        let err = HuluCodec
            .decode_request(decode_one(wire), &mut back)
            .unwrap_err();
        assert!(matches!(err, RpcError::Serialization(_)));
    }
}
