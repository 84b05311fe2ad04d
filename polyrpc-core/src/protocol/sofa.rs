//! SoFa codec: `"SOFA"` magic, little-endian sizes, one meta message for
//! both directions discriminated by a type field. `sequence_id` is the
//! correlation id.

use bytes::Bytes;
use prost::Message;

use crate::buffer::BufferStore;
use crate::compress::CompressType;
use crate::error::{DecodeError, RpcError};
use crate::meta::{SofaPacketType, SofaRpcMeta};
use crate::packet::{RawPacket, RequestPacket, ResponsePacket, SpHead};
use crate::protocol::binary::{decode_frame, encode_frame, SizeOrder};
use crate::protocol::{ConnContext, ProtocolCodec, ProtocolId};

pub(crate) const MAGIC: &[u8; 4] = b"SOFA";

pub struct SofaCodec;

fn parse_meta(raw: &RawPacket) -> Result<SofaRpcMeta, RpcError> {
    SofaRpcMeta::decode(&raw.meta[..])
        .map_err(|e| RpcError::serialization(format!("sofa meta: {e}")))
}

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

impl ProtocolCodec for SofaCodec {
    fn id(&self) -> ProtocolId {
        ProtocolId::Sofa
    }

    fn decode(
        &self,
        acc: &mut BufferStore,
        ctx: &mut ConnContext,
    ) -> Result<RawPacket, DecodeError> {
        decode_frame(acc, MAGIC, SizeOrder::LittleEndian, true, ctx.max_body_size)
    }

    fn decode_request(&self, raw: RawPacket, req: &mut RequestPacket) -> Result<(), RpcError> {
        let meta = parse_meta(&raw)?;
        if meta.r#type() != SofaPacketType::Request {
            return Err(RpcError::serialization("sofa packet is not a request"));
        }

        req.log_id = meta.sequence_id;
        req.service_name = meta.service_name;
        req.method_key = meta.method_name;
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
        let meta = parse_meta(&raw)?;
        if meta.r#type() != SofaPacketType::Response {
            return Err(RpcError::serialization("sofa packet is not a response"));
        }

        let (body, attachment) = split_at_marker(raw.body, meta.user_message_size)?;
        Ok(ResponsePacket {
            log_id: meta.sequence_id,
            compress_type: CompressType::from_code(meta.compress_type)?,
            error_code: meta.error_code,
            error_text: meta.reason,
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
    let mut meta = SofaRpcMeta {
        sequence_id: req.log_id,
        service_name: req.service_name.clone(),
        method_name: req.method_key.clone(),
        compress_type: req.compress_type.code(),
        user_message_size: req.attachment.as_ref().map_or(0, |_| req.body.len() as u32),
        ..Default::default()
    };
    meta.set_type(SofaPacketType::Request);
    let meta = meta.encode_to_vec();

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
    let mut meta = SofaRpcMeta {
        sequence_id: resp.log_id,
        error_code: resp.error_code,
        reason: resp.error_text.clone(),
        compress_type: resp.compress_type.code(),
        user_message_size: resp
            .attachment
            .as_ref()
            .map_or(0, |_| resp.body.len() as u32),
        ..Default::default()
    };
    meta.set_type(SofaPacketType::Response);
    let meta = meta.encode_to_vec();

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
