//! NSHead codec: a fixed 36-byte little-endian header in front of a bare
//! message body. There is no protobuf meta and no compression; routing uses
//! the per-method NSHead id registered with the descriptor, and the header's
//! 32-bit `log_id` is the correlation id.

use bytes::{BufMut, Bytes, BytesMut};

use crate::buffer::BufferStore;
use crate::error::{DecodeError, RpcError};
use crate::packet::{RawPacket, RequestPacket, ResponsePacket};
use crate::protocol::{ConnContext, ProtocolCodec, ProtocolId};

/// Fixed magic number at byte offset 24 of every NSHead header.
pub const NSHEAD_MAGIC: u32 = 0xfb70_9394;

/// Serialized header size.
pub const NSHEAD_LEN: usize = 36;

/// Provider tag written into outgoing headers.
const PROVIDER: &[u8] = b"polyrpc";

/// The fixed header. All fields little-endian on the wire.
///
/// Layout: `id: u16 | version: u16 | log_id: u32 | provider: [u8; 16] |
/// magic_num: u32 | reserved: u32 | body_len: u32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsHead {
    pub id: u16,
    pub version: u16,
    pub log_id: u32,
    pub provider: [u8; 16],
    pub body_len: u32,
}

impl NsHead {
    pub fn encode(&self) -> [u8; NSHEAD_LEN] {
        let mut out = [0u8; NSHEAD_LEN];
        out[0..2].copy_from_slice(&self.id.to_le_bytes());
        out[2..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&self.log_id.to_le_bytes());
        out[8..24].copy_from_slice(&self.provider);
        out[24..28].copy_from_slice(&NSHEAD_MAGIC.to_le_bytes());
        // reserved stays zero
        out[32..36].copy_from_slice(&self.body_len.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; NSHEAD_LEN]) -> Result<Self, DecodeError> {
        let magic = u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]);
        if magic != NSHEAD_MAGIC {
            return Err(DecodeError::BadSchema);
        }
        let mut provider = [0u8; 16];
        provider.copy_from_slice(&bytes[8..24]);
        Ok(NsHead {
            id: u16::from_le_bytes([bytes[0], bytes[1]]),
            version: u16::from_le_bytes([bytes[2], bytes[3]]),
            log_id: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            provider,
            body_len: u32::from_le_bytes([bytes[32], bytes[33], bytes[34], bytes[35]]),
        })
    }

    fn provider_str(&self) -> String {
        let end = self
            .provider
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.provider.len());
        String::from_utf8_lossy(&self.provider[..end]).into_owned()
    }

    fn with_provider(id: u16, version: u16, log_id: u32, body_len: u32) -> Self {
        let mut provider = [0u8; 16];
        provider[..PROVIDER.len()].copy_from_slice(PROVIDER);
        NsHead {
            id,
            version,
            log_id,
            provider,
            body_len,
        }
    }
}

pub struct NsHeadCodec;

impl ProtocolCodec for NsHeadCodec {
    fn id(&self) -> ProtocolId {
        ProtocolId::NsHead
    }

    fn decode(
        &self,
        acc: &mut BufferStore,
        ctx: &mut ConnContext,
    ) -> Result<RawPacket, DecodeError> {
        // The magic sits at offset 24; until it is readable the bytes could
        // still be a legitimate header prefix.
        if acc.readable_bytes() < 28 {
            return Err(DecodeError::NotEnoughData);
        }
        let magic = u32::from_le_bytes(acc.peek_array::<4>(24)?);
        if magic != NSHEAD_MAGIC {
            return Err(DecodeError::BadSchema);
        }
        if acc.readable_bytes() < NSHEAD_LEN {
            return Err(DecodeError::NotEnoughData);
        }

        let head_bytes = acc.peek_array::<NSHEAD_LEN>(0)?;
        let head = NsHead::decode(&head_bytes)?;
        let body_len = head.body_len as u64;
        if body_len > ctx.max_body_size {
            return Err(DecodeError::TooBigData);
        }
        if (acc.readable_bytes() as u64) < NSHEAD_LEN as u64 + body_len {
            return Err(DecodeError::NotEnoughData);
        }

        let meta = acc.read_retained_slice(NSHEAD_LEN)?;
        let body = acc.read_retained_slice(head.body_len as usize)?;
        Ok(RawPacket {
            meta,
            body,
            push: None,
        })
    }

    fn decode_request(&self, raw: RawPacket, req: &mut RequestPacket) -> Result<(), RpcError> {
        let head = parse_head(&raw)?;
        req.log_id = head.log_id as u64;
        // Dispatch resolves the descriptor by header id; the provider tag is
        // surfaced as the service name for logging.
        req.service_name = head.provider_str();
        req.method_key = head.id.to_string();
        req.body = raw.body;
        Ok(())
    }

    fn decode_response(
        &self,
        raw: RawPacket,
        _ctx: &mut ConnContext,
    ) -> Result<ResponsePacket, RpcError> {
        let head = parse_head(&raw)?;
        Ok(ResponsePacket {
            log_id: head.log_id as u64,
            body: raw.body,
            ..Default::default()
        })
    }

    fn encode_request(&self, req: &RequestPacket) -> Result<Bytes, RpcError> {
        let id: u16 = req.method_key.parse().map_err(|_| {
            RpcError::serialization(format!(
                "nshead requires a numeric method id, got {:?}",
                req.method_key
            ))
        })?;
        if req.attachment.is_some() {
            return Err(RpcError::serialization(
                "nshead carries no attachment channel",
            ));
        }
        let log_id = u32::try_from(req.log_id)
            .map_err(|_| RpcError::serialization("nshead log ids are 32-bit"))?;
        let head = NsHead::with_provider(id, 1, log_id, req.body.len() as u32);
        Ok(assemble(head, &req.body))
    }

    fn encode_response(&self, resp: &ResponsePacket) -> Result<Bytes, RpcError> {
        let log_id = u32::try_from(resp.log_id)
            .map_err(|_| RpcError::serialization("nshead log ids are 32-bit"))?;
        let head = NsHead::with_provider(0, 1, log_id, resp.body.len() as u32);
        Ok(assemble(head, &resp.body))
    }
}

fn parse_head(raw: &RawPacket) -> Result<NsHead, RpcError> {
    let bytes: [u8; NSHEAD_LEN] = raw.meta[..]
        .try_into()
        .map_err(|_| RpcError::serialization("nshead meta slice truncated"))?;
    NsHead::decode(&bytes).map_err(|_| RpcError::serialization("nshead magic mismatch"))
}

fn assemble(head: NsHead, body: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(NSHEAD_LEN + body.len());
    out.put_slice(&head.encode());
    out.put_slice(body);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(wire: Bytes) -> RawPacket {
        let mut acc = BufferStore::new();
        acc.append_slice(wire);
        let raw = NsHeadCodec
            .decode(&mut acc, &mut ConnContext::new())
            .unwrap();
        assert_eq!(acc.readable_bytes(), 0);
        raw
    }

    #[test]
    fn header_round_trip() {
        let head = NsHead::with_provider(7, 1, 0xabcd, 64);
        let wire = head.encode();
        assert_eq!(NsHead::decode(&wire).unwrap(), head);
    }

    #[test]
    fn request_round_trip() {
        let req = RequestPacket {
            log_id: 99,
            method_key: "7".into(),
            body: Bytes::from_static(b"raw message"),
            ..Default::default()
        };
        let wire = NsHeadCodec.encode_request(&req).unwrap();
        assert_eq!(wire.len(), NSHEAD_LEN + 11);

        let mut back = RequestPacket::default();
        NsHeadCodec
            .decode_request(decode_one(wire), &mut back)
            .unwrap();
        assert_eq!(back.log_id, 99);
        assert_eq!(back.method_key, "7");
        assert_eq!(back.service_name, "polyrpc");
        assert_eq!(&back.body[..], b"raw message");
    }

    #[test]
    fn bad_magic_is_bad_schema() {
        let head = NsHead::with_provider(1, 1, 2, 0);
        let mut wire = head.encode().to_vec();
        wire[24] ^= 0xff;
        let mut acc = BufferStore::new();
        acc.append_slice(Bytes::from(wire));
        assert_eq!(
            NsHeadCodec.decode(&mut acc, &mut ConnContext::new()),
            Err(DecodeError::BadSchema)
        );
    }

    #[test]
    fn short_header_waits() {
        let mut acc = BufferStore::new();
        acc.append_slice(Bytes::from_static(&[0u8; 20]));
        assert_eq!(
            NsHeadCodec.decode(&mut acc, &mut ConnContext::new()),
            Err(DecodeError::NotEnoughData)
        );
        assert_eq!(acc.readable_bytes(), 20);
    }

    #[test]
    fn oversize_body_is_too_big() {
        let mut head = NsHead::with_provider(1, 1, 2, 0);
        head.body_len = 600 * 1024 * 1024;
        let mut acc = BufferStore::new();
        acc.append_slice(Bytes::copy_from_slice(&head.encode()));
        assert_eq!(
            NsHeadCodec.decode(&mut acc, &mut ConnContext::new()),
            Err(DecodeError::TooBigData)
        );
    }

    #[test]
    fn non_numeric_method_id_fails_before_encoding() {
        let req = RequestPacket {
            method_key: "Echo".into(),
            ..Default::default()
        };
        assert!(NsHeadCodec.encode_request(&req).is_err());
    }
}
