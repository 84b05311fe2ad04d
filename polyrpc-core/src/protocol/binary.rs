//! Shared framing for the length-prefixed binary family.
//!
//! `[MAGIC(4)][body_size(u32)][meta_size(u32)][SpHead?][meta][message(+attachment)?]`
//!
//! Baidu-std reads the two size fields big-endian; Hulu and SoFa read them
//! little-endian. That asymmetry is an interoperability contract and is
//! parameterized here, never normalized. `body_size` counts everything after
//! the 12-byte header, including the optional push sub-header; `meta_size`
//! counts the meta block only.

use bytes::{BufMut, Bytes, BytesMut};

use crate::buffer::BufferStore;
use crate::error::DecodeError;
use crate::packet::{RawPacket, SpHead, SP_HEAD_LEN};

pub(crate) const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SizeOrder {
    BigEndian,
    LittleEndian,
}

impl SizeOrder {
    fn read_u32(self, bytes: [u8; 4]) -> u32 {
        match self {
            SizeOrder::BigEndian => u32::from_be_bytes(bytes),
            SizeOrder::LittleEndian => u32::from_le_bytes(bytes),
        }
    }

    fn write_u32(self, value: u32, out: &mut BytesMut) {
        match self {
            SizeOrder::BigEndian => out.put_u32(value),
            SizeOrder::LittleEndian => out.put_u32_le(value),
        }
    }
}

/// Cut one frame off the accumulator.
///
/// `allow_push` enables recognition of the server-push sub-header after the
/// outer header. `max_body_size` is the connection's declared-body cap.
pub(crate) fn decode_frame(
    acc: &mut BufferStore,
    magic: &[u8; 4],
    order: SizeOrder,
    allow_push: bool,
    max_body_size: u64,
) -> Result<RawPacket, DecodeError> {
    // Prefix-safe magic check: reject as soon as one byte disagrees, wait if
    // everything seen so far agrees.
    let readable = acc.readable_bytes();
    let magic_avail = readable.min(4);
    let seen = acc.peek(magic_avail)?;
    if seen[..] != magic[..magic_avail] {
        return Err(DecodeError::BadSchema);
    }
    if readable < HEADER_LEN {
        return Err(DecodeError::NotEnoughData);
    }

    let body_size = order.read_u32(acc.peek_array::<4>(4)?) as u64;
    let meta_size = order.read_u32(acc.peek_array::<4>(8)?) as u64;
    if body_size > max_body_size {
        return Err(DecodeError::TooBigData);
    }

    let mut overhead = meta_size;
    let push_present = allow_push
        && body_size >= (SP_HEAD_LEN as u64)
        && readable >= HEADER_LEN + 4
        && SpHead::present(&acc.peek_array::<4>(HEADER_LEN)?);
    if push_present {
        overhead += SP_HEAD_LEN as u64;
    }
    if overhead > body_size {
        return Err(DecodeError::BadSchema);
    }

    let total = HEADER_LEN as u64 + body_size;
    if (readable as u64) < total {
        return Err(DecodeError::NotEnoughData);
    }

    // Whole packet present: consume it.
    acc.skip(HEADER_LEN)?;
    let push = if push_present {
        let head_bytes = acc.peek_array::<SP_HEAD_LEN>(0)?;
        acc.skip(SP_HEAD_LEN)?;
        Some(SpHead::decode(&head_bytes)?)
    } else {
        None
    };
    let meta = acc.read_retained_slice(meta_size as usize)?;
    let body = acc.read_retained_slice((body_size - overhead) as usize)?;
    Ok(RawPacket { meta, body, push })
}

/// Assemble one frame: header, optional push sub-header, meta, body parts.
pub(crate) fn encode_frame(
    magic: &[u8; 4],
    order: SizeOrder,
    push: Option<SpHead>,
    meta: &[u8],
    body_parts: &[&[u8]],
) -> Bytes {
    let payload_len: usize = body_parts.iter().map(|p| p.len()).sum();
    let push_len = if push.is_some() { SP_HEAD_LEN } else { 0 };
    let body_size = push_len + meta.len() + payload_len;

    let mut out = BytesMut::with_capacity(HEADER_LEN + body_size);
    out.put_slice(magic);
    order.write_u32(body_size as u32, &mut out);
    order.write_u32(meta.len() as u32, &mut out);
    if let Some(head) = push {
        out.put_slice(&head.encode());
    }
    out.put_slice(meta);
    for part in body_parts {
        out.put_slice(part);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MAX_BODY_SIZE;
    use crate::packet::PushPacketType;

    fn store(bytes: &[u8]) -> BufferStore {
        let mut acc = BufferStore::new();
        acc.append_slice(Bytes::copy_from_slice(bytes));
        acc
    }

    #[test]
    fn frame_round_trip_big_endian() {
        let wire = encode_frame(b"PRPC", SizeOrder::BigEndian, None, b"meta", &[b"body"]);
        assert_eq!(&wire[0..4], b"PRPC");
        assert_eq!(u32::from_be_bytes([wire[4], wire[5], wire[6], wire[7]]), 8);
        assert_eq!(u32::from_be_bytes([wire[8], wire[9], wire[10], wire[11]]), 4);

        let mut acc = store(&wire);
        let raw = decode_frame(&mut acc, b"PRPC", SizeOrder::BigEndian, true, MAX_BODY_SIZE).unwrap();
        assert_eq!(&raw.meta[..], b"meta");
        assert_eq!(&raw.body[..], b"body");
        assert!(raw.push.is_none());
        assert_eq!(acc.readable_bytes(), 0);
    }

    #[test]
    fn frame_round_trip_little_endian() {
        let wire = encode_frame(b"HULU", SizeOrder::LittleEndian, None, b"m", &[b"xyz"]);
        assert_eq!(u32::from_le_bytes([wire[4], wire[5], wire[6], wire[7]]), 4);

        let mut acc = store(&wire);
        let raw = decode_frame(&mut acc, b"HULU", SizeOrder::LittleEndian, true, MAX_BODY_SIZE).unwrap();
        assert_eq!(&raw.meta[..], b"m");
        assert_eq!(&raw.body[..], b"xyz");
    }

    #[test]
    fn endianness_is_not_interchangeable() {
        // A little-endian packet whose sizes are re-read big-endian declares
        // an absurd body and dies on the size guard, or misaligns into
        // BadSchema; either way it never decodes.
        let wire = encode_frame(b"HULU", SizeOrder::LittleEndian, None, b"meta", &[b"body"]);
        let mut acc = store(&wire);
        let err = decode_frame(&mut acc, b"HULU", SizeOrder::BigEndian, true, MAX_BODY_SIZE).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TooBigData | DecodeError::BadSchema | DecodeError::NotEnoughData
        ));
        assert_eq!(acc.readable_bytes(), wire.len());
    }

    #[test]
    fn big_endian_sizes_on_little_endian_codec_are_bad_schema() {
        // Header written big-endian (body 266, meta 11). Read little-endian
        // the declared meta outgrows the declared body, which is
        // structurally invalid whatever bytes follow.
        let mut wire = BytesMut::new();
        wire.put_slice(b"HULU");
        wire.put_u32(266);
        wire.put_u32(11);
        wire.put_slice(&[0u8; 266]);
        let mut acc = store(&wire);
        assert_eq!(
            decode_frame(&mut acc, b"HULU", SizeOrder::LittleEndian, true, MAX_BODY_SIZE),
            Err(DecodeError::BadSchema)
        );
    }

    #[test]
    fn wrong_magic_is_bad_schema_immediately() {
        let mut acc = store(b"HU");
        assert_eq!(
            decode_frame(&mut acc, b"PRPC", SizeOrder::BigEndian, true, MAX_BODY_SIZE),
            Err(DecodeError::BadSchema)
        );
    }

    #[test]
    fn magic_prefix_waits_for_more() {
        let mut acc = store(b"PR");
        assert_eq!(
            decode_frame(&mut acc, b"PRPC", SizeOrder::BigEndian, true, MAX_BODY_SIZE),
            Err(DecodeError::NotEnoughData)
        );
        assert_eq!(acc.readable_bytes(), 2);
    }

    #[test]
    fn short_body_waits_without_consuming() {
        let wire = encode_frame(b"PRPC", SizeOrder::BigEndian, None, b"meta", &[b"body"]);
        let mut acc = store(&wire[..wire.len() - 1]);
        assert_eq!(
            decode_frame(&mut acc, b"PRPC", SizeOrder::BigEndian, true, MAX_BODY_SIZE),
            Err(DecodeError::NotEnoughData)
        );
        assert_eq!(acc.readable_bytes(), wire.len() - 1);
    }

    #[test]
    fn oversize_body_is_too_big_data() {
        let mut wire = BytesMut::new();
        wire.put_slice(b"PRPC");
        wire.put_u32(513 * 1024 * 1024);
        wire.put_u32(0);
        let mut acc = store(&wire);
        assert_eq!(
            decode_frame(&mut acc, b"PRPC", SizeOrder::BigEndian, true, MAX_BODY_SIZE),
            Err(DecodeError::TooBigData)
        );
    }

    #[test]
    fn configured_cap_below_ceiling_is_enforced() {
        let body = [0u8; 2048];
        let wire = encode_frame(b"PRPC", SizeOrder::BigEndian, None, b"meta", &[&body[..]]);
        let mut acc = store(&wire);
        assert_eq!(
            decode_frame(&mut acc, b"PRPC", SizeOrder::BigEndian, true, 1024),
            Err(DecodeError::TooBigData)
        );
        assert_eq!(acc.readable_bytes(), wire.len());
    }

    #[test]
    fn meta_larger_than_body_is_bad_schema() {
        let mut wire = BytesMut::new();
        wire.put_slice(b"PRPC");
        wire.put_u32(4);
        wire.put_u32(5);
        wire.put_slice(b"xxxx");
        let mut acc = store(&wire);
        assert_eq!(
            decode_frame(&mut acc, b"PRPC", SizeOrder::BigEndian, true, MAX_BODY_SIZE),
            Err(DecodeError::BadSchema)
        );
    }

    #[test]
    fn push_sub_header_is_recognized() {
        let head = SpHead {
            packet_type: PushPacketType::PushRequest,
            log_id: 77,
        };
        let wire = encode_frame(b"PRPC", SizeOrder::BigEndian, Some(head), b"meta", &[b"pp"]);
        let mut acc = store(&wire);
        let raw = decode_frame(&mut acc, b"PRPC", SizeOrder::BigEndian, true, MAX_BODY_SIZE).unwrap();
        assert_eq!(raw.push, Some(head));
        assert_eq!(&raw.meta[..], b"meta");
        assert_eq!(&raw.body[..], b"pp");
    }

    #[test]
    fn push_disabled_leaves_marker_in_meta() {
        let head = SpHead {
            packet_type: PushPacketType::Request,
            log_id: 1,
        };
        let wire = encode_frame(b"SOFA", SizeOrder::LittleEndian, Some(head), b"", &[]);
        let mut acc = store(&wire);
        let raw = decode_frame(&mut acc, b"SOFA", SizeOrder::LittleEndian, false, MAX_BODY_SIZE).unwrap();
        assert!(raw.push.is_none());
        // Without push recognition the sub-header bytes land in the body
        // block (meta_size is still zero).
        assert_eq!(raw.body.len(), SP_HEAD_LEN);
    }
}
