//! Compression adapter between wire bytes and message objects.
//!
//! [`CompressType`] carries the wire codes shared by every protocol's meta
//! (`0=NONE, 1=SNAPPY, 2=GZIP, 3=ZLIB`). [`Compressor`] is the byte-level
//! trait; [`compress_message`] / [`decompress_message`] are the
//! message-level entry points that run protobuf serialization and then the
//! byte transform. `NONE` is the identity *after* serialization — it still
//! serializes through the schema.

use std::io;
use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use flate2::Compression as Flate2Level;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use prost::Message;

use crate::error::RpcError;

/// Compression codes carried in request and response meta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressType {
    #[default]
    None,
    Snappy,
    Gzip,
    Zlib,
}

impl CompressType {
    /// Wire value for meta.
    pub fn code(self) -> i32 {
        match self {
            CompressType::None => 0,
            CompressType::Snappy => 1,
            CompressType::Gzip => 2,
            CompressType::Zlib => 3,
        }
    }

    /// Parse a wire value. Unknown codes fail as a serialization failure per
    /// the error contract.
    pub fn from_code(code: i32) -> Result<Self, RpcError> {
        match code {
            0 => Ok(CompressType::None),
            1 => Ok(CompressType::Snappy),
            2 => Ok(CompressType::Gzip),
            3 => Ok(CompressType::Zlib),
            other => Err(RpcError::serialization(format!(
                "unknown compress type {other}"
            ))),
        }
    }

    /// The byte-level compressor, or `None` for the identity.
    pub fn compressor(self) -> Option<BoxedCompressor> {
        match self {
            CompressType::None => None,
            CompressType::Snappy => Some(BoxedCompressor::new(SnappyCompressor)),
            CompressType::Gzip => Some(BoxedCompressor::new(GzipCompressor::default())),
            CompressType::Zlib => Some(BoxedCompressor::new(ZlibCompressor::default())),
        }
    }
}

/// Byte-level compression.
pub trait Compressor: Send + Sync + 'static {
    /// Name for logging and HTTP-facing surfaces.
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// Type-erased compressor handle.
#[derive(Clone)]
pub struct BoxedCompressor(Arc<dyn Compressor>);

impl BoxedCompressor {
    pub fn new<C: Compressor>(compressor: C) -> Self {
        BoxedCompressor(Arc::new(compressor))
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.compress(data)
    }

    pub fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.decompress(data)
    }
}

impl std::fmt::Debug for BoxedCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedCompressor").field(&self.name()).finish()
    }
}

/// Snappy raw-block compression (wire code 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn name(&self) -> &'static str {
        "snappy"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .map(Bytes::from)
            .map_err(io::Error::other)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map(Bytes::from)
            .map_err(io::Error::other)
    }
}

/// Gzip compression (wire code 2).
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    /// Compression level (0-9).
    pub level: u32,
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = GzEncoder::new(Vec::new(), Flate2Level::new(self.level));
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

/// Zlib compression (wire code 3). RFC 1950 framing, not raw DEFLATE.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    /// Compression level (0-9).
    pub level: u32,
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

impl Compressor for ZlibCompressor {
    fn name(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Flate2Level::new(self.level));
        encoder.write_all(data)?;
        Ok(Bytes::from(encoder.finish()?))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(Bytes::from(out))
    }
}

/// Transform already-serialized bytes. Identity for `None`.
pub fn compress_bytes(ty: CompressType, data: Bytes) -> Result<Bytes, RpcError> {
    match ty.compressor() {
        None => Ok(data),
        Some(c) => c
            .compress(&data)
            .map_err(|e| RpcError::serialization(format!("{} compress: {e}", c.name()))),
    }
}

/// Inverse of [`compress_bytes`].
pub fn decompress_bytes(ty: CompressType, data: Bytes) -> Result<Bytes, RpcError> {
    match ty.compressor() {
        None => Ok(data),
        Some(c) => c
            .decompress(&data)
            .map_err(|e| RpcError::serialization(format!("{} decompress: {e}", c.name()))),
    }
}

/// Serialize a message through its schema, then apply the byte transform.
pub fn compress_message(ty: CompressType, msg: &impl Message) -> Result<Bytes, RpcError> {
    compress_bytes(ty, Bytes::from(msg.encode_to_vec()))
}

/// Undo the byte transform, then parse through the schema.
pub fn decompress_message<M: Message + Default>(
    ty: CompressType,
    data: Bytes,
) -> Result<M, RpcError> {
    let plain = decompress_bytes(ty, data)?;
    M::decode(&plain[..]).map_err(|e| RpcError::serialization(format!("message decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::RpcRequestMeta;

    #[test]
    fn wire_codes() {
        assert_eq!(CompressType::None.code(), 0);
        assert_eq!(CompressType::Snappy.code(), 1);
        assert_eq!(CompressType::Gzip.code(), 2);
        assert_eq!(CompressType::Zlib.code(), 3);
        for code in 0..=3 {
            assert_eq!(CompressType::from_code(code).unwrap().code(), code);
        }
    }

    #[test]
    fn unknown_code_is_serialization_failure() {
        let err = CompressType::from_code(7).unwrap_err();
        assert!(matches!(err, RpcError::Serialization(_)));
    }

    #[test]
    fn snappy_round_trip() {
        let c = SnappyCompressor;
        let original = b"snappy snappy snappy snappy snappy";
        let packed = c.compress(original).unwrap();
        assert_eq!(&c.decompress(&packed).unwrap()[..], original);
    }

    #[test]
    fn gzip_round_trip() {
        let c = GzipCompressor::default();
        let original = b"a body long enough for gzip to bite into, repeated twice \
                         a body long enough for gzip to bite into";
        let packed = c.compress(original).unwrap();
        assert_ne!(&packed[..], &original[..]);
        assert_eq!(&c.decompress(&packed).unwrap()[..], &original[..]);
    }

    #[test]
    fn zlib_round_trip() {
        let c = ZlibCompressor::default();
        let original = b"zlib zlib zlib zlib zlib zlib zlib zlib";
        let packed = c.compress(original).unwrap();
        assert_eq!(&c.decompress(&packed).unwrap()[..], &original[..]);
    }

    #[test]
    fn decompress_garbage_fails() {
        assert!(GzipCompressor::default().decompress(b"not gzip").is_err());
        assert!(ZlibCompressor::default().decompress(b"not zlib").is_err());
    }

    #[test]
    fn none_still_serializes_through_schema() {
        let msg = RpcRequestMeta {
            service_name: "echo.EchoService".into(),
            method_name: "Echo".into(),
            log_id: 7,
            ..Default::default()
        };
        let wire = compress_message(CompressType::None, &msg).unwrap();
        assert_eq!(wire, Bytes::from(msg.encode_to_vec()));
        let back: RpcRequestMeta = decompress_message(CompressType::None, wire).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn message_round_trip_all_codecs() {
        let msg = RpcRequestMeta {
            service_name: "echo.EchoService".into(),
            method_name: "Echo".into(),
            log_id: 42,
            ..Default::default()
        };
        for ty in [
            CompressType::None,
            CompressType::Snappy,
            CompressType::Gzip,
            CompressType::Zlib,
        ] {
            let wire = compress_message(ty, &msg).unwrap();
            let back: RpcRequestMeta = decompress_message(ty, wire).unwrap();
            assert_eq!(back, msg, "codec {ty:?}");
        }
    }
}
