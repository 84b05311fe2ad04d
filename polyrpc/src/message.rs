//! Body encoding shared by handlers and the client channel.
//!
//! Every typed message crosses the wire as protobuf or JSON depending on
//! the protocol (HTTP picks per-request); the dual `prost::Message` +
//! serde bound lets one handler serve both.

use bytes::Bytes;
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;

use polyrpc_core::{RpcError, WireEncoding};

/// Serialize a message under the given encoding.
pub fn encode_body<M>(encoding: WireEncoding, msg: &M) -> Result<Bytes, RpcError>
where
    M: Message + Serialize,
{
    match encoding {
        WireEncoding::Protobuf => Ok(Bytes::from(msg.encode_to_vec())),
        WireEncoding::Json => serde_json::to_vec(msg)
            .map(Bytes::from)
            .map_err(|e| RpcError::serialization(format!("json encode: {e}"))),
    }
}

/// Parse a message under the given encoding.
pub fn decode_body<M>(encoding: WireEncoding, bytes: &[u8]) -> Result<M, RpcError>
where
    M: Message + DeserializeOwned + Default,
{
    match encoding {
        WireEncoding::Protobuf => M::decode(bytes)
            .map_err(|e| RpcError::serialization(format!("protobuf decode: {e}"))),
        WireEncoding::Json => serde_json::from_slice(bytes)
            .map_err(|e| RpcError::serialization(format!("json decode: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EchoRequest;

    #[test]
    fn protobuf_round_trip() {
        let msg = EchoRequest {
            message: "hi".into(),
        };
        let wire = encode_body(WireEncoding::Protobuf, &msg).unwrap();
        let back: EchoRequest = decode_body(WireEncoding::Protobuf, &wire).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn json_round_trip() {
        let msg = EchoRequest {
            message: "hi".into(),
        };
        let wire = encode_body(WireEncoding::Json, &msg).unwrap();
        assert_eq!(&wire[..], br#"{"message":"hi"}"#);
        let back: EchoRequest = decode_body(WireEncoding::Json, &wire).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn garbage_fails_both_ways() {
        assert!(decode_body::<EchoRequest>(WireEncoding::Json, b"\xff\xfe").is_err());
        assert!(decode_body::<EchoRequest>(WireEncoding::Protobuf, b"\xff\xff\xff").is_err());
    }
}
