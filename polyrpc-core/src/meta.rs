//! Protobuf wire meta for the binary protocol family.
//!
//! These are hand-derived prost messages; the field numbers are the wire
//! contract and must not be renumbered. Baidu-std wraps request and response
//! meta in one envelope ([`RpcMeta`]); Hulu and SoFa carry flat per-direction
//! messages.

/// Baidu-std meta envelope. Exactly one of `request` / `response` is set.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcMeta {
    #[prost(message, optional, tag = "1")]
    pub request: Option<RpcRequestMeta>,
    #[prost(message, optional, tag = "2")]
    pub response: Option<RpcResponseMeta>,
    #[prost(int32, tag = "3")]
    pub compress_type: i32,
    /// Equals the request's log id; the client keys its correlation map on it.
    #[prost(uint64, tag = "4")]
    pub correlation_id: u64,
    /// Trailing bytes of the body that are the binary attachment. Zero means
    /// the body is message-only.
    #[prost(uint32, tag = "5")]
    pub attachment_size: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcRequestMeta {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(string, tag = "2")]
    pub method_name: String,
    #[prost(uint64, tag = "3")]
    pub log_id: u64,
    #[prost(uint64, tag = "4")]
    pub trace_id: u64,
    #[prost(uint64, tag = "5")]
    pub span_id: u64,
    #[prost(uint64, tag = "6")]
    pub parent_span_id: u64,
    /// Key/value attachment propagated into the per-call context.
    #[prost(message, repeated, tag = "7")]
    pub ext_fields: Vec<KvPair>,
    /// Per-call deadline in milliseconds; zero means use the server default.
    #[prost(uint32, tag = "8")]
    pub timeout_ms: u32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcResponseMeta {
    /// Zero means success; non-zero values are `BaiduRpcErrno` codes.
    #[prost(int32, tag = "1")]
    pub error_code: i32,
    #[prost(string, tag = "2")]
    pub error_text: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KvPair {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

/// Hulu request meta. Methods are addressed by index, not name.
#[derive(Clone, PartialEq, prost::Message)]
pub struct HuluRpcRequestMeta {
    #[prost(string, tag = "1")]
    pub service_name: String,
    #[prost(int32, tag = "2")]
    pub method_index: i32,
    #[prost(uint64, tag = "3")]
    pub correlation_id: u64,
    #[prost(uint64, tag = "4")]
    pub log_id: u64,
    #[prost(int32, tag = "5")]
    pub compress_type: i32,
    /// Byte offset splitting the post-meta body into `[message | attachment]`.
    /// Zero means message-only.
    #[prost(uint32, tag = "6")]
    pub user_message_size: u32,
    #[prost(string, tag = "7")]
    pub user_defined_info: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct HuluRpcResponseMeta {
    #[prost(int32, tag = "1")]
    pub error_code: i32,
    #[prost(string, tag = "2")]
    pub error_text: String,
    #[prost(uint64, tag = "3")]
    pub correlation_id: u64,
    #[prost(int32, tag = "4")]
    pub compress_type: i32,
    #[prost(uint32, tag = "5")]
    pub user_message_size: u32,
}

/// SoFa packet direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
pub enum SofaPacketType {
    Request = 0,
    Response = 1,
}

/// SoFa meta: one message for both directions, discriminated by `type`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SofaRpcMeta {
    #[prost(enumeration = "SofaPacketType", tag = "1")]
    pub r#type: i32,
    /// Correlation id.
    #[prost(uint64, tag = "2")]
    pub sequence_id: u64,
    #[prost(string, tag = "3")]
    pub service_name: String,
    #[prost(string, tag = "4")]
    pub method_name: String,
    /// Zero means success.
    #[prost(int32, tag = "5")]
    pub error_code: i32,
    #[prost(string, tag = "6")]
    pub reason: String,
    #[prost(int32, tag = "7")]
    pub compress_type: i32,
    #[prost(uint32, tag = "8")]
    pub user_message_size: u32,
}

/// Internal meta for a decoded gRPC stream; the gRPC codec serializes this
/// into the raw packet's meta slice so the shared `{meta, body}` shape holds
/// for HTTP/2 traffic too. Never leaves the process.
#[derive(Clone, PartialEq, prost::Message)]
pub struct GrpcMeta {
    /// `/<service>/<method>` from the `:path` pseudo-header.
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(string, tag = "2")]
    pub content_type: String,
    /// Present on responses: the `grpc-status` trailer.
    #[prost(int32, optional, tag = "3")]
    pub grpc_status: Option<i32>,
    #[prost(string, tag = "4")]
    pub grpc_message: String,
    /// Parsed `grpc-timeout`, in milliseconds.
    #[prost(uint64, optional, tag = "5")]
    pub timeout_ms: Option<u64>,
    /// The message envelope's compressed flag.
    #[prost(bool, tag = "6")]
    pub compressed: bool,
    /// HTTP/2 stream id; doubles as the correlation id for gRPC traffic.
    #[prost(uint32, tag = "7")]
    pub stream_id: u32,
    /// The `grpc-encoding` header naming the message compression.
    #[prost(string, tag = "8")]
    pub grpc_encoding: String,
    /// Custom metadata headers, carried into the call's kv attachment.
    #[prost(message, repeated, tag = "9")]
    pub metadata: Vec<KvPair>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn rpc_meta_round_trip() {
        let meta = RpcMeta {
            request: Some(RpcRequestMeta {
                service_name: "echo.EchoService".into(),
                method_name: "Echo".into(),
                log_id: 42,
                ext_fields: vec![KvPair {
                    key: "caller".into(),
                    value: "tester".into(),
                }],
                ..Default::default()
            }),
            response: None,
            compress_type: 2,
            correlation_id: 42,
            attachment_size: 16,
        };
        let wire = meta.encode_to_vec();
        let back = RpcMeta::decode(&wire[..]).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn response_meta_defaults_to_success() {
        let meta = RpcResponseMeta::default();
        assert_eq!(meta.error_code, 0);
        assert!(meta.error_text.is_empty());
    }

    #[test]
    fn hulu_meta_round_trip() {
        let meta = HuluRpcRequestMeta {
            service_name: "echo.EchoService".into(),
            method_index: 3,
            correlation_id: 9,
            log_id: 9,
            compress_type: 1,
            user_message_size: 8,
            user_defined_info: String::new(),
        };
        let wire = meta.encode_to_vec();
        assert_eq!(HuluRpcRequestMeta::decode(&wire[..]).unwrap(), meta);
    }

    #[test]
    fn sofa_type_enumeration() {
        let mut meta = SofaRpcMeta::default();
        assert_eq!(meta.r#type(), SofaPacketType::Request);
        meta.set_type(SofaPacketType::Response);
        let wire = meta.encode_to_vec();
        assert_eq!(
            SofaRpcMeta::decode(&wire[..]).unwrap().r#type(),
            SofaPacketType::Response
        );
    }
}
