//! Dispatch adapter: decoded request in, encoded response out.
//!
//! Resolution keys by protocol — name for Baidu-std/SoFa/HTTP, stringified
//! method index for Hulu, header id for NSHead. Unknown targets never fail
//! decoding (framing already succeeded); they produce a response whose meta
//! carries the service error. Handler failures and timeouts come back the
//! same way. Buffers travel by ownership, so every path releases them
//! exactly once when the packets drop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use polyrpc_core::protocol::ProtocolId;
use polyrpc_core::{
    compress_bytes, decompress_bytes, BaiduRpcErrno, RequestPacket, ResponsePacket, RpcError,
};

use crate::options::ServerOptions;
use crate::registry::{Invocation, MethodEntry, MethodRegistry};

pub struct DispatchAdapter {
    registry: Arc<MethodRegistry>,
    options: ServerOptions,
}

impl DispatchAdapter {
    pub fn new(registry: Arc<MethodRegistry>, options: ServerOptions) -> Self {
        DispatchAdapter { registry, options }
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Run one decoded request to a response. Never fails: every error
    /// becomes an error response correlated to the request's log id.
    pub async fn dispatch(&self, protocol: ProtocolId, req: RequestPacket) -> ResponsePacket {
        let log_id = req.log_id;
        let encoding = req.encoding;
        let compress_type = req.compress_type;

        let entry = match self.resolve(protocol, &req) {
            Ok(entry) => entry,
            Err(mut resp) => {
                resp.encoding = encoding;
                return resp;
            }
        };

        let deadline = req
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.options.default_timeout);

        let body = match decompress_bytes(compress_type, req.body) {
            Ok(body) => body,
            Err(e) => {
                warn!(log_id, error = %e, "failed to decompress request body");
                let mut resp = ResponsePacket::error(log_id, e.errno(), e.to_string());
                resp.encoding = encoding;
                return resp;
            }
        };

        let invocation = Invocation {
            log_id,
            encoding,
            body,
            attachment: req.attachment,
            kv_attachment: req.kv_attachment,
            trace: req.trace,
        };

        debug!(
            log_id,
            service = %entry.descriptor.service_name,
            method = %entry.descriptor.method_name,
            "dispatching request"
        );
        let outcome = tokio::time::timeout(deadline, (entry.handler)(invocation)).await;

        let mut resp = match outcome {
            Err(_) => {
                warn!(log_id, ?deadline, "handler exceeded deadline, cancelled");
                ResponsePacket::error(
                    log_id,
                    RpcError::Timeout.errno(),
                    format!("call exceeded deadline of {deadline:?}"),
                )
            }
            Ok(Err(e)) => {
                warn!(log_id, error = %e, "handler failed");
                ResponsePacket::error(log_id, e.errno(), e.to_string())
            }
            Ok(Ok(result)) => match compress_bytes(compress_type, result.body) {
                Ok(body) => ResponsePacket {
                    log_id,
                    compress_type,
                    body,
                    attachment: result.attachment,
                    ..Default::default()
                },
                Err(e) => ResponsePacket::error(log_id, e.errno(), e.to_string()),
            },
        };
        resp.encoding = encoding;
        resp
    }

    fn resolve(
        &self,
        protocol: ProtocolId,
        req: &RequestPacket,
    ) -> Result<Arc<MethodEntry>, ResponsePacket> {
        let found = match protocol {
            ProtocolId::Hulu => {
                let index: i32 = req.method_key.parse().map_err(|_| {
                    ResponsePacket::error(
                        req.log_id,
                        BaiduRpcErrno::BadRequest.code(),
                        format!("method index {:?} is not numeric", req.method_key),
                    )
                })?;
                self.registry.resolve_by_index(&req.service_name, index)
            }
            ProtocolId::NsHead => {
                let id: u16 = req.method_key.parse().map_err(|_| {
                    ResponsePacket::error(
                        req.log_id,
                        BaiduRpcErrno::BadRequest.code(),
                        format!("nshead id {:?} is not numeric", req.method_key),
                    )
                })?;
                self.registry.resolve_by_ns_id(id)
            }
            _ => self
                .registry
                .resolve_by_name(&req.service_name, &req.method_key),
        };

        found.ok_or_else(|| {
            // NSHead routes by id alone, so a miss there is always a
            // missing method, not a missing service.
            let (errno, what) = if protocol != ProtocolId::NsHead
                && !self.registry.has_service(&req.service_name)
            {
                (BaiduRpcErrno::NoService, "service")
            } else {
                (BaiduRpcErrno::NoMethod, "method")
            };
            debug!(
                log_id = req.log_id,
                service = %req.service_name,
                method = %req.method_key,
                "no such {what}"
            );
            ResponsePacket::error(
                req.log_id,
                errno.code(),
                format!(
                    "no such {what}: {}.{}",
                    req.service_name, req.method_key
                ),
            )
        })
    }
}
