//! Server-originated calls over an established connection.
//!
//! No proxy synthesis: a [`PushCaller`] is an explicit caller object built
//! from a service/method pair and the connection's [`PushSession`]. Push
//! packets reuse whichever length-prefixed codec the connection is latched
//! to, with an `SpHead` sub-header; the peer's dispatch routes them to its
//! registered callbacks, and the reply comes back to the correlation future
//! parked here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use polyrpc_core::protocol::{encode_request_with_push, ProtocolId};
use polyrpc_core::{
    PushPacketType, RequestPacket, ResponsePacket, RpcError, SpHead, WireEncoding,
};

use crate::correlation::CorrelationMap;
use crate::message::{decode_body, encode_body};

struct PushShared {
    writer: mpsc::UnboundedSender<bytes::Bytes>,
    correlation: CorrelationMap,
    next_log_id: AtomicU64,
    timeout: Duration,
    /// The connection's latched protocol, set when its first packet
    /// decodes. Push frames must be expressed in the same codec.
    protocol: OnceLock<ProtocolId>,
}

/// Per-connection handle for originating calls toward the peer.
#[derive(Clone)]
pub struct PushSession {
    shared: Arc<PushShared>,
}

impl PushSession {
    pub(crate) fn new(writer: mpsc::UnboundedSender<bytes::Bytes>, timeout: Duration) -> Self {
        PushSession {
            shared: Arc::new(PushShared {
                writer,
                correlation: CorrelationMap::new(),
                next_log_id: AtomicU64::new(1),
                timeout,
                protocol: OnceLock::new(),
            }),
        }
    }

    /// Record the connection's latched protocol; later calls are ignored
    /// (the framing engine never rebinds).
    pub(crate) fn bind_protocol(&self, protocol: ProtocolId) {
        let _ = self.shared.protocol.set(protocol);
    }

    /// Build a caller for one remote callback method.
    pub fn caller(
        &self,
        service_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> PushCaller {
        PushCaller {
            service_name: service_name.into(),
            method_name: method_name.into(),
            session: self.clone(),
        }
    }

    /// Deliver a push response arriving on this connection.
    pub(crate) fn complete(&self, resp: ResponsePacket) -> bool {
        self.shared.correlation.complete(resp)
    }

    /// Fail every call still waiting on this connection.
    pub(crate) fn fail_all(&self, reason: &str) {
        self.shared.correlation.fail_all(reason);
    }
}

/// An explicit caller object: `invoke` encodes, sends, and awaits the
/// correlated reply.
pub struct PushCaller {
    service_name: String,
    method_name: String,
    session: PushSession,
}

impl PushCaller {
    pub async fn invoke<Req, Resp>(&self, request: &Req) -> Result<Resp, RpcError>
    where
        Req: Message + Serialize,
        Resp: Message + DeserializeOwned + Default,
    {
        let shared = &self.session.shared;
        let Some(&protocol) = shared.protocol.get() else {
            return Err(RpcError::network(
                "push before the peer's protocol is established",
            ));
        };
        let log_id = shared.next_log_id.fetch_add(1, Ordering::Relaxed);
        let packet = RequestPacket {
            log_id,
            service_name: self.service_name.clone(),
            method_key: self.method_name.clone(),
            encoding: WireEncoding::Protobuf,
            body: encode_body(WireEncoding::Protobuf, request)?,
            ..Default::default()
        };
        let wire = encode_request_with_push(
            protocol,
            &packet,
            SpHead {
                packet_type: PushPacketType::PushRequest,
                log_id,
            },
        )?;

        let rx = shared.correlation.register(log_id)?;
        debug!(log_id, service = %self.service_name, method = %self.method_name, "push call");
        if shared.writer.send(wire).is_err() {
            shared.correlation.forget(log_id);
            return Err(RpcError::network("connection closed"));
        }

        let resp = match tokio::time::timeout(shared.timeout, rx).await {
            Err(_) => {
                shared.correlation.forget(log_id);
                return Err(RpcError::Timeout);
            }
            Ok(Err(_)) => return Err(RpcError::network("connection closed")),
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Ok(Ok(resp))) => resp,
        };
        if !resp.is_success() {
            return Err(RpcError::Service {
                code: resp.error_code,
                message: resp.error_text,
            });
        }
        decode_body(WireEncoding::Protobuf, &resp.body)
    }
}
