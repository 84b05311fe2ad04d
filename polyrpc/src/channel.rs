//! Client channel: one connection, one protocol, correlated calls.
//!
//! The channel owns a read task (framing engine pre-bound to the chosen
//! protocol) and a writer task; calls encode on the caller's task, park a
//! future in the correlation map, and await the matching response. Ten
//! interleaved calls on one connection each complete their own future —
//! correlation is by log id, never by ordering.
//!
//! With registered callbacks the channel also serves the push direction:
//! server-originated requests dispatch into the callback registry and the
//! replies go back with a push sub-header.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use polyrpc_core::protocol::{
    codec_for, encode_response_with_push, grpc::GrpcCodec, ProtocolId,
};
use polyrpc_core::{
    compress_bytes, decompress_bytes, FramingEngine, PushPacketType, RequestPacket, RpcError,
    SpHead, WireEncoding,
};

use crate::correlation::CorrelationMap;
use crate::dispatch::DispatchAdapter;
use crate::message::{decode_body, encode_body};
use crate::options::{ChannelOptions, ServerOptions};
use crate::registry::MethodRegistry;

struct ChannelInner {
    protocol: ProtocolId,
    options: ChannelOptions,
    writer: mpsc::UnboundedSender<Bytes>,
    correlation: Arc<CorrelationMap>,
    next_log_id: AtomicU64,
}

#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<ChannelInner>,
}

impl RpcChannel {
    /// Connect and speak `protocol` for the life of the connection.
    pub async fn connect(
        addr: &str,
        protocol: ProtocolId,
        options: ChannelOptions,
    ) -> Result<Self, RpcError> {
        Self::connect_with_callbacks(addr, protocol, options, None).await
    }

    /// Connect with a callback registry served for server-push requests.
    pub async fn connect_with_callbacks(
        addr: &str,
        protocol: ProtocolId,
        options: ChannelOptions,
        callbacks: Option<MethodRegistry>,
    ) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RpcError::network(format!("connect {addr}: {e}")))?;
        stream.set_nodelay(true).ok();
        let (mut reader, mut writer_half) = stream.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        if protocol == ProtocolId::Grpc {
            let _ = tx.send(GrpcCodec::client_preamble());
        }
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                if writer_half.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let correlation = Arc::new(CorrelationMap::new());
        let push_dispatch = callbacks
            .map(|r| Arc::new(DispatchAdapter::new(Arc::new(r), ServerOptions::default())));

        let read_correlation = correlation.clone();
        let read_tx = tx.clone();
        tokio::spawn(async move {
            let mut engine = FramingEngine::bound(protocol);
            let mut buf = BytesMut::with_capacity(64 * 1024);
            loop {
                match reader.read_buf(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
                engine.append(buf.split().freeze());

                loop {
                    if let Some(ctrl) = engine.take_control() {
                        let _ = read_tx.send(ctrl);
                    }
                    match engine.next_packet() {
                        Ok(Some(inbound)) => {
                            if let Some(sp) = inbound.raw.push {
                                if sp.packet_type == PushPacketType::PushRequest {
                                    serve_push_request(
                                        inbound.protocol,
                                        inbound.raw,
                                        &push_dispatch,
                                        &read_tx,
                                    );
                                    continue;
                                }
                            }
                            let codec = codec_for(inbound.protocol);
                            match codec.decode_response(inbound.raw, engine.context_mut()) {
                                Ok(resp) => {
                                    read_correlation.complete(resp);
                                }
                                Err(e) => warn!(error = %e, "undecodable response dropped"),
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!(error = %err, "fatal framing error on client connection");
                            read_correlation.fail_all("fatal framing error");
                            return;
                        }
                    }
                }
                for log_id in engine.take_reset_log_ids() {
                    read_correlation.fail(log_id, RpcError::network("stream reset by peer"));
                }
            }
            read_correlation.fail_all("connection closed");
        });

        // gRPC correlation ids double as HTTP/2 stream ids: odd, increasing.
        // Other protocols start from a random point to keep ids distinct
        // across reconnects.
        let first_log_id = match protocol {
            ProtocolId::Grpc => 1,
            // NSHead log ids are 32-bit on the wire; leave headroom.
            ProtocolId::NsHead => u64::from(rand::random::<u16>()) + 1,
            _ => u64::from(rand::random::<u32>()) + 1,
        };
        Ok(RpcChannel {
            inner: Arc::new(ChannelInner {
                protocol,
                options,
                writer: tx,
                correlation,
                next_log_id: AtomicU64::new(first_log_id),
            }),
        })
    }

    fn next_log_id(&self) -> u64 {
        let step = if self.inner.protocol == ProtocolId::Grpc {
            2
        } else {
            1
        };
        self.inner.next_log_id.fetch_add(step, Ordering::Relaxed)
    }

    fn wire_encoding(&self) -> WireEncoding {
        // Only HTTP carries an encoding choice on the wire.
        if self.inner.protocol == ProtocolId::Http {
            self.inner.options.encoding
        } else {
            WireEncoding::Protobuf
        }
    }

    pub async fn call<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        request: &Req,
    ) -> Result<Resp, RpcError>
    where
        Req: Message + Serialize,
        Resp: Message + DeserializeOwned + Default,
    {
        self.call_with_attachment(service, method, request, None)
            .await
            .map(|(resp, _)| resp)
    }

    /// Full-featured call: binary attachment out, attachment (if any) back.
    pub async fn call_with_attachment<Req, Resp>(
        &self,
        service: &str,
        method: &str,
        request: &Req,
        attachment: Option<Bytes>,
    ) -> Result<(Resp, Option<Bytes>), RpcError>
    where
        Req: Message + Serialize,
        Resp: Message + DeserializeOwned + Default,
    {
        let inner = &self.inner;
        let encoding = self.wire_encoding();
        let compress_type = inner.options.compress_type;

        let body = compress_bytes(compress_type, encode_body(encoding, request)?)?;
        let log_id = self.next_log_id();
        let packet = RequestPacket {
            log_id,
            service_name: service.to_string(),
            method_key: method.to_string(),
            compress_type,
            encoding,
            body,
            attachment,
            timeout_ms: Some(inner.options.timeout.as_millis() as u64),
            ..Default::default()
        };

        // Encode before registering: a packet this protocol cannot express
        // fails here, before any bytes are written.
        let wire = codec_for(inner.protocol).encode_request(&packet)?;

        let rx = inner.correlation.register(log_id)?;
        debug!(log_id, service, method, protocol = inner.protocol.as_str(), "call");
        if inner.writer.send(wire).is_err() {
            inner.correlation.forget(log_id);
            return Err(RpcError::network("connection closed"));
        }

        let resp = match tokio::time::timeout(inner.options.timeout, rx).await {
            Err(_) => {
                inner.correlation.forget(log_id);
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
        let plain = decompress_bytes(resp.compress_type, resp.body)?;
        let response_encoding = if inner.protocol == ProtocolId::Http {
            resp.encoding
        } else {
            WireEncoding::Protobuf
        };
        let message = decode_body(response_encoding, &plain)?;
        Ok((message, resp.attachment))
    }

    pub fn in_flight(&self) -> usize {
        self.inner.correlation.in_flight()
    }
}

fn serve_push_request(
    protocol: ProtocolId,
    raw: polyrpc_core::RawPacket,
    push_dispatch: &Option<Arc<DispatchAdapter>>,
    tx: &mpsc::UnboundedSender<Bytes>,
) {
    let Some(dispatch) = push_dispatch else {
        warn!("push request received but no callbacks are registered");
        return;
    };
    let mut req = RequestPacket::default();
    if let Err(e) = codec_for(protocol).decode_request(raw, &mut req) {
        warn!(error = %e, "undecodable push request dropped");
        return;
    }
    let dispatch = dispatch.clone();
    let tx = tx.clone();
    tokio::spawn(async move {
        let resp = dispatch.dispatch(protocol, req).await;
        let head = SpHead {
            packet_type: PushPacketType::PushResponse,
            log_id: resp.log_id,
        };
        // The reply must ride the same codec the push request arrived on.
        match encode_response_with_push(protocol, &resp, head) {
            Ok(wire) => {
                let _ = tx.send(wire);
            }
            Err(e) => warn!(error = %e, "push response failed to encode"),
        }
    });
}
