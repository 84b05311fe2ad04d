//! Tokio TCP server: accept loop, per-connection framing, dispatch fan-out.
//!
//! Each connection gets one read task driving its framing engine and one
//! writer task draining an mpsc queue, so responses can be written in
//! completion order from any dispatch task. A fatal framing error drops the
//! connection and fails its in-flight push calls with a network error.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use polyrpc_core::protocol::codec_for;
use polyrpc_core::{
    BaiduRpcErrno, FramingEngine, InboundPacket, PushPacketType, RequestPacket, ResponsePacket,
};

use crate::dispatch::DispatchAdapter;
use crate::options::ServerOptions;
use crate::push::PushSession;
use crate::registry::MethodRegistry;

type SessionHook = Arc<dyn Fn(PushSession) + Send + Sync>;

pub struct RpcServer {
    dispatch: Arc<DispatchAdapter>,
    options: ServerOptions,
    session_hook: Option<SessionHook>,
}

impl RpcServer {
    pub fn new(registry: MethodRegistry, options: ServerOptions) -> Self {
        RpcServer {
            dispatch: Arc::new(DispatchAdapter::new(Arc::new(registry), options.clone())),
            options,
            session_hook: None,
        }
    }

    /// Observe every accepted connection's [`PushSession`]; this is how
    /// server code obtains callers for server-originated requests.
    pub fn on_session(mut self, hook: impl Fn(PushSession) + Send + Sync + 'static) -> Self {
        self.session_hook = Some(Arc::new(hook));
        self
    }

    /// Accept connections forever.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "connection accepted");
            let dispatch = self.dispatch.clone();
            let options = self.options.clone();
            let hook = self.session_hook.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, dispatch, options, hook).await {
                    debug!(%peer, error = %e, "connection closed");
                }
            });
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    dispatch: Arc<DispatchAdapter>,
    options: ServerOptions,
    hook: Option<SessionHook>,
) -> io::Result<()> {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<bytes::Bytes>();
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if writer.write_all(&chunk).await.is_err() {
                break;
            }
        }
    });

    let session = PushSession::new(tx.clone(), options.default_timeout);
    if let Some(hook) = &hook {
        hook(session.clone());
    }

    let mut engine = FramingEngine::new().max_body_size(options.max_body_size);
    let in_flight: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut buf = BytesMut::with_capacity(64 * 1024);

    loop {
        let n = reader.read_buf(&mut buf).await?;
        if n == 0 {
            break;
        }
        engine.append(buf.split().freeze());

        loop {
            if let Some(ctrl) = engine.take_control() {
                let _ = tx.send(ctrl);
            }
            match engine.next_packet() {
                Ok(Some(inbound)) => {
                    session.bind_protocol(inbound.protocol);
                    handle_packet(inbound, &mut engine, &dispatch, &session, &tx, &in_flight);
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "fatal connection error, dropping peer");
                    session.fail_all("fatal framing error");
                    return Ok(());
                }
            }
        }
        if let Some(ctrl) = engine.take_control() {
            let _ = tx.send(ctrl);
        }
    }

    session.fail_all("connection closed");
    Ok(())
}

fn handle_packet(
    inbound: InboundPacket,
    engine: &mut FramingEngine,
    dispatch: &Arc<DispatchAdapter>,
    session: &PushSession,
    tx: &mpsc::UnboundedSender<bytes::Bytes>,
    in_flight: &Arc<Mutex<HashSet<u64>>>,
) {
    let protocol = inbound.protocol;
    let codec = codec_for(protocol);

    if let Some(sp) = inbound.raw.push {
        match sp.packet_type {
            PushPacketType::PushResponse => {
                match codec.decode_response(inbound.raw, engine.context_mut()) {
                    Ok(resp) => {
                        session.complete(resp);
                    }
                    Err(e) => warn!(error = %e, "undecodable push response dropped"),
                }
                return;
            }
            PushPacketType::Response => {
                warn!(log_id = sp.log_id, "unexpected response packet on server side");
                return;
            }
            PushPacketType::Request | PushPacketType::PushRequest => {}
        }
    }

    let mut req = RequestPacket::default();
    if let Err(e) = codec.decode_request(inbound.raw, &mut req) {
        warn!(error = %e, "request failed to parse after framing");
        let mut resp = ResponsePacket::error(req.log_id, e.errno(), e.to_string());
        resp.encoding = req.encoding;
        send_response(codec.encode_response(&resp), tx);
        return;
    }

    // Duplicate log ids inside an open connection are a protocol violation;
    // answer with an error instead of overwriting the in-flight call.
    if !in_flight
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(req.log_id)
    {
        warn!(log_id = req.log_id, "duplicate log id in flight");
        let mut resp = ResponsePacket::error(
            req.log_id,
            BaiduRpcErrno::BadRequest.code(),
            "duplicate log id in flight",
        );
        resp.encoding = req.encoding;
        send_response(codec.encode_response(&resp), tx);
        return;
    }

    let dispatch = dispatch.clone();
    let tx = tx.clone();
    let in_flight = in_flight.clone();
    tokio::spawn(async move {
        let resp = dispatch.dispatch(protocol, req).await;
        in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&resp.log_id);
        send_response(codec_for(protocol).encode_response(&resp), &tx);
    });
}

fn send_response(
    encoded: Result<bytes::Bytes, polyrpc_core::RpcError>,
    tx: &mpsc::UnboundedSender<bytes::Bytes>,
) {
    match encoded {
        Ok(wire) => {
            let _ = tx.send(wire);
        }
        Err(e) => warn!(error = %e, "response failed to encode, dropped"),
    }
}

/// Convenience for tests and demos: bind an ephemeral port, serve in the
/// background, return the bound address.
pub async fn spawn_server(server: RpcServer) -> io::Result<std::net::SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    Ok(addr)
}
