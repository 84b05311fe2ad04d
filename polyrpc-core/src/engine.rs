//! Per-connection framing engine.
//!
//! One instance per connection. Incoming chunks accumulate in the
//! [`BufferStore`]; each `next_packet` call tries to cut one whole packet
//! off the front. While the connection is unbound every candidate codec is
//! tried in detection order; the first to produce a packet (or to pin the
//! connection, as gRPC does on its preface) is latched for the life of the
//! connection. `BadSchema` on a bound connection and `TooBigData` anywhere
//! are terminal.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::buffer::BufferStore;
use crate::error::{DecodeError, MAX_BODY_SIZE};
use crate::packet::RawPacket;
use crate::protocol::{codec_for, ConnContext, ProtocolId, DETECT_ORDER};

/// Connection framing state: `Unbound -> Bound -> (Fatal)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Unbound,
    Bound(ProtocolId),
    Fatal(DecodeError),
}

/// A packet cut from the wire, tagged with the protocol that framed it.
#[derive(Debug, PartialEq)]
pub struct InboundPacket {
    pub protocol: ProtocolId,
    pub raw: RawPacket,
}

pub struct FramingEngine {
    acc: BufferStore,
    ctx: ConnContext,
    state: ConnState,
    candidates: &'static [ProtocolId],
}

impl Default for FramingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FramingEngine {
    /// An engine that auto-detects among all protocols.
    pub fn new() -> Self {
        FramingEngine {
            acc: BufferStore::new(),
            ctx: ConnContext::new(),
            state: ConnState::Unbound,
            candidates: DETECT_ORDER,
        }
    }

    /// An engine pre-bound to one protocol (client connections know what
    /// they speak).
    pub fn bound(protocol: ProtocolId) -> Self {
        FramingEngine {
            acc: BufferStore::new(),
            ctx: ConnContext::new(),
            state: ConnState::Bound(protocol),
            candidates: DETECT_ORDER,
        }
    }

    /// Cap declared packet bodies below the protocol ceiling of 512 MiB.
    /// Every codec on this connection enforces the cap.
    pub fn max_body_size(mut self, bytes: u64) -> Self {
        self.ctx.max_body_size = bytes.min(MAX_BODY_SIZE);
        self
    }

    pub fn bound_protocol(&self) -> Option<ProtocolId> {
        match self.state {
            ConnState::Bound(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.state, ConnState::Fatal(_))
    }

    /// Feed one chunk from the transport.
    pub fn append(&mut self, chunk: Bytes) {
        self.acc.append_slice(chunk);
    }

    /// Connection-level bytes a codec owes the peer (gRPC SETTINGS, acks).
    pub fn take_control(&mut self) -> Option<Bytes> {
        self.ctx.take_control()
    }

    /// Correlation ids cancelled by peer stream resets.
    pub fn take_reset_log_ids(&mut self) -> Vec<u64> {
        self.ctx.take_reset_log_ids()
    }

    pub fn context_mut(&mut self) -> &mut ConnContext {
        &mut self.ctx
    }

    /// Try to produce the next packet. `Ok(None)` means more bytes are
    /// needed; a returned error is terminal for the connection.
    pub fn next_packet(&mut self) -> Result<Option<InboundPacket>, DecodeError> {
        match self.state {
            ConnState::Fatal(err) => Err(err),
            ConnState::Bound(id) => self.decode_bound(id),
            ConnState::Unbound => self.detect(),
        }
    }

    fn decode_bound(&mut self, id: ProtocolId) -> Result<Option<InboundPacket>, DecodeError> {
        match codec_for(id).decode(&mut self.acc, &mut self.ctx) {
            Ok(raw) => Ok(Some(InboundPacket { protocol: id, raw })),
            Err(DecodeError::NotEnoughData) => Ok(None),
            Err(err) => {
                warn!(protocol = id.as_str(), error = %err, "fatal framing error");
                self.state = ConnState::Fatal(err);
                Err(err)
            }
        }
    }

    fn detect(&mut self) -> Result<Option<InboundPacket>, DecodeError> {
        if self.acc.readable_bytes() == 0 {
            return Ok(None);
        }
        let mut undecided = false;
        for &id in self.candidates {
            match codec_for(id).decode(&mut self.acc, &mut self.ctx) {
                Ok(raw) => {
                    debug!(protocol = id.as_str(), "protocol detected");
                    self.state = ConnState::Bound(id);
                    return Ok(Some(InboundPacket { protocol: id, raw }));
                }
                Err(DecodeError::NotEnoughData) => {
                    // This format is still plausible; a codec may also have
                    // pinned the connection during negotiation without
                    // emitting a packet yet.
                    if let Some(latched) = self.ctx.latched.take() {
                        debug!(protocol = latched.as_str(), "protocol pinned during negotiation");
                        self.state = ConnState::Bound(latched);
                        return self.decode_bound(latched);
                    }
                    undecided = true;
                }
                Err(DecodeError::BadSchema) => continue,
                Err(err @ DecodeError::TooBigData) => {
                    warn!(protocol = id.as_str(), "oversized packet during detection");
                    self.state = ConnState::Fatal(err);
                    return Err(err);
                }
            }
        }
        if undecided {
            Ok(None)
        } else {
            warn!("no candidate protocol matches the incoming bytes");
            self.state = ConnState::Fatal(DecodeError::BadSchema);
            Err(DecodeError::BadSchema)
        }
    }
}
