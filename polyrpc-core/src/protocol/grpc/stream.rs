//! Per-stream state for gRPC.
//!
//! `Idle -> HeadersReceived -> DataReceived* -> Closed`; the closing edge is
//! end-of-stream, trailers, or a reset. Any other transition is a schema
//! error on the connection.

use bytes::BytesMut;

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    HeadersReceived,
    DataReceived,
    Closed,
}

/// What a HEADERS frame did to the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersOutcome {
    /// Initial headers; the stream stays open for DATA.
    Opened,
    /// Initial headers with end-of-stream: a headers-only exchange
    /// (trailers-only gRPC error responses take this path).
    Complete,
    /// Trailing headers; the stream is complete.
    Trailers,
}

#[derive(Debug)]
pub struct GrpcStream {
    pub state: StreamState,
    pub headers: Vec<(String, String)>,
    pub trailers: Vec<(String, String)>,
    pub data: BytesMut,
}

impl Default for GrpcStream {
    fn default() -> Self {
        GrpcStream {
            state: StreamState::Idle,
            headers: Vec::new(),
            trailers: Vec::new(),
            data: BytesMut::new(),
        }
    }
}

impl GrpcStream {
    pub fn on_headers(
        &mut self,
        fields: Vec<(String, String)>,
        end_stream: bool,
    ) -> Result<HeadersOutcome, DecodeError> {
        match self.state {
            StreamState::Idle => {
                self.headers = fields;
                if end_stream {
                    self.state = StreamState::Closed;
                    Ok(HeadersOutcome::Complete)
                } else {
                    self.state = StreamState::HeadersReceived;
                    Ok(HeadersOutcome::Opened)
                }
            }
            StreamState::HeadersReceived | StreamState::DataReceived => {
                // Trailers must end the stream.
                if !end_stream {
                    return Err(DecodeError::BadSchema);
                }
                self.trailers = fields;
                self.state = StreamState::Closed;
                Ok(HeadersOutcome::Trailers)
            }
            StreamState::Closed => Err(DecodeError::BadSchema),
        }
    }

    /// Returns true when end-of-stream completed the message.
    pub fn on_data(&mut self, payload: &[u8], end_stream: bool) -> Result<bool, DecodeError> {
        match self.state {
            StreamState::HeadersReceived | StreamState::DataReceived => {
                self.data.extend_from_slice(payload);
                self.state = if end_stream {
                    StreamState::Closed
                } else {
                    StreamState::DataReceived
                };
                Ok(end_stream)
            }
            StreamState::Idle | StreamState::Closed => Err(DecodeError::BadSchema),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn trailer(&self, name: &str) -> Option<&str> {
        self.trailers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}
