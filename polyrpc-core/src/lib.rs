//! Wire-level core for polyrpc.
//!
//! This crate provides the protocol layer shared by the server and client
//! sides of the framework:
//!
//! - [`buffer`]: zero-copy composite byte accumulator
//! - [`compress`]: compression adapter between wire bytes and messages
//! - [`error`]: framing outcomes, RPC errors, and the wire errno table
//! - [`meta`]: protobuf wire meta for the binary protocol family
//! - [`packet`]: raw and decoded packet types
//! - [`protocol`]: the six codecs behind one encode/decode contract
//! - [`engine`]: the per-connection framing engine with auto-detection

mod buffer;
mod compress;
mod engine;
mod error;
mod packet;

pub mod meta;
pub mod protocol;

pub use buffer::*;
pub use compress::*;
pub use engine::*;
pub use error::*;
pub use packet::*;
