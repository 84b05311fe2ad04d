//! # polyrpc
//!
//! A multi-protocol RPC framework: expose procedures once, serve them over
//! Baidu-std, Hulu, SoFa, NSHead, HTTP/1.1 (JSON or protobuf) and gRPC on a
//! single port, with per-connection protocol auto-detection.
//!
//! The wire layer (codecs, framing engine, compression, buffers) lives in
//! [`polyrpc_core`]; this crate adds everything that consumes it:
//!
//! - [`registry`]: the descriptor table populated at server start
//! - [`dispatch`]: decoded request -> invocation -> encoded response
//! - [`server`]: tokio TCP glue around the framing engine
//! - [`channel`]: client connection with log-id correlation
//! - [`push`]: server-originated calls over established connections
//! - [`naming`]: the naming-service seam consumed by clients
//!
//! ## Example
//!
//! ```no_run
//! use polyrpc::prelude::*;
//! # use polyrpc::testing::{EchoRequest, EchoResponse};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = MethodRegistry::new();
//! registry.register(
//!     MethodDescriptor::new("echo.EchoService", "Echo").index(0),
//!     unary_handler(|req: EchoRequest, _ctx: CallContext| async move {
//!         Ok(Reply::new(EchoResponse { message: req.message }))
//!     }),
//! )?;
//!
//! let server = RpcServer::new(registry, ServerOptions::default());
//! let addr = polyrpc::server::spawn_server(server).await?;
//!
//! let channel = RpcChannel::connect(
//!     &addr.to_string(),
//!     ProtocolId::BaiduStd,
//!     ChannelOptions::default(),
//! )
//! .await?;
//! let resp: EchoResponse = channel
//!     .call("echo.EchoService", "Echo", &EchoRequest { message: "hi".into() })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod correlation;
pub mod dispatch;
pub mod message;
pub mod naming;
pub mod options;
pub mod push;
pub mod registry;
pub mod server;
pub mod testing;

// Re-export the wire-level crate.
pub use polyrpc_core as core;

pub mod prelude {
    //! The most common types in one import.
    pub use crate::channel::RpcChannel;
    pub use crate::dispatch::DispatchAdapter;
    pub use crate::naming::{Endpoint, NamingService, StaticNaming};
    pub use crate::options::{ChannelOptions, ServerOptions};
    pub use crate::push::{PushCaller, PushSession};
    pub use crate::registry::{
        unary_handler, CallContext, MethodDescriptor, MethodRegistry, NsHeadMeta, Reply,
    };
    pub use crate::server::RpcServer;
    pub use polyrpc_core::protocol::ProtocolId;
    pub use polyrpc_core::{BaiduRpcErrno, CompressType, RpcError, WireEncoding};
}
