//! Echo fixtures shared by unit and integration tests.

use serde::{Deserialize, Serialize};

use crate::registry::{unary_handler, CallContext, MethodDescriptor, MethodRegistry, Reply};

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct EchoRequest {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct EchoResponse {
    #[prost(string, tag = "1")]
    #[serde(default)]
    pub message: String,
}

/// A registry with `echo.EchoService/Echo` at index 0, echoing both the
/// message and any binary attachment.
pub fn echo_registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry
        .register(
            MethodDescriptor::new("echo.EchoService", "Echo").index(0),
            unary_handler(|req: EchoRequest, ctx: CallContext| async move {
                let mut reply = Reply::new(EchoResponse {
                    message: req.message,
                });
                if let Some(att) = ctx.attachment {
                    reply = reply.with_attachment(att);
                }
                Ok(reply)
            }),
        )
        .expect("echo registry");
    registry
}
