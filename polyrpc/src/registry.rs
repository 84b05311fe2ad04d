//! Method descriptors and the registry dispatch resolves against.
//!
//! Registration happens once at server startup and is additive; lookups
//! after that are plain map reads behind an `Arc`, with no lock on the hot
//! path. Handlers are type-erased closures returning boxed futures — the
//! typed glue lives in [`unary_handler`].

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use polyrpc_core::{RpcError, TraceIds, WireEncoding};

use crate::message::{decode_body, encode_body};

/// NSHead routing data: traffic on that wire addresses methods by the
/// header's numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsHeadMeta {
    pub id: u16,
    pub version: u16,
    pub provider: String,
}

/// Static metadata about one RPC method. Immutable after registration.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub service_name: String,
    pub method_name: String,
    /// Position used by index-addressed protocols (Hulu).
    pub method_index: i32,
    /// Declared body encoding; HTTP may override per request.
    pub encoding: WireEncoding,
    pub ns_head: Option<NsHeadMeta>,
}

impl MethodDescriptor {
    pub fn new(service_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        MethodDescriptor {
            service_name: service_name.into(),
            method_name: method_name.into(),
            method_index: 0,
            encoding: WireEncoding::Protobuf,
            ns_head: None,
        }
    }

    pub fn index(mut self, method_index: i32) -> Self {
        self.method_index = method_index;
        self
    }

    pub fn ns_head(mut self, meta: NsHeadMeta) -> Self {
        self.ns_head = Some(meta);
        self
    }
}

/// Per-call data handed to a handler.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub log_id: u64,
    pub encoding: WireEncoding,
    /// Decompressed message bytes.
    pub body: Bytes,
    pub attachment: Option<Bytes>,
    pub kv_attachment: Vec<(String, String)>,
    pub trace: TraceIds,
}

/// What a handler produces: serialized (uncompressed) result bytes plus an
/// optional binary attachment.
#[derive(Debug, Clone, Default)]
pub struct InvocationResult {
    pub body: Bytes,
    pub attachment: Option<Bytes>,
}

/// Type-erased method invoker.
pub type MethodHandler =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<InvocationResult, RpcError>> + Send + Sync>;

pub struct MethodEntry {
    pub descriptor: MethodDescriptor,
    pub handler: MethodHandler,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("method {service}.{method} is already registered")]
    DuplicateMethod { service: String, method: String },
    #[error("method index {index} on {service} is already registered")]
    DuplicateIndex { service: String, index: i32 },
    #[error("nshead id {0} is already registered")]
    DuplicateNsHeadId(u16),
}

/// The descriptor table populated at server start.
#[derive(Default)]
pub struct MethodRegistry {
    by_name: HashMap<(String, String), Arc<MethodEntry>>,
    by_index: HashMap<(String, i32), Arc<MethodEntry>>,
    by_ns_id: HashMap<u16, Arc<MethodEntry>>,
    services: HashSet<String>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: MethodDescriptor,
        handler: MethodHandler,
    ) -> Result<(), RegistryError> {
        let name_key = (
            descriptor.service_name.clone(),
            descriptor.method_name.clone(),
        );
        if self.by_name.contains_key(&name_key) {
            return Err(RegistryError::DuplicateMethod {
                service: name_key.0,
                method: name_key.1,
            });
        }
        let index_key = (descriptor.service_name.clone(), descriptor.method_index);
        if self.by_index.contains_key(&index_key) {
            return Err(RegistryError::DuplicateIndex {
                service: index_key.0,
                index: index_key.1,
            });
        }
        if let Some(ns) = &descriptor.ns_head {
            if self.by_ns_id.contains_key(&ns.id) {
                return Err(RegistryError::DuplicateNsHeadId(ns.id));
            }
        }

        let entry = Arc::new(MethodEntry {
            descriptor,
            handler,
        });
        if let Some(ns) = &entry.descriptor.ns_head {
            self.by_ns_id.insert(ns.id, entry.clone());
        }
        self.services.insert(entry.descriptor.service_name.clone());
        self.by_index.insert(index_key, entry.clone());
        self.by_name.insert(name_key, entry);
        Ok(())
    }

    pub fn resolve_by_name(&self, service: &str, method: &str) -> Option<Arc<MethodEntry>> {
        self.by_name
            .get(&(service.to_string(), method.to_string()))
            .cloned()
    }

    pub fn resolve_by_index(&self, service: &str, index: i32) -> Option<Arc<MethodEntry>> {
        self.by_index.get(&(service.to_string(), index)).cloned()
    }

    pub fn resolve_by_ns_id(&self, id: u16) -> Option<Arc<MethodEntry>> {
        self.by_ns_id.get(&id).cloned()
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains(service)
    }
}

/// Read-only context a typed handler receives next to the request message.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub log_id: u64,
    pub attachment: Option<Bytes>,
    pub kv_attachment: Vec<(String, String)>,
    pub trace: TraceIds,
}

/// A typed handler result: the response message plus an optional binary
/// attachment.
#[derive(Debug, Clone)]
pub struct Reply<Resp> {
    pub message: Resp,
    pub attachment: Option<Bytes>,
}

impl<Resp> Reply<Resp> {
    pub fn new(message: Resp) -> Self {
        Reply {
            message,
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Bytes) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Wrap a typed async function into a [`MethodHandler`]. The request is
/// decoded and the reply encoded under the invocation's wire encoding.
pub fn unary_handler<Req, Resp, F, Fut>(f: F) -> MethodHandler
where
    Req: Message + DeserializeOwned + Default,
    Resp: Message + Serialize,
    F: Fn(Req, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply<Resp>, RpcError>> + Send + 'static,
{
    Arc::new(move |inv: Invocation| {
        let encoding = inv.encoding;
        let request = match decode_body::<Req>(encoding, &inv.body) {
            Ok(request) => request,
            Err(e) => return futures::future::ready(Err(e)).boxed(),
        };
        let ctx = CallContext {
            log_id: inv.log_id,
            attachment: inv.attachment,
            kv_attachment: inv.kv_attachment,
            trace: inv.trace,
        };
        let fut = f(request, ctx);
        async move {
            let reply = fut.await?;
            let body = encode_body(encoding, &reply.message)?;
            Ok(InvocationResult {
                body,
                attachment: reply.attachment,
            })
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EchoRequest, EchoResponse};

    fn echo_handler() -> MethodHandler {
        unary_handler(|req: EchoRequest, _ctx: CallContext| async move {
            Ok(Reply::new(EchoResponse {
                message: req.message,
            }))
        })
    }

    fn descriptor() -> MethodDescriptor {
        MethodDescriptor::new("echo.EchoService", "Echo").index(0)
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = MethodRegistry::new();
        registry.register(descriptor(), echo_handler()).unwrap();

        assert!(registry.resolve_by_name("echo.EchoService", "Echo").is_some());
        assert!(registry.resolve_by_index("echo.EchoService", 0).is_some());
        assert!(registry.resolve_by_name("echo.EchoService", "Nope").is_none());
        assert!(registry.has_service("echo.EchoService"));
        assert!(!registry.has_service("other.Service"));
    }

    #[test]
    fn duplicate_method_rejected() {
        let mut registry = MethodRegistry::new();
        registry.register(descriptor(), echo_handler()).unwrap();
        let err = registry.register(descriptor(), echo_handler()).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateMethod { .. }));
    }

    #[test]
    fn duplicate_index_rejected() {
        let mut registry = MethodRegistry::new();
        registry.register(descriptor(), echo_handler()).unwrap();
        let err = registry
            .register(
                MethodDescriptor::new("echo.EchoService", "Other").index(0),
                echo_handler(),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateIndex { .. }));
    }

    #[test]
    fn nshead_id_routing() {
        let mut registry = MethodRegistry::new();
        registry
            .register(
                descriptor().ns_head(NsHeadMeta {
                    id: 7,
                    version: 1,
                    provider: "echo".into(),
                }),
                echo_handler(),
            )
            .unwrap();
        assert!(registry.resolve_by_ns_id(7).is_some());
        let err = registry
            .register(
                MethodDescriptor::new("echo.EchoService", "Other")
                    .index(1)
                    .ns_head(NsHeadMeta {
                        id: 7,
                        version: 1,
                        provider: "echo".into(),
                    }),
                echo_handler(),
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateNsHeadId(7)));
    }

    #[tokio::test]
    async fn typed_handler_decodes_and_encodes() {
        let handler = echo_handler();
        let body = encode_body(
            WireEncoding::Protobuf,
            &EchoRequest {
                message: "hi".into(),
            },
        )
        .unwrap();
        let result = handler(Invocation {
            log_id: 1,
            encoding: WireEncoding::Protobuf,
            body,
            ..Default::default()
        })
        .await
        .unwrap();
        let resp: EchoResponse = decode_body(WireEncoding::Protobuf, &result.body).unwrap();
        assert_eq!(resp.message, "hi");
    }

    #[tokio::test]
    async fn typed_handler_surfaces_decode_failure() {
        let handler = echo_handler();
        let err = handler(Invocation {
            encoding: WireEncoding::Json,
            body: Bytes::from_static(b"\xff not json"),
            ..Default::default()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RpcError::Serialization(_)));
    }
}
