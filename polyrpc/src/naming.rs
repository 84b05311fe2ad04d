//! Naming service seam.
//!
//! Clients resolve service queries through this trait; real backends (DNS,
//! Consul, ZooKeeper, ...) live outside this crate. A static list backend
//! ships here because it is the degenerate case every test and bootstrap
//! path needs.

use std::fmt;
use std::sync::Mutex;

use futures::future::BoxFuture;

use polyrpc_core::RpcError;

/// A resolvable host/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Endpoint {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registration record for backends that support publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub service: String,
    pub endpoint: Endpoint,
}

/// Receives endpoint updates for a subscribed query.
pub trait EndpointListener: Send + Sync {
    fn on_endpoints(&self, endpoints: Vec<Endpoint>);
}

/// The lookup/subscribe/register contract consumed by clients.
pub trait NamingService: Send + Sync {
    fn lookup(&self, query: &str) -> BoxFuture<'_, Result<Vec<Endpoint>, RpcError>>;

    fn subscribe(
        &self,
        query: &str,
        listener: Box<dyn EndpointListener>,
    ) -> Result<(), RpcError>;

    fn unsubscribe(&self, query: &str);

    fn register(&self, info: &InstanceInfo) -> Result<(), RpcError>;

    fn unregister(&self, info: &InstanceInfo);

    fn destroy(&self);
}

/// Fixed endpoint list; `lookup` ignores the query.
#[derive(Default)]
pub struct StaticNaming {
    endpoints: Mutex<Vec<Endpoint>>,
}

impl StaticNaming {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        StaticNaming {
            endpoints: Mutex::new(endpoints),
        }
    }
}

impl NamingService for StaticNaming {
    fn lookup(&self, _query: &str) -> BoxFuture<'_, Result<Vec<Endpoint>, RpcError>> {
        let endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        Box::pin(async move { Ok(endpoints) })
    }

    fn subscribe(
        &self,
        _query: &str,
        listener: Box<dyn EndpointListener>,
    ) -> Result<(), RpcError> {
        // The list never changes; deliver the snapshot once.
        listener.on_endpoints(
            self.endpoints
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        );
        Ok(())
    }

    fn unsubscribe(&self, _query: &str) {}

    fn register(&self, info: &InstanceInfo) -> Result<(), RpcError> {
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(info.endpoint.clone());
        Ok(())
    }

    fn unregister(&self, info: &InstanceInfo) {
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|e| e != &info.endpoint);
    }

    fn destroy(&self) {
        self.endpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
