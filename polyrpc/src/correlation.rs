//! Client-side correlation: log id -> waiting future.
//!
//! Each in-flight call parks a oneshot sender under its log id. A response
//! completes exactly the matching future; duplicate registrations are
//! rejected locally before any bytes go out; a connection-level failure
//! fails every outstanding call with a network error.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

use polyrpc_core::{BaiduRpcErrno, ResponsePacket, RpcError};

type Slot = oneshot::Sender<Result<ResponsePacket, RpcError>>;

#[derive(Default)]
pub struct CorrelationMap {
    inner: Mutex<HashMap<u64, Slot>>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a future for `log_id`. A duplicate id on an open connection is
    /// a protocol violation and is refused.
    pub fn register(
        &self,
        log_id: u64,
    ) -> Result<oneshot::Receiver<Result<ResponsePacket, RpcError>>, RpcError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.contains_key(&log_id) {
            return Err(RpcError::service(
                BaiduRpcErrno::BadRequest,
                format!("duplicate log id {log_id} in flight"),
            ));
        }
        let (tx, rx) = oneshot::channel();
        inner.insert(log_id, tx);
        Ok(rx)
    }

    /// Abandon a registration (send failed, call timed out locally).
    pub fn forget(&self, log_id: u64) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&log_id);
    }

    /// Deliver a response to its waiter. Returns false for strangers — a
    /// response whose log id matches nothing is dropped, never misdelivered.
    pub fn complete(&self, resp: ResponsePacket) -> bool {
        let slot = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&resp.log_id);
        match slot {
            Some(tx) => tx.send(Ok(resp)).is_ok(),
            None => {
                warn!(log_id = resp.log_id, "response for unknown correlation id dropped");
                false
            }
        }
    }

    /// Fail one outstanding call (peer reset its stream).
    pub fn fail(&self, log_id: u64, err: RpcError) {
        let slot = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&log_id);
        if let Some(tx) = slot {
            let _ = tx.send(Err(err));
        }
    }

    /// Fail every outstanding call (connection fatal or closed).
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<(u64, Slot)> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(RpcError::network(reason)));
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
