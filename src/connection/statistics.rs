//! Per-operation call counting for pool connections
//!
//! Wrap any [`DatabaseConnection`] in an [`InstrumentedConnection`] to count
//! how often each data operation is executed against it. The wrapper is
//! transparent to routing: it forwards every call unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::{ConnectionError, DatabaseConnection, Request};

/// Decorator that counts `execute` calls per operation name
pub struct InstrumentedConnection {
    inner: Arc<dyn DatabaseConnection>,
    counts: Mutex<HashMap<String, u64>>,
}

impl InstrumentedConnection {
    /// Wrap a connection
    pub fn new(inner: Arc<dyn DatabaseConnection>) -> Self {
        Self {
            inner,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the per-operation counts
    pub fn statistics(&self) -> HashMap<String, u64> {
        self.counts.lock().clone()
    }

    /// Clear all counts
    pub fn reset_statistics(&self) {
        self.counts.lock().clear();
    }

    /// The wrapped connection
    pub fn inner(&self) -> &Arc<dyn DatabaseConnection> {
        &self.inner
    }
}

impl DatabaseConnection for InstrumentedConnection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn reconnect(&self) -> Result<(), ConnectionError> {
        self.inner.reconnect()
    }

    fn disconnect(&self) -> Result<(), ConnectionError> {
        self.inner.disconnect()
    }

    fn reset(&self) -> Result<(), ConnectionError> {
        self.inner.reset()
    }

    fn verify(&self) -> Result<(), ConnectionError> {
        self.inner.verify()
    }

    fn reset_runtime_stats(&self) -> f64 {
        self.inner.reset_runtime_stats()
    }

    fn execute(&self, request: &Request) -> Result<Value, ConnectionError> {
        {
            let mut counts = self.counts.lock();
            *counts.entry(request.operation.clone()).or_insert(0) += 1;
        }
        self.inner.execute(request)
    }
}
