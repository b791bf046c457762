//! Scriptable stub connection shared by the unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::{ConnectionError, DatabaseConnection, Request};

/// In-memory connection whose liveness and failure behavior the tests control
pub(crate) struct StubConnection {
    pub name: String,
    pub active: AtomicBool,
    pub reconnect_succeeds: AtomicBool,
    pub reconnect_attempts: AtomicUsize,
    pub fail_execute: AtomicBool,
    pub fail_lifecycle: AtomicBool,
    pub executed: Mutex<Vec<String>>,
}

impl StubConnection {
    pub fn arc(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            active: AtomicBool::new(true),
            reconnect_succeeds: AtomicBool::new(true),
            reconnect_attempts: AtomicUsize::new(0),
            fail_execute: AtomicBool::new(false),
            fail_lifecycle: AtomicBool::new(false),
            executed: Mutex::new(Vec::new()),
        })
    }

    /// Simulate the backing database going away
    pub fn go_down(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.fail_execute.store(true, Ordering::SeqCst);
    }

    /// Simulate the backing database coming back (reconnect will succeed)
    pub fn come_back(&self) {
        self.reconnect_succeeds.store(true, Ordering::SeqCst);
        self.fail_execute.store(false, Ordering::SeqCst);
    }

    pub fn reconnect_attempts(&self) -> usize {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn executed_operations(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

impl DatabaseConnection for StubConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn reconnect(&self) -> Result<(), ConnectionError> {
        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.reconnect_succeeds.load(Ordering::SeqCst) {
            self.active.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(ConnectionError::ConnectionFailed(format!(
                "{} is unreachable",
                self.name
            )))
        }
    }

    fn disconnect(&self) -> Result<(), ConnectionError> {
        if self.fail_lifecycle.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionFailed(self.name.clone()));
        }
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn reset(&self) -> Result<(), ConnectionError> {
        if self.fail_lifecycle.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionFailed(self.name.clone()));
        }
        Ok(())
    }

    fn verify(&self) -> Result<(), ConnectionError> {
        if self.fail_lifecycle.load(Ordering::SeqCst) {
            return Err(ConnectionError::ConnectionFailed(self.name.clone()));
        }
        Ok(())
    }

    fn reset_runtime_stats(&self) -> f64 {
        1.0
    }

    fn execute(&self, request: &Request) -> Result<Value, ConnectionError> {
        self.executed.lock().push(request.operation.clone());
        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(ConnectionError::QueryFailed(format!(
                "{} refused {}",
                self.name, request.operation
            )));
        }
        Ok(Value::String(self.name.clone()))
    }
}
