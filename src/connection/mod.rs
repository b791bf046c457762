//! Connection capability surface shared by the master and replica handles
//!
//! The pool never constructs database connections itself; it is handed
//! already-open handles that implement [`DatabaseConnection`]. Data
//! operations (selects, inserts, schema introspection) are forwarded
//! opaquely as a [`Request`] carrying an operation name and JSON arguments,
//! while lifecycle operations (reconnect, disconnect, verify) are explicit
//! trait methods.
//!
//! Routing decisions are driven by an [`OperationTable`]: a fixed,
//! explicitly authored map from operation name to [`OperationKind`]. Each
//! driver adapter registers its documented capability set once instead of
//! being discovered at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

pub mod statistics;

/// Error types for connection operations
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to connect: {0}")]
    ConnectionFailed(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A generic data operation forwarded to an underlying connection
///
/// The pool does not interpret the operation beyond classifying its name;
/// arguments and results pass through untouched.
#[derive(Debug, Clone)]
pub struct Request {
    /// Operation name, e.g. "select_all" or "insert"
    pub operation: String,

    /// Opaque arguments forwarded to the driver
    pub args: Vec<Value>,
}

impl Request {
    /// Create a request with no arguments
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument
    pub fn with_arg(mut self, arg: Value) -> Self {
        self.args.push(arg);
        self
    }
}

/// Capability surface required from every underlying connection handle
///
/// Implementations wrap one live database session. Handles are held for the
/// lifetime of the pool; the pool only ever calls reconnect/disconnect on
/// them, never drops and recreates them.
pub trait DatabaseConnection: Send + Sync {
    /// Short label used in log output
    fn name(&self) -> &str;

    /// Whether the underlying session is currently usable
    fn is_active(&self) -> bool;

    /// Re-establish the underlying session
    ///
    /// May block for the duration of the driver's own connect timeout; the
    /// pool does not impose one of its own.
    fn reconnect(&self) -> Result<(), ConnectionError>;

    /// Close the underlying session
    fn disconnect(&self) -> Result<(), ConnectionError>;

    /// Reset the session state without closing it
    fn reset(&self) -> Result<(), ConnectionError>;

    /// Verify the session, reconnecting if the driver deems it necessary
    fn verify(&self) -> Result<(), ConnectionError>;

    /// Reset the driver's runtime statistics, returning the accumulated value
    fn reset_runtime_stats(&self) -> f64;

    /// Execute a data operation, forwarding arguments and result opaquely
    fn execute(&self, request: &Request) -> Result<Value, ConnectionError>;
}

/// Identity comparison for connection handles
///
/// Handles are identity-comparable, not value-comparable: two handles are
/// the same connection only if they share the same allocation.
pub fn same_connection(a: &Arc<dyn DatabaseConnection>, b: &Arc<dyn DatabaseConnection>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Classification of an operation for routing purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Routes to a read connection chosen by the current consistency mode
    Read,

    /// Routes to the master connection inside a forced-master scope
    Write,

    /// Fans out to every connection in the pool
    Lifecycle,
}

/// Static routing table mapping operation names to their classification
///
/// Operations not present in the table classify as [`OperationKind::Write`]
/// and route to the master, the safe default for anything a driver exposes
/// that the table does not know about.
#[derive(Debug, Clone)]
pub struct OperationTable {
    kinds: HashMap<String, OperationKind>,
}

impl OperationTable {
    /// Create an empty table (every operation routes to master)
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Create a table pre-populated with the standard read and lifecycle sets
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for name in [
            "select",
            "select_one",
            "select_all",
            "select_value",
            "select_values",
            "select_rows",
            "tables",
            "columns",
        ] {
            table.register(name, OperationKind::Read);
        }
        for name in [
            "active",
            "reconnect",
            "disconnect",
            "reset",
            "verify",
            "reset_runtime_stats",
        ] {
            table.register(name, OperationKind::Lifecycle);
        }
        table
    }

    /// Register or override the classification of an operation
    pub fn register(&mut self, operation: impl Into<String>, kind: OperationKind) {
        self.kinds.insert(operation.into(), kind);
    }

    /// Classify an operation name (unknown names are writes)
    pub fn classify(&self, operation: &str) -> OperationKind {
        self.kinds
            .get(operation)
            .copied()
            .unwrap_or(OperationKind::Write)
    }
}

impl Default for OperationTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_read_set() {
        let table = OperationTable::with_defaults();
        assert_eq!(table.classify("select_all"), OperationKind::Read);
        assert_eq!(table.classify("select_value"), OperationKind::Read);
        assert_eq!(table.classify("tables"), OperationKind::Read);
        assert_eq!(table.classify("columns"), OperationKind::Read);
    }

    #[test]
    fn test_default_table_lifecycle_set() {
        let table = OperationTable::with_defaults();
        assert_eq!(table.classify("reconnect"), OperationKind::Lifecycle);
        assert_eq!(table.classify("verify"), OperationKind::Lifecycle);
    }

    #[test]
    fn test_unknown_operations_route_to_master() {
        let table = OperationTable::with_defaults();
        assert_eq!(table.classify("insert"), OperationKind::Write);
        assert_eq!(table.classify("update"), OperationKind::Write);
        assert_eq!(table.classify("execute"), OperationKind::Write);
        assert_eq!(table.classify("no_such_operation"), OperationKind::Write);
    }

    #[test]
    fn test_register_override() {
        let mut table = OperationTable::with_defaults();
        table.register("explain", OperationKind::Read);
        assert_eq!(table.classify("explain"), OperationKind::Read);
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new("select_all")
            .with_arg(serde_json::json!("SELECT * FROM users"))
            .with_arg(serde_json::json!({"limit": 10}));
        assert_eq!(request.operation, "select_all");
        assert_eq!(request.args.len(), 2);
    }

    #[test]
    fn test_same_connection_identity() {
        let a = test_support::StubConnection::arc("a");
        let b = test_support::StubConnection::arc("b");
        let a_dyn: Arc<dyn DatabaseConnection> = a.clone();
        let a_dyn2: Arc<dyn DatabaseConnection> = a;
        let b_dyn: Arc<dyn DatabaseConnection> = b;

        assert!(same_connection(&a_dyn, &a_dyn2));
        assert!(!same_connection(&a_dyn, &b_dyn));
    }
}
