//! The read/write-splitting pool adapter
//!
//! [`ReplicaPool`] owns one master connection plus a weighted set of read
//! replicas and routes every operation to the right handle: writes to the
//! master, reads to a replica chosen by the ambient consistency mode, and
//! lifecycle operations to every connection. A read that fails against a
//! dead replica is retried exactly once against a fresh candidate after the
//! dead one has been suppressed; the retry itself never suppresses, which
//! bounds the recursion and surfaces the error when everything is down.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::connection::{
    same_connection, ConnectionError, DatabaseConnection, OperationKind, OperationTable, Request,
};
use crate::context;

use super::availability::AvailabilityStack;
use super::weighted::WeightedSet;

/// Identifies a pool instance, used to key per-pool replica pins
pub type PoolId = u64;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Default suppression window for a failing read connection
pub const DEFAULT_SUPPRESSION_TTL: Duration = Duration::from_secs(30);

/// How a proxied call is being made, which controls the failure handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProxyKind {
    Read,
    Write,
    Retry,
}

/// Read/write-splitting connection pool
///
/// Connection membership is fixed at construction; only the availability
/// stack and the forced-master flag mutate afterwards. A pool instance is
/// meant to be used by one logical execution context at a time.
pub struct ReplicaPool {
    id: PoolId,
    master: Arc<dyn DatabaseConnection>,
    read_connections: Vec<Arc<dyn DatabaseConnection>>,
    weighted: WeightedSet,
    availability: AvailabilityStack,
    use_master: AtomicBool,
    operations: OperationTable,
    suppression_ttl: Duration,
}

/// Restores the forced-master flag when a scope exits, panics included
struct RestoreUseMaster<'a> {
    flag: &'a AtomicBool,
    saved: bool,
}

impl Drop for RestoreUseMaster<'_> {
    fn drop(&mut self) {
        self.flag.store(self.saved, Ordering::SeqCst);
    }
}

impl ReplicaPool {
    /// Build a pool from a master handle and weighted replica handles
    ///
    /// Replica entries with weight 0 are dropped entirely. With no weighted
    /// replicas every read falls back to the master.
    pub fn new(
        master: Arc<dyn DatabaseConnection>,
        replicas: Vec<(Arc<dyn DatabaseConnection>, u32)>,
    ) -> Self {
        let entries: Vec<_> = replicas
            .into_iter()
            .filter(|(_, weight)| *weight > 0)
            .collect();
        let read_connections: Vec<_> = entries.iter().map(|(c, _)| c.clone()).collect();
        let weighted = WeightedSet::new(&entries);
        let availability = AvailabilityStack::new(weighted.connections().to_vec());

        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            master,
            read_connections,
            weighted,
            availability,
            use_master: AtomicBool::new(false),
            operations: OperationTable::with_defaults(),
            suppression_ttl: DEFAULT_SUPPRESSION_TTL,
        }
    }

    /// Replace the operation classification table
    pub fn with_operation_table(mut self, operations: OperationTable) -> Self {
        self.operations = operations;
        self
    }

    /// Override the suppression window for failing read connections
    pub fn with_suppression_ttl(mut self, ttl: Duration) -> Self {
        self.suppression_ttl = ttl;
        self
    }

    /// Unique identifier of this pool instance
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// The master connection
    pub fn master_connection(&self) -> Arc<dyn DatabaseConnection> {
        self.master.clone()
    }

    /// The distinct replica connections, in construction order
    pub fn read_connections(&self) -> &[Arc<dyn DatabaseConnection>] {
        &self.read_connections
    }

    /// Master plus every replica connection
    pub fn all_connections(&self) -> Vec<Arc<dyn DatabaseConnection>> {
        let mut connections = Vec::with_capacity(1 + self.read_connections.len());
        connections.push(self.master.clone());
        connections.extend(self.read_connections.iter().cloned());
        connections
    }

    /// Selection weight of a connection (0 for the master or unknown handles)
    pub fn pool_weight(&self, connection: &Arc<dyn DatabaseConnection>) -> usize {
        self.weighted.weight_of(connection)
    }

    /// Suppression window applied when a read connection dies
    pub fn suppression_ttl(&self) -> Duration {
        self.suppression_ttl
    }

    /// Whether this pool is currently forcing all reads to the master
    pub fn using_master_connection(&self) -> bool {
        self.use_master.load(Ordering::SeqCst)
    }

    /// Force the master connection for the extent of a closure
    ///
    /// Nests: the flag is restored to its previous value on exit, panics
    /// included.
    pub fn use_master_connection<R>(&self, f: impl FnOnce() -> R) -> R {
        let saved = self.use_master.swap(true, Ordering::SeqCst);
        let _restore = RestoreUseMaster {
            flag: &self.use_master,
            saved,
        };
        f()
    }

    /// Read connections currently eligible for selection
    pub fn available_read_connections(&self) -> Vec<Arc<dyn DatabaseConnection>> {
        self.availability.available()
    }

    /// Temporarily remove a read connection from rotation
    pub fn suppress_read_connection(&self, connection: &Arc<dyn DatabaseConnection>, ttl: Duration) {
        self.availability.suppress(connection, ttl);
    }

    /// Drop every suppression and best-effort reconnect dead replicas
    pub fn reset_available_read_connections(&self) {
        self.availability.reset();
    }

    /// Draw a weighted-random read connection
    ///
    /// Falls back to the master in forced-master mode or when no replica is
    /// available.
    pub fn random_read_connection(&self) -> Arc<dyn DatabaseConnection> {
        if self.using_master_connection() {
            return self.master.clone();
        }
        let available = self.availability.available();
        if available.is_empty() {
            return self.master.clone();
        }
        let index = rand::thread_rng().gen_range(0..available.len());
        available[index].clone()
    }

    /// Resolve the read connection for the ambient consistency mode
    pub fn current_read_connection(&self) -> Arc<dyn DatabaseConnection> {
        context::read_connection(self)
    }

    /// Dispatch a data operation according to its classification
    pub fn execute(&self, request: &Request) -> Result<Value, ConnectionError> {
        match self.operations.classify(&request.operation) {
            OperationKind::Write => self.use_master_connection(|| {
                self.proxy(self.master.clone(), request, ProxyKind::Write)
            }),
            OperationKind::Read => {
                let connection = if self.using_master_connection() {
                    self.master.clone()
                } else {
                    self.current_read_connection()
                };
                self.proxy(connection, request, ProxyKind::Read)
            }
            OperationKind::Lifecycle => self.execute_lifecycle(&request.operation),
        }
    }

    /// Whether every connection in the pool is active
    ///
    /// In forced-master mode only the master is checked, since reads cannot
    /// reach the replicas anyway.
    pub fn active(&self) -> bool {
        if self.using_master_connection() {
            return self.master.is_active();
        }
        self.all_connections().iter().all(|c| c.is_active())
    }

    /// Reconnect every connection in the pool
    pub fn reconnect(&self) -> Result<(), ConnectionError> {
        self.each_connection("reconnect", |c| c.reconnect())
    }

    /// Disconnect every connection in the pool
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        self.each_connection("disconnect", |c| c.disconnect())
    }

    /// Reset every connection in the pool
    pub fn reset(&self) -> Result<(), ConnectionError> {
        self.each_connection("reset", |c| c.reset())
    }

    /// Verify every connection in the pool
    pub fn verify(&self) -> Result<(), ConnectionError> {
        self.each_connection("verify", |c| c.verify())
    }

    /// Reset runtime statistics on every connection, summing the results
    pub fn reset_runtime_stats(&self) -> f64 {
        self.all_connections()
            .iter()
            .map(|c| c.reset_runtime_stats())
            .sum()
    }

    /// Fan a lifecycle call out to every connection
    ///
    /// A replica failure must not prevent the call reaching the remaining
    /// connections, so replica errors are logged and swallowed. A master
    /// failure propagates immediately.
    fn each_connection(
        &self,
        operation: &str,
        f: impl Fn(&Arc<dyn DatabaseConnection>) -> Result<(), ConnectionError>,
    ) -> Result<(), ConnectionError> {
        for connection in self.all_connections() {
            if let Err(error) = f(&connection) {
                if same_connection(&connection, &self.master) {
                    return Err(error);
                }
                warn!(
                    connection = connection.name(),
                    operation = operation,
                    error = %error,
                    "lifecycle call failed on replica, continuing"
                );
            }
        }
        Ok(())
    }

    fn execute_lifecycle(&self, operation: &str) -> Result<Value, ConnectionError> {
        match operation {
            "active" => Ok(Value::Bool(self.active())),
            "reconnect" => self.reconnect().map(|()| Value::Null),
            "disconnect" => self.disconnect().map(|()| Value::Null),
            "reset" => self.reset().map(|()| Value::Null),
            "verify" => self.verify().map(|()| Value::Null),
            "reset_runtime_stats" => Ok(Value::from(self.reset_runtime_stats())),
            other => Err(ConnectionError::UnsupportedOperation(other.to_string())),
        }
    }

    /// Invoke an operation on a connection with read failover
    ///
    /// A failed read outside forced-master mode gets one retry. If the
    /// connection turned out to be dead it is suppressed first and a fresh
    /// candidate is drawn (updating any persistent pin); otherwise the same
    /// connection is tried again. A failed retry propagates as-is.
    fn proxy(
        &self,
        connection: Arc<dyn DatabaseConnection>,
        request: &Request,
        kind: ProxyKind,
    ) -> Result<Value, ConnectionError> {
        match connection.execute(request) {
            Ok(value) => Ok(value),
            Err(error) => {
                if kind == ProxyKind::Read && !self.using_master_connection() {
                    let mut connection = connection;
                    if !connection.is_active() {
                        warn!(
                            connection = connection.name(),
                            operation = %request.operation,
                            error = %error,
                            "read connection is down, failing over"
                        );
                        self.availability
                            .suppress(&connection, self.suppression_ttl);
                        // Replace any stale pin before re-resolving, so a
                        // persistent scope fails over instead of drawing the
                        // dead pinned replica again
                        context::set_persistent_read_connection(
                            self,
                            self.random_read_connection(),
                        );
                        connection = self.current_read_connection();
                    } else {
                        debug!(
                            connection = connection.name(),
                            operation = %request.operation,
                            error = %error,
                            "read failed on a live connection, retrying once"
                        );
                    }
                    self.proxy(connection, request, ProxyKind::Retry)
                } else {
                    Err(error)
                }
            }
        }
    }
}
