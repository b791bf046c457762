//! Time-boxed suppression of failing read connections
//!
//! A LIFO stack of availability snapshots acts as the pool's circuit
//! breaker. The base snapshot holds the full weighted read list and never
//! expires; each snapshot above it excludes exactly one failing connection
//! until its re-enable deadline. Expiry is checked lazily whenever the
//! available list is requested, so no background timer is needed: the cost
//! of probing a suppressed connection is paid by the next read that asks
//! for candidates.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{same_connection, DatabaseConnection};

/// One immutable view of the usable read connections
struct AvailableSnapshot {
    /// Weighted connection list usable for selection
    connections: Vec<Arc<dyn DatabaseConnection>>,

    /// The connection this snapshot excludes (none for the base snapshot)
    excluded: Option<Arc<dyn DatabaseConnection>>,

    /// When the excluded connection becomes eligible for re-admission
    reenable_at: Option<Instant>,

    /// Original suppression window, reused when a probe fails
    ttl: Duration,
}

impl AvailableSnapshot {
    fn base(connections: Vec<Arc<dyn DatabaseConnection>>) -> Self {
        Self {
            connections,
            excluded: None,
            reenable_at: None,
            ttl: Duration::ZERO,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.reenable_at.is_some_and(|at| at <= now)
    }
}

/// Stack of availability snapshots implementing the circuit breaker
pub struct AvailabilityStack {
    snapshots: Mutex<Vec<AvailableSnapshot>>,
}

impl AvailabilityStack {
    /// Create a stack whose base snapshot holds the full weighted read list
    pub fn new(connections: Vec<Arc<dyn DatabaseConnection>>) -> Self {
        Self {
            snapshots: Mutex::new(vec![AvailableSnapshot::base(connections)]),
        }
    }

    /// Connections currently eligible for selection
    ///
    /// Checks the top snapshot for expiry first. When a suppression window
    /// has passed, the excluded connection is probed with a reconnect: on
    /// success the snapshot is popped (cascading through any further
    /// expired snapshots beneath it), on failure the deadline is pushed out
    /// by the original window and the reduced list is returned unchanged.
    pub fn available(&self) -> Vec<Arc<dyn DatabaseConnection>> {
        let mut snapshots = self.snapshots.lock();
        Self::collect_available(&mut snapshots)
    }

    /// Temporarily remove a connection from the read pool
    ///
    /// No-op when the connection is not currently available (it is the
    /// master, or already suppressed). Suppressing the last available
    /// connection resets the whole stack instead, since an empty read pool
    /// would be useless.
    pub fn suppress(&self, connection: &Arc<dyn DatabaseConnection>, ttl: Duration) {
        let mut snapshots = self.snapshots.lock();
        let current = Self::collect_available(&mut snapshots);
        let remaining: Vec<_> = current
            .iter()
            .filter(|c| !same_connection(c, connection))
            .cloned()
            .collect();

        // This wasn't a read candidate so don't suppress it
        if remaining.len() == current.len() {
            return;
        }

        if remaining.is_empty() {
            // No candidates left so we might as well try them all again
            warn!(
                connection = connection.name(),
                "suppressing the last available read connection, resetting the read pool"
            );
            Self::reset_snapshots(&mut snapshots);
        } else {
            warn!(
                connection = connection.name(),
                ttl_secs = ttl.as_secs_f64(),
                remaining = remaining.len(),
                "removing read connection from rotation"
            );
            snapshots.push(AvailableSnapshot {
                connections: remaining,
                excluded: Some(connection.clone()),
                reenable_at: Some(Instant::now() + ttl),
                ttl,
            });
        }
    }

    /// Discard every suppression and best-effort reconnect dead connections
    ///
    /// A connection that still cannot be reconnected stays in the base list
    /// and will fail again on first use.
    pub fn reset(&self) {
        let mut snapshots = self.snapshots.lock();
        Self::reset_snapshots(&mut snapshots);
    }

    /// Number of snapshots on the stack (1 = nothing suppressed)
    pub fn depth(&self) -> usize {
        self.snapshots.lock().len()
    }

    fn collect_available(
        snapshots: &mut Vec<AvailableSnapshot>,
    ) -> Vec<Arc<dyn DatabaseConnection>> {
        while let Some(top) = snapshots.last_mut() {
            let now = Instant::now();
            if !top.expired(now) {
                return top.connections.clone();
            }

            let readmitted = match &top.excluded {
                Some(excluded) => match excluded.reconnect() {
                    Ok(()) if excluded.is_active() => {
                        info!(
                            connection = excluded.name(),
                            "read connection reconnected, returning it to rotation"
                        );
                        true
                    }
                    Ok(()) => {
                        debug!(
                            connection = excluded.name(),
                            "reconnect succeeded but connection is still not active"
                        );
                        false
                    }
                    Err(error) => {
                        debug!(
                            connection = excluded.name(),
                            error = %error,
                            "reconnect probe failed"
                        );
                        false
                    }
                },
                None => false,
            };

            if readmitted {
                // The snapshot beneath already contains the healthy
                // connection; it may itself be expired, so keep going.
                snapshots.pop();
            } else {
                // Couldn't reconnect so try again in a little bit. The
                // connection was already removed when the snapshot was
                // pushed, nothing else to take out.
                top.reenable_at = Some(now + top.ttl);
                return top.connections.clone();
            }
        }
        Vec::new()
    }

    fn reset_snapshots(snapshots: &mut Vec<AvailableSnapshot>) {
        snapshots.truncate(1);
        if let Some(base) = snapshots.first() {
            for connection in &base.connections {
                if !connection.is_active() {
                    if let Err(error) = connection.reconnect() {
                        debug!(
                            connection = connection.name(),
                            error = %error,
                            "best-effort reconnect failed during reset"
                        );
                    }
                }
            }
        }
    }
}
