//! Per-thread consistency mode for read routing
//!
//! Callers declare how strongly consistent their reads need to be:
//!
//! - [`ReadMode::Master`]: route every read to the master. Use after writes
//!   when the next read must see them.
//! - [`ReadMode::Persistent`]: pin one replica per pool for the duration of
//!   the scope, so consecutive reads see the same replica.
//! - [`ReadMode::Random`]: pick a fresh replica for every read. Only safe
//!   when replication is fast enough that any replica will do.
//!
//! The mode is thread-local state, never a process-wide global, so
//! concurrently running units of work cannot observe or clobber each
//! other's choice. Modes can be set as a one-shot default with
//! [`set_read_mode`] or installed for the extent of a closure with
//! [`with_read_mode`], which restores the previous state on exit even when
//! the closure panics. Scopes nest: an inner scope restores exactly the
//! outer scope's state, including any replica pins it had accumulated.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::DatabaseConnection;
use crate::pool::{PoolId, ReplicaPool};

/// Read consistency modes selectable per unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// All reads hit the master
    Master,

    /// One replica is pinned per pool for the rest of the scope
    Persistent,

    /// Every read draws a fresh weighted-random replica
    Random,
}

/// Internal mode state; `Persistent` carries the per-pool pinning map
enum ModeState {
    Master,
    Random,
    Persistent(HashMap<PoolId, Arc<dyn DatabaseConnection>>),
}

impl ModeState {
    fn fresh(mode: ReadMode) -> Self {
        match mode {
            ReadMode::Master => ModeState::Master,
            ReadMode::Random => ModeState::Random,
            ReadMode::Persistent => ModeState::Persistent(HashMap::new()),
        }
    }

    fn mode(&self) -> ReadMode {
        match self {
            ModeState::Master => ReadMode::Master,
            ModeState::Random => ReadMode::Random,
            ModeState::Persistent(_) => ReadMode::Persistent,
        }
    }
}

thread_local! {
    static READ_MODE: RefCell<Option<ModeState>> = RefCell::new(None);
}

/// Restores the saved mode state when the scope exits, panics included
struct RestoreOnExit {
    saved: Option<Option<ModeState>>,
}

impl Drop for RestoreOnExit {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            READ_MODE.with(|cell| *cell.borrow_mut() = saved);
        }
    }
}

/// The mode currently in effect on this thread (unset reports `Master`)
pub fn read_mode() -> ReadMode {
    READ_MODE.with(|cell| {
        cell.borrow()
            .as_ref()
            .map_or(ReadMode::Master, ModeState::mode)
    })
}

/// Set the ambient mode until it is explicitly changed again
pub fn set_read_mode(mode: ReadMode) {
    READ_MODE.with(|cell| *cell.borrow_mut() = Some(ModeState::fresh(mode)));
}

/// Clear the ambient mode back to the unset default
pub fn clear_read_mode() {
    READ_MODE.with(|cell| *cell.borrow_mut() = None);
}

/// Run a closure with the given mode, restoring the previous state on exit
pub fn with_read_mode<R>(mode: ReadMode, f: impl FnOnce() -> R) -> R {
    let saved = READ_MODE.with(|cell| cell.replace(Some(ModeState::fresh(mode))));
    let _restore = RestoreOnExit { saved: Some(saved) };
    f()
}

/// Run a closure with every read routed to the master
pub fn use_master_connection<R>(f: impl FnOnce() -> R) -> R {
    with_read_mode(ReadMode::Master, f)
}

/// Run a closure with one replica pinned per pool
pub fn use_persistent_read_connection<R>(f: impl FnOnce() -> R) -> R {
    with_read_mode(ReadMode::Persistent, f)
}

/// Run a closure with a fresh replica drawn per read
pub fn use_random_read_connection<R>(f: impl FnOnce() -> R) -> R {
    with_read_mode(ReadMode::Random, f)
}

/// Resolve the read connection for a pool under the current mode
///
/// A pool in forced-master mode always resolves to its master regardless of
/// the ambient mode. Under `Persistent` the pin for this pool is populated
/// lazily on first access and reused for the rest of the scope.
pub fn read_connection(pool: &ReplicaPool) -> Arc<dyn DatabaseConnection> {
    if pool.using_master_connection() {
        return pool.master_connection();
    }
    READ_MODE.with(|cell| {
        let mut state = cell.borrow_mut();
        match state.as_mut() {
            Some(ModeState::Persistent(pins)) => {
                if let Some(pinned) = pins.get(&pool.id()) {
                    return pinned.clone();
                }
                let chosen = pool.random_read_connection();
                pins.insert(pool.id(), chosen.clone());
                chosen
            }
            Some(ModeState::Random) => pool.random_read_connection(),
            _ => pool.master_connection(),
        }
    })
}

/// Replace the pinned connection for a pool after a mid-scope failover
///
/// No-op unless the current mode is `Persistent`.
pub fn set_persistent_read_connection(pool: &ReplicaPool, connection: Arc<dyn DatabaseConnection>) {
    READ_MODE.with(|cell| {
        if let Some(ModeState::Persistent(pins)) = cell.borrow_mut().as_mut() {
            pins.insert(pool.id(), connection);
        }
    });
}
