//! dbpool - read/write-splitting database connection pool with replica failover

pub mod config;
pub mod connection;
pub mod context;
pub mod pool;

pub use connection::{
    ConnectionError, DatabaseConnection, OperationKind, OperationTable, Request,
};
pub use context::ReadMode;
pub use pool::ReplicaPool;
