//! PostgreSQL wire protocol implementation.
//!
//! Architecture:
//! - `buffer`: big-endian reader/writer over byte buffers
//! - `codes`: message codes, auth sub-codes, error field tags
//! - `protocol`: frontend/backend messages, encode and decode
//! - `types`, `array`, `datetime`, `geometry`: text value codec
//! - `connection`: connection state machine
//! - `deferred`: bounded async stack shared by the connection and the pool
//! - `query`: query requests and result accumulation
//! - `pool`: connection pool

pub mod array;
pub mod buffer;
pub mod codes;
pub mod config;
pub mod connection;
pub mod datetime;
pub mod deferred;
pub mod error;
pub mod geometry;
pub mod pool;
pub mod protocol;
pub mod query;
pub mod socket;
pub mod types;


// Public API re-exports for library consumers
pub use codes::TransactionStatus;
pub use config::PgConfig;
pub use connection::{CancelToken, ConnectionStatus, Notification, PgConnection, ServerInfo};
pub use deferred::DeferredStack;
pub use error::{ErrorKind, Notice, ServerError};
pub use pool::{PgPool, PgPoolConfig, PooledConnection};
pub use query::{CommandTag, QueryOptions, QueryResult, ResultRows, ResultShape};
pub use socket::{BoxSocket, Socket, TlsConnector};
pub use types::{Format, Oid, PgValue};
