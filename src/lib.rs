//! pq: a PostgreSQL client speaking the v3 wire protocol directly over a
//! tokio socket.
//!
//! ```no_run
//! # async fn run() -> pq::PgResult<()> {
//! use pq::{PgConfig, PgConnection, QueryOptions};
//!
//! let conn = PgConnection::connect(PgConfig::new("postgres").password("secret")).await?;
//! let result = conn
//!     .query_object(QueryOptions::new("SELECT $1::int AS n").arg(42))
//!     .await?;
//! println!("{:?}", result.rows);
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod pg;

pub use error::{Error, PgResult};
pub use pg::{
    CancelToken, ConnectionStatus, PgConfig, PgConnection, PgPool, PgPoolConfig, PgValue,
    PooledConnection, QueryOptions, QueryResult, ResultRows, ResultShape,
};
