//! PostgreSQL connection pool.
//!
//! Connections live in a [`DeferredStack`]: idle ones are reused most
//! recently returned first, new ones are opened lazily up to
//! `max_connections`, and callers beyond that wait in arrival order.

use std::sync::Arc;

use tracing::debug;

use super::config::PgConfig;
use super::connection::PgConnection;
use super::deferred::{DeferredStack, Factory, FactoryFuture};
use super::query::{QueryOptions, QueryResult, ResultShape};
use crate::error::{Error, PgResult};

// ============================================================================
// Pool Configuration
// ============================================================================

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PgPoolConfig {
    /// Settings for every connection the pool opens
    pub config: PgConfig,
    /// Connections opened up front
    pub min_connections: usize,
    /// Upper bound on open connections
    pub max_connections: usize,
}

impl PgPoolConfig {
    /// Create a new pool configuration.
    pub fn new(config: PgConfig) -> Self {
        Self {
            config,
            min_connections: 1,
            max_connections: 10,
        }
    }

    /// Pool configuration from a `postgres://` URL.
    pub fn from_url(url: &str) -> PgResult<Self> {
        Ok(Self::new(PgConfig::from_url(url)?))
    }

    /// Set the minimum number of connections.
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    fn validate(&self) -> PgResult<()> {
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".to_string()));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::Config(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Pooled Connection
// ============================================================================

/// A connection checked out from the pool.
///
/// When dropped, the connection is returned to the pool. A closed
/// connection is discarded instead, freeing its slot.
pub struct PooledConnection {
    /// The actual connection (None once returned to the pool)
    conn: Option<PgConnection>,
    /// Reference back to the pool
    pool: Arc<PgPoolInner>,
}

impl PooledConnection {
    fn conn(&self) -> PgResult<&PgConnection> {
        self.conn.as_ref().ok_or(Error::ConnectionClosed)
    }

    /// Run a query.
    pub async fn query(
        &self,
        options: impl Into<QueryOptions>,
        shape: ResultShape,
    ) -> PgResult<QueryResult> {
        self.conn()?.query(options, shape).await
    }

    /// Run a query, rows as positional values.
    pub async fn query_array(&self, options: impl Into<QueryOptions>) -> PgResult<QueryResult> {
        self.conn()?.query_array(options).await
    }

    /// Run a query, rows keyed by column name.
    pub async fn query_object(&self, options: impl Into<QueryOptions>) -> PgResult<QueryResult> {
        self.conn()?.query_object(options).await
    }

    /// Execute a simple query.
    pub async fn simple_query(&self, text: &str) -> PgResult<QueryResult> {
        self.conn()?.simple_query(text).await
    }

    /// The underlying connection.
    pub fn connection(&self) -> Option<&PgConnection> {
        self.conn.as_ref()
    }

    /// Check if the connection is healthy.
    pub fn is_healthy(&self) -> bool {
        self.conn.as_ref().map(|c| !c.is_closed()).unwrap_or(false)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let stack = &self.pool.stack;

        if conn.is_closed() {
            debug!("discarding closed pool connection");
            stack.discard();
        } else if stack.is_closed() {
            stack.discard();
            close_in_background(conn);
        } else {
            stack.push(conn);
        }
    }
}

/// Send Terminate from a spawned task when a runtime is available.
fn close_in_background(conn: PgConnection) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(close_connection(conn));
    }
}

async fn close_connection(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "closing pool connection failed");
    }
}

// ============================================================================
// Pool Inner
// ============================================================================

/// Internal pool state.
struct PgPoolInner {
    /// Pool configuration
    config: PgPoolConfig,
    stack: DeferredStack<PgConnection>,
}

// ============================================================================
// Connection Pool
// ============================================================================

/// A PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PgPoolInner>,
}

impl PgPool {
    /// Create a new connection pool, opening `min_connections` up front.
    pub async fn connect(config: PgPoolConfig) -> PgResult<Self> {
        config.validate()?;

        // Pre-create minimum connections
        let mut seeded = Vec::with_capacity(config.min_connections);
        for _ in 0..config.min_connections {
            match PgConnection::connect(config.config.clone()).await {
                Ok(conn) => seeded.push(conn),
                Err(e) => {
                    for conn in seeded {
                        close_connection(conn).await;
                    }
                    return Err(e);
                }
            }
        }

        let pg = config.config.clone();
        let factory: Factory<PgConnection> = Arc::new(move || -> FactoryFuture<PgConnection> {
            let pg = pg.clone();
            Box::pin(async move {
                let conn = PgConnection::connect(pg).await?;
                debug!("pool connection created");
                Ok(conn)
            })
        });

        let stack =
            DeferredStack::with_items_and_factory(config.max_connections, seeded, factory);
        debug!(
            min = config.min_connections,
            max = config.max_connections,
            "pool ready"
        );

        Ok(Self {
            inner: Arc::new(PgPoolInner { config, stack }),
        })
    }

    /// Get a connection from the pool.
    ///
    /// Waits when `max_connections` are already checked out.
    pub async fn acquire(&self) -> PgResult<PooledConnection> {
        let conn = self.inner.stack.pop().await?;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Run a query on a pooled connection, rows as positional values.
    pub async fn query_array(&self, options: impl Into<QueryOptions>) -> PgResult<QueryResult> {
        let conn = self.acquire().await?;
        conn.query_array(options).await
    }

    /// Run a query on a pooled connection, rows keyed by column name.
    pub async fn query_object(&self, options: impl Into<QueryOptions>) -> PgResult<QueryResult> {
        let conn = self.acquire().await?;
        conn.query_object(options).await
    }

    /// Close the pool and its idle connections.
    ///
    /// Later `acquire` calls fail. Connections still checked out are closed
    /// when they are returned.
    pub async fn close(&self) {
        let connections = self.inner.stack.close();
        debug!(idle = connections.len(), "closing pool");
        for conn in connections {
            close_connection(conn).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.stack.is_closed()
    }

    /// Get the current number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.stack.available()
    }

    /// Connections currently open, idle or checked out.
    pub fn size(&self) -> usize {
        self.inner.stack.created()
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PgPoolConfig {
        &self.inner.config
    }
}
