//! Error types for the pq driver.
//!
//! No native client library involved: every failure originates either in the
//! socket, in our own decoding, or in an ErrorResponse sent by the server.

use thiserror::Error;

use crate::pg::error::ServerError;

#[derive(Error, Debug)]
pub enum Error {
    /// Transport or handshake failure while establishing a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Credential or authentication method failure.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Malformed or unrecognized wire data. Fatal to the connection.
    #[error("Packet error: {0}")]
    Packet(String),

    /// ErrorResponse reported by the server while running a query.
    #[error("Query error: {0}")]
    Query(ServerError),

    #[error("Type conversion error: {0}")]
    Type(String),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    /// Whether the connection that produced this error can no longer be used.
    ///
    /// Framing can't be trusted after a packet or I/O failure, so the
    /// connection is closed and the caller must discard it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Packet(_) | Error::Io(_) | Error::ConnectionClosed
        )
    }

    /// The server-side error, if this is a query error.
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Error::Query(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn packet(msg: impl Into<String>) -> Self {
        Error::Packet(msg.into())
    }
}

pub type PgResult<T> = std::result::Result<T, Error>;
