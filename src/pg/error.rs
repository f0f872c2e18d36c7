//! Server-reported errors and SQLSTATE classification.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::codes::ErrorField;

/// Fields of an ErrorResponse or NoticeResponse.
///
/// Only severity, code and message are guaranteed to be sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub position: Option<String>,
    pub internal_position: Option<String>,
    pub internal_query: Option<String>,
    #[serde(rename = "where")]
    pub where_: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    pub file: Option<String>,
    pub line: Option<String>,
    pub routine: Option<String>,
}

/// A NoticeResponse carries the same fields as an error.
pub type Notice = ServerError;

impl ServerError {
    /// Build from the raw tag -> value map of an Error/NoticeResponse.
    pub fn from_fields(fields: &HashMap<u8, String>) -> Self {
        let get = |field: ErrorField| fields.get(&field.as_u8()).cloned();

        // 'V' is never localized, prefer it when present
        let severity = get(ErrorField::SeverityNonLocalized)
            .or_else(|| get(ErrorField::Severity))
            .unwrap_or_default();

        Self {
            severity,
            code: get(ErrorField::Code).unwrap_or_default(),
            message: get(ErrorField::Message).unwrap_or_default(),
            detail: get(ErrorField::Detail),
            hint: get(ErrorField::Hint),
            position: get(ErrorField::Position),
            internal_position: get(ErrorField::InternalPosition),
            internal_query: get(ErrorField::InternalQuery),
            where_: get(ErrorField::Where),
            schema: get(ErrorField::Schema),
            table: get(ErrorField::Table),
            column: get(ErrorField::Column),
            data_type: get(ErrorField::DataType),
            constraint: get(ErrorField::Constraint),
            file: get(ErrorField::File),
            line: get(ErrorField::Line),
            routine: get(ErrorField::Routine),
        }
    }

    /// Category selected by the SQLSTATE code.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_sqlstate(&self.code)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.code)?;
        if let Some(d) = &self.detail {
            write!(f, "\nDetail: {}", d)?;
        }
        if let Some(h) = &self.hint {
            write!(f, "\nHint: {}", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// SQLSTATE classification
// ============================================================================

/// DB-API style error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Database,
    Operational,
    NotSupported,
    Programming,
    Data,
    Integrity,
    Internal,
    TransactionRollback,
    QueryCanceled,
}

impl ErrorKind {
    /// Classify a five-character SQLSTATE by its two-character class.
    ///
    /// Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
    pub fn from_sqlstate(code: &str) -> Self {
        if code == "57014" {
            return ErrorKind::QueryCanceled;
        }

        let class = code.as_bytes();
        let (a, b) = match class {
            [a, b, ..] => (*a, *b),
            _ => return ErrorKind::Database,
        };

        match (a, b) {
            (b'0', b'8') => ErrorKind::Operational,
            (b'0', b'A') => ErrorKind::NotSupported,

            (b'2', b'0') | (b'2', b'1') => ErrorKind::Programming,
            (b'2', b'2') => ErrorKind::Data,
            (b'2', b'3') => ErrorKind::Integrity,
            (b'2', b'4') | (b'2', b'5') => ErrorKind::Internal,
            (b'2', b'6') | (b'2', b'7') | (b'2', b'8') => ErrorKind::Operational,
            (b'2', b'B') | (b'2', b'D') | (b'2', b'F') => ErrorKind::Internal,

            (b'3', b'4') => ErrorKind::Operational,
            (b'3', b'8') | (b'3', b'9') | (b'3', b'B') => ErrorKind::Internal,
            (b'3', b'D') | (b'3', b'F') => ErrorKind::Programming,

            (b'4', b'0') => ErrorKind::TransactionRollback,
            (b'4', b'2') | (b'4', b'4') => ErrorKind::Programming,

            // 53 insufficient resources .. 58 system error
            (b'5', _) => ErrorKind::Operational,

            (b'F', b'0') => ErrorKind::Internal,
            (b'H', b'V') => ErrorKind::Operational,
            (b'P', b'0') => ErrorKind::Internal,
            (b'X', b'X') => ErrorKind::Internal,

            _ => ErrorKind::Database,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Database => "DatabaseError",
            ErrorKind::Operational => "OperationalError",
            ErrorKind::NotSupported => "NotSupportedError",
            ErrorKind::Programming => "ProgrammingError",
            ErrorKind::Data => "DataError",
            ErrorKind::Integrity => "IntegrityError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::TransactionRollback => "TransactionRollbackError",
            ErrorKind::QueryCanceled => "QueryCanceledError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
