//! Message catalog: wire codes and field tags.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

/// Protocol version 3.0, sent in the StartupMessage.
pub const PROTOCOL_VERSION: i32 = 196608; // (3 << 16) | 0

/// Magic codes of the untyped frontend requests.
pub const SSL_REQUEST_CODE: i32 = 80877103;
pub const GSSENC_REQUEST_CODE: i32 = 80877104;
pub const CANCEL_REQUEST_CODE: i32 = 80877102;

/// Single-byte answer to an SSLRequest.
pub const SSL_ACCEPTED: u8 = b'S';
pub const SSL_REJECTED: u8 = b'N';

// ============================================================================
// Backend codes
// ============================================================================

/// Type byte of every server -> client message.
///
/// All authentication messages share `'R'`; their kind is the
/// [`AuthCode`] in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BackendCode {
    Authentication = b'R',
    BackendKeyData = b'K',
    BindComplete = b'2',
    CloseComplete = b'3',
    CommandComplete = b'C',
    CopyData = b'd',
    CopyDone = b'c',
    CopyInResponse = b'G',
    CopyOutResponse = b'H',
    CopyBothResponse = b'W',
    DataRow = b'D',
    EmptyQueryResponse = b'I',
    ErrorResponse = b'E',
    FunctionCallResponse = b'V',
    NegotiateProtocolVersion = b'v',
    NoData = b'n',
    NoticeResponse = b'N',
    NotificationResponse = b'A',
    ParameterDescription = b't',
    ParameterStatus = b'S',
    ParseComplete = b'1',
    PortalSuspended = b's',
    ReadyForQuery = b'Z',
    RowDescription = b'T',
}

impl BackendCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        use BackendCode::*;
        Some(match code {
            b'R' => Authentication,
            b'K' => BackendKeyData,
            b'2' => BindComplete,
            b'3' => CloseComplete,
            b'C' => CommandComplete,
            b'd' => CopyData,
            b'c' => CopyDone,
            b'G' => CopyInResponse,
            b'H' => CopyOutResponse,
            b'W' => CopyBothResponse,
            b'D' => DataRow,
            b'I' => EmptyQueryResponse,
            b'E' => ErrorResponse,
            b'V' => FunctionCallResponse,
            b'v' => NegotiateProtocolVersion,
            b'n' => NoData,
            b'N' => NoticeResponse,
            b'A' => NotificationResponse,
            b't' => ParameterDescription,
            b'S' => ParameterStatus,
            b'1' => ParseComplete,
            b's' => PortalSuspended,
            b'Z' => ReadyForQuery,
            b'T' => RowDescription,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        use BackendCode::*;
        match self {
            Authentication => "Authentication",
            BackendKeyData => "BackendKeyData",
            BindComplete => "BindComplete",
            CloseComplete => "CloseComplete",
            CommandComplete => "CommandComplete",
            CopyData => "CopyData",
            CopyDone => "CopyDone",
            CopyInResponse => "CopyInResponse",
            CopyOutResponse => "CopyOutResponse",
            CopyBothResponse => "CopyBothResponse",
            DataRow => "DataRow",
            EmptyQueryResponse => "EmptyQueryResponse",
            ErrorResponse => "ErrorResponse",
            FunctionCallResponse => "FunctionCallResponse",
            NegotiateProtocolVersion => "NegotiateProtocolVersion",
            NoData => "NoData",
            NoticeResponse => "NoticeResponse",
            NotificationResponse => "NotificationResponse",
            ParameterDescription => "ParameterDescription",
            ParameterStatus => "ParameterStatus",
            ParseComplete => "ParseComplete",
            PortalSuspended => "PortalSuspended",
            ReadyForQuery => "ReadyForQuery",
            RowDescription => "RowDescription",
        }
    }
}

// ============================================================================
// Frontend codes
// ============================================================================

/// Type byte of client -> server messages.
///
/// PasswordMessage, GSSResponse, SASLInitialResponse and SASLResponse all
/// travel as `'p'`; the server tells them apart by context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrontendCode {
    Bind = b'B',
    Close = b'C',
    CopyData = b'd',
    CopyDone = b'c',
    CopyFail = b'f',
    Describe = b'D',
    Execute = b'E',
    Flush = b'H',
    FunctionCall = b'F',
    PasswordMessage = b'p',
    Parse = b'P',
    Query = b'Q',
    Sync = b'S',
    Terminate = b'X',
}

impl FrontendCode {
    /// Alias codes sharing the password slot.
    pub const GSS_RESPONSE: u8 = b'p';
    pub const SASL_INITIAL_RESPONSE: u8 = b'p';
    pub const SASL_RESPONSE: u8 = b'p';

    pub fn from_u8(code: u8) -> Option<Self> {
        use FrontendCode::*;
        Some(match code {
            b'B' => Bind,
            b'C' => Close,
            b'd' => CopyData,
            b'c' => CopyDone,
            b'f' => CopyFail,
            b'D' => Describe,
            b'E' => Execute,
            b'H' => Flush,
            b'F' => FunctionCall,
            b'p' => PasswordMessage,
            b'P' => Parse,
            b'Q' => Query,
            b'S' => Sync,
            b'X' => Terminate,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// Authentication sub-codes
// ============================================================================

/// Int32 at the start of every Authentication message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AuthCode {
    Ok = 0,
    KerberosV5 = 2,
    CleartextPassword = 3,
    MD5Password = 5,
    SCMCredential = 6,
    GSS = 7,
    GSSContinue = 8,
    SSPI = 9,
    SASL = 10,
    SASLContinue = 11,
    SASLFinal = 12,
}

impl AuthCode {
    pub fn from_i32(code: i32) -> Option<Self> {
        use AuthCode::*;
        Some(match code {
            0 => Ok,
            2 => KerberosV5,
            3 => CleartextPassword,
            5 => MD5Password,
            6 => SCMCredential,
            7 => GSS,
            8 => GSSContinue,
            9 => SSPI,
            10 => SASL,
            11 => SASLContinue,
            12 => SASLFinal,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use AuthCode::*;
        match self {
            Ok => "AuthenticationOk",
            KerberosV5 => "AuthenticationKerberosV5",
            CleartextPassword => "AuthenticationCleartextPassword",
            MD5Password => "AuthenticationMD5Password",
            SCMCredential => "AuthenticationSCMCredential",
            GSS => "AuthenticationGSS",
            GSSContinue => "AuthenticationGSSContinue",
            SSPI => "AuthenticationSSPI",
            SASL => "AuthenticationSASL",
            SASLContinue => "AuthenticationSASLContinue",
            SASLFinal => "AuthenticationSASLFinal",
        }
    }
}

// ============================================================================
// Error / notice fields
// ============================================================================

/// Field tags of ErrorResponse and NoticeResponse bodies.
///
/// Reference: https://www.postgresql.org/docs/current/protocol-error-fields.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorField {
    Severity = b'S',
    /// Non-localized severity (9.6+).
    SeverityNonLocalized = b'V',
    Code = b'C',
    Message = b'M',
    Detail = b'D',
    Hint = b'H',
    Position = b'P',
    InternalPosition = b'p',
    InternalQuery = b'q',
    Where = b'W',
    Schema = b's',
    Table = b't',
    Column = b'c',
    DataType = b'd',
    Constraint = b'n',
    File = b'F',
    Line = b'L',
    Routine = b'R',
}

impl ErrorField {
    pub fn from_u8(tag: u8) -> Option<Self> {
        use ErrorField::*;
        Some(match tag {
            b'S' => Severity,
            b'V' => SeverityNonLocalized,
            b'C' => Code,
            b'M' => Message,
            b'D' => Detail,
            b'H' => Hint,
            b'P' => Position,
            b'p' => InternalPosition,
            b'q' => InternalQuery,
            b'W' => Where,
            b's' => Schema,
            b't' => Table,
            b'c' => Column,
            b'd' => DataType,
            b'n' => Constraint,
            b'F' => File,
            b'L' => Line,
            b'R' => Routine,
            _ => return None,
        })
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

// ============================================================================
// Transaction status
// ============================================================================

/// Transaction status indicators carried by ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    #[default]
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
}

impl TransactionStatus {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            b'I' => Some(TransactionStatus::Idle),
            b'T' => Some(TransactionStatus::InTransaction),
            b'E' => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_codes_roundtrip() {
        for code in 0u8..=255 {
            if let Some(kind) = BackendCode::from_u8(code) {
                assert_eq!(kind.as_u8(), code);
            }
        }
        assert_eq!(BackendCode::from_u8(b'Z'), Some(BackendCode::ReadyForQuery));
        assert_eq!(BackendCode::from_u8(b'?'), None);
    }

    #[test]
    fn test_auth_codes() {
        assert_eq!(AuthCode::from_i32(5), Some(AuthCode::MD5Password));
        assert_eq!(AuthCode::from_i32(12), Some(AuthCode::SASLFinal));
        assert_eq!(AuthCode::from_i32(1), None);
        assert_eq!(AuthCode::SASL as i32, 10);
    }

    #[test]
    fn test_error_field_tags() {
        assert_eq!(ErrorField::from_u8(b'C'), Some(ErrorField::Code));
        assert_eq!(ErrorField::from_u8(b'n'), Some(ErrorField::Constraint));
        assert_eq!(ErrorField::Routine.as_u8(), b'R');
    }

    #[test]
    fn test_transaction_status_bytes() {
        assert_eq!(TransactionStatus::from_u8(b'T'), Some(TransactionStatus::InTransaction));
        assert_eq!(TransactionStatus::from_u8(b'x'), None);
        assert_eq!(TransactionStatus::Failed.as_u8(), b'E');
    }
}
