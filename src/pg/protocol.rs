//! PostgreSQL wire protocol message encoding and decoding.
//!
//! This module implements the PostgreSQL v3 protocol messages as two tagged
//! unions, one per direction. Both directions can be encoded and decoded: the
//! client only ever encodes [`FrontendMessage`] and decodes
//! [`BackendMessage`], the other halves exist for tests and tooling that play
//! the server.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use std::collections::HashMap;

use bytes::Bytes;

use super::buffer::{BufferReader, BufferWriter};
use super::codes::{
    AuthCode, BackendCode, FrontendCode, TransactionStatus, CANCEL_REQUEST_CODE,
    GSSENC_REQUEST_CODE, PROTOCOL_VERSION, SSL_REQUEST_CODE,
};
use super::types::{EncodedParam, Format, Oid};
use crate::error::{Error, PgResult};

/// Type byte plus length.
pub const HEADER_LEN: usize = 5;

/// Split a message header into its type byte and body length.
pub fn parse_header(header: [u8; HEADER_LEN]) -> PgResult<(u8, usize)> {
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if len < 4 {
        return Err(Error::packet(format!(
            "Invalid length {} for message '{}'",
            len, header[0] as char
        )));
    }
    Ok((header[0], len as usize - 4))
}

/// Build a message: optional type byte, length placeholder, body, then
/// back-patch the length (which counts itself but not the type byte).
fn framed(code: Option<u8>, body: impl FnOnce(&mut BufferWriter)) -> Bytes {
    let mut w = BufferWriter::new();
    if let Some(code) = code {
        w.write_u8(code);
    }
    let at = w.len();
    w.write_i32(0);
    body(&mut w);
    let len = (w.len() - at) as i32;
    w.patch_i32(at, len);
    w.freeze()
}

/// Every decoder must consume the body exactly.
fn finish<T>(reader: &BufferReader, name: &str, msg: T) -> PgResult<T> {
    if !reader.is_empty() {
        return Err(Error::packet(format!(
            "{}: {} unread bytes after decoding",
            name,
            reader.remaining()
        )));
    }
    Ok(msg)
}

/// Target of Describe and Close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl Target {
    pub fn as_u8(self) -> u8 {
        match self {
            Target::Statement => b'S',
            Target::Portal => b'P',
        }
    }

    pub fn from_u8(b: u8) -> PgResult<Self> {
        match b {
            b'S' => Ok(Target::Statement),
            b'P' => Ok(Target::Portal),
            other => Err(Error::packet(format!(
                "Invalid describe/close target '{}'",
                other as char
            ))),
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Untyped. `params` are the `key\0value\0` pairs in order.
    Startup { params: Vec<(String, String)> },
    /// Untyped, 8 bytes.
    SslRequest,
    /// Untyped, 8 bytes.
    GssEncRequest,
    /// Untyped, 16 bytes.
    CancelRequest { process_id: i32, secret_key: i32 },
    Password(String),
    Query(String),
    Parse {
        name: String,
        query: String,
        param_types: Vec<Oid>,
    },
    Bind {
        portal: String,
        statement: String,
        params: Vec<EncodedParam>,
        result_formats: Vec<Format>,
    },
    Describe { target: Target, name: String },
    Execute { portal: String, max_rows: i32 },
    Close { target: Target, name: String },
    Sync,
    Flush,
    Terminate,
    CopyData(Bytes),
    CopyDone,
    CopyFail(String),
}

impl FrontendMessage {
    pub fn name(&self) -> &'static str {
        use FrontendMessage::*;
        match self {
            Startup { .. } => "StartupMessage",
            SslRequest => "SSLRequest",
            GssEncRequest => "GSSENCRequest",
            CancelRequest { .. } => "CancelRequest",
            Password(_) => "PasswordMessage",
            Query(_) => "Query",
            Parse { .. } => "Parse",
            Bind { .. } => "Bind",
            Describe { .. } => "Describe",
            Execute { .. } => "Execute",
            Close { .. } => "Close",
            Sync => "Sync",
            Flush => "Flush",
            Terminate => "Terminate",
            CopyData(_) => "CopyData",
            CopyDone => "CopyDone",
            CopyFail(_) => "CopyFail",
        }
    }

    /// Serialize the complete message, header included.
    pub fn encode(&self) -> Bytes {
        use FrontendMessage::*;
        match self {
            Startup { params } => framed(None, |w| {
                w.write_i32(PROTOCOL_VERSION);
                for (key, value) in params {
                    w.write_cstring(key).write_cstring(value);
                }
                w.write_u8(0);
            }),
            SslRequest => framed(None, |w| {
                w.write_i32(SSL_REQUEST_CODE);
            }),
            GssEncRequest => framed(None, |w| {
                w.write_i32(GSSENC_REQUEST_CODE);
            }),
            CancelRequest {
                process_id,
                secret_key,
            } => framed(None, |w| {
                w.write_i32(CANCEL_REQUEST_CODE)
                    .write_i32(*process_id)
                    .write_i32(*secret_key);
            }),
            Password(password) => framed(Some(FrontendCode::PasswordMessage.as_u8()), |w| {
                w.write_cstring(password);
            }),
            Query(query) => framed(Some(FrontendCode::Query.as_u8()), |w| {
                w.write_cstring(query);
            }),
            Parse {
                name,
                query,
                param_types,
            } => framed(Some(FrontendCode::Parse.as_u8()), |w| {
                w.write_cstring(name)
                    .write_cstring(query)
                    .write_i16(param_types.len() as i16);
                for oid in param_types {
                    w.write_i32(oid.as_i32());
                }
            }),
            Bind {
                portal,
                statement,
                params,
                result_formats,
            } => framed(Some(FrontendCode::Bind.as_u8()), |w| {
                w.write_cstring(portal).write_cstring(statement);

                // One format code per parameter
                w.write_i16(params.len() as i16);
                for param in params {
                    w.write_i16(param.format().as_i16());
                }

                w.write_i16(params.len() as i16);
                for param in params {
                    match param {
                        EncodedParam::Null => {
                            w.write_i32(-1);
                        }
                        EncodedParam::Text(text) => {
                            w.write_i32(text.len() as i32).write_string(text);
                        }
                        EncodedParam::Binary(raw) => {
                            w.write_i32(raw.len() as i32).write(raw);
                        }
                    }
                }

                w.write_i16(result_formats.len() as i16);
                for fmt in result_formats {
                    w.write_i16(fmt.as_i16());
                }
            }),
            Describe { target, name } => framed(Some(FrontendCode::Describe.as_u8()), |w| {
                w.write_u8(target.as_u8()).write_cstring(name);
            }),
            Execute { portal, max_rows } => framed(Some(FrontendCode::Execute.as_u8()), |w| {
                w.write_cstring(portal).write_i32(*max_rows);
            }),
            Close { target, name } => framed(Some(FrontendCode::Close.as_u8()), |w| {
                w.write_u8(target.as_u8()).write_cstring(name);
            }),
            Sync => framed(Some(FrontendCode::Sync.as_u8()), |_| {}),
            Flush => framed(Some(FrontendCode::Flush.as_u8()), |_| {}),
            Terminate => framed(Some(FrontendCode::Terminate.as_u8()), |_| {}),
            CopyData(data) => framed(Some(FrontendCode::CopyData.as_u8()), |w| {
                w.write(data);
            }),
            CopyDone => framed(Some(FrontendCode::CopyDone.as_u8()), |_| {}),
            CopyFail(message) => framed(Some(FrontendCode::CopyFail.as_u8()), |w| {
                w.write_cstring(message);
            }),
        }
    }

    /// Decode the first message of a session, which carries no type byte.
    /// `body` is everything after the length field.
    pub fn decode_untyped(body: Bytes) -> PgResult<Self> {
        let mut r = BufferReader::new(body);
        let code = r.read_i32()?;
        let msg = match code {
            PROTOCOL_VERSION => {
                let mut params = Vec::new();
                loop {
                    let key = r.read_cstring()?;
                    if key.is_empty() {
                        break;
                    }
                    let value = r.read_cstring()?;
                    params.push((key, value));
                }
                FrontendMessage::Startup { params }
            }
            SSL_REQUEST_CODE => FrontendMessage::SslRequest,
            GSSENC_REQUEST_CODE => FrontendMessage::GssEncRequest,
            CANCEL_REQUEST_CODE => FrontendMessage::CancelRequest {
                process_id: r.read_i32()?,
                secret_key: r.read_i32()?,
            },
            other => {
                return Err(Error::packet(format!(
                    "Unknown startup request code {}",
                    other
                )))
            }
        };
        finish(&r, msg.name(), msg)
    }

    /// Decode a typed message body.
    pub fn decode(code: u8, body: Bytes) -> PgResult<Self> {
        let kind = FrontendCode::from_u8(code).ok_or_else(|| {
            Error::packet(format!("Unknown frontend message type '{}'", code as char))
        })?;
        let mut r = BufferReader::new(body);

        let msg = match kind {
            FrontendCode::PasswordMessage => FrontendMessage::Password(r.read_cstring()?),
            FrontendCode::Query => FrontendMessage::Query(r.read_cstring()?),
            FrontendCode::Parse => {
                let name = r.read_cstring()?;
                let query = r.read_cstring()?;
                let n = r.read_i16()?.max(0) as usize;
                let mut param_types = Vec::with_capacity(n);
                for _ in 0..n {
                    param_types.push(Oid::from_i32(r.read_i32()?));
                }
                FrontendMessage::Parse {
                    name,
                    query,
                    param_types,
                }
            }
            FrontendCode::Bind => decode_bind(&mut r)?,
            FrontendCode::Describe => FrontendMessage::Describe {
                target: Target::from_u8(r.read_u8()?)?,
                name: r.read_cstring()?,
            },
            FrontendCode::Execute => FrontendMessage::Execute {
                portal: r.read_cstring()?,
                max_rows: r.read_i32()?,
            },
            FrontendCode::Close => FrontendMessage::Close {
                target: Target::from_u8(r.read_u8()?)?,
                name: r.read_cstring()?,
            },
            FrontendCode::Sync => FrontendMessage::Sync,
            FrontendCode::Flush => FrontendMessage::Flush,
            FrontendCode::Terminate => FrontendMessage::Terminate,
            FrontendCode::CopyData => FrontendMessage::CopyData(r.read_rest()),
            FrontendCode::CopyDone => FrontendMessage::CopyDone,
            FrontendCode::CopyFail => FrontendMessage::CopyFail(r.read_cstring()?),
            FrontendCode::FunctionCall => {
                return Err(Error::packet("FunctionCall is not supported"));
            }
        };
        finish(&r, msg.name(), msg)
    }
}

fn decode_bind(r: &mut BufferReader) -> PgResult<FrontendMessage> {
    let portal = r.read_cstring()?;
    let statement = r.read_cstring()?;

    let n_formats = r.read_i16()?.max(0) as usize;
    let mut formats = Vec::with_capacity(n_formats);
    for _ in 0..n_formats {
        formats.push(Format::from_i16(r.read_i16()?)?);
    }

    let n_params = r.read_i16()?.max(0) as usize;
    let mut params = Vec::with_capacity(n_params);
    for i in 0..n_params {
        // zero codes: all text; one code: applies to all; else one per param
        let format = match formats.len() {
            0 => Format::Text,
            1 => formats[0],
            _ => formats.get(i).copied().unwrap_or_default(),
        };
        let len = r.read_i32()?;
        let param = if len < 0 {
            EncodedParam::Null
        } else if format == Format::Binary {
            EncodedParam::Binary(r.read(len as usize)?)
        } else {
            EncodedParam::Text(r.read_string(len as usize)?)
        };
        params.push(param);
    }

    let n_results = r.read_i16()?.max(0) as usize;
    let mut result_formats = Vec::with_capacity(n_results);
    for _ in 0..n_results {
        result_formats.push(Format::from_i16(r.read_i16()?)?);
    }

    Ok(FrontendMessage::Bind {
        portal,
        statement,
        params,
        result_formats,
    })
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: Oid,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// Body of CopyInResponse / CopyOutResponse / CopyBothResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResponse {
    /// Overall format: 0 textual, 1 binary.
    pub format: Format,
    pub column_formats: Vec<Format>,
}

/// Backend message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    // Authentication
    AuthenticationOk,
    AuthenticationKerberosV5,
    AuthenticationCleartextPassword,
    AuthenticationMD5Password { salt: [u8; 4] },
    AuthenticationSCMCredential,
    AuthenticationGSS,
    AuthenticationGSSContinue { data: Bytes },
    AuthenticationSSPI,
    AuthenticationSASL { mechanisms: Vec<String> },
    AuthenticationSASLContinue { data: Bytes },
    AuthenticationSASLFinal { data: Bytes },

    // Query responses
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Extended query protocol
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription { type_oids: Vec<Oid> },

    // COPY
    CopyInResponse(CopyResponse),
    CopyOutResponse(CopyResponse),
    CopyBothResponse(CopyResponse),
    CopyData { data: Bytes },
    CopyDone,

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    NegotiateProtocolVersion { minor_version: i32, options: Vec<String> },

    // Errors and notices
    ErrorResponse { fields: HashMap<u8, String> },
    NoticeResponse { fields: HashMap<u8, String> },

    // Other
    NotificationResponse {
        process_id: i32,
        channel: String,
        payload: String,
    },
    FunctionCallResponse { value: Option<Bytes> },
}

impl BackendMessage {
    pub fn code(&self) -> BackendCode {
        use BackendMessage::*;
        match self {
            AuthenticationOk
            | AuthenticationKerberosV5
            | AuthenticationCleartextPassword
            | AuthenticationMD5Password { .. }
            | AuthenticationSCMCredential
            | AuthenticationGSS
            | AuthenticationGSSContinue { .. }
            | AuthenticationSSPI
            | AuthenticationSASL { .. }
            | AuthenticationSASLContinue { .. }
            | AuthenticationSASLFinal { .. } => BackendCode::Authentication,
            RowDescription { .. } => BackendCode::RowDescription,
            DataRow { .. } => BackendCode::DataRow,
            CommandComplete { .. } => BackendCode::CommandComplete,
            EmptyQueryResponse => BackendCode::EmptyQueryResponse,
            ParseComplete => BackendCode::ParseComplete,
            BindComplete => BackendCode::BindComplete,
            CloseComplete => BackendCode::CloseComplete,
            NoData => BackendCode::NoData,
            PortalSuspended => BackendCode::PortalSuspended,
            ParameterDescription { .. } => BackendCode::ParameterDescription,
            CopyInResponse(_) => BackendCode::CopyInResponse,
            CopyOutResponse(_) => BackendCode::CopyOutResponse,
            CopyBothResponse(_) => BackendCode::CopyBothResponse,
            CopyData { .. } => BackendCode::CopyData,
            CopyDone => BackendCode::CopyDone,
            ReadyForQuery { .. } => BackendCode::ReadyForQuery,
            ParameterStatus { .. } => BackendCode::ParameterStatus,
            BackendKeyData { .. } => BackendCode::BackendKeyData,
            NegotiateProtocolVersion { .. } => BackendCode::NegotiateProtocolVersion,
            ErrorResponse { .. } => BackendCode::ErrorResponse,
            NoticeResponse { .. } => BackendCode::NoticeResponse,
            NotificationResponse { .. } => BackendCode::NotificationResponse,
            FunctionCallResponse { .. } => BackendCode::FunctionCallResponse,
        }
    }

    fn auth_code(&self) -> Option<AuthCode> {
        use BackendMessage::*;
        Some(match self {
            AuthenticationOk => AuthCode::Ok,
            AuthenticationKerberosV5 => AuthCode::KerberosV5,
            AuthenticationCleartextPassword => AuthCode::CleartextPassword,
            AuthenticationMD5Password { .. } => AuthCode::MD5Password,
            AuthenticationSCMCredential => AuthCode::SCMCredential,
            AuthenticationGSS => AuthCode::GSS,
            AuthenticationGSSContinue { .. } => AuthCode::GSSContinue,
            AuthenticationSSPI => AuthCode::SSPI,
            AuthenticationSASL { .. } => AuthCode::SASL,
            AuthenticationSASLContinue { .. } => AuthCode::SASLContinue,
            AuthenticationSASLFinal { .. } => AuthCode::SASLFinal,
            _ => return None,
        })
    }

    /// Human-readable message name, with the auth sub-kind resolved.
    pub fn name(&self) -> &'static str {
        match self.auth_code() {
            Some(auth) => auth.name(),
            None => self.code().name(),
        }
    }

    /// Decode a backend message body. The type byte and length have already
    /// been read off the wire (see [`parse_header`]).
    pub fn decode(code: u8, body: Bytes) -> PgResult<Self> {
        let kind = BackendCode::from_u8(code).ok_or_else(|| {
            Error::packet(format!("Unknown message type: '{}'", code as char))
        })?;
        let mut r = BufferReader::new(body);

        let msg = match kind {
            BackendCode::Authentication => decode_auth(&mut r)?,
            BackendCode::RowDescription => decode_row_description(&mut r)?,
            BackendCode::DataRow => {
                let n = r.read_i16()?.max(0) as usize;
                let mut values = Vec::with_capacity(n);
                for _ in 0..n {
                    let len = r.read_i32()?;
                    if len < 0 {
                        values.push(None);
                    } else {
                        values.push(Some(r.read(len as usize)?));
                    }
                }
                BackendMessage::DataRow { values }
            }
            BackendCode::CommandComplete => BackendMessage::CommandComplete {
                tag: r.read_cstring()?,
            },
            BackendCode::EmptyQueryResponse => BackendMessage::EmptyQueryResponse,
            BackendCode::ParseComplete => BackendMessage::ParseComplete,
            BackendCode::BindComplete => BackendMessage::BindComplete,
            BackendCode::CloseComplete => BackendMessage::CloseComplete,
            BackendCode::NoData => BackendMessage::NoData,
            BackendCode::PortalSuspended => BackendMessage::PortalSuspended,
            BackendCode::ParameterDescription => {
                let n = r.read_i16()?.max(0) as usize;
                let mut type_oids = Vec::with_capacity(n);
                for _ in 0..n {
                    type_oids.push(Oid::from_i32(r.read_i32()?));
                }
                BackendMessage::ParameterDescription { type_oids }
            }
            BackendCode::CopyInResponse => BackendMessage::CopyInResponse(decode_copy(&mut r)?),
            BackendCode::CopyOutResponse => {
                BackendMessage::CopyOutResponse(decode_copy(&mut r)?)
            }
            BackendCode::CopyBothResponse => {
                BackendMessage::CopyBothResponse(decode_copy(&mut r)?)
            }
            BackendCode::CopyData => BackendMessage::CopyData {
                data: r.read_rest(),
            },
            BackendCode::CopyDone => BackendMessage::CopyDone,
            BackendCode::ReadyForQuery => {
                let b = r.read_u8()?;
                let status = TransactionStatus::from_u8(b).ok_or_else(|| {
                    Error::packet(format!("Invalid transaction status '{}'", b as char))
                })?;
                BackendMessage::ReadyForQuery { status }
            }
            BackendCode::ParameterStatus => BackendMessage::ParameterStatus {
                name: r.read_cstring()?,
                value: r.read_cstring()?,
            },
            BackendCode::BackendKeyData => BackendMessage::BackendKeyData {
                process_id: r.read_i32()?,
                secret_key: r.read_i32()?,
            },
            BackendCode::NegotiateProtocolVersion => {
                let minor_version = r.read_i32()?;
                let n = r.read_i32()?.max(0) as usize;
                let mut options = Vec::with_capacity(n);
                for _ in 0..n {
                    options.push(r.read_cstring()?);
                }
                BackendMessage::NegotiateProtocolVersion {
                    minor_version,
                    options,
                }
            }
            BackendCode::ErrorResponse => BackendMessage::ErrorResponse {
                fields: read_error_fields(&mut r)?,
            },
            BackendCode::NoticeResponse => BackendMessage::NoticeResponse {
                fields: read_error_fields(&mut r)?,
            },
            BackendCode::NotificationResponse => BackendMessage::NotificationResponse {
                process_id: r.read_i32()?,
                channel: r.read_cstring()?,
                payload: r.read_cstring()?,
            },
            BackendCode::FunctionCallResponse => {
                let len = r.read_i32()?;
                let value = if len < 0 {
                    None
                } else {
                    Some(r.read(len as usize)?)
                };
                BackendMessage::FunctionCallResponse { value }
            }
        };
        finish(&r, msg.name(), msg)
    }

    /// Serialize the complete message, header included.
    pub fn encode(&self) -> Bytes {
        use BackendMessage::*;
        let code = Some(self.code().as_u8());
        if let Some(auth) = self.auth_code() {
            return framed(code, |w| {
                w.write_i32(auth as i32);
                match self {
                    AuthenticationMD5Password { salt } => {
                        w.write(salt);
                    }
                    AuthenticationSASL { mechanisms } => {
                        for m in mechanisms {
                            w.write_cstring(m);
                        }
                        w.write_u8(0);
                    }
                    AuthenticationGSSContinue { data }
                    | AuthenticationSASLContinue { data }
                    | AuthenticationSASLFinal { data } => {
                        w.write(data);
                    }
                    _ => {}
                }
            });
        }

        framed(code, |w| match self {
            RowDescription { fields } => {
                w.write_i16(fields.len() as i16);
                for f in fields {
                    w.write_cstring(&f.name)
                        .write_i32(f.table_oid)
                        .write_i16(f.column_attr)
                        .write_i32(f.type_oid.as_i32())
                        .write_i16(f.type_size)
                        .write_i32(f.type_modifier)
                        .write_i16(f.format.as_i16());
                }
            }
            DataRow { values } => {
                w.write_i16(values.len() as i16);
                for v in values {
                    match v {
                        Some(data) => {
                            w.write_i32(data.len() as i32).write(data);
                        }
                        None => {
                            w.write_i32(-1);
                        }
                    }
                }
            }
            CommandComplete { tag } => {
                w.write_cstring(tag);
            }
            ParameterDescription { type_oids } => {
                w.write_i16(type_oids.len() as i16);
                for oid in type_oids {
                    w.write_i32(oid.as_i32());
                }
            }
            CopyInResponse(c) | CopyOutResponse(c) | CopyBothResponse(c) => {
                w.write_i8(c.format.as_i16() as i8)
                    .write_i16(c.column_formats.len() as i16);
                for f in &c.column_formats {
                    w.write_i16(f.as_i16());
                }
            }
            CopyData { data } => {
                w.write(data);
            }
            ReadyForQuery { status } => {
                w.write_u8(status.as_u8());
            }
            ParameterStatus { name, value } => {
                w.write_cstring(name).write_cstring(value);
            }
            BackendKeyData {
                process_id,
                secret_key,
            } => {
                w.write_i32(*process_id).write_i32(*secret_key);
            }
            NegotiateProtocolVersion {
                minor_version,
                options,
            } => {
                w.write_i32(*minor_version).write_i32(options.len() as i32);
                for o in options {
                    w.write_cstring(o);
                }
            }
            ErrorResponse { fields } | NoticeResponse { fields } => {
                let mut tags: Vec<_> = fields.iter().collect();
                tags.sort_by_key(|(tag, _)| **tag);
                for (tag, value) in tags {
                    w.write_u8(*tag).write_cstring(value);
                }
                w.write_u8(0);
            }
            NotificationResponse {
                process_id,
                channel,
                payload,
            } => {
                w.write_i32(*process_id)
                    .write_cstring(channel)
                    .write_cstring(payload);
            }
            FunctionCallResponse { value } => match value {
                Some(data) => {
                    w.write_i32(data.len() as i32).write(data);
                }
                None => {
                    w.write_i32(-1);
                }
            },
            _ => {}
        })
    }
}

fn decode_auth(r: &mut BufferReader) -> PgResult<BackendMessage> {
    let sub = r.read_i32()?;
    let auth = AuthCode::from_i32(sub)
        .ok_or_else(|| Error::packet(format!("Unknown authentication type: {}", sub)))?;

    Ok(match auth {
        AuthCode::Ok => BackendMessage::AuthenticationOk,
        AuthCode::KerberosV5 => BackendMessage::AuthenticationKerberosV5,
        AuthCode::CleartextPassword => BackendMessage::AuthenticationCleartextPassword,
        AuthCode::MD5Password => {
            let mut salt = [0u8; 4];
            salt.copy_from_slice(&r.read(4)?);
            BackendMessage::AuthenticationMD5Password { salt }
        }
        AuthCode::SCMCredential => BackendMessage::AuthenticationSCMCredential,
        AuthCode::GSS => BackendMessage::AuthenticationGSS,
        AuthCode::GSSContinue => BackendMessage::AuthenticationGSSContinue {
            data: r.read_rest(),
        },
        AuthCode::SSPI => BackendMessage::AuthenticationSSPI,
        AuthCode::SASL => {
            let mut mechanisms = Vec::new();
            loop {
                let mech = r.read_cstring()?;
                if mech.is_empty() {
                    break;
                }
                mechanisms.push(mech);
            }
            BackendMessage::AuthenticationSASL { mechanisms }
        }
        AuthCode::SASLContinue => BackendMessage::AuthenticationSASLContinue {
            data: r.read_rest(),
        },
        AuthCode::SASLFinal => BackendMessage::AuthenticationSASLFinal {
            data: r.read_rest(),
        },
    })
}

fn decode_row_description(r: &mut BufferReader) -> PgResult<BackendMessage> {
    let num_fields = r.read_i16()?.max(0) as usize;
    let mut fields = Vec::with_capacity(num_fields);

    for _ in 0..num_fields {
        fields.push(FieldDescription {
            name: r.read_cstring()?,
            table_oid: r.read_i32()?,
            column_attr: r.read_i16()?,
            type_oid: Oid::from_i32(r.read_i32()?),
            type_size: r.read_i16()?,
            type_modifier: r.read_i32()?,
            format: Format::from_i16(r.read_i16()?)?,
        });
    }

    Ok(BackendMessage::RowDescription { fields })
}

fn decode_copy(r: &mut BufferReader) -> PgResult<CopyResponse> {
    let format = Format::from_i16(r.read_i8()? as i16)?;
    let n = r.read_i16()?.max(0) as usize;
    let mut column_formats = Vec::with_capacity(n);
    for _ in 0..n {
        column_formats.push(Format::from_i16(r.read_i16()?)?);
    }
    Ok(CopyResponse {
        format,
        column_formats,
    })
}

/// Read error/notice response fields
fn read_error_fields(r: &mut BufferReader) -> PgResult<HashMap<u8, String>> {
    let mut fields = HashMap::new();

    loop {
        let tag = r.read_u8()?;
        if tag == 0 {
            break;
        }
        let value = r.read_cstring()?;
        fields.insert(tag, value);
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Strip the header off an encoded typed message and decode it back.
    fn backend_round_trip(msg: BackendMessage) -> BackendMessage {
        let raw = msg.encode();
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&raw[..HEADER_LEN]);
        let (code, len) = parse_header(header).unwrap();
        assert_eq!(len, raw.len() - HEADER_LEN);
        BackendMessage::decode(code, raw.slice(HEADER_LEN..)).unwrap()
    }

    fn frontend_round_trip(msg: FrontendMessage) -> FrontendMessage {
        let raw = msg.encode();
        let (code, len) = parse_header(raw[..HEADER_LEN].try_into().unwrap()).unwrap();
        assert_eq!(len, raw.len() - HEADER_LEN);
        FrontendMessage::decode(code, raw.slice(HEADER_LEN..)).unwrap()
    }

    #[test]
    fn test_startup_message_structure() {
        let msg = FrontendMessage::Startup {
            params: vec![
                ("user".into(), "test".into()),
                ("database".into(), "testdb".into()),
            ],
        };

        let encoded = msg.encode();

        // Check length field
        let len = i32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(len as usize, encoded.len());
        assert_eq!(&encoded[4..8], &PROTOCOL_VERSION.to_be_bytes());
        assert_eq!(encoded[encoded.len() - 1], 0);

        let decoded = FrontendMessage::decode_untyped(encoded.slice(4..)).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_untyped_requests() {
        let ssl = FrontendMessage::SslRequest.encode();
        assert_eq!(&ssl[..], &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);

        let cancel = FrontendMessage::CancelRequest {
            process_id: 42,
            secret_key: -7,
        };
        let raw = cancel.encode();
        assert_eq!(raw.len(), 16);
        assert_eq!(FrontendMessage::decode_untyped(raw.slice(4..)).unwrap(), cancel);

        let gss = FrontendMessage::GssEncRequest.encode();
        assert_eq!(
            FrontendMessage::decode_untyped(gss.slice(4..)).unwrap(),
            FrontendMessage::GssEncRequest
        );
    }

    #[test]
    fn test_query_message_structure() {
        let encoded = FrontendMessage::Query("SELECT 1".to_string()).encode();

        assert_eq!(encoded[0], b'Q');

        let len = i32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]);
        assert_eq!(len as usize, encoded.len() - 1); // -1 for message type
    }

    #[test]
    fn test_extended_flow_messages_round_trip() {
        let messages = vec![
            FrontendMessage::Parse {
                name: "".into(),
                query: "SELECT $1, $2, $3".into(),
                param_types: vec![],
            },
            FrontendMessage::Bind {
                portal: "".into(),
                statement: "".into(),
                params: vec![
                    EncodedParam::Text("42".into()),
                    EncodedParam::Null,
                    EncodedParam::Binary(Bytes::from_static(&[1, 2, 3])),
                ],
                result_formats: vec![],
            },
            FrontendMessage::Describe {
                target: Target::Portal,
                name: "".into(),
            },
            FrontendMessage::Execute {
                portal: "".into(),
                max_rows: 0,
            },
            FrontendMessage::Sync,
            FrontendMessage::Close {
                target: Target::Statement,
                name: "s1".into(),
            },
            FrontendMessage::CopyData(Bytes::from_static(b"1\tx\n")),
            FrontendMessage::CopyFail("nope".into()),
            FrontendMessage::Password("md5abc".into()),
        ];
        for msg in messages {
            assert_eq!(frontend_round_trip(msg.clone()), msg);
        }
    }

    #[test]
    fn test_backend_round_trip() {
        let mut fields = HashMap::new();
        fields.insert(b'S', "ERROR".to_string());
        fields.insert(b'C', "42P01".to_string());
        fields.insert(b'M', "nope".to_string());

        let messages = vec![
            BackendMessage::AuthenticationOk,
            BackendMessage::AuthenticationMD5Password { salt: [1, 2, 3, 4] },
            BackendMessage::AuthenticationSASL {
                mechanisms: vec!["SCRAM-SHA-256".into()],
            },
            BackendMessage::BackendKeyData {
                process_id: 1234,
                secret_key: 5678,
            },
            BackendMessage::RowDescription {
                fields: vec![FieldDescription {
                    name: "id".into(),
                    table_oid: 16384,
                    column_attr: 1,
                    type_oid: Oid::INT4,
                    type_size: 4,
                    type_modifier: -1,
                    format: Format::Text,
                }],
            },
            BackendMessage::DataRow {
                values: vec![Some(Bytes::from_static(b"1")), None],
            },
            BackendMessage::CommandComplete {
                tag: "INSERT 0 5".into(),
            },
            BackendMessage::CopyOutResponse(CopyResponse {
                format: Format::Text,
                column_formats: vec![Format::Text, Format::Text],
            }),
            BackendMessage::ReadyForQuery {
                status: TransactionStatus::InTransaction,
            },
            BackendMessage::ErrorResponse { fields },
            BackendMessage::NotificationResponse {
                process_id: 9,
                channel: "jobs".into(),
                payload: "{}".into(),
            },
            BackendMessage::NegotiateProtocolVersion {
                minor_version: 0,
                options: vec!["_pq_.x".into()],
            },
        ];
        for msg in messages {
            assert_eq!(backend_round_trip(msg.clone()), msg);
        }
    }

    #[test]
    fn test_trailing_bytes_are_rejected() {
        // ReadyForQuery with one extra byte
        let err = BackendMessage::decode(b'Z', Bytes::from_static(b"Ix")).unwrap_err();
        assert!(matches!(err, Error::Packet(_)));
    }

    #[test]
    fn test_truncated_body_is_rejected() {
        let err = BackendMessage::decode(b'K', Bytes::from_static(&[0, 0, 0, 1])).unwrap_err();
        assert!(matches!(err, Error::Packet(_)));
    }

    #[test]
    fn test_unknown_type_byte() {
        let err = BackendMessage::decode(b'?', Bytes::new()).unwrap_err();
        assert!(matches!(err, Error::Packet(_)));
        let err = BackendMessage::decode(b'R', Bytes::from_static(&[0, 0, 0, 99])).unwrap_err();
        assert!(matches!(err, Error::Packet(_)));
    }

    #[test]
    fn test_names() {
        assert_eq!(
            BackendMessage::AuthenticationMD5Password { salt: [0; 4] }.name(),
            "AuthenticationMD5Password"
        );
        assert_eq!(BackendMessage::NoData.name(), "NoData");
    }

    #[test]
    fn test_header_rejects_short_length() {
        assert!(parse_header([b'Z', 0, 0, 0, 3]).is_err());
        assert_eq!(parse_header([b'Z', 0, 0, 0, 5]).unwrap(), (b'Z', 1));
    }
}
