//! PostgreSQL connection implementation.
//!
//! This module provides the connection state machine:
//! - optional SSLRequest negotiation
//! - startup and authentication (cleartext and MD5)
//! - simple and extended query flows
//! - out-of-band cancellation
//!
//! All methods take `&self`. The socket lives in a one-item
//! [`DeferredStack`], so concurrent callers queue up in arrival order and
//! only one request/response exchange is ever on the wire.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::codes::{TransactionStatus, SSL_ACCEPTED, SSL_REJECTED};
use super::config::PgConfig;
use super::deferred::DeferredStack;
use super::error::ServerError;
use super::protocol::{parse_header, BackendMessage, FrontendMessage, Target, HEADER_LEN};
use super::query::{QueryOptions, QueryResult, ResultShape};
use super::socket::{connect_tcp, BoxSocket, TlsConnector};
use crate::error::{Error, PgResult};

// ============================================================================
// Connection state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Runtime information reported by the server during startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServerInfo {
    /// ParameterStatus values (`server_version`, `client_encoding`, ...)
    pub parameters: HashMap<String, String>,
    pub process_id: i32,
    pub secret_key: i32,
}

/// An asynchronous NOTIFY delivered to this session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub process_id: i32,
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, Default)]
struct Session {
    status: ConnectionStatus,
    transaction_status: TransactionStatus,
    server_info: ServerInfo,
    notifications: Vec<Notification>,
}

impl Session {
    /// Apply messages the server may send at any time.
    ///
    /// Returns the message back if it is not one of those.
    fn absorb(&mut self, msg: BackendMessage) -> Option<BackendMessage> {
        match msg {
            BackendMessage::ParameterStatus { name, value } => {
                self.server_info.parameters.insert(name, value);
                None
            }
            BackendMessage::NotificationResponse {
                process_id,
                channel,
                payload,
            } => {
                self.notifications.push(Notification {
                    process_id,
                    channel,
                    payload,
                });
                None
            }
            other => Some(other),
        }
    }
}

// ============================================================================
// Wire
// ============================================================================

/// The socket plus packet framing.
struct Wire {
    socket: BoxSocket,
}

impl Wire {
    fn new(socket: BoxSocket) -> Self {
        Self { socket }
    }

    /// Send one message and flush it.
    async fn send(&mut self, msg: &FrontendMessage) -> PgResult<()> {
        trace!(msg = msg.name(), "send");
        let encoded = msg.encode();
        self.socket.write_all(&encoded).await?;
        self.socket.flush().await?;
        Ok(())
    }

    /// Receive one backend message: header first, then the body.
    async fn receive(&mut self) -> PgResult<BackendMessage> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact(&mut header).await?;
        let (code, len) = parse_header(header)?;

        let mut body = vec![0u8; len];
        self.read_exact(&mut body).await?;
        let msg = BackendMessage::decode(code, body.into())?;
        trace!(msg = msg.name(), len, "recv");
        Ok(msg)
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> PgResult<()> {
        match self.socket.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(Error::ConnectionClosed),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.socket.shutdown().await {
            debug!(error = %e, "socket shutdown failed");
        }
    }
}

/// Exclusive use of the wire for one exchange.
///
/// Dropping the guard without [`WireGuard::release`] means the exchange was
/// abandoned part way, so the stream is out of sync and the connection is
/// closed.
struct WireGuard<'a> {
    conn: &'a PgConnection,
    wire: Option<Wire>,
}

impl<'a> WireGuard<'a> {
    fn wire(&mut self) -> PgResult<&mut Wire> {
        self.wire.as_mut().ok_or(Error::ConnectionClosed)
    }

    fn release(mut self) {
        if let Some(wire) = self.wire.take() {
            self.conn.wire.push(wire);
        }
    }

    /// Shut the socket down and close the connection.
    async fn poison(mut self) {
        if let Some(mut wire) = self.wire.take() {
            wire.shutdown().await;
        }
        self.conn.mark_closed();
    }
}

impl Drop for WireGuard<'_> {
    fn drop(&mut self) {
        if self.wire.take().is_some() {
            warn!("query abandoned mid-exchange, closing connection");
            self.conn.mark_closed();
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A PostgreSQL connection.
pub struct PgConnection {
    config: PgConfig,
    /// One-item stack: the in-flight permit and the socket in one
    wire: DeferredStack<Wire>,
    session: Mutex<Session>,
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("user", &self.config.user)
            .field("status", &self.status())
            .finish()
    }
}

impl PgConnection {
    /// Connect over plain TCP.
    pub async fn connect(config: PgConfig) -> PgResult<Self> {
        let socket = connect_tcp(&config).await?;
        Self::handshake(socket, config).await
    }

    /// Connect using a `postgres://` URL.
    pub async fn connect_url(url: &str) -> PgResult<Self> {
        Self::connect(PgConfig::from_url(url)?).await
    }

    /// Connect, asking the server for an encrypted channel first.
    ///
    /// If the server refuses, the connection continues in plaintext. If the
    /// upgrade itself fails, a fresh plaintext socket is opened.
    pub async fn connect_with_tls(config: PgConfig, tls: &dyn TlsConnector) -> PgResult<Self> {
        let socket = connect_tcp(&config).await?;
        let socket = match negotiate_tls(socket, &config, tls).await? {
            Some(socket) => socket,
            None => connect_tcp(&config).await?,
        };
        Self::handshake(socket, config).await
    }

    /// Run startup and authentication over an already open socket.
    pub async fn handshake(socket: BoxSocket, config: PgConfig) -> PgResult<Self> {
        let mut wire = Wire::new(socket);
        let mut session = Session::default();

        if let Err(e) = startup(&mut wire, &config, &mut session).await {
            wire.shutdown().await;
            debug!(host = %config.host, error = %e, "startup failed");
            return Err(e);
        }

        session.status = ConnectionStatus::Connected;
        debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            process_id = session.server_info.process_id,
            "connected"
        );

        Ok(Self {
            config,
            wire: DeferredStack::with_items([wire]),
            session: Mutex::new(session),
        })
    }

    /// Run a query and collect its result.
    ///
    /// Without arguments the simple query flow is used, otherwise the
    /// extended flow (Parse, Bind, Describe, Execute, Sync).
    pub async fn query(
        &self,
        options: impl Into<QueryOptions>,
        shape: ResultShape,
    ) -> PgResult<QueryResult> {
        let options = options.into();
        self.ensure_connected()?;
        let wire = self
            .wire
            .pop()
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        let mut guard = WireGuard {
            conn: self,
            wire: Some(wire),
        };
        // close() may have started while we waited
        if let Err(e) = self.ensure_connected() {
            guard.release();
            return Err(e);
        }

        let result = self.exchange(guard.wire()?, &options, shape).await;
        match &result {
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "fatal error, closing connection");
                guard.poison().await;
            }
            _ => guard.release(),
        }
        result
    }

    /// Run a query, rows as positional values.
    pub async fn query_array(&self, options: impl Into<QueryOptions>) -> PgResult<QueryResult> {
        self.query(options, ResultShape::Array).await
    }

    /// Run a query, rows keyed by column name.
    pub async fn query_object(&self, options: impl Into<QueryOptions>) -> PgResult<QueryResult> {
        self.query(options, ResultShape::Object).await
    }

    /// Run a query text through the simple flow.
    pub async fn simple_query(&self, text: &str) -> PgResult<QueryResult> {
        self.query(QueryOptions::new(text), ResultShape::Array).await
    }

    /// Close the connection.
    ///
    /// Waits for an in-flight query, then sends Terminate. Closing twice is
    /// a no-op.
    pub async fn close(&self) -> PgResult<()> {
        {
            let mut session = self.session.lock();
            match session.status {
                ConnectionStatus::Closing | ConnectionStatus::Closed => return Ok(()),
                _ => session.status = ConnectionStatus::Closing,
            }
        }

        let result = match self.wire.pop().await {
            Ok(mut wire) => {
                let sent = wire.send(&FrontendMessage::Terminate).await;
                wire.shutdown().await;
                sent
            }
            // already torn down by a fatal error
            Err(_) => Ok(()),
        };
        self.mark_closed();
        debug!(host = %self.config.host, "connection closed");
        result
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.lock().status
    }

    pub fn is_closed(&self) -> bool {
        self.status() == ConnectionStatus::Closed
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.session.lock().transaction_status
    }

    pub fn server_info(&self) -> ServerInfo {
        self.session.lock().server_info.clone()
    }

    /// Get a server parameter.
    pub fn parameter(&self, name: &str) -> Option<String> {
        self.session.lock().server_info.parameters.get(name).cloned()
    }

    /// Drain the notifications received so far.
    pub fn take_notifications(&self) -> Vec<Notification> {
        std::mem::take(&mut self.session.lock().notifications)
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Handle for cancelling the running query from elsewhere.
    pub fn cancel_token(&self) -> CancelToken {
        let session = self.session.lock();
        CancelToken {
            config: self.config.clone(),
            process_id: session.server_info.process_id,
            secret_key: session.server_info.secret_key,
        }
    }

    fn ensure_connected(&self) -> PgResult<()> {
        match self.status() {
            ConnectionStatus::Connected => Ok(()),
            _ => Err(Error::ConnectionClosed),
        }
    }

    fn mark_closed(&self) {
        self.session.lock().status = ConnectionStatus::Closed;
        // wakes queued callers with an error and drops an idle socket
        self.wire.close();
    }

    // ========================================================================
    // Query flows
    // ========================================================================

    async fn exchange(
        &self,
        wire: &mut Wire,
        options: &QueryOptions,
        shape: ResultShape,
    ) -> PgResult<QueryResult> {
        if options.has_args() {
            self.send_extended(wire, options).await?;
            self.expect(wire, "ParseComplete", |m| {
                matches!(m, BackendMessage::ParseComplete)
            })
            .await?;
            self.expect(wire, "BindComplete", |m| {
                matches!(m, BackendMessage::BindComplete)
            })
            .await?;
        } else {
            wire.send(&FrontendMessage::Query(options.text().to_string()))
                .await?;
        }
        self.collect(wire, options, shape).await
    }

    async fn send_extended(&self, wire: &mut Wire, options: &QueryOptions) -> PgResult<()> {
        let portal = options.portal_name().to_string();
        wire.send(&FrontendMessage::Parse {
            name: options.statement().to_string(),
            query: options.text().to_string(),
            param_types: Vec::new(),
        })
        .await?;
        wire.send(&FrontendMessage::Bind {
            portal: portal.clone(),
            statement: options.statement().to_string(),
            params: options.encoded_args().to_vec(),
            result_formats: Vec::new(),
        })
        .await?;
        wire.send(&FrontendMessage::Describe {
            target: Target::Portal,
            name: portal.clone(),
        })
        .await?;
        wire.send(&FrontendMessage::Execute {
            portal,
            max_rows: 0,
        })
        .await?;
        wire.send(&FrontendMessage::Sync).await
    }

    /// Read the next significant message and check it is the expected one.
    ///
    /// An ErrorResponse skips ahead to ReadyForQuery and fails the query.
    async fn expect(
        &self,
        wire: &mut Wire,
        expected: &str,
        is_expected: impl Fn(&BackendMessage) -> bool,
    ) -> PgResult<()> {
        loop {
            let msg = wire.receive().await?;
            let absorbed = self.session.lock().absorb(msg);
            let Some(msg) = absorbed else {
                continue;
            };
            match msg {
                m if is_expected(&m) => return Ok(()),
                BackendMessage::NoticeResponse { fields } => {
                    log_notice(&ServerError::from_fields(&fields));
                }
                BackendMessage::ErrorResponse { fields } => {
                    self.drain(wire).await?;
                    return Err(Error::Query(ServerError::from_fields(&fields)));
                }
                other => {
                    return Err(Error::packet(format!(
                        "Expected {}, got {}",
                        expected,
                        other.name()
                    )))
                }
            }
        }
    }

    /// Accumulate the result until ReadyForQuery.
    async fn collect(
        &self,
        wire: &mut Wire,
        options: &QueryOptions,
        shape: ResultShape,
    ) -> PgResult<QueryResult> {
        let names = options.explicit_fields().map(<[String]>::to_vec);
        let mut result = QueryResult::with_names(shape, names);
        // first failure wins; reading continues so the stream stays in sync
        let mut failure: Option<Error> = None;

        loop {
            let msg = wire.receive().await?;
            let absorbed = self.session.lock().absorb(msg);
            let Some(msg) = absorbed else {
                continue;
            };
            match msg {
                BackendMessage::RowDescription { fields } => {
                    if failure.is_none() {
                        failure = result.set_fields(fields).err();
                    }
                }
                BackendMessage::DataRow { values } => {
                    if failure.is_none() {
                        failure = result.insert(values).err();
                    }
                }
                BackendMessage::CommandComplete { tag } => result.set_command(&tag),
                BackendMessage::EmptyQueryResponse | BackendMessage::NoData => {}
                BackendMessage::NoticeResponse { fields } => {
                    let notice = ServerError::from_fields(&fields);
                    log_notice(&notice);
                    result.warnings.push(notice);
                }
                BackendMessage::ErrorResponse { fields } => {
                    if failure.is_none() {
                        failure = Some(Error::Query(ServerError::from_fields(&fields)));
                    }
                }
                BackendMessage::CopyOutResponse(_) | BackendMessage::CopyDone => {}
                BackendMessage::CopyData { data } => result.copy_data.push(data),
                BackendMessage::CopyInResponse(_) => {
                    for chunk in options.copy_chunks() {
                        wire.send(&FrontendMessage::CopyData(chunk.clone())).await?;
                    }
                    wire.send(&FrontendMessage::CopyDone).await?;
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.session.lock().transaction_status = status;
                    return match failure {
                        Some(e) => Err(e),
                        None => Ok(result),
                    };
                }
                other => {
                    return Err(Error::packet(format!(
                        "Unexpected {} during query",
                        other.name()
                    )))
                }
            }
        }
    }

    /// Skip to ReadyForQuery after an error.
    async fn drain(&self, wire: &mut Wire) -> PgResult<()> {
        loop {
            if let BackendMessage::ReadyForQuery { status } = wire.receive().await? {
                self.session.lock().transaction_status = status;
                return Ok(());
            }
        }
    }
}

fn log_notice(notice: &ServerError) {
    debug!(
        severity = %notice.severity,
        code = %notice.code,
        message = %notice.message,
        "notice"
    );
}

// ============================================================================
// Startup
// ============================================================================

/// Send SSLRequest and act on the one-byte answer.
///
/// Returns `None` when the upgrade failed and the caller must reconnect in
/// plaintext.
pub(crate) async fn negotiate_tls(
    socket: BoxSocket,
    config: &PgConfig,
    tls: &dyn TlsConnector,
) -> PgResult<Option<BoxSocket>> {
    let mut wire = Wire::new(socket);
    wire.send(&FrontendMessage::SslRequest).await?;
    let mut answer = [0u8; 1];
    wire.read_exact(&mut answer).await?;

    match answer[0] {
        SSL_ACCEPTED => match tls.upgrade(&config.host, wire.socket).await {
            Ok(socket) => {
                debug!(host = %config.host, "tls established");
                Ok(Some(socket))
            }
            Err(e) => {
                warn!(host = %config.host, error = %e, "tls upgrade failed, reconnecting in plaintext");
                Ok(None)
            }
        },
        SSL_REJECTED => {
            debug!(host = %config.host, "server refused tls, continuing in plaintext");
            Ok(Some(wire.socket))
        }
        other => Err(Error::packet(format!(
            "Unexpected SSLRequest response byte 0x{:02x}",
            other
        ))),
    }
}

async fn startup(wire: &mut Wire, config: &PgConfig, session: &mut Session) -> PgResult<()> {
    wire.send(&FrontendMessage::Startup {
        params: config.startup_params(),
    })
    .await?;

    authenticate(wire, config).await?;

    loop {
        let msg = wire.receive().await?;
        let Some(msg) = session.absorb(msg) else {
            continue;
        };
        match msg {
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                session.server_info.process_id = process_id;
                session.server_info.secret_key = secret_key;
            }
            BackendMessage::NoticeResponse { fields } => {
                log_notice(&ServerError::from_fields(&fields));
            }
            BackendMessage::ReadyForQuery { status } => {
                session.transaction_status = status;
                return Ok(());
            }
            BackendMessage::ErrorResponse { fields } => return Err(startup_error(&fields)),
            other => {
                return Err(Error::Connection(format!(
                    "Unexpected {} during startup",
                    other.name()
                )))
            }
        }
    }
}

async fn authenticate(wire: &mut Wire, config: &PgConfig) -> PgResult<()> {
    match wire.receive().await? {
        BackendMessage::AuthenticationOk => return Ok(()),
        BackendMessage::AuthenticationCleartextPassword => {
            let password = require_password(config)?;
            wire.send(&FrontendMessage::Password(password.to_string()))
                .await?;
        }
        BackendMessage::AuthenticationMD5Password { salt } => {
            let password = require_password(config)?;
            let hash = md5_password(&config.user, password, &salt);
            wire.send(&FrontendMessage::Password(hash)).await?;
        }
        BackendMessage::ErrorResponse { fields } => return Err(startup_error(&fields)),
        other @ (BackendMessage::AuthenticationKerberosV5
        | BackendMessage::AuthenticationSCMCredential
        | BackendMessage::AuthenticationGSS
        | BackendMessage::AuthenticationGSSContinue { .. }
        | BackendMessage::AuthenticationSSPI
        | BackendMessage::AuthenticationSASL { .. }
        | BackendMessage::AuthenticationSASLContinue { .. }
        | BackendMessage::AuthenticationSASLFinal { .. }
        | BackendMessage::NegotiateProtocolVersion { .. }) => {
            return Err(Error::Authentication(format!(
                "{} is not supported",
                other.name()
            )))
        }
        other => {
            return Err(Error::packet(format!(
                "Expected an authentication request, got {}",
                other.name()
            )))
        }
    }

    match wire.receive().await? {
        BackendMessage::AuthenticationOk => Ok(()),
        BackendMessage::ErrorResponse { fields } => Err(startup_error(&fields)),
        other => Err(Error::Authentication(format!(
            "Expected AuthenticationOk, got {}",
            other.name()
        ))),
    }
}

fn require_password(config: &PgConfig) -> PgResult<&str> {
    config
        .password
        .as_deref()
        .ok_or_else(|| Error::Authentication("Password required".to_string()))
}

/// Class 28 (invalid authorization) is an authentication failure, anything
/// else a connection failure.
fn startup_error(fields: &HashMap<u8, String>) -> Error {
    let err = ServerError::from_fields(fields);
    if err.code.starts_with("28") {
        Error::Authentication(err.to_string())
    } else {
        Error::Connection(err.to_string())
    }
}

/// Compute MD5 password hash.
pub(crate) fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    // MD5(MD5(password + user) + salt)
    let inner = format!("{}{}", password, user);
    let inner_hash = md5::compute(inner.as_bytes());

    // Convert inner hash to hex string, then append salt bytes
    let inner_hex = format!("{:x}", inner_hash);
    let mut hasher_input = inner_hex.as_bytes().to_vec();
    hasher_input.extend_from_slice(salt);

    let outer_hash = md5::compute(&hasher_input);
    format!("md5{:x}", outer_hash)
}

// ============================================================================
// Cancellation
// ============================================================================

/// Everything needed to send a CancelRequest for one backend.
#[derive(Debug, Clone)]
pub struct CancelToken {
    config: PgConfig,
    process_id: i32,
    secret_key: i32,
}

impl CancelToken {
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Ask the server to cancel the backend's current query.
    ///
    /// Opens a new socket, writes the request and closes. The server sends
    /// no reply; whether anything was cancelled shows up on the cancelled
    /// connection.
    pub async fn cancel(&self) -> PgResult<()> {
        let mut socket = connect_tcp(&self.config).await?;
        let request = FrontendMessage::CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        };
        socket.write_all(&request.encode()).await?;
        socket.flush().await?;
        socket.shutdown().await?;
        debug!(process_id = self.process_id, "cancel request sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_password_shape() {
        let hash = md5_password("test", "pw", &[1, 2, 3, 4]);
        assert!(hash.starts_with("md5"));
        assert_eq!(hash.len(), 35);
        assert!(hash[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_startup_error_classification() {
        let mut fields = HashMap::new();
        fields.insert(b'S', "FATAL".to_string());
        fields.insert(b'C', "28P01".to_string());
        fields.insert(b'M', "password authentication failed".to_string());
        assert!(matches!(startup_error(&fields), Error::Authentication(_)));

        fields.insert(b'C', "3D000".to_string());
        assert!(matches!(startup_error(&fields), Error::Connection(_)));
    }

    #[test]
    fn test_session_absorbs_async_messages() {
        let mut session = Session::default();
        assert!(session
            .absorb(BackendMessage::ParameterStatus {
                name: "TimeZone".into(),
                value: "UTC".into(),
            })
            .is_none());
        assert!(session
            .absorb(BackendMessage::NotificationResponse {
                process_id: 7,
                channel: "jobs".into(),
                payload: "42".into(),
            })
            .is_none());
        assert!(session.absorb(BackendMessage::NoData).is_some());

        assert_eq!(session.server_info.parameters["TimeZone"], "UTC");
        assert_eq!(session.notifications[0].channel, "jobs");
    }
}
