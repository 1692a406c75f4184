//! Vertica connection implementation.
//!
//! This module provides the main connection type that handles:
//! - TCP/TLS connection establishment
//! - Startup and authentication
//! - The simple query cycle
//!
//! All session state sits behind one async mutex. `query` and `close` hold it
//! for their whole duration, so operations on a connection never interleave.
//! An operation whose future is dropped between sending its request and
//! reading the final ReadyForQuery leaves the session marked in flight; the
//! next operation tears the connection down instead of reading stale frames.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

use super::config::ConnectionConfig;
use super::error::{ServerError, VerticaError, VerticaResult};
use super::protocol::*;
use super::resultset::{Resultset, Row};
use super::sink::MessageSink;
use super::stream::VerticaStream;

/// Byte the server answers an SSL request with when it accepts the upgrade.
const SSL_ACCEPTED: u8 = b'S';

/// Read buffer size for the transport
const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Write buffer size for the transport
const WRITE_BUFFER_SIZE: usize = 8 * 1024;

// ============================================================================
// Session
// ============================================================================

/// Transport plus everything the server told us about the session.
struct Session {
    /// `None` once torn down
    stream: Option<BufStream<VerticaStream>>,
    /// Server parameters (e.g., server_version, client_encoding)
    parameters: HashMap<String, String>,
    /// Backend process ID
    backend_pid: u32,
    /// Backend secret key (for cancellation)
    backend_key: u32,
    /// Current transaction status, known after the first ReadyForQuery
    transaction_status: Option<TransactionStatus>,
    /// Set while a request is out and its ReadyForQuery has not been read
    in_flight: bool,
    sink: Option<Arc<dyn MessageSink>>,
}

impl Session {
    fn new(sink: Option<Arc<dyn MessageSink>>) -> Self {
        Self {
            stream: None,
            parameters: HashMap::new(),
            backend_pid: 0,
            backend_key: 0,
            transaction_status: None,
            in_flight: false,
            sink,
        }
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream(&mut self) -> VerticaResult<&mut BufStream<VerticaStream>> {
        self.stream.as_mut().ok_or(VerticaError::ConnectionClosed)
    }

    /// Fail unless the session can take a new request.
    ///
    /// A session left in flight by a cancelled operation has unread frames
    /// (or a half-written one) on the wire, so it is torn down here.
    async fn ensure_ready(&mut self) -> VerticaResult<()> {
        if self.is_closed() {
            return Err(VerticaError::ConnectionClosed);
        }
        if self.in_flight {
            tracing::warn!("previous operation was cancelled mid-cycle; closing connection");
            self.teardown().await;
            return Err(VerticaError::Protocol(
                "previous operation was cancelled mid-cycle".to_string(),
            ));
        }
        Ok(())
    }

    /// Dial, optionally upgrade to TLS, then run the startup handshake.
    async fn establish(&mut self, config: &ConnectionConfig) -> VerticaResult<()> {
        tracing::debug!(address = %config.address, user = %config.user, "connecting");

        let tcp = TcpStream::connect(&config.address).await?;
        tcp.set_nodelay(true)?;

        let stream = match &config.tls {
            Some(tls_config) => self.upgrade_tls(tcp, config, Arc::clone(tls_config)).await?,
            None => VerticaStream::Tcp(tcp),
        };
        self.stream = Some(BufStream::with_capacity(
            READ_BUFFER_SIZE,
            WRITE_BUFFER_SIZE,
            stream,
        ));

        self.startup(config).await
    }

    /// Negotiate TLS on the raw socket.
    ///
    /// Runs unbuffered so nothing the server sends after the answer byte can
    /// be read as if it came over the encrypted channel.
    async fn upgrade_tls(
        &self,
        mut tcp: TcpStream,
        config: &ConnectionConfig,
        tls_config: Arc<tokio_rustls::rustls::ClientConfig>,
    ) -> VerticaResult<VerticaStream> {
        let request = FrontendMessage::SslRequest;
        write_message(&mut tcp, &request).await?;
        self.trace_outgoing(&request);

        // Single byte, outside the regular framing
        let mut response = [0u8; 1];
        tcp.read_exact(&mut response).await?;

        if response[0] != SSL_ACCEPTED {
            return Err(VerticaError::SslNotSupported);
        }

        let name = config
            .server_name
            .clone()
            .unwrap_or_else(|| config.host().to_string());
        let server_name = ServerName::try_from(name)
            .map_err(|e| VerticaError::Tls(format!("invalid server name: {}", e)))?;

        let connector = TlsConnector::from(tls_config);
        let tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| VerticaError::Tls(e.to_string()))?;

        tracing::debug!(address = %config.address, "upgraded to TLS");
        Ok(VerticaStream::Tls(Box::new(tls)))
    }

    /// Perform the startup handshake (authentication).
    async fn startup(&mut self, config: &ConnectionConfig) -> VerticaResult<()> {
        let startup = FrontendMessage::Startup {
            user: config.user.clone(),
            database: config.database.clone(),
            options: config
                .application_name
                .as_ref()
                .map(|name| vec![("application_name".to_string(), name.clone())])
                .unwrap_or_default(),
        };
        self.send(&startup).await?;

        loop {
            match self.receive().await? {
                BackendMessage::Authentication {
                    method: AuthMethod::Ok,
                    ..
                } => {
                    // Authentication successful, continue to ReadyForQuery
                }
                BackendMessage::Authentication {
                    method: AuthMethod::CleartextPassword,
                    ..
                } => {
                    let pwd_msg = FrontendMessage::Password {
                        password: config.password.clone(),
                        auth_method: AuthMethod::CleartextPassword,
                    };
                    self.send(&pwd_msg).await?;
                }
                BackendMessage::Authentication { method, .. } => {
                    return Err(VerticaError::UnsupportedAuthMethod(method.code()));
                }
                BackendMessage::ErrorResponse { fields } => {
                    return Err(ServerError::from_fields(fields).into());
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.backend_pid = process_id;
                    self.backend_key = secret_key;
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = Some(status);
                    tracing::debug!(
                        address = %config.address,
                        backend_pid = self.backend_pid,
                        "connection ready"
                    );
                    return Ok(());
                }
                msg @ (BackendMessage::RowDescription { .. }
                | BackendMessage::DataRow { .. }
                | BackendMessage::CommandComplete { .. }
                | BackendMessage::EmptyQueryResponse) => {
                    return Err(unexpected("startup", &msg));
                }
            }
        }
    }

    /// Send a query and collect everything up to ReadyForQuery.
    ///
    /// Server errors do not stop the loop: the server still owes a
    /// ReadyForQuery, and the stream must be drained to it before the next
    /// request.
    async fn run_query(&mut self, sql: &str) -> VerticaResult<Resultset> {
        self.in_flight = true;
        self.send(&FrontendMessage::Query {
            sql: sql.to_string(),
        })
        .await?;

        let mut resultset: Option<Resultset> = None;
        let mut error: Option<ServerError> = None;

        loop {
            match self.receive().await? {
                BackendMessage::RowDescription { fields } => {
                    resultset = Some(Resultset::with_fields(fields));
                }
                BackendMessage::DataRow { values } => {
                    let current = resultset.as_mut().ok_or_else(|| {
                        VerticaError::Protocol("DataRow received before RowDescription".to_string())
                    })?;
                    if values.len() != current.fields.len() {
                        return Err(VerticaError::Protocol(format!(
                            "DataRow has {} values but RowDescription announced {} fields",
                            values.len(),
                            current.fields.len()
                        )));
                    }
                    current.rows.push(Row { values });
                }
                BackendMessage::CommandComplete { tag } => {
                    resultset.get_or_insert_with(Resultset::default).result = tag;
                }
                BackendMessage::ErrorResponse { fields } => {
                    error = Some(ServerError::from_fields(fields));
                }
                BackendMessage::EmptyQueryResponse => {
                    error = Some(ServerError::empty_query());
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.backend_pid = process_id;
                    self.backend_key = secret_key;
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = Some(status);
                    self.in_flight = false;
                    return match error {
                        Some(e) => Err(e.into()),
                        None => Ok(resultset.unwrap_or_default()),
                    };
                }
                msg @ BackendMessage::Authentication { .. } => {
                    return Err(unexpected("query", &msg));
                }
            }
        }
    }

    /// Send a frontend message (with flush).
    async fn send(&mut self, msg: &FrontendMessage) -> VerticaResult<()> {
        write_message(self.stream()?, msg).await?;
        self.trace_outgoing(msg);
        Ok(())
    }

    fn trace_outgoing(&self, msg: &FrontendMessage) {
        if let Some(sink) = &self.sink {
            sink.outgoing(msg);
        }
    }

    /// Receive a backend message.
    async fn receive(&mut self) -> VerticaResult<BackendMessage> {
        let msg = read_message(self.stream()?).await?;
        if let Some(sink) = &self.sink {
            sink.incoming(&msg);
        }
        Ok(msg)
    }

    /// Close the transport and forget everything learned about the session.
    async fn teardown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // The peer may already be gone; dropping the stream closes it either way.
            let _ = stream.shutdown().await;
        }
        self.parameters = HashMap::new();
        self.backend_pid = 0;
        self.backend_key = 0;
        self.transaction_status = None;
        self.in_flight = false;
    }
}

fn unexpected(phase: &str, msg: &BackendMessage) -> VerticaError {
    VerticaError::Protocol(format!("unexpected message during {}: {:?}", phase, msg))
}

// ============================================================================
// Connection
// ============================================================================

/// A Vertica connection.
///
/// Safe to share between tasks (e.g. in an `Arc`); concurrent calls queue on
/// an internal lock and run one at a time.
pub struct Connection {
    inner: Mutex<Session>,
}

impl Connection {
    /// Connect to a Vertica server.
    pub async fn connect(url: &str) -> VerticaResult<Self> {
        let config = ConnectionConfig::from_url(url)?;
        Self::connect_with_config(&config).await
    }

    /// Connect with explicit configuration.
    ///
    /// On failure the partially opened socket is closed before the error is
    /// returned.
    pub async fn connect_with_config(config: &ConnectionConfig) -> VerticaResult<Self> {
        let mut session = Session::new(config.sink.clone());

        if let Err(e) = session.establish(config).await {
            tracing::debug!(address = %config.address, error = %e, "connect failed");
            session.teardown().await;
            return Err(e);
        }

        Ok(Self {
            inner: Mutex::new(session),
        })
    }

    /// Execute a simple (text protocol) query.
    ///
    /// A server-reported error is returned as [`VerticaError::Server`] and
    /// leaves the connection usable. Any other error closes the connection.
    pub async fn query(&self, sql: &str) -> VerticaResult<Resultset> {
        let mut session = self.inner.lock().await;
        session.ensure_ready().await?;

        let result = session.run_query(sql).await;
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::warn!(error = %e, "closing connection after fatal error");
                session.teardown().await;
            }
        }
        result
    }

    /// Close the connection.
    ///
    /// Terminate is sent best-effort; the transport is torn down whether or
    /// not that succeeds. Closing an already closed connection fails with
    /// [`VerticaError::ConnectionClosed`] and has no other effect.
    pub async fn close(&self) -> VerticaResult<()> {
        let mut session = self.inner.lock().await;
        session.ensure_ready().await?;

        session.in_flight = true;
        let result = session.send(&FrontendMessage::Terminate).await;
        session.teardown().await;
        tracing::debug!("connection closed");
        result
    }

    /// Check if the connection is closed.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_closed()
    }

    /// Whether the transport was upgraded to TLS.
    pub async fn is_tls(&self) -> bool {
        self.inner
            .lock()
            .await
            .stream
            .as_ref()
            .is_some_and(|stream| stream.get_ref().is_tls())
    }

    /// Get the current transaction status (`None` once closed).
    pub async fn transaction_status(&self) -> Option<TransactionStatus> {
        self.inner.lock().await.transaction_status
    }

    /// Get backend process ID.
    pub async fn backend_pid(&self) -> u32 {
        self.inner.lock().await.backend_pid
    }

    /// Get backend secret key.
    pub async fn backend_key(&self) -> u32 {
        self.inner.lock().await.backend_key
    }

    /// Get a server parameter.
    pub async fn parameter(&self, name: &str) -> Option<String> {
        self.inner.lock().await.parameters.get(name).cloned()
    }

    /// Snapshot of all server parameters.
    pub async fn parameters(&self) -> HashMap<String, String> {
        self.inner.lock().await.parameters.clone()
    }
}
