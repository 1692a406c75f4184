//! Vertica wire protocol message encoding and decoding.
//!
//! Vertica speaks a dialect of the PostgreSQL v3 frontend/backend protocol.
//! Only the subset needed for the simple query cycle is implemented here.
//! Reference: https://www.postgresql.org/docs/current/protocol-message-formats.html

use std::collections::HashMap;
use std::fmt;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{DecodeError, VerticaResult};

// ============================================================================
// Protocol Constants
// ============================================================================

/// Protocol version 3.0
pub const PROTOCOL_VERSION: u32 = 196608; // (3 << 16) | 0

/// Request code sent in place of a protocol version to ask for TLS.
pub const SSL_REQUEST_CODE: u32 = 80877103; // (1234 << 16) | 5679

/// Tag + length.
pub const HEADER_LEN: usize = 5;

/// DataRow value length marking SQL NULL.
pub const NULL_LENGTH: u32 = 0xFFFF_FFFF;

/// Largest frame length accepted from the server (1 GiB, as libpq).
pub const MAX_MESSAGE_LEN: u32 = 0x4000_0000;

/// Body bytes reserved up front; larger bodies grow as data arrives.
const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

/// Incoming message tags.
pub mod tag {
    pub const AUTHENTICATION: u8 = b'R';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const DATA_ROW: u8 = b'D';

    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const TERMINATE: u8 = b'X';
}

/// Format codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Binary,
    /// A code this client does not know, kept as sent
    Other(i16),
}

impl From<i16> for Format {
    fn from(code: i16) -> Self {
        match code {
            0 => Format::Text,
            1 => Format::Binary,
            other => Format::Other(other),
        }
    }
}

impl Format {
    /// The format code as sent on the wire.
    pub fn code(self) -> i16 {
        match self {
            Format::Text => 0,
            Format::Binary => 1,
            Format::Other(code) => code,
        }
    }
}

/// Transaction status indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    Idle,
    /// In a transaction block
    InTransaction,
    /// In a failed transaction block
    Failed,
    /// A status byte this client does not know about
    Unknown(u8),
}

impl From<u8> for TransactionStatus {
    fn from(b: u8) -> Self {
        match b {
            b'I' => TransactionStatus::Idle,
            b'T' => TransactionStatus::InTransaction,
            b'E' => TransactionStatus::Failed,
            other => TransactionStatus::Unknown(other),
        }
    }
}

impl TransactionStatus {
    /// The status byte as sent on the wire.
    pub fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
            TransactionStatus::Unknown(b) => b,
        }
    }
}

/// Authentication methods a server may request in an 'R' message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Ok,
    KerberosV5,
    CleartextPassword,
    CryptPassword,
    Md5Password,
    ScmCredential,
    Gss,
    GssContinue,
    Sspi,
    Hash,
    HashMd5,
    HashSha512,
    Other(u32),
}

impl From<u32> for AuthMethod {
    fn from(code: u32) -> Self {
        match code {
            0 => AuthMethod::Ok,
            2 => AuthMethod::KerberosV5,
            3 => AuthMethod::CleartextPassword,
            4 => AuthMethod::CryptPassword,
            5 => AuthMethod::Md5Password,
            6 => AuthMethod::ScmCredential,
            7 => AuthMethod::Gss,
            8 => AuthMethod::GssContinue,
            9 => AuthMethod::Sspi,
            65536 => AuthMethod::Hash,
            65541 => AuthMethod::HashMd5,
            66048 => AuthMethod::HashSha512,
            other => AuthMethod::Other(other),
        }
    }
}

impl AuthMethod {
    /// The method code as sent on the wire.
    pub fn code(self) -> u32 {
        match self {
            AuthMethod::Ok => 0,
            AuthMethod::KerberosV5 => 2,
            AuthMethod::CleartextPassword => 3,
            AuthMethod::CryptPassword => 4,
            AuthMethod::Md5Password => 5,
            AuthMethod::ScmCredential => 6,
            AuthMethod::Gss => 7,
            AuthMethod::GssContinue => 8,
            AuthMethod::Sspi => 9,
            AuthMethod::Hash => 65536,
            AuthMethod::HashMd5 => 65541,
            AuthMethod::HashSha512 => 66048,
            AuthMethod::Other(code) => code,
        }
    }
}

// ============================================================================
// Frontend (Client -> Server) Messages
// ============================================================================

/// Messages the client sends.
///
/// Each variant only knows how to write its payload; the tag and the length
/// prefix are added uniformly by [`FrontendMessage::encode`].
#[derive(Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    /// Asks the server to upgrade the socket to TLS. Untagged.
    SslRequest,
    /// Sent once at connection start. Untagged.
    Startup {
        user: String,
        database: String,
        options: Vec<(String, String)>,
    },
    /// Answer to an authentication challenge.
    Password {
        password: String,
        auth_method: AuthMethod,
    },
    /// Simple query ('Q').
    Query { sql: String },
    /// Close the session ('X').
    Terminate,
}

impl FrontendMessage {
    /// The tag byte, or `None` for the pre-startup messages.
    pub fn tag(&self) -> Option<u8> {
        match self {
            FrontendMessage::SslRequest | FrontendMessage::Startup { .. } => None,
            FrontendMessage::Password { .. } => Some(tag::PASSWORD),
            FrontendMessage::Query { .. } => Some(tag::QUERY),
            FrontendMessage::Terminate => Some(tag::TERMINATE),
        }
    }

    /// Write the payload (everything after the length field).
    pub fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            FrontendMessage::SslRequest => {
                buf.put_u32(SSL_REQUEST_CODE);
            }
            FrontendMessage::Startup {
                user,
                database,
                options,
            } => {
                buf.put_u32(PROTOCOL_VERSION);

                put_cstring(buf, "user");
                put_cstring(buf, user);

                if !database.is_empty() {
                    put_cstring(buf, "database");
                    put_cstring(buf, database);
                }

                for (key, value) in options {
                    put_cstring(buf, key);
                    put_cstring(buf, value);
                }

                // Terminator
                buf.put_u8(0);
            }
            FrontendMessage::Password { password, .. } => {
                // Only cleartext is ever answered, so the password goes out as-is.
                put_cstring(buf, password);
            }
            FrontendMessage::Query { sql } => {
                put_cstring(buf, sql);
            }
            FrontendMessage::Terminate => {}
        }
    }

    /// Encode into a complete frame: `[tag?][length][payload]`.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();

        if let Some(tag) = self.tag() {
            buf.put_u8(tag);
        }

        // Placeholder for length (will be filled in at the end)
        let len_pos = buf.len();
        buf.put_u32(0);

        self.encode_body(&mut buf);

        // Fill in length (includes length field itself, not the tag)
        let len = (buf.len() - len_pos) as u32;
        buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());

        buf
    }
}

impl fmt::Debug for FrontendMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrontendMessage::SslRequest => f.write_str("SslRequest"),
            FrontendMessage::Startup {
                user,
                database,
                options,
            } => f
                .debug_struct("Startup")
                .field("user", user)
                .field("database", database)
                .field("options", options)
                .finish(),
            FrontendMessage::Password { auth_method, .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .field("auth_method", auth_method)
                .finish(),
            FrontendMessage::Query { sql } => f.debug_struct("Query").field("sql", sql).finish(),
            FrontendMessage::Terminate => f.write_str("Terminate"),
        }
    }
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

// ============================================================================
// Backend (Server -> Client) Messages
// ============================================================================

/// Field description in a RowDescription message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_attr: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: Format,
}

/// Backend message types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    /// Authentication challenge; `salt` holds any method-specific trailer.
    Authentication { method: AuthMethod, salt: Bytes },

    // Query responses
    RowDescription { fields: Vec<FieldDescription> },
    DataRow { values: Vec<Option<Bytes>> },
    CommandComplete { tag: String },
    EmptyQueryResponse,

    // Status
    ReadyForQuery { status: TransactionStatus },
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: u32, secret_key: u32 },

    // Errors
    ErrorResponse { fields: HashMap<u8, String> },
}

impl BackendMessage {
    /// Whether `msg_type` is a tag this client can decode.
    pub fn is_known_tag(msg_type: u8) -> bool {
        matches!(
            msg_type,
            tag::AUTHENTICATION
                | tag::READY_FOR_QUERY
                | tag::ERROR_RESPONSE
                | tag::EMPTY_QUERY_RESPONSE
                | tag::PARAMETER_STATUS
                | tag::BACKEND_KEY_DATA
                | tag::ROW_DESCRIPTION
                | tag::COMMAND_COMPLETE
                | tag::DATA_ROW
        )
    }

    /// Decode a message body given its tag byte.
    ///
    /// `body` is everything after the length field. Trailing bytes past the
    /// last field are ignored.
    pub fn decode(msg_type: u8, body: Bytes) -> Result<Self, DecodeError> {
        match msg_type {
            tag::AUTHENTICATION => Self::decode_auth(body),
            tag::READY_FOR_QUERY => Self::decode_ready_for_query(body),
            tag::ERROR_RESPONSE => Self::decode_error_response(body),
            tag::EMPTY_QUERY_RESPONSE => Ok(BackendMessage::EmptyQueryResponse),
            tag::PARAMETER_STATUS => Self::decode_parameter_status(body),
            tag::BACKEND_KEY_DATA => Self::decode_backend_key_data(body),
            tag::ROW_DESCRIPTION => Self::decode_row_description(body),
            tag::COMMAND_COMPLETE => Self::decode_command_complete(body),
            tag::DATA_ROW => Self::decode_data_row(body),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }

    fn decode_auth(mut body: Bytes) -> Result<Self, DecodeError> {
        let method = AuthMethod::from(read_u32(&mut body)?);
        Ok(BackendMessage::Authentication { method, salt: body })
    }

    fn decode_ready_for_query(mut body: Bytes) -> Result<Self, DecodeError> {
        let status = TransactionStatus::from(read_u8(&mut body)?);
        Ok(BackendMessage::ReadyForQuery { status })
    }

    fn decode_error_response(mut body: Bytes) -> Result<Self, DecodeError> {
        let mut fields = HashMap::new();

        loop {
            let field_type = read_u8(&mut body)?;
            if field_type == 0 {
                break;
            }
            let value = read_cstring(&mut body)?;
            fields.insert(field_type, value);
        }

        Ok(BackendMessage::ErrorResponse { fields })
    }

    fn decode_parameter_status(mut body: Bytes) -> Result<Self, DecodeError> {
        let name = read_cstring(&mut body)?;
        let value = read_cstring(&mut body)?;
        Ok(BackendMessage::ParameterStatus { name, value })
    }

    fn decode_backend_key_data(mut body: Bytes) -> Result<Self, DecodeError> {
        let process_id = read_u32(&mut body)?;
        let secret_key = read_u32(&mut body)?;
        Ok(BackendMessage::BackendKeyData {
            process_id,
            secret_key,
        })
    }

    fn decode_command_complete(mut body: Bytes) -> Result<Self, DecodeError> {
        let tag = read_cstring(&mut body)?;
        Ok(BackendMessage::CommandComplete { tag })
    }

    fn decode_row_description(mut body: Bytes) -> Result<Self, DecodeError> {
        let num_fields = read_u16(&mut body)? as usize;
        let mut fields = Vec::with_capacity(num_fields);

        for _ in 0..num_fields {
            let name = read_cstring(&mut body)?;
            let table_oid = read_u32(&mut body)?;
            let column_attr = read_u16(&mut body)? as i16;
            let type_oid = read_u32(&mut body)?;
            let type_size = read_u16(&mut body)? as i16;
            let type_modifier = read_u32(&mut body)? as i32;
            let format = Format::from(read_u16(&mut body)? as i16);

            fields.push(FieldDescription {
                name,
                table_oid,
                column_attr,
                type_oid,
                type_size,
                type_modifier,
                format,
            });
        }

        Ok(BackendMessage::RowDescription { fields })
    }

    fn decode_data_row(mut body: Bytes) -> Result<Self, DecodeError> {
        let num_cols = read_u16(&mut body)? as usize;
        let mut values = Vec::with_capacity(num_cols);

        for _ in 0..num_cols {
            let len = read_u32(&mut body)?;
            if len == NULL_LENGTH {
                values.push(None);
            } else {
                ensure(&body, len as usize)?;
                values.push(Some(body.split_to(len as usize)));
            }
        }

        Ok(BackendMessage::DataRow { values })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn ensure(buf: &Bytes, needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::TruncatedBuffer {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn read_u8(buf: &mut Bytes) -> Result<u8, DecodeError> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut Bytes) -> Result<u16, DecodeError> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

fn read_u32(buf: &mut Bytes) -> Result<u32, DecodeError> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

/// Read a null-terminated string from the buffer.
///
/// Lossy: invalid UTF-8 is replaced with U+FFFD rather than rejected, so
/// names and error text always decode but may differ from the bytes sent.
fn read_cstring(buf: &mut Bytes) -> Result<String, DecodeError> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::MissingTerminator)?;

    let s = std::str::from_utf8(&buf[..end])
        .map(|s| s.to_owned())
        .unwrap_or_else(|_| String::from_utf8_lossy(&buf[..end]).into_owned());

    buf.advance(end + 1); // Skip the null terminator
    Ok(s)
}

// ============================================================================
// Framing
// ============================================================================

/// Read one complete backend message.
///
/// Reads exactly the 5-byte header and then exactly the declared body. A
/// stream that ends anywhere inside a frame is an I/O error; no partial
/// message is ever returned.
pub async fn read_message<R>(reader: &mut R) -> VerticaResult<BackendMessage>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;

    let msg_type = header[0];
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    if !(4..=MAX_MESSAGE_LEN).contains(&length) {
        return Err(DecodeError::InvalidLength(length).into());
    }
    if !BackendMessage::is_known_tag(msg_type) {
        return Err(DecodeError::UnknownTag(msg_type).into());
    }

    // Memory follows the bytes that actually arrive, not the declared length
    let body_len = (length - 4) as usize;
    let mut body = Vec::with_capacity(body_len.min(INITIAL_BODY_CAPACITY));
    if body_len > 0 {
        (&mut *reader)
            .take(body_len as u64)
            .read_to_end(&mut body)
            .await?;
        if body.len() < body_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("frame body ended after {} of {} bytes", body.len(), body_len),
            )
            .into());
        }
    }

    Ok(BackendMessage::decode(msg_type, Bytes::from(body))?)
}

/// Write one frontend message and flush it.
pub async fn write_message<W>(writer: &mut W, msg: &FrontendMessage) -> VerticaResult<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = msg.encode();
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
