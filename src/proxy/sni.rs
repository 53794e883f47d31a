//! SNI extraction from a TLS ClientHello.
//!
//! TCP gives no message boundaries, so the TLS proxy must consume exactly the
//! records that carry the ClientHello, learn the server name, and keep every
//! byte it consumed so it can replay them to the real server.
//!
//! This module parses the wire format directly:
//!
//! ```text
//! record:     type(1)=22 | version(2) | length(2) | fragment
//! handshake:  type(1)=1  | length(3)  | ClientHello
//! hello:      version(2) | random(32) | session_id<u8> | cipher_suites<u16>
//!             | compression<u8> | extensions<u16>
//! extension:  type(2)    | length(2)  | data
//! sni (0):    list<u16> of { name_type(1)=0 | host_name<u16> }
//! ```
//!
//! No handshake state machine is involved, so nothing ever has to be aborted
//! and no certificate can leak to the client.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Length of a TLS record header.
pub const RECORD_HEADER_LEN: usize = 5;

/// Upper bound on the handshake bytes buffered while sniffing.
pub const MAX_HANDSHAKE_LEN: usize = 64 * 1024;

const CONTENT_TYPE_HANDSHAKE: u8 = 22;
const HANDSHAKE_CLIENT_HELLO: u8 = 1;
const HANDSHAKE_HEADER_LEN: usize = 4;
const EXTENSION_SERVER_NAME: u16 = 0;
const NAME_TYPE_HOST_NAME: u8 = 0;

/// Reasons a server name could not be extracted.
#[derive(Debug, Error)]
pub enum SniError {
    /// Reading from the client failed (including early EOF).
    #[error("I/O error while reading ClientHello: {0}")]
    Io(#[from] io::Error),

    /// The first record is not a handshake record.
    #[error("Not a TLS handshake record (content type {0})")]
    NotHandshake(u8),

    /// The handshake message is not a ClientHello.
    #[error("Handshake message is not a ClientHello (type {0})")]
    NotClientHello(u8),

    /// The ClientHello does not fit in the sniffing buffer.
    #[error("ClientHello exceeds {MAX_HANDSHAKE_LEN} bytes")]
    TooLarge,

    /// The ClientHello is truncated or inconsistent.
    #[error("Malformed ClientHello: {0}")]
    Malformed(&'static str),

    /// The ClientHello has no usable server_name extension.
    #[error("ClientHello carries no server name")]
    MissingServerName,
}

/// Reader that keeps a copy of every byte read through it.
///
/// Bytes taken from the socket cannot be pushed back, so the recording is the
/// only way to hand them to the real server afterwards.
#[derive(Debug)]
pub struct RecordingReader<R> {
    inner: R,
    recorded: Vec<u8>,
}

impl<R> RecordingReader<R> {
    /// Wrap `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
        }
    }

    /// Bytes read so far.
    pub fn recorded(&self) -> &[u8] {
        &self.recorded
    }

    /// Give back the inner reader and the recorded bytes.
    pub fn into_parts(self) -> (R, Vec<u8>) {
        (self.inner, self.recorded)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for RecordingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.recorded.extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

/// Read TLS records from `reader` until a whole ClientHello is available and
/// return its server name.
///
/// Only whole records are consumed, so after a successful return the reader
/// sits exactly on the next record boundary. The handshake message may span
/// several records.
pub async fn sniff_server_name<R>(reader: &mut R) -> Result<String, SniError>
where
    R: AsyncRead + Unpin,
{
    let mut handshake: Vec<u8> = Vec::new();

    loop {
        let mut header = [0u8; RECORD_HEADER_LEN];
        reader.read_exact(&mut header).await?;

        if header[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(SniError::NotHandshake(header[0]));
        }

        let fragment_len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if fragment_len == 0 {
            return Err(SniError::Malformed("empty handshake record"));
        }
        if handshake.len() + fragment_len > MAX_HANDSHAKE_LEN {
            return Err(SniError::TooLarge);
        }

        let start = handshake.len();
        handshake.resize(start + fragment_len, 0);
        reader.read_exact(&mut handshake[start..]).await?;

        if handshake.len() < HANDSHAKE_HEADER_LEN {
            continue;
        }
        if handshake[0] != HANDSHAKE_CLIENT_HELLO {
            return Err(SniError::NotClientHello(handshake[0]));
        }

        let body_len = u32::from_be_bytes([0, handshake[1], handshake[2], handshake[3]]) as usize;
        if HANDSHAKE_HEADER_LEN + body_len > MAX_HANDSHAKE_LEN {
            return Err(SniError::TooLarge);
        }
        if handshake.len() >= HANDSHAKE_HEADER_LEN + body_len {
            let body = &handshake[HANDSHAKE_HEADER_LEN..HANDSHAKE_HEADER_LEN + body_len];
            return parse_client_hello(body);
        }
    }
}

/// Extract the host name from a ClientHello body (handshake header removed).
pub fn parse_client_hello(body: &[u8]) -> Result<String, SniError> {
    let mut hello = Cursor::new(body);

    hello.take(2)?; // legacy_version
    hello.take(32)?; // random
    hello.vec_u8()?; // legacy_session_id
    hello.vec_u16()?; // cipher_suites
    hello.vec_u8()?; // legacy_compression_methods

    if hello.is_empty() {
        // SSLv3-style hello without extensions.
        return Err(SniError::MissingServerName);
    }

    let mut extensions = Cursor::new(hello.vec_u16()?);
    while !extensions.is_empty() {
        let ext_type = extensions.u16()?;
        let data = extensions.vec_u16()?;
        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name_list(data);
        }
    }

    Err(SniError::MissingServerName)
}

fn parse_server_name_list(data: &[u8]) -> Result<String, SniError> {
    let mut ext = Cursor::new(data);
    let mut list = Cursor::new(ext.vec_u16()?);

    while !list.is_empty() {
        let name_type = list.u8()?;
        let name = list.vec_u16()?;
        if name_type != NAME_TYPE_HOST_NAME {
            continue;
        }
        if name.is_empty() {
            return Err(SniError::MissingServerName);
        }
        return std::str::from_utf8(name)
            .ok()
            .filter(|n| n.is_ascii())
            .map(str::to_string)
            .ok_or(SniError::Malformed("server name is not ASCII"));
    }

    Err(SniError::MissingServerName)
}

/// Bounds-checked reader over a byte slice.
struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SniError> {
        if self.buf.len() < n {
            return Err(SniError::Malformed("truncated ClientHello"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, SniError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SniError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn vec_u8(&mut self) -> Result<&'a [u8], SniError> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    fn vec_u16(&mut self) -> Result<&'a [u8], SniError> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}
