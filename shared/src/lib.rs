//! Wire protocol shared between the chat server and client.
//!
//! The protocol is plain text over TCP. A connection starts with a single
//! handshake line carrying the client's display name; every later line is a
//! chat message. Messages are newline-delimited: TCP gives no message
//! boundaries, so readers must reassemble lines regardless of how the bytes
//! were chunked on the wire. Chat traffic fans out to the other participants
//! as `"<name>> <text>"`; server-generated notices are prefixed with `"* "`.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Port used when none is given on the command line.
pub const DEFAULT_PORT: u16 = 7979;

/// Default number of client slots on the server.
pub const MAX_CLIENTS: usize = 5;

/// Upper bound on a display name, in bytes, after trimming.
pub const MAX_NAME_LEN: usize = 32;

/// Upper bound on a single chat message payload, in bytes.
pub const MAX_LINE_LEN: usize = 256;

/// Longest line a client can receive: name, `"> "` separator, payload.
pub const MAX_WIRE_LEN: usize = MAX_NAME_LEN + 2 + MAX_LINE_LEN;

/// Sent to a connection rejected because every slot is occupied.
pub const SERVER_FULL_NOTICE: &str = "Server is full";

/// Violations of the wire protocol.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("display name is empty")]
    EmptyName,
    #[error("display name is {0} bytes, limit is {MAX_NAME_LEN}")]
    NameTooLong(usize),
    #[error("line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Checks a raw handshake line and returns the trimmed display name.
pub fn validate_name(raw: &str) -> Result<&str, ProtocolError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ProtocolError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ProtocolError::NameTooLong(name.len()));
    }
    Ok(name)
}

/// Formats a chat line the way recipients see it.
pub fn format_broadcast(name: &str, text: &str) -> String {
    format!("{name}> {text}")
}

/// Formats a server-generated notice (joins, leaves).
pub fn format_notice(text: &str) -> String {
    format!("* {text}")
}

/// Writes one newline-terminated line and flushes it.
pub async fn send_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Reads one line of at most `limit` payload bytes.
///
/// Returns `Ok(None)` on a clean EOF before any byte of the line arrived.
/// The trailing newline (and an optional carriage return) is stripped. A
/// line longer than `limit` is an [`io::ErrorKind::InvalidData`] error
/// wrapping [`ProtocolError::LineTooLong`]; the reader is left mid-line, so
/// callers should drop the connection rather than keep parsing.
pub async fn read_trimmed_line<R>(reader: &mut R, limit: usize) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    // The cap leaves room for "\r\n" so a maximal line still parses.
    let mut limited = (&mut *reader).take((limit + 2) as u64);
    let mut line = String::new();
    let n = limited.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    let text = line.trim_end_matches('\n').trim_end_matches('\r');
    if text.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            ProtocolError::LineTooLong(limit),
        ));
    }
    Ok(Some(text.to_string()))
}
