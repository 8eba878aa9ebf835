//! The dual-channel chat session: keyboard in, server traffic out, and the
//! other way around, until one side goes away.
//!
//! Two equivalent designs are provided. [`run_multiplexed`] services both
//! channels from one `select!` loop; [`run_split`] dedicates a task to each
//! direction and ties them together with a cancellation token so that
//! either task finishing (or Ctrl-C) terminates the other at its next
//! suspension point.
//!
//! Both keep a persistent [`Lines`](tokio::io::Lines) reader per channel.
//! Its `next_line` is cancellation safe: a branch that loses a `select!`
//! race leaves any partially read line buffered for the next iteration
//! instead of dropping it.

use std::io::{self, Write as _};

use log::warn;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use shared::{read_trimmed_line, send_line, validate_name, MAX_LINE_LEN, MAX_WIRE_LEN};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Local input reached EOF; we left voluntarily.
    LocalClosed,
    /// The server closed the connection.
    ServerClosed,
    /// Ctrl-C.
    Interrupted,
}

/// Prompts for a display name, validates it, and sends the handshake line.
/// Returns the accepted name.
pub async fn login(stream: &mut TcpStream) -> io::Result<String> {
    print!("Enter ID: ");
    io::stdout().flush()?;

    let mut input = BufReader::new(tokio::io::stdin());
    let raw = read_trimmed_line(&mut input, MAX_WIRE_LEN)
        .await?
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no display name given"))?;
    let name = validate_name(&raw)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        .to_owned();

    send_line(stream, &name).await?;
    Ok(name)
}

/// One loop multiplexing the server socket, local standard input, and the
/// interrupt signal.
pub async fn run_multiplexed(stream: TcpStream) -> io::Result<SessionEnd> {
    let (read_half, mut write_half) = stream.into_split();
    let mut server = BufReader::new(read_half).lines();
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(SessionEnd::Interrupted),
            line = server.next_line() => match line? {
                Some(text) => println!("{text}"),
                None => return Ok(SessionEnd::ServerClosed),
            },
            line = input.next_line() => match line? {
                Some(text) if text.len() > MAX_LINE_LEN => {
                    warn!("dropping over-long input line ({} bytes)", text.len());
                }
                Some(text) => send_line(&mut write_half, &text).await?,
                None => return Ok(SessionEnd::LocalClosed),
            },
        }
    }
}

/// One task per direction, tied together by a shared cancellation token.
pub async fn run_split(stream: TcpStream) -> io::Result<SessionEnd> {
    let (read_half, write_half) = stream.into_split();
    let token = CancellationToken::new();

    let mut send_task = tokio::spawn(pump_input(tokio::io::stdin(), write_half, token.clone()));
    let mut recv_task = tokio::spawn(pump_server(read_half, token.clone()));

    let end = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            token.cancel();
            let _ = (&mut send_task).await;
            let _ = (&mut recv_task).await;
            SessionEnd::Interrupted
        }
        res = &mut send_task => {
            let end = flatten(res)?;
            let _ = (&mut recv_task).await;
            end
        }
        res = &mut recv_task => {
            let end = flatten(res)?;
            let _ = (&mut send_task).await;
            end
        }
    };
    Ok(end)
}

fn flatten(res: Result<io::Result<SessionEnd>, tokio::task::JoinError>) -> io::Result<SessionEnd> {
    res.map_err(io::Error::other)?
}

/// Reads local input and sends it line by line. Finishing for any reason
/// cancels the token so the receive side terminates too.
async fn pump_input<R, W>(input: R, mut writer: W, token: CancellationToken) -> io::Result<SessionEnd>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let _stop = token.clone().drop_guard();
    let mut lines = BufReader::new(input).lines();

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(SessionEnd::Interrupted),
            line = lines.next_line() => match line? {
                Some(text) if text.len() > MAX_LINE_LEN => {
                    warn!("dropping over-long input line ({} bytes)", text.len());
                }
                Some(text) => send_line(&mut writer, &text).await?,
                None => return Ok(SessionEnd::LocalClosed),
            },
        }
    }
}

/// Reads server traffic and prints it. Finishing cancels the token so the
/// send side terminates too.
async fn pump_server<R>(server: R, token: CancellationToken) -> io::Result<SessionEnd>
where
    R: AsyncRead + Unpin,
{
    let _stop = token.clone().drop_guard();
    let mut lines = BufReader::new(server).lines();

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(SessionEnd::Interrupted),
            line = lines.next_line() => match line? {
                Some(text) => println!("{text}"),
                None => return Ok(SessionEnd::ServerClosed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};
    use tokio::time::timeout;

    use shared::read_trimmed_line;

    const STEP: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn partial_line_survives_a_lost_select_race() {
        let (mut near, far) = duplex(64);
        let mut lines = BufReader::new(far).lines();

        near.write_all(b"par").await.unwrap();
        // Cancel the read mid-line, as a competing select! branch would.
        let raced = timeout(Duration::from_millis(20), lines.next_line()).await;
        assert!(raced.is_err());

        near.write_all(b"tial\n").await.unwrap();
        let got = timeout(STEP, lines.next_line()).await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn input_lines_are_forwarded_to_the_writer() {
        let token = CancellationToken::new();
        let (mut input_tx, input_rx) = duplex(256);
        let (writer, wire_rx) = duplex(256);
        let pump = tokio::spawn(pump_input(input_rx, writer, token.clone()));

        input_tx.write_all(b"hello\n").await.unwrap();
        let mut wire = BufReader::new(wire_rx);
        let got = timeout(STEP, read_trimmed_line(&mut wire, MAX_WIRE_LEN))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("hello"));

        drop(input_tx);
        let end = timeout(STEP, pump).await.unwrap().unwrap().unwrap();
        assert_eq!(end, SessionEnd::LocalClosed);
    }

    #[tokio::test]
    async fn over_long_input_is_skipped_not_sent() {
        let token = CancellationToken::new();
        let (mut input_tx, input_rx) = duplex(4096);
        let (writer, wire_rx) = duplex(4096);
        let pump = tokio::spawn(pump_input(input_rx, writer, token.clone()));

        let long = "x".repeat(MAX_LINE_LEN + 1);
        input_tx.write_all(long.as_bytes()).await.unwrap();
        input_tx.write_all(b"\nok\n").await.unwrap();

        let mut wire = BufReader::new(wire_rx);
        let got = timeout(STEP, read_trimmed_line(&mut wire, MAX_WIRE_LEN))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.as_deref(), Some("ok"));

        drop(input_tx);
        timeout(STEP, pump).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn server_eof_takes_down_the_input_pump() {
        let token = CancellationToken::new();
        // Input never produces and never closes; only the cross-link can
        // take the send side down.
        let (_input_tx, input_rx) = duplex(64);
        let (writer, _wire_rx) = duplex(64);
        let (server_tx, server_rx) = duplex(64);

        let send_task = tokio::spawn(pump_input(input_rx, writer, token.clone()));
        let recv_task = tokio::spawn(pump_server(server_rx, token.clone()));

        drop(server_tx);
        let end = timeout(STEP, recv_task).await.unwrap().unwrap().unwrap();
        assert_eq!(end, SessionEnd::ServerClosed);
        let end = timeout(STEP, send_task).await.unwrap().unwrap().unwrap();
        assert_eq!(end, SessionEnd::Interrupted);
    }

    #[tokio::test]
    async fn input_eof_takes_down_the_server_pump() {
        let token = CancellationToken::new();
        let (input_tx, input_rx) = duplex(64);
        let (writer, _wire_rx) = duplex(64);
        // The server stays quiet; only the cross-link can end the receive
        // side.
        let (_server_tx, server_rx) = duplex(64);

        let send_task = tokio::spawn(pump_input(input_rx, writer, token.clone()));
        let recv_task = tokio::spawn(pump_server(server_rx, token.clone()));

        drop(input_tx);
        let end = timeout(STEP, send_task).await.unwrap().unwrap().unwrap();
        assert_eq!(end, SessionEnd::LocalClosed);
        let end = timeout(STEP, recv_task).await.unwrap().unwrap().unwrap();
        assert_eq!(end, SessionEnd::Interrupted);
    }
}
