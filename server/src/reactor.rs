//! Single-control-loop servicing strategy.
//!
//! One task owns the registry outright, so no lock exists anywhere on this
//! path. Lightweight reader tasks own the connections' read halves and
//! forward readiness results (handshake completed, line arrived, peer gone)
//! as events over one channel; the control loop `select!`s over the
//! listener, that channel, and the cancellation token, and is the only code
//! that ever touches the table. Handling is strictly serialized: a slow
//! broadcast delays every other event, which is the price of lock freedom.

use std::io;
use std::net::SocketAddr;

use log::{info, warn};
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use shared::{
    read_trimmed_line, send_line, validate_name, MAX_LINE_LEN, MAX_NAME_LEN, SERVER_FULL_NOTICE,
};

use crate::registry::{BoxedWriter, Registry, SlotId, WRITE_TIMEOUT};

/// Readiness results forwarded to the control loop. Each carries the
/// occupancy id it was read under; by the time it is handled the occupancy
/// may be gone, in which case applying it is a no-op.
enum Event {
    /// Handshake line arrived and validated.
    Joined { id: SlotId, name: String },
    /// One chat line arrived.
    Line { id: SlotId, text: String },
    /// EOF or error; `fault` is `None` for a clean close.
    Closed {
        id: SlotId,
        fault: Option<io::Error>,
    },
}

/// Runs the server until `token` is cancelled.
pub async fn serve(
    listener: TcpListener,
    capacity: usize,
    token: CancellationToken,
) -> io::Result<()> {
    let mut registry = Registry::new(capacity);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    info!(
        "chat server listening on {} ({capacity} slots, single control loop)",
        listener.local_addr()?
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => admit(stream, addr, &mut registry, &events_tx, &token),
                Err(e) => warn!("accept failed: {e}"),
            },
            event = events.recv() => {
                // Never `None`: the loop keeps a sender alive.
                let Some(event) = event else { break };
                handle_event(&mut registry, event).await;
            }
        }
    }

    // Closing every connection unblocks nothing by itself; the reader tasks
    // observe the cancelled token at their next suspension point.
    let slots = registry.drain();
    info!("closed {} connection(s)", slots.len());
    drop(slots);
    Ok(())
}

fn admit(
    stream: TcpStream,
    addr: SocketAddr,
    registry: &mut Registry,
    events: &UnboundedSender<Event>,
    token: &CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    match registry.allocate(Box::new(write_half)) {
        Ok(id) => {
            info!("connection from {addr} assigned slot {id}");
            tokio::spawn(read_client(id, read_half, events.clone(), token.clone()));
        }
        Err(writer) => {
            warn!("rejecting {addr}: all slots in use");
            reject(writer, read_half);
        }
    }
}

/// Sends the full notice and closes the connection without ever making the
/// control loop wait on the rejected peer.
fn reject(mut writer: BoxedWriter, read_half: OwnedReadHalf) {
    tokio::spawn(async move {
        let _ = timeout(WRITE_TIMEOUT, send_line(&mut writer, SERVER_FULL_NOTICE)).await;
        drop(read_half);
    });
}

/// Owns one read half and forwards its readiness results. Touches no table
/// state, so the control loop stays the single writer of the registry.
async fn read_client(
    id: SlotId,
    read_half: OwnedReadHalf,
    events: UnboundedSender<Event>,
    token: CancellationToken,
) {
    let mut reader = BufReader::new(read_half);

    let name = tokio::select! {
        _ = token.cancelled() => return,
        line = read_trimmed_line(&mut reader, MAX_NAME_LEN) => line,
    };
    let name = match name {
        Ok(Some(raw)) => match validate_name(&raw) {
            Ok(name) => name.to_owned(),
            Err(e) => {
                let fault = io::Error::new(io::ErrorKind::InvalidData, e);
                let _ = events.send(Event::Closed {
                    id,
                    fault: Some(fault),
                });
                return;
            }
        },
        Ok(None) => {
            let _ = events.send(Event::Closed { id, fault: None });
            return;
        }
        Err(e) => {
            let _ = events.send(Event::Closed { id, fault: Some(e) });
            return;
        }
    };
    if events.send(Event::Joined { id, name }).is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            line = read_trimmed_line(&mut reader, MAX_LINE_LEN) => {
                let event = match line {
                    Ok(Some(text)) => Event::Line { id, text },
                    Ok(None) => Event::Closed { id, fault: None },
                    Err(e) => Event::Closed { id, fault: Some(e) },
                };
                let closing = matches!(event, Event::Closed { .. });
                if events.send(event).is_err() || closing {
                    return;
                }
            }
        }
    }
}

/// Applies one event to the table. The registry validates the occupancy id,
/// so events from a reader whose slot a failed fan-out already vacated fall
/// through without touching whoever holds the index now.
async fn handle_event(registry: &mut Registry, event: Event) {
    match event {
        Event::Joined { id, name } => {
            if !registry.set_name(id, name.clone()) {
                return;
            }
            info!("slot {id} logged in as {name:?}");
            registry
                .broadcast_notice(Some(id), &format!("{name} joined"))
                .await;
        }
        Event::Line { id, text } => {
            registry.broadcast(id, &text).await;
        }
        Event::Closed { id, fault } => {
            if let Some(e) = fault {
                warn!("slot {id}: connection error: {e}");
            }
            let name = registry.name(id).map(str::to_owned);
            if registry.release(id).is_some() {
                match name {
                    Some(name) => {
                        info!("slot {id} logged out ({name})");
                        registry
                            .broadcast_notice(None, &format!("{name} left"))
                            .await;
                    }
                    None => info!("slot {id} closed before handshake"),
                }
            }
        }
    }
}
