//! Worker-per-client servicing strategy.
//!
//! The accept loop allocates a slot for each connection and spawns a
//! dedicated worker task for it, mirroring a thread-per-client server. All
//! tasks share the registry behind one async mutex; the lock is held only
//! for table mutation and broadcast fan-out, never across a client read, so
//! one idle client cannot stall the others. Shutdown is cooperative: every
//! blocking point also waits on the cancellation token, and the coordinator
//! joins every worker before returning.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use shared::{
    read_trimmed_line, send_line, validate_name, MAX_LINE_LEN, MAX_NAME_LEN, SERVER_FULL_NOTICE,
};

use crate::registry::{BoxedWriter, Registry, SlotId, WRITE_TIMEOUT};

pub type SharedRegistry = Arc<Mutex<Registry>>;

/// Why a worker left its serving loop.
enum Close {
    PeerLeft,
    Fault,
    Shutdown,
}

/// Runs the server until `token` is cancelled. Accepted connections get a
/// slot and a worker task each; at capacity they get the full notice and
/// are closed.
pub async fn serve(
    listener: TcpListener,
    capacity: usize,
    token: CancellationToken,
) -> io::Result<()> {
    let registry: SharedRegistry = Arc::new(Mutex::new(Registry::new(capacity)));
    info!(
        "chat server listening on {} ({capacity} slots, worker per client)",
        listener.local_addr()?
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => admit(stream, addr, &registry, &token).await,
                Err(e) => warn!("accept failed: {e}"),
            },
        }
    }

    info!("no longer accepting, tearing down {} slot(s)", registry.lock().await.len());
    shutdown(&registry).await;
    Ok(())
}

async fn admit(
    stream: TcpStream,
    addr: SocketAddr,
    registry: &SharedRegistry,
    token: &CancellationToken,
) {
    let (read_half, write_half) = stream.into_split();
    let mut table = registry.lock().await;
    match table.allocate(Box::new(write_half)) {
        Ok(id) => {
            info!("connection from {addr} assigned slot {id}");
            let worker = tokio::spawn(run_worker(id, read_half, Arc::clone(registry), token.clone()));
            table.attach_worker(id, worker);
        }
        Err(writer) => {
            drop(table);
            warn!("rejecting {addr}: all slots in use");
            reject(writer, read_half);
        }
    }
}

/// Sends the full notice and closes the connection, off the accept path so
/// a slow rejected peer cannot delay admission of others.
fn reject(mut writer: BoxedWriter, read_half: OwnedReadHalf) {
    tokio::spawn(async move {
        let _ = timeout(WRITE_TIMEOUT, send_line(&mut writer, SERVER_FULL_NOTICE)).await;
        drop(read_half);
    });
}

/// Services one client: handshake, relay loop, teardown. Every table access
/// goes through the occupancy id, so a worker whose slot was dropped by a
/// failed fan-out can no longer affect whoever holds the index now.
async fn run_worker(
    id: SlotId,
    read_half: OwnedReadHalf,
    registry: SharedRegistry,
    token: CancellationToken,
) {
    let mut reader = BufReader::new(read_half);

    // Handshaking: the first line is the display name. Anything else ends
    // the connection before it ever appears in a broadcast.
    let name = tokio::select! {
        _ = token.cancelled() => None,
        line = read_trimmed_line(&mut reader, MAX_NAME_LEN) => match line {
            Ok(Some(raw)) => match validate_name(&raw) {
                Ok(name) => Some(name.to_owned()),
                Err(e) => {
                    warn!("slot {id}: bad display name: {e}");
                    None
                }
            },
            Ok(None) => {
                info!("slot {id}: closed before handshake");
                None
            }
            Err(e) => {
                warn!("slot {id}: handshake read failed: {e}");
                None
            }
        },
    };

    let Some(name) = name else {
        registry.lock().await.release(id);
        return;
    };

    {
        let mut table = registry.lock().await;
        if !table.set_name(id, name.clone()) {
            // Slot vanished underneath us (dropped by a failed fan-out).
            return;
        }
        info!("slot {id} logged in as {name:?}");
        table
            .broadcast_notice(Some(id), &format!("{name} joined"))
            .await;
    }

    // Serving: relay every line until the peer leaves, errors out, or the
    // server shuts down.
    let reason = loop {
        tokio::select! {
            _ = token.cancelled() => break Close::Shutdown,
            line = read_trimmed_line(&mut reader, MAX_LINE_LEN) => match line {
                Ok(Some(text)) => {
                    registry.lock().await.broadcast(id, &text).await;
                }
                Ok(None) => break Close::PeerLeft,
                Err(e) => {
                    warn!("slot {id} ({name}): read failed: {e}");
                    break Close::Fault;
                }
            },
        }
    };

    // Terminating: vacate the slot; only an ordinary departure gets a leave
    // notice. Release may find the occupancy already gone, which is fine.
    let mut table = registry.lock().await;
    let was_occupied = table.release(id).is_some();
    match reason {
        Close::Shutdown => {}
        Close::PeerLeft | Close::Fault => {
            if was_occupied {
                info!("slot {id} logged out ({name})");
                table.broadcast_notice(None, &format!("{name} left")).await;
            }
        }
    }
}

/// Drains the table, closes every connection, and joins every worker,
/// including those whose slots a failed fan-out already dropped.
async fn shutdown(registry: &SharedRegistry) {
    let (slots, mut workers) = {
        let mut table = registry.lock().await;
        (table.drain(), table.take_orphans())
    };
    for slot in slots {
        // Dropping the slot closes the write half; the worker observes the
        // cancellation at its next suspension point.
        if let Some(handle) = slot.into_worker() {
            workers.push(handle);
        }
    }
    for handle in workers {
        let _ = handle.await;
    }
    info!("all client workers joined");
}
