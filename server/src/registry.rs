//! Fixed-capacity slot table for connected chat participants.
//!
//! The registry owns the outbound half of every client connection. Each
//! occupancy is addressed by a [`SlotId`]: a small stable index plus a
//! generation that is bumped whenever the index is vacated. Every operation
//! validates the generation, so a handle kept by a stale actor (say, a
//! worker whose slot a failed fan-out already dropped) stays a safe no-op
//! even after the index has a new occupant. The registry itself is not
//! synchronized; the worker strategy wraps it in a mutex, the reactor
//! strategy owns it from a single control loop.

use std::fmt;
use std::time::Duration;

use log::{debug, warn};
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use shared::{format_broadcast, format_notice, send_line};

/// Bound on a single fan-out write, so one wedged peer cannot stall the
/// relay for everyone else. A recipient that exceeds it is dropped.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound byte stream to one client. Boxed so tests can substitute
/// in-memory pipes for TCP write halves.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Handle to one occupancy of a slot. Two occupants of the same index get
/// different generations, so a handle outliving its occupancy stops
/// matching and cannot alias the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    index: usize,
    gen: u64,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.gen)
    }
}

/// One connected participant: the owned write half, the display name once
/// the handshake completed, and (worker strategy only) the servicing task.
pub struct Slot {
    writer: BoxedWriter,
    name: Option<String>,
    worker: Option<JoinHandle<()>>,
}

impl Slot {
    /// Takes the servicing task handle for joining during teardown.
    /// Dropping the rest of the slot closes the connection's write half.
    pub fn into_worker(self) -> Option<JoinHandle<()>> {
        self.worker
    }
}

/// The slot table. Capacity is fixed at construction; `allocate` hands out
/// the lowest vacant index under a fresh generation and `release` vacates
/// it again.
pub struct Registry {
    slots: Vec<Option<Slot>>,
    gens: Vec<u64>,
    // Servicing tasks of slots that fan-out dropped, kept for teardown.
    orphans: Vec<JoinHandle<()>>,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            gens: vec![0; capacity],
            orphans: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        if self.gens.get(id.index) != Some(&id.gen) {
            return None;
        }
        self.slots[id.index].as_mut()
    }

    /// Claims the lowest vacant slot for `writer` and returns its id.
    /// At capacity the writer is handed back so the caller can still send
    /// the rejection notice over it.
    pub fn allocate(&mut self, writer: BoxedWriter) -> Result<SlotId, BoxedWriter> {
        match self.slots.iter().position(|s| s.is_none()) {
            Some(index) => {
                self.slots[index] = Some(Slot {
                    writer,
                    name: None,
                    worker: None,
                });
                Ok(SlotId {
                    index,
                    gen: self.gens[index],
                })
            }
            None => Err(writer),
        }
    }

    /// Records the display name after a successful handshake. Returns false
    /// if the occupancy `id` refers to is already gone.
    pub fn set_name(&mut self, id: SlotId, name: String) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.name = Some(name);
                true
            }
            None => false,
        }
    }

    pub fn name(&self, id: SlotId) -> Option<&str> {
        if self.gens.get(id.index) != Some(&id.gen) {
            return None;
        }
        self.slots[id.index].as_ref()?.name.as_deref()
    }

    /// Attaches the servicing task handle to a live occupancy (worker
    /// strategy). No-op if the occupancy is already gone.
    pub fn attach_worker(&mut self, id: SlotId, handle: JoinHandle<()>) {
        if let Some(slot) = self.slot_mut(id) {
            slot.worker = Some(handle);
        }
    }

    /// Vacates the occupancy `id` refers to. Idempotent: a stale id (the
    /// slot was already vacated, or the index has a new occupant) returns
    /// `None` and changes nothing. Dropping the returned slot closes the
    /// connection.
    pub fn release(&mut self, id: SlotId) -> Option<Slot> {
        self.slot_mut(id)?;
        self.gens[id.index] += 1;
        self.slots[id.index].take()
    }

    /// Empties the whole table, returning the slots for teardown.
    pub fn drain(&mut self) -> Vec<Slot> {
        let mut slots = Vec::new();
        for index in 0..self.slots.len() {
            if let Some(slot) = self.slots[index].take() {
                self.gens[index] += 1;
                slots.push(slot);
            }
        }
        slots
    }

    /// Hands back the servicing tasks of slots that fan-out dropped, so
    /// teardown can join them alongside the drained ones.
    pub fn take_orphans(&mut self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut self.orphans)
    }

    /// Relays a chat line from `sender` to every other occupied slot.
    ///
    /// A stale or unnamed sender is a no-op. Per-recipient failures are
    /// isolated: a failed or timed-out write releases that recipient's
    /// slot and delivery continues. Returns the ids that were dropped.
    pub async fn broadcast(&mut self, sender: SlotId, text: &str) -> Vec<SlotId> {
        let Some(name) = self.name(sender).map(str::to_owned) else {
            return Vec::new();
        };
        let line = format_broadcast(&name, text);
        debug!("broadcasting from slot {sender}: {line}");
        self.fan_out(Some(sender), &line).await
    }

    /// Relays a server notice to every occupied slot except `exclude`.
    pub async fn broadcast_notice(&mut self, exclude: Option<SlotId>, text: &str) -> Vec<SlotId> {
        let line = format_notice(text);
        debug!("notice: {line}");
        self.fan_out(exclude, &line).await
    }

    async fn fan_out(&mut self, exclude: Option<SlotId>, line: &str) -> Vec<SlotId> {
        let mut dropped = Vec::new();
        for index in 0..self.slots.len() {
            let id = SlotId {
                index,
                gen: self.gens[index],
            };
            // A stale exclude id matches nothing, so a new occupant of the
            // same index is not shielded by accident.
            if Some(id) == exclude {
                continue;
            }
            let Some(slot) = self.slots[index].as_mut() else {
                continue;
            };
            let delivered = match timeout(WRITE_TIMEOUT, send_line(&mut slot.writer, line)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!("dropping slot {id}: write failed: {e}");
                    false
                }
                Err(_) => {
                    warn!("dropping slot {id}: write timed out");
                    false
                }
            };
            if !delivered {
                self.gens[index] += 1;
                if let Some(slot) = self.slots[index].take() {
                    if let Some(handle) = slot.worker {
                        self.orphans.push(handle);
                    }
                }
                dropped.push(id);
            }
        }
        dropped
    }
}
