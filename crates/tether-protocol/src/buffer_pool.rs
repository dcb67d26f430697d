use std::ops::{Deref, DerefMut};

use tether_core::error::{ErrorKind, Result};

use crate::{message_buffer::MessageBuffer, send_option::SendMode};

/// A message buffer rented from a [`MessageBufferPool`].
///
/// Dereferences to the buffer. Hand it back with
/// [`MessageBufferPool::release`]; a lease that is simply dropped frees its
/// buffer and its slot is reclaimed on the next release cycle.
#[derive(Debug)]
pub struct Lease {
    buffer: MessageBuffer,
    slot: usize,
    generation: u32,
}

impl Deref for Lease {
    type Target = MessageBuffer;

    fn deref(&self) -> &MessageBuffer {
        &self.buffer
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut MessageBuffer {
        &mut self.buffer
    }
}

#[derive(Debug)]
struct Slot {
    buffer: Option<MessageBuffer>,
    generation: u32,
    checked_out: bool,
}

/// An arena of reusable message buffers.
///
/// Slots carry a generation counter so a stale release (a lease from an
/// earlier cycle of the slot) is a no-op instead of corrupting the free
/// list. Rented buffers come back cleared, with their send-option preamble
/// re-applied.
#[derive(Debug)]
pub struct MessageBufferPool {
    slots: Vec<Slot>,
    free: Vec<usize>,
    send_mode: Option<SendMode>,
    buffer_capacity: usize,
}

impl MessageBufferPool {
    /// Creates a pool whose buffers are constructed with the given send
    /// mode (None pools headerless buffers).
    pub fn new(send_mode: Option<SendMode>, buffer_capacity: usize) -> Self {
        Self { slots: Vec::new(), free: Vec::new(), send_mode, buffer_capacity }
    }

    fn make_buffer(&self) -> MessageBuffer {
        match self.send_mode {
            Some(mode) => MessageBuffer::with_send_mode(mode, self.buffer_capacity),
            None => MessageBuffer::new(self.buffer_capacity),
        }
    }

    /// Rents a buffer, reusing a free slot or growing the arena.
    pub fn rent(&mut self) -> Result<Lease> {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                if slot.checked_out {
                    return Err(ErrorKind::BufferAlreadyCheckedOut);
                }
                let buffer = match slot.buffer.take() {
                    Some(buffer) => buffer,
                    None => return Err(ErrorKind::BufferAlreadyCheckedOut),
                };
                slot.checked_out = true;
                Ok(Lease { buffer, slot: index, generation: slot.generation })
            }
            None => {
                let index = self.slots.len();
                self.slots.push(Slot { buffer: None, generation: 0, checked_out: true });
                Ok(Lease { buffer: self.make_buffer(), slot: index, generation: 0 })
            }
        }
    }

    /// Returns a lease to the pool. The buffer is cleared and its preamble
    /// re-applied. Stale leases (generation mismatch, or a slot that is not
    /// checked out) are a no-op.
    pub fn release(&mut self, lease: Lease) {
        let Lease { mut buffer, slot, generation } = lease;
        let entry = match self.slots.get_mut(slot) {
            Some(entry) => entry,
            None => return,
        };
        if !entry.checked_out || entry.generation != generation {
            return;
        }
        if buffer.clear().is_err() {
            // views are never pooled
            return;
        }
        entry.buffer = Some(buffer);
        entry.checked_out = false;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(slot);
    }

    /// Number of buffers ready to rent without allocating.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total slots in the arena, rented or free.
    pub fn slots(&self) -> usize {
        self.slots.len()
    }
}
