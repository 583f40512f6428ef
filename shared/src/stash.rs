//! Packets that arrived while the caller was waiting for a different id.

use crate::packet::Packet;
use crate::request::RequestId;
use std::collections::VecDeque;

/// Bounded FIFO of received packets. When full, the oldest is dropped.
#[derive(Debug)]
pub struct StashQueue {
    packets: VecDeque<Packet>,
    capacity: usize,
}

impl StashQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a packet, returning the one evicted to make room, if any.
    /// A zero-capacity stash keeps nothing and hands the packet straight back.
    pub fn push(&mut self, packet: Packet) -> Option<Packet> {
        if self.capacity == 0 {
            return Some(packet);
        }

        let evicted = if self.packets.len() >= self.capacity {
            self.packets.pop_front()
        } else {
            None
        };
        self.packets.push_back(packet);
        evicted
    }

    /// Oldest packet, whatever its id.
    pub fn pop_front(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Removes and returns the oldest packet carrying `id`.
    /// [`RequestId::NONE`] matches any packet.
    pub fn take_matching(&mut self, id: RequestId) -> Option<Packet> {
        if id == RequestId::NONE {
            return self.pop_front();
        }

        let index = self.packets.iter().position(|p| p.request_id() == id)?;
        self.packets.remove(index)
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
