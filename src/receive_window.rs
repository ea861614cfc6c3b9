use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::sequence::PacketSeq;

/// Bounded FIFO of the most recently accepted sequence numbers, used for
///  duplicate suppression on the receive path.
///
/// Membership checks are by exact equality, which is safe against sequence
///  wrap-around as long as the capacity stays many orders of magnitude below
///  the 2^32 sequence space.
pub struct ReceiveWindow {
    capacity: usize,
    order: VecDeque<PacketSeq>,
    members: FxHashSet<PacketSeq>,
}

impl ReceiveWindow {
    pub fn new(capacity: usize) -> ReceiveWindow {
        assert!(capacity > 0);
        ReceiveWindow {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: FxHashSet::default(),
        }
    }

    pub fn contains(&self, sequence: PacketSeq) -> bool {
        self.members.contains(&sequence)
    }

    /// Records an accepted sequence, evicting the oldest entry once the
    ///  window is full. Re-inserting a present sequence keeps its original
    ///  position.
    pub fn insert(&mut self, sequence: PacketSeq) {
        if !self.members.insert(sequence) {
            return;
        }
        self.order.push_back(sequence);

        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                trace!("receive window full - evicting #{}", evicted);
                self.members.remove(&evicted);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
