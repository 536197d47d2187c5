//! Per-neighbor transmit queue (C3).
//!
//! Grounded in full on `tsch-queue.c`: every public operation below maps
//! onto a `tsch_queue_*` function there. A fixed pool of `QueuedPacket`s
//! backs every neighbor's ring, mirroring the original's separation
//! between `ringbufindex` (atomic index bookkeeping only) and `queuebuf`
//! (the actual frame storage) — the same separation is why `Ring<N>`
//! below stores pool indices, not packets, and why packets are freed back
//! to a shared pool rather than owned per-neighbor.

use core::sync::atomic::{AtomicU16, Ordering};

use heapless::Vec;

use super::lock::Lock;
use super::types::{LinkAddress, TxResult};

pub const MAX_FRAME_LEN: usize = 128;

pub type SentCallback = fn(result: TxResult, transmissions: u8, ctx: u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The neighbor table has no free slot.
    NeighborTableFull,
    /// The packet pool has no free slot.
    PoolExhausted,
    /// This neighbor's ring is at capacity.
    RingFull,
    /// The global lock could not be acquired.
    LockContended,
    /// The frame is larger than `MAX_FRAME_LEN`.
    FrameTooLarge,
}

/// A single outstanding outgoing frame (spec §3 `Packet`).
pub struct QueuedPacket {
    frame: Vec<u8, MAX_FRAME_LEN>,
    pub dest: LinkAddress,
    pub sent_cb: Option<SentCallback>,
    pub ctx: u32,
    pub transmissions: u8,
    pub last_result: TxResult,
}

impl QueuedPacket {
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut Vec<u8, MAX_FRAME_LEN> {
        &mut self.frame
    }
}

/// Lock-free single-producer/single-consumer ring of packet-pool indices.
/// `N` must be a power of two (spec invariant 3, §3).
pub struct Ring<const N: usize> {
    slots: [u16; N],
    head: AtomicU16,
    tail: AtomicU16,
}

impl<const N: usize> Ring<N> {
    pub fn new() -> Self {
        debug_assert!(N.is_power_of_two(), "ring capacity must be a power of two");
        Self {
            slots: [0u16; N],
            head: AtomicU16::new(0),
            tail: AtomicU16::new(0),
        }
    }

    fn mask(i: u16) -> usize {
        (i as usize) & (N - 1)
    }

    pub fn len(&self) -> usize {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        t.wrapping_sub(h) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Non-destructive peek-put reservation check; the actual publish is
    /// the `tail` store below, which is the linearization point.
    pub fn push(&mut self, value: u16) -> Result<(), ()> {
        if self.is_full() {
            return Err(());
        }
        let t = self.tail.load(Ordering::Acquire);
        self.slots[Self::mask(t)] = value;
        self.tail.store(t.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Peek the head without removing it.
    pub fn peek(&self) -> Option<u16> {
        if self.is_empty() {
            return None;
        }
        let h = self.head.load(Ordering::Acquire);
        Some(self.slots[Self::mask(h)])
    }

    /// Atomic index advance; must only be called outside the ISR.
    pub fn pop(&mut self) -> Option<u16> {
        let v = self.peek()?;
        let h = self.head.load(Ordering::Acquire);
        self.head.store(h.wrapping_add(1), Ordering::Release);
        Some(v)
    }
}

/// Fixed pool backing every neighbor's queued packets. Pool size must be
/// >= the sum of all neighbor ring capacities.
pub struct PacketPool<const POOL: usize> {
    slots: [Option<QueuedPacket>; POOL],
    free: Vec<u16, POOL>,
}

impl<const POOL: usize> PacketPool<POOL> {
    pub fn new() -> Self {
        let mut free = Vec::new();
        for i in (0..POOL as u16).rev() {
            let _ = free.push(i);
        }
        Self {
            slots: core::array::from_fn(|_| None),
            free,
        }
    }

    pub fn alloc(&mut self, packet: QueuedPacket) -> Result<u16, QueuedPacket> {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(packet);
                Ok(idx)
            }
            None => Err(packet),
        }
    }

    pub fn get(&self, idx: u16) -> Option<&QueuedPacket> {
        self.slots[idx as usize].as_ref()
    }

    pub fn get_mut(&mut self, idx: u16) -> Option<&mut QueuedPacket> {
        self.slots[idx as usize].as_mut()
    }

    pub fn free(&mut self, idx: u16) -> Option<QueuedPacket> {
        let p = self.slots[idx as usize].take();
        if p.is_some() {
            let _ = self.free.push(idx);
        }
        p
    }
}

/// Dedicated LCG for CSMA backoff windows (multiplier 1103515245,
/// increment 12345), independent of any global RNG. Always draws via
/// mask-and-bound, never modulo a non-power-of-two, per DESIGN.md's
/// resolution of spec §9's randomisation open question.
pub struct Lcg(u32);

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Self(seed)
    }

    /// Draw a value in `0..=mask`, where `mask` should be `2^n - 1`.
    pub fn next_masked(&mut self, mask: u16) -> u16 {
        self.0 = self.0.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (((self.0 / 65536) % 32768) as u16) & mask
    }
}

/// One known MAC peer (spec §3 `Neighbor`).
pub struct Neighbor<const RING: usize> {
    pub address: LinkAddress,
    pub is_broadcast: bool,
    pub is_time_source: bool,
    pub backoff_exponent: u8,
    pub backoff_window: u8,
    pub tx_links_count: u8,
    pub dedicated_tx_links_count: u8,
    ring: Ring<RING>,
}

impl<const RING: usize> Neighbor<RING> {
    fn new(address: LinkAddress, is_broadcast: bool, min_be: u8) -> Self {
        Self {
            address,
            is_broadcast,
            is_time_source: false,
            backoff_exponent: min_be,
            backoff_window: 0,
            tx_links_count: 0,
            dedicated_tx_links_count: 0,
            ring: Ring::new(),
        }
    }

    fn has_tx_link(&self) -> bool {
        self.tx_links_count > 0
    }
}

/// The per-neighbor queue manager (C3).
pub struct Queue<const NEIGHBORS: usize, const RING: usize, const POOL: usize> {
    neighbors: Vec<Neighbor<RING>, NEIGHBORS>,
    pool: PacketPool<POOL>,
    lcg: Lcg,
    min_be: u8,
    max_be: u8,
}

impl<const NEIGHBORS: usize, const RING: usize, const POOL: usize> Queue<NEIGHBORS, RING, POOL> {
    /// `seed` drives the dedicated LCG and should come from the node's
    /// own address, exactly as `tsch_queue_init` seeds from the local
    /// link-layer address.
    pub fn new(seed: u32, min_be: u8, max_be: u8) -> Self {
        let mut neighbors = Vec::new();
        let _ = neighbors.push(Neighbor::new(LinkAddress::BROADCAST, true, min_be));
        let _ = neighbors.push(Neighbor::new(LinkAddress::EB, true, min_be));
        Self {
            neighbors,
            pool: PacketPool::new(),
            lcg: Lcg::new(seed),
            min_be,
            max_be,
        }
    }

    pub fn broadcast_index(&self) -> usize {
        0
    }

    pub fn eb_index(&self) -> usize {
        1
    }

    pub fn get_neighbor(&self, addr: LinkAddress) -> Option<usize> {
        self.neighbors.iter().position(|n| n.address == addr)
    }

    pub fn neighbor(&self, idx: usize) -> Option<&Neighbor<RING>> {
        self.neighbors.get(idx)
    }

    pub fn get_time_source(&self) -> Option<usize> {
        self.neighbors.iter().position(|n| n.is_time_source)
    }

    /// Lookup-or-allocate. Requires the global lock be acquirable; fails
    /// with `LockContended` or `NeighborTableFull` otherwise.
    pub fn add_neighbor(&mut self, addr: LinkAddress, lock: &Lock) -> Result<usize, QueueError> {
        if let Some(idx) = self.get_neighbor(addr) {
            return Ok(idx);
        }
        if !lock.try_lock() {
            return Err(QueueError::LockContended);
        }
        let is_broadcast = addr.is_broadcast() || addr.is_eb();
        let result = self
            .neighbors
            .push(Neighbor::new(addr, is_broadcast, self.min_be))
            .map(|_| self.neighbors.len() - 1)
            .map_err(|_| QueueError::NeighborTableFull);
        lock.release();
        result
    }

    /// Flips `is_time_source` on the old and new time source. Returns
    /// whether a change occurred. Not permitted for a coordinator (a
    /// coordinator is always its own time source and never adopts one).
    pub fn update_time_source(
        &mut self,
        new_idx: Option<usize>,
        is_coordinator: bool,
        lock: &Lock,
    ) -> Result<bool, QueueError> {
        if is_coordinator {
            return Ok(false);
        }
        let old_idx = self.get_time_source();
        if old_idx == new_idx {
            return Ok(false);
        }
        if !lock.try_lock() {
            return Err(QueueError::LockContended);
        }
        if let Some(old) = old_idx {
            self.neighbors[old].is_time_source = false;
        }
        if let Some(new) = new_idx {
            self.neighbors[new].is_time_source = true;
        }
        lock.release();
        Ok(true)
    }

    /// Enqueue `frame` addressed to `addr` (routed to the broadcast
    /// virtual neighbor if `addr` is the well-known broadcast address).
    /// Allocates a pool packet and reserves a ring slot; on any failure,
    /// releases any partial allocation and fails cleanly.
    pub fn add_packet(
        &mut self,
        addr: LinkAddress,
        frame: &[u8],
        sent_cb: Option<SentCallback>,
        ctx: u32,
    ) -> Result<(), QueueError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(QueueError::FrameTooLarge);
        }
        let idx = self.get_neighbor(addr).ok_or(QueueError::NeighborTableFull)?;
        if self.neighbors[idx].ring.is_full() {
            return Err(QueueError::RingFull);
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(frame).map_err(|_| QueueError::FrameTooLarge)?;
        let packet = QueuedPacket {
            frame: buf,
            dest: addr,
            sent_cb,
            ctx,
            transmissions: 0,
            last_result: TxResult::Deferred,
        };

        let pool_idx = self.pool.alloc(packet).map_err(|_| QueueError::PoolExhausted)?;
        if self.neighbors[idx].ring.push(pool_idx).is_err() {
            self.pool.free(pool_idx);
            return Err(QueueError::RingFull);
        }
        Ok(())
    }

    /// Peek the head packet for `neighbor_idx`, masked by shared-link
    /// backoff: on a shared link the head is hidden unless
    /// `backoff_window == 0`.
    pub fn get_packet_for(&self, neighbor_idx: usize, is_shared_link: bool) -> Option<u16> {
        let n = self.neighbors.get(neighbor_idx)?;
        if is_shared_link && n.backoff_window != 0 {
            return None;
        }
        n.ring.peek()
    }

    pub fn packet(&self, pool_idx: u16) -> Option<&QueuedPacket> {
        self.pool.get(pool_idx)
    }

    pub fn packet_mut(&mut self, pool_idx: u16) -> Option<&mut QueuedPacket> {
        self.pool.get_mut(pool_idx)
    }

    /// Linear first-match scan over non-broadcast neighbors with no
    /// dedicated TX link, returning the first pending head that passes
    /// the shared-link mask. This follows `tsch-queue.c`'s actual
    /// behavior (a scan from a fixed starting point), not its own
    /// "round-robin" comment — see DESIGN.md.
    pub fn get_unicast_packet_for_any(&self, is_shared_link: bool) -> Option<(usize, u16)> {
        for (idx, n) in self.neighbors.iter().enumerate() {
            if n.is_broadcast || n.has_tx_link() {
                continue;
            }
            if is_shared_link && n.backoff_window != 0 {
                continue;
            }
            if let Some(pool_idx) = n.ring.peek() {
                return Some((idx, pool_idx));
            }
        }
        None
    }

    /// Atomic index advance; must only be called outside the ISR.
    pub fn remove_head(&mut self, neighbor_idx: usize) -> Option<u16> {
        self.neighbors.get_mut(neighbor_idx)?.ring.pop()
    }

    /// Drop the packet pool entry referenced by `pool_idx`.
    pub fn free_packet(&mut self, pool_idx: u16) -> Option<QueuedPacket> {
        self.pool.free(pool_idx)
    }

    /// Drop any neighbor that is not broadcast, not the time source, has
    /// zero TX links, and has an empty queue.
    pub fn free_unused_neighbors(&mut self, lock: &Lock) -> Result<(), QueueError> {
        if !lock.try_lock() {
            return Err(QueueError::LockContended);
        }
        let mut i = 0;
        while i < self.neighbors.len() {
            let n = &self.neighbors[i];
            let keep = n.is_broadcast || n.is_time_source || n.has_tx_link() || !n.ring.is_empty();
            if keep {
                i += 1;
            } else {
                self.neighbors.swap_remove(i);
            }
        }
        lock.release();
        Ok(())
    }

    /// Drain every queue, invoking each packet's callback with `Err`.
    pub fn flush_all_nbr_queues(&mut self) {
        for n in self.neighbors.iter_mut() {
            while let Some(pool_idx) = n.ring.pop() {
                if let Some(packet) = self.pool.free(pool_idx) {
                    if let Some(cb) = packet.sent_cb {
                        cb(TxResult::Err, packet.transmissions, packet.ctx);
                    }
                }
            }
        }
    }

    pub fn backoff_reset(&mut self, neighbor_idx: usize) {
        if let Some(n) = self.neighbors.get_mut(neighbor_idx) {
            n.backoff_exponent = self.min_be;
            n.backoff_window = 0;
        }
    }

    /// `exponent <- min(exponent+1, max_be)`; `window <-
    /// uniform(0, 2^exponent - 1) + 1` (the +1 compensates for the
    /// end-of-slot decrement).
    pub fn backoff_inc(&mut self, neighbor_idx: usize) {
        let max_be = self.max_be;
        let window = {
            let n = match self.neighbors.get_mut(neighbor_idx) {
                Some(n) => n,
                None => return,
            };
            n.backoff_exponent = (n.backoff_exponent + 1).min(max_be);
            let mask = (1u16 << n.backoff_exponent) - 1;
            self.lcg.next_masked(mask) as u8 + 1
        };
        self.neighbors[neighbor_idx].backoff_window = window;
    }

    /// For each neighbor whose window > 0, decrement if either (a) `dest`
    /// is broadcast and the neighbor has no TX link, or (b) `dest` equals
    /// the neighbor's address and the neighbor has >= 1 TX link.
    pub fn decrement_all_backoff_windows(&mut self, dest: LinkAddress) {
        for n in self.neighbors.iter_mut() {
            if n.backoff_window == 0 {
                continue;
            }
            let applies = (dest.is_broadcast() && !n.has_tx_link())
                || (dest == n.address && n.has_tx_link());
            if applies {
                n.backoff_window -= 1;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    type TestQueue = Queue<4, 4, 8>;

    fn addr(b: u8) -> LinkAddress {
        LinkAddress::from_u64(b as u64)
    }

    #[test]
    fn broadcast_and_eb_present_at_init() {
        let q = TestQueue::new(1, 2, 5);
        assert!(q.neighbor(q.broadcast_index()).unwrap().is_broadcast);
        assert!(q.neighbor(q.eb_index()).unwrap().is_broadcast);
    }

    #[test]
    fn fifo_order_preserved() {
        let mut q = TestQueue::new(1, 2, 5);
        let lock = Lock::new();
        let idx = q.add_neighbor(addr(9), &lock).unwrap();

        q.add_packet(addr(9), &[1], None, 0).unwrap();
        q.add_packet(addr(9), &[2], None, 0).unwrap();
        q.add_packet(addr(9), &[3], None, 0).unwrap();

        let p0 = q.get_packet_for(idx, false).unwrap();
        assert_eq!(q.packet(p0).unwrap().frame(), &[1]);
        q.remove_head(idx);

        let p1 = q.get_packet_for(idx, false).unwrap();
        assert_eq!(q.packet(p1).unwrap().frame(), &[2]);
    }

    #[test]
    fn queue_depth_rejects_overflow() {
        let mut q: Queue<4, 4, 4> = Queue::new(1, 2, 5);
        let lock = Lock::new();
        q.add_neighbor(addr(9), &lock).unwrap();
        for _ in 0..4 {
            q.add_packet(addr(9), &[0], None, 0).unwrap();
        }
        assert_eq!(q.add_packet(addr(9), &[0], None, 0), Err(QueueError::RingFull));
    }

    #[test]
    fn backoff_reset_then_escalate() {
        let mut q = TestQueue::new(42, 2, 5);
        let lock = Lock::new();
        let idx = q.add_neighbor(addr(9), &lock).unwrap();

        q.backoff_inc(idx);
        let n = q.neighbor(idx).unwrap();
        assert_eq!(n.backoff_exponent, 3);
        assert!(n.backoff_window >= 1 && n.backoff_window <= 8);

        q.backoff_inc(idx);
        let n = q.neighbor(idx).unwrap();
        assert_eq!(n.backoff_exponent, 4);
        assert!(n.backoff_window >= 1 && n.backoff_window <= 16);

        q.backoff_reset(idx);
        let n = q.neighbor(idx).unwrap();
        assert_eq!(n.backoff_exponent, 2);
        assert_eq!(n.backoff_window, 0);
    }

    #[test]
    fn free_unused_keeps_broadcast_time_source_and_tx_linked() {
        let mut q = TestQueue::new(1, 2, 5);
        let lock = Lock::new();
        let idle = q.add_neighbor(addr(1), &lock).unwrap();
        let ts = q.add_neighbor(addr(2), &lock).unwrap();
        q.update_time_source(Some(ts), false, &lock).unwrap();

        q.free_unused_neighbors(&lock).unwrap();

        assert!(q.get_neighbor(addr(2)).is_some());
        assert!(q.get_neighbor(addr(1)).is_none());
        let _ = idle;
    }

    #[test]
    fn decrement_respects_broadcast_vs_dedicated_rule() {
        let mut q = TestQueue::new(1, 2, 5);
        let lock = Lock::new();
        let shared = q.add_neighbor(addr(1), &lock).unwrap();
        let dedicated = q.add_neighbor(addr(2), &lock).unwrap();

        q.backoff_inc(shared);
        q.backoff_inc(dedicated);
        {
            let n = &mut q.neighbors[dedicated];
            n.tx_links_count = 1;
        }

        let before_shared = q.neighbor(shared).unwrap().backoff_window;
        let before_dedicated = q.neighbor(dedicated).unwrap().backoff_window;

        q.decrement_all_backoff_windows(LinkAddress::BROADCAST);
        assert_eq!(q.neighbor(shared).unwrap().backoff_window, before_shared - 1);
        assert_eq!(q.neighbor(dedicated).unwrap().backoff_window, before_dedicated);

        q.decrement_all_backoff_windows(addr(2));
        assert_eq!(q.neighbor(dedicated).unwrap().backoff_window, before_dedicated - 1);
    }
}
