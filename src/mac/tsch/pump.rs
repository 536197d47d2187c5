//! Event pump (C8): drains the dequeued-TX and incoming-frame queues
//! outside interrupt context, and runs the optional time-source
//! autoselect.
//!
//! Grounded on `tsch_tx_process_pending`/`tsch_rx_process_pending` and
//! the EB-handling branch of `tsch_rx_process_pending` that adjusts ASN
//! from a time source's beacon.

use heapless::{Deque, Vec};

use super::queue::{Queue, MAX_FRAME_LEN};
use super::types::{LinkAddress, TxResult};

/// A slot-routine-dequeued packet, handed to the pump for the actual
/// free + user callback (spec §4.7 item 1). The slot routine itself only
/// removes the head from its neighbor's ring; freeing the pool entry and
/// invoking the completion callback happen here, outside interrupt
/// context.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub neighbor_idx: usize,
    pub pool_idx: u16,
    pub result: TxResult,
    pub transmissions: u8,
}

pub type CompletionRing<const N: usize> = Deque<Completion, N>;

/// Drain every pending completion: free the pool packet and invoke its
/// callback with `(result, transmissions)`. Returns the set of neighbor
/// indices touched, so the caller can attempt `free_unused_neighbors`.
pub fn drain_tx_completions<const NEIGHBORS: usize, const RING: usize, const POOL: usize, const Q: usize>(
    completions: &mut CompletionRing<Q>,
    queue: &mut Queue<NEIGHBORS, RING, POOL>,
) -> Vec<usize, Q> {
    let mut touched = Vec::new();
    while let Some(c) = completions.pop_front() {
        if let Some(packet) = queue.free_packet(c.pool_idx) {
            if let Some(cb) = packet.sent_cb {
                cb(c.result, c.transmissions, packet.ctx);
            }
        }
        let _ = touched.push(c.neighbor_idx);
    }
    touched
}

/// A frame handed up by the slot routine's RX path, still unclassified.
pub struct IncomingFrame {
    pub source: LinkAddress,
    pub destination: LinkAddress,
    pub seq: u8,
    pub data: heapless::Vec<u8, MAX_FRAME_LEN>,
}

pub type IncomingRing<const N: usize> = Deque<IncomingFrame, N>;

/// What the caller (holding the lock, the ASN, and `current_link`) must
/// do in response to a received EB from our time source (spec §4.7 item
/// 2). Returned rather than applied directly, since those fields live on
/// the orchestrator, not the pump.
pub struct EbSyncAdjustment {
    pub asn_correction: i64,
    pub new_join_priority: u8,
}

/// Decide the sync adjustment implied by an EB received at `rx_asn` from
/// our time source, whose beacon itself carries `eb_asn`. Returns `None`
/// if `asn_diff` is zero (spec: "if nonzero, acquire the lock...").
pub fn eb_sync_adjustment(rx_asn: u64, eb_asn: u64, eb_join_priority: u8) -> Option<EbSyncAdjustment> {
    let asn_diff = rx_asn as i64 - eb_asn as i64;
    if asn_diff == 0 {
        return None;
    }
    Some(EbSyncAdjustment { asn_correction: asn_diff, new_join_priority: eb_join_priority + 1 })
}

#[derive(Debug, Clone, Copy)]
struct EbCounter {
    address: LinkAddress,
    count: u32,
    join_priority: u8,
}

/// Optional automatic time-source selection from observed EBs (C8 item
/// 3). Deliberately does not age counters, matching the reference
/// behavior: a neighbor that was briefly dominant can remain electable
/// long after it stops beaconing, since `best()` only ever compares
/// against the highest count seen so far. See DESIGN.md for why this is
/// kept rather than silently "fixed".
pub struct Autoselect<const N: usize> {
    counters: Vec<EbCounter, N>,
}

impl<const N: usize> Autoselect<N> {
    pub fn new() -> Self {
        Self { counters: Vec::new() }
    }

    pub fn record(&mut self, source: LinkAddress, join_priority: u8) {
        if let Some(c) = self.counters.iter_mut().find(|c| c.address == source) {
            c.count += 1;
            c.join_priority = join_priority;
        } else if self.counters.push(EbCounter { address: source, count: 1, join_priority }).is_err() {
            // Counter table full: drop the weakest entry and retry once.
            if let Some(pos) = self.counters.iter().enumerate().min_by_key(|(_, c)| c.count).map(|(i, _)| i) {
                self.counters.swap_remove(pos);
                let _ = self.counters.push(EbCounter { address: source, count: 1, join_priority });
            }
        }
    }

    pub fn best(&self) -> Option<LinkAddress> {
        let best_count = self.counters.iter().map(|c| c.count).max()?;
        self.counters
            .iter()
            .filter(|c| c.count > best_count / 2)
            .min_by_key(|c| c.join_priority)
            .map(|c| c.address)
    }

    pub fn clear(&mut self) {
        self.counters.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mac::tsch::queue::Queue;

    fn addr(b: u8) -> LinkAddress {
        LinkAddress::from_u64(b as u64)
    }

    #[test]
    fn drain_completions_frees_and_calls_back() {
        static mut CALLS: u32 = 0;
        fn cb(result: TxResult, transmissions: u8, _ctx: u32) {
            assert_eq!(result, TxResult::Ok);
            assert_eq!(transmissions, 1);
            unsafe { CALLS += 1 };
        }

        let mut q: Queue<4, 4, 4> = Queue::new(1, 2, 5);
        let lock = crate::mac::tsch::lock::Lock::new();
        let idx = q.add_neighbor(addr(9), &lock).unwrap();
        q.add_packet(addr(9), &[1, 2, 3], Some(cb), 0).unwrap();
        let pool_idx = q.get_packet_for(idx, false).unwrap();
        q.packet_mut(pool_idx).unwrap().transmissions = 1;
        q.remove_head(idx);

        let mut ring: CompletionRing<4> = Deque::new();
        ring.push_back(Completion { neighbor_idx: idx, pool_idx, result: TxResult::Ok, transmissions: 1 }).unwrap();

        let touched = drain_tx_completions(&mut ring, &mut q);
        assert_eq!(touched.as_slice(), &[idx]);
        assert_eq!(unsafe { CALLS }, 1);
    }

    #[test]
    fn eb_sync_adjustment_is_none_when_already_aligned() {
        assert!(eb_sync_adjustment(100, 100, 2).is_none());
        let adj = eb_sync_adjustment(100, 97, 2).unwrap();
        assert_eq!(adj.asn_correction, 3);
        assert_eq!(adj.new_join_priority, 3);
    }

    #[test]
    fn autoselect_elects_majority_without_aging() {
        let mut a: Autoselect<4> = Autoselect::new();
        a.record(addr(1), 1);
        a.record(addr(1), 1);
        a.record(addr(1), 1);
        a.record(addr(2), 0);
        assert_eq!(a.best(), Some(addr(1)));

        // addr(2) never beacons again, but its stale relative strength
        // still doesn't exceed addr(1)'s half-of-best, so addr(1) stays
        // elected — the intentionally un-aged behavior.
        a.record(addr(1), 1);
        assert_eq!(a.best(), Some(addr(1)));
    }
}
