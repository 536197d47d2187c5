//! Slot-operation engine (C6): timed TX/RX protocol for a single active
//! slot.
//!
//! The reference implementation spells this as a stackless protothread
//! that yields at absolute timer deadlines (`tsch.c`'s `PT_YIELD_UNTIL`).
//! A TSCH slot routine runs to completion once started — it only yields
//! *between* slots, by re-arming the timer (see the epilogue in
//! `mod.rs`) — so the idiomatic Rust shape is not a resumable state
//! machine but an ordinary function with busy-wait loops gated by
//! `deadline_passed`, exactly mirroring the protothread's own structure
//! without needing a separate coroutine abstraction.

use heapless::Vec;

use crate::timer::Timer;

use super::config::TschConfig;
use super::iface::{Framer, RadioTxResult, TschRadio};
use super::queue::MAX_FRAME_LEN;
use super::types::{LinkAddress, TxResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Tx,
    Rx,
    Idle,
    Skipped,
}

pub struct ReceivedFrame {
    pub source: LinkAddress,
    pub destination: LinkAddress,
    pub seq: u8,
    pub data: Vec<u8, MAX_FRAME_LEN>,
}

pub struct SlotOutcome {
    pub kind: SlotKind,
    pub tx_result: Option<TxResult>,
    pub rx_frame: Option<ReceivedFrame>,
    /// `Some` only when a sync-bearing exchange with our time source
    /// completed; already clamped to `±TsLongGT/2`.
    pub drift_correction: Option<i32>,
}

impl SlotOutcome {
    fn skipped() -> Self {
        Self { kind: SlotKind::Skipped, tx_result: None, rx_frame: None, drift_correction: None }
    }

    fn idle() -> Self {
        Self { kind: SlotKind::Idle, tx_result: None, rx_frame: None, drift_correction: None }
    }
}

fn deadline_passed(now: u32, deadline: u32) -> bool {
    crate::asn::deadline_passed(now, deadline)
}

/// Everything the TX/RX phases need about the selected packet and link,
/// resolved by the caller (C3/C4) before `run_tx`/`run_rx` is invoked.
pub struct TxInput<'a> {
    pub t0: u32,
    pub frame: &'a [u8],
    pub dest: LinkAddress,
    pub is_broadcast: bool,
    pub seq: u8,
    pub is_time_source: bool,
}

pub struct RxInput {
    pub t0: u32,
    pub our_addr: LinkAddress,
}

/// TX slot (spec §4.5.2). `ack_required` should reflect whether `dest`
/// is a unicast address (broadcast frames are never acked).
pub fn run_tx<R, E, T, F>(
    cfg: &TschConfig,
    radio: &mut R,
    timer: &mut T,
    framer: &F,
    input: TxInput,
) -> SlotOutcome
where
    R: TschRadio<E>,
    T: Timer,
    F: Framer,
{
    let t0 = input.t0;

    let _ = radio.prepare(input.frame);

    if cfg.cca_enabled {
        while !deadline_passed(timer.time_us(), t0 + cfg.ts_cca_offset) {}
        let _ = radio.radio_on();
        let cca_deadline = t0 + cfg.ts_cca_offset + cfg.ts_cca;
        let mut clear = false;
        while !deadline_passed(timer.time_us(), cca_deadline) {
            if let Ok(true) = radio.channel_clear() {
                clear = true;
                break;
            }
        }
        if !clear {
            return SlotOutcome { kind: SlotKind::Tx, tx_result: Some(TxResult::Collision), rx_frame: None, drift_correction: None };
        }
    }

    while !deadline_passed(timer.time_us(), t0 + cfg.ts_tx_offset - cfg.delay_tx) {}
    let tx_start = t0 + cfg.ts_tx_offset;
    let tx_ok = matches!(radio.transmit(), Ok(RadioTxResult::Ok));
    let _ = radio.radio_off();

    if !tx_ok {
        return SlotOutcome { kind: SlotKind::Tx, tx_result: Some(TxResult::Err), rx_frame: None, drift_correction: None };
    }

    if input.is_broadcast {
        return SlotOutcome { kind: SlotKind::Tx, tx_result: Some(TxResult::Ok), rx_frame: None, drift_correction: None };
    }

    let tx_duration = cfg.tsch_data_max_duration;
    let _ = radio.set_address_decode(false);
    let ack_listen_start = tx_start + tx_duration + cfg.ts_tx_ack_delay - cfg.ts_short_gt - cfg.delay_rx;
    while !deadline_passed(timer.time_us(), ack_listen_start) {}
    let _ = radio.radio_on();

    let ack_deadline = tx_start + tx_duration + cfg.ts_tx_ack_delay + cfg.ts_short_gt;
    let mut receiving = false;
    while !deadline_passed(timer.time_us(), ack_deadline) {
        if let Ok(true) = radio.receiving_packet() {
            receiving = true;
            break;
        }
    }

    if !receiving {
        let _ = radio.radio_off();
        let _ = radio.set_address_decode(true);
        return SlotOutcome { kind: SlotKind::Tx, tx_result: Some(TxResult::NoAck), rx_frame: None, drift_correction: None };
    }

    let read_deadline = ack_deadline + cfg.tsch_ack_max_duration;
    let mut buf = [0u8; MAX_FRAME_LEN];
    let mut len = 0usize;
    while !deadline_passed(timer.time_us(), read_deadline) {
        if let Ok(true) = radio.pending_packet() {
            if let Ok(n) = radio.read(&mut buf) {
                len = n;
            }
            break;
        }
    }
    let _ = radio.radio_off();
    let _ = radio.set_address_decode(true);

    if len == 0 {
        return SlotOutcome { kind: SlotKind::Tx, tx_result: Some(TxResult::NoAck), rx_frame: None, drift_correction: None };
    }

    let bits = match framer.parse_sync_ack(&buf[..len], input.seq, input.is_time_source) {
        Ok(b) => b,
        Err(_) => return SlotOutcome { kind: SlotKind::Tx, tx_result: Some(TxResult::NoAck), rx_frame: None, drift_correction: None },
    };

    if !bits.ok {
        return SlotOutcome { kind: SlotKind::Tx, tx_result: Some(TxResult::NoAck), rx_frame: None, drift_correction: None };
    }

    let drift_correction = if input.is_time_source && bits.has_sync_ie {
        Some(clamp_drift(bits.drift, cfg.drift_clamp()))
    } else {
        None
    };

    SlotOutcome { kind: SlotKind::Tx, tx_result: Some(TxResult::Ok), rx_frame: None, drift_correction }
}

/// Symmetric clamp, per spec §4.5.2 and the boundary-behavior in §8.
pub fn clamp_drift(drift: i32, bound: i32) -> i32 {
    drift.clamp(-bound, bound)
}

/// RX slot (spec §4.5.3). `do_ack` and `is_time_source_of` are supplied
/// by the caller after the frame header is parsed.
pub fn run_rx<R, E, T, F>(
    cfg: &TschConfig,
    radio: &mut R,
    timer: &mut T,
    framer: &F,
    input: RxInput,
    mut nack: impl FnMut(LinkAddress, LinkAddress) -> bool,
    is_time_source: impl Fn(LinkAddress) -> bool,
) -> SlotOutcome
where
    R: TschRadio<E>,
    T: Timer,
    F: Framer,
{
    let t0 = input.t0;

    let listen_start = t0 + cfg.ts_tx_offset - cfg.ts_long_gt - cfg.delay_rx;
    while !deadline_passed(timer.time_us(), listen_start) {}
    let _ = radio.radio_on();

    let arrive_deadline = t0 + cfg.ts_tx_offset + cfg.ts_long_gt;
    let mut receiving = false;
    while !deadline_passed(timer.time_us(), arrive_deadline) {
        if let Ok(true) = radio.receiving_packet() {
            receiving = true;
            break;
        }
    }
    if !receiving {
        let _ = radio.radio_off();
        return SlotOutcome::idle();
    }

    let rx_start = timer.time_us();
    let expected_rx_time = t0 + cfg.ts_tx_offset;

    let read_deadline = arrive_deadline + cfg.tsch_data_max_duration;
    let mut buf = [0u8; MAX_FRAME_LEN];
    let mut len = 0usize;
    while !deadline_passed(timer.time_us(), read_deadline) {
        if let Ok(true) = radio.pending_packet() {
            if let Ok(n) = radio.read(&mut buf) {
                len = n;
            }
            break;
        }
    }
    let _ = radio.radio_off();

    if len == 0 {
        return SlotOutcome::idle();
    }

    let (source, destination, seq) = match framer.parse(&buf[..len]) {
        Ok(v) => v,
        Err(_) => return SlotOutcome::idle(),
    };

    if destination != input.our_addr && !destination.is_broadcast() {
        return SlotOutcome::idle();
    }

    let frame_type = framer.parse_frame_type(&buf[..len]).unwrap_or_default();
    let estimated_drift = (rx_start as i64 - expected_rx_time as i64) as i32;

    let mut drift_correction = None;

    if frame_type.do_ack {
        let is_nack = nack(source, destination);
        let mut ack_buf = [0u8; MAX_FRAME_LEN];
        if let Ok(ack_len) = framer.make_sync_ack(estimated_drift, is_nack, &mut ack_buf, source, seq) {
            let rx_end = timer.time_us();
            let ack_send_at = rx_end + cfg.ts_tx_ack_delay - cfg.delay_tx;
            while !deadline_passed(timer.time_us(), ack_send_at) {}
            let _ = radio.prepare(&ack_buf[..ack_len]);
            let _ = radio.transmit();
        }
    }

    if is_time_source(source) {
        drift_correction = Some(clamp_drift(-estimated_drift, cfg.drift_clamp()));
    }

    let mut data = Vec::new();
    let _ = data.extend_from_slice(&buf[..len]);

    SlotOutcome {
        kind: SlotKind::Rx,
        tx_result: None,
        rx_frame: Some(ReceivedFrame { source, destination, seq, data }),
        drift_correction,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drift_clamps_symmetrically() {
        assert_eq!(clamp_drift(7, 1200), 7);
        assert_eq!(clamp_drift(5000, 1200), 1200);
        assert_eq!(clamp_drift(-5000, 1200), -1200);
    }

    #[test]
    fn skipped_outcome_carries_no_results() {
        let o = SlotOutcome::skipped();
        assert_eq!(o.kind, SlotKind::Skipped);
        assert!(o.tx_result.is_none());
        assert!(o.rx_frame.is_none());
    }
}
