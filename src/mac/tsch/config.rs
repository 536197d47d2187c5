//! TSCH tunables (ambient config, spec §6). Replaces the superframe-era
//! `Config` of `mac_802154/config.rs` with the TSCH-era knobs this crate
//! actually needs; the `Default` values are the ones the reference
//! implementation ships (Contiki-NG's `tsch-conf.h`/`tsch-private.h`).

use crate::channels::HoppingSequence;

#[derive(Debug, Clone, PartialEq)]
pub struct TschConfig {
    /// Channel hopping sequence.
    pub hopping_sequence: HoppingSequence,

    /// Maximum number of slotframes.
    pub max_slotframes: usize,
    /// Maximum number of links (shared across all slotframes).
    pub max_links: usize,
    /// Per-neighbor queue depth. Must be a power of two.
    pub queue_depth: usize,
    /// Maximum number of neighbor queues (including the broadcast/EB
    /// virtual neighbors).
    pub max_neighbors: usize,
    /// Total outgoing-packet pool size; must be >= total queue capacity.
    pub packet_pool_size: usize,

    /// Minimum/maximum CSMA backoff exponent (`MAC_MIN_BE`/`MAC_MAX_BE`).
    pub min_be: u8,
    pub max_be: u8,
    /// MAC retry limit (`MAC_MAX_FRAME_RETRIES`).
    pub max_frame_retries: u8,

    /// Number of consecutive slots without a sync event before desync.
    pub desync_threshold_slots: u32,
    /// Enhanced-beacon period bounds, in slot duration units.
    pub eb_period_slots: u32,
    pub eb_period_min_slots: u32,
    /// Window after association, in slots, during which the EB period is
    /// clamped to its minimum.
    pub eb_period_clamp_window_slots: u32,
    /// Keepalive period, in slot duration units.
    pub keepalive_period_slots: u32,
    /// Maximum accepted join priority before a node considers the network
    /// unreachable.
    pub join_priority_max: u8,

    /// Reject EBs during association whose adopted ASN implies an uptime
    /// more than this many minutes away from our own estimate. `None`
    /// disables the check (the reference default,
    /// `TSCH_CHECK_TIME_AT_ASSOCIATION` off).
    pub max_association_time_drift_minutes: Option<u32>,

    /// Enable automatic time-source selection from observed EBs (C8.3).
    pub eb_autoselect: bool,

    // --- Named timing constants (spec §6), all in microseconds ---
    pub ts_slot_duration: u32,
    pub ts_tx_offset: u32,
    pub ts_tx_ack_delay: u32,
    pub ts_long_gt: u32,
    pub ts_short_gt: u32,
    pub ts_cca_offset: u32,
    pub ts_cca: u32,
    pub delay_tx: u32,
    pub delay_rx: u32,
    pub tsch_ack_max_duration: u32,
    pub tsch_data_max_duration: u32,

    /// Enable CCA before TX.
    pub cca_enabled: bool,
}

impl Default for TschConfig {
    fn default() -> Self {
        Self {
            hopping_sequence: HoppingSequence::default(),

            max_slotframes: 4,
            max_links: 16,
            queue_depth: 8,
            max_neighbors: 8,
            packet_pool_size: 16,

            min_be: 2,
            max_be: 5,
            max_frame_retries: 3,

            desync_threshold_slots: 1000,
            eb_period_slots: 1600,
            eb_period_min_slots: 160,
            eb_period_clamp_window_slots: 6000,
            keepalive_period_slots: 800,
            join_priority_max: 0xfe,

            max_association_time_drift_minutes: None,
            eb_autoselect: false,

            ts_slot_duration: 10_000,
            ts_tx_offset: 2_120,
            ts_tx_ack_delay: 1_000,
            ts_long_gt: 2_400,
            ts_short_gt: 400,
            ts_cca_offset: 1_800,
            ts_cca: 128,
            delay_tx: 0,
            delay_rx: 0,
            tsch_ack_max_duration: 400,
            tsch_data_max_duration: 4_256,

            cca_enabled: true,
        }
    }
}

impl TschConfig {
    /// `TsLongGT / 2`, the symmetric clamp bound on drift correction.
    pub fn drift_clamp(&self) -> i32 {
        (self.ts_long_gt / 2) as i32
    }
}

/// Default minimal schedule: handle 0, length 17, one
/// RX|TX|SHARED Advertising link to broadcast at timeslot 0 / channel
/// offset 0 (spec §6, grounded on `tsch_schedule_create_minimal`).
pub const DEFAULT_SCHEDULE_LENGTH: u16 = 17;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn drift_clamp_is_half_long_gt() {
        let cfg = TschConfig::default();
        assert_eq!(cfg.drift_clamp(), 1_200);
    }
}
