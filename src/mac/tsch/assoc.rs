//! Association & time-sync (C7).
//!
//! States and transitions grounded on `tsch.c`'s `tsch_associate` PT_THREAD
//! and the keepalive/EB-transmitter tasks it spawns once associated.

use super::config::TschConfig;
use super::types::LinkAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocState {
    Unassociated,
    Scanning,
    Associated,
    Desynced,
}

/// A parsed enhanced beacon, as handed up by the framer (spec §6).
pub struct ParsedEb {
    pub source: LinkAddress,
    pub asn: u64,
    pub join_priority: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocError {
    JoinPriorityTooHigh,
    TimeDriftRejected,
}

/// Outcome of accepting an EB during scanning: what the caller (mod.rs)
/// must apply to its own neighbor table, ASN, and hooks.
pub struct Association {
    pub time_source: LinkAddress,
    pub asn: u64,
    pub join_priority: u8,
}

pub struct Assoc {
    pub state: AssocState,
    pub join_priority: u8,
}

impl Assoc {
    pub fn new() -> Self {
        Self { state: AssocState::Unassociated, join_priority: 0xff }
    }

    /// Coordinators associate immediately with join priority 0 and never
    /// scan (spec §4.6).
    pub fn associate_as_coordinator(&mut self) {
        self.state = AssocState::Associated;
        self.join_priority = 0;
    }

    pub fn start_scanning(&mut self) {
        self.state = AssocState::Scanning;
    }

    /// Validate and, if accepted, turn a scanned EB into an `Association`.
    /// `uptime_estimate_minutes` and `cfg.max_association_time_drift_minutes`
    /// implement the optional sanity check (spec §9's
    /// `TSCH_CHECK_TIME_AT_ASSOCIATION`-style behavior).
    pub fn accept_eb(&mut self, eb: &ParsedEb, cfg: &TschConfig, uptime_estimate_minutes: u32) -> Result<Association, AssocError> {
        if eb.join_priority >= cfg.join_priority_max {
            return Err(AssocError::JoinPriorityTooHigh);
        }
        if let Some(max_drift) = cfg.max_association_time_drift_minutes {
            let asn_minutes = asn_to_minutes(eb.asn, cfg.ts_slot_duration);
            let drift = asn_minutes.abs_diff(uptime_estimate_minutes as u64);
            if drift > max_drift as u64 {
                return Err(AssocError::TimeDriftRejected);
            }
        }

        self.state = AssocState::Associated;
        self.join_priority = eb.join_priority + 1;

        Ok(Association { time_source: eb.source, asn: eb.asn, join_priority: self.join_priority })
    }

    /// Called on `ASN_diff(current_asn, last_sync_asn) > desync_threshold`
    /// (spec §4.5.5); coordinators are excepted by the caller before
    /// calling this.
    pub fn desync(&mut self) {
        self.state = AssocState::Desynced;
    }

    pub fn is_associated(&self) -> bool {
        self.state == AssocState::Associated
    }
}

fn asn_to_minutes(asn: u64, slot_duration_us: u32) -> u64 {
    let us = asn.saturating_mul(slot_duration_us as u64);
    us / 60_000_000
}

/// `[0.9*period, period)` truncated-uniform delay, drawn via mask-and-bound
/// against a caller-supplied raw random word (spec §9's second open
/// question: never modulo a non-power-of-two).
pub fn randomized_period(period_slots: u32, raw_random: u32) -> u32 {
    if period_slots == 0 {
        return 0;
    }
    let window = period_slots - (period_slots * 9 / 10);
    let base = period_slots * 9 / 10;
    if window == 0 {
        return base;
    }
    let mask = (window.next_power_of_two() - 1).max(1);
    base + (raw_random & mask).min(window - 1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coordinator_associates_with_priority_zero() {
        let mut a = Assoc::new();
        a.associate_as_coordinator();
        assert!(a.is_associated());
        assert_eq!(a.join_priority, 0);
    }

    #[test]
    fn accept_eb_adopts_asn_and_increments_priority() {
        let mut a = Assoc::new();
        a.start_scanning();
        let cfg = TschConfig::default();
        let eb = ParsedEb { source: LinkAddress::from_u64(7), asn: 0x1234, join_priority: 3 };
        let assoc = a.accept_eb(&eb, &cfg, 0).unwrap();
        assert_eq!(assoc.time_source, LinkAddress::from_u64(7));
        assert_eq!(assoc.asn, 0x1234);
        assert_eq!(a.join_priority, 4);
        assert!(a.is_associated());
    }

    #[test]
    fn reject_eb_with_excessive_join_priority() {
        let mut a = Assoc::new();
        let cfg = TschConfig::default();
        let eb = ParsedEb { source: LinkAddress::from_u64(1), asn: 0, join_priority: cfg.join_priority_max };
        assert_eq!(a.accept_eb(&eb, &cfg, 0), Err(AssocError::JoinPriorityTooHigh));
    }

    #[test]
    fn desync_transitions_out_of_associated() {
        let mut a = Assoc::new();
        a.associate_as_coordinator();
        a.desync();
        assert!(!a.is_associated());
        assert_eq!(a.state, AssocState::Desynced);
    }

    #[test]
    fn randomized_period_stays_in_truncated_window() {
        for raw in [0u32, 1, 7, 999, u32::MAX] {
            let v = randomized_period(800, raw);
            assert!(v >= 720 && v < 800, "v={v}");
        }
    }
}
