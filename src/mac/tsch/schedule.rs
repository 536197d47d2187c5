//! Schedule manager (C4): slotframes and links.
//!
//! Grounded on `tsch-schedule.c` for the tie-break and lookup semantics,
//! and on the `other_examples` `dot15d4` crate's `TschSlotframe`/
//! `TschSchedule` for the const-generic `heapless::Vec`-of-links layout.

use heapless::Vec;

use crate::asn::{Asn, AsnDivisor};

use super::types::{LinkAddress, LinkOptions, LinkType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    SlotframeTableFull,
    SlotframeNotFound,
    LinkTableFull,
    LinkNotFound,
    DuplicateSlotframeHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub handle: u16,
    pub timeslot: u16,
    pub channel_offset: u16,
    pub options: LinkOptions,
    pub link_type: LinkType,
    pub neighbor: LinkAddress,
}

pub struct Slotframe<const MAX_LINKS: usize> {
    pub handle: u16,
    pub size: u16,
    links: Vec<Link, MAX_LINKS>,
    next_link_handle: u16,
}

impl<const MAX_LINKS: usize> Slotframe<MAX_LINKS> {
    fn new(handle: u16, size: u16) -> Self {
        Self {
            handle,
            size,
            links: Vec::new(),
            next_link_handle: 0,
        }
    }

    fn divisor(&self) -> AsnDivisor {
        AsnDivisor::new(self.size)
    }

    fn active_link_at(&self, timeslot: u16) -> Option<&Link> {
        self.links.iter().find(|l| l.timeslot == timeslot)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }
}

/// The schedule manager (C4). Owns every slotframe and its links; does
/// not itself own neighbor-table bookkeeping (the caller is responsible
/// for bumping/decrementing a neighbor's TX-link counters around
/// `add_link`/`remove_link`, since the two live in separate subsystems
/// here).
pub struct Schedule<const MAX_SF: usize, const MAX_LINKS: usize> {
    slotframes: Vec<Slotframe<MAX_LINKS>, MAX_SF>,
}

impl<const MAX_SF: usize, const MAX_LINKS: usize> Schedule<MAX_SF, MAX_LINKS> {
    pub fn new() -> Self {
        Self { slotframes: Vec::new() }
    }

    /// The built-in minimal schedule (spec §6): one slotframe, handle 0,
    /// length `DEFAULT_SCHEDULE_LENGTH`, with a single RX|TX|SHARED
    /// Advertising link to the broadcast address at timeslot 0, channel
    /// offset 0.
    pub fn create_minimal(size: u16) -> Self {
        let mut s = Self::new();
        s.add_slotframe(0, size).expect("fresh schedule has room for one slotframe");
        s.add_link(
            0,
            0,
            0,
            LinkOptions::new(
                super::types::link_options::TX | super::types::link_options::RX | super::types::link_options::SHARED,
            ),
            LinkType::Advertising,
            LinkAddress::BROADCAST,
        )
        .expect("fresh slotframe has room for one link");
        s
    }

    fn index_of(&self, handle: u16) -> Option<usize> {
        self.slotframes.iter().position(|sf| sf.handle == handle)
    }

    pub fn add_slotframe(&mut self, handle: u16, size: u16) -> Result<(), ScheduleError> {
        if self.index_of(handle).is_some() {
            return Err(ScheduleError::DuplicateSlotframeHandle);
        }
        self.slotframes
            .push(Slotframe::new(handle, size))
            .map_err(|_| ScheduleError::SlotframeTableFull)
    }

    pub fn remove_slotframe(&mut self, handle: u16) -> Result<(), ScheduleError> {
        let idx = self.index_of(handle).ok_or(ScheduleError::SlotframeNotFound)?;
        self.slotframes.swap_remove(idx);
        Ok(())
    }

    pub fn get_slotframe_from_handle(&self, handle: u16) -> Option<&Slotframe<MAX_LINKS>> {
        self.slotframes.iter().find(|sf| sf.handle == handle)
    }

    /// Any existing link at the same timeslot within this slotframe is
    /// replaced, matching `tsch_schedule_add_link`'s behavior.
    pub fn add_link(
        &mut self,
        slotframe_handle: u16,
        timeslot: u16,
        channel_offset: u16,
        options: LinkOptions,
        link_type: LinkType,
        neighbor: LinkAddress,
    ) -> Result<u16, ScheduleError> {
        let idx = self.index_of(slotframe_handle).ok_or(ScheduleError::SlotframeNotFound)?;
        let sf = &mut self.slotframes[idx];

        if let Some(pos) = sf.links.iter().position(|l| l.timeslot == timeslot) {
            sf.links.swap_remove(pos);
        }

        let handle = sf.next_link_handle;
        sf.next_link_handle = sf.next_link_handle.wrapping_add(1);

        sf.links
            .push(Link {
                handle,
                timeslot,
                channel_offset,
                options,
                link_type,
                neighbor,
            })
            .map_err(|_| ScheduleError::LinkTableFull)?;
        Ok(handle)
    }

    pub fn remove_link(&mut self, slotframe_handle: u16, link_handle: u16) -> Result<(), ScheduleError> {
        let idx = self.index_of(slotframe_handle).ok_or(ScheduleError::SlotframeNotFound)?;
        let sf = &mut self.slotframes[idx];
        let pos = sf
            .links
            .iter()
            .position(|l| l.handle == link_handle)
            .ok_or(ScheduleError::LinkNotFound)?;
        sf.links.swap_remove(pos);
        Ok(())
    }

    pub fn get_link_from_handle(&self, slotframe_handle: u16, link_handle: u16) -> Option<Link> {
        self.get_slotframe_from_handle(slotframe_handle)?
            .links
            .iter()
            .find(|l| l.handle == link_handle)
            .copied()
    }

    pub fn get_link_from_timeslot(&self, slotframe_handle: u16, timeslot: u16) -> Option<Link> {
        self.get_slotframe_from_handle(slotframe_handle)?.active_link_at(timeslot).copied()
    }

    /// The link active at `asn`, scanning slotframes in ascending handle
    /// order. When more than one slotframe has an active link at this
    /// ASN, the TX-capable link wins; if more than one is TX-capable (or
    /// none is), the smallest slotframe handle wins, which the ascending
    /// scan order already gives for free.
    pub fn get_link_from_asn(&self, asn: Asn) -> Option<(u16, Link)> {
        let mut best: Option<(u16, Link)> = None;
        for sf in self.slotframes.iter() {
            if sf.size == 0 {
                continue;
            }
            let timeslot = asn.modulo(sf.divisor());
            if let Some(link) = sf.active_link_at(timeslot) {
                match &best {
                    None => best = Some((sf.handle, *link)),
                    Some((_, b)) if !b.options.tx() && link.options.tx() => {
                        best = Some((sf.handle, *link));
                    }
                    _ => {}
                }
            }
        }
        best
    }

    /// Soonest ASN at or after `from` (inclusive) with an active link,
    /// searched up to `horizon_slots` ahead. Returns the link and how
    /// many slots away it is.
    pub fn get_next_active_link(&self, from: Asn, horizon_slots: u32) -> Option<(u32, u16, Link)> {
        let mut asn = from;
        for offset in 0..horizon_slots {
            if let Some((sf_handle, link)) = self.get_link_from_asn(asn) {
                return Some((offset, sf_handle, link));
            }
            asn.increment(1);
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mac::tsch::types::link_options;

    type TestSchedule = Schedule<4, 16>;

    #[test]
    fn minimal_schedule_has_broadcast_advertising_link() {
        let s = TestSchedule::create_minimal(17);
        let link = s.get_link_from_timeslot(0, 0).unwrap();
        assert!(link.options.tx());
        assert!(link.options.rx());
        assert!(link.options.shared());
        assert_eq!(link.link_type, LinkType::Advertising);
        assert_eq!(link.neighbor, LinkAddress::BROADCAST);
    }

    #[test]
    fn add_link_replaces_same_timeslot() {
        let mut s = TestSchedule::new();
        s.add_slotframe(0, 11).unwrap();
        let first = s
            .add_link(0, 3, 0, LinkOptions::new(link_options::TX), LinkType::Normal, LinkAddress::from_u64(1))
            .unwrap();
        let second = s
            .add_link(0, 3, 1, LinkOptions::new(link_options::RX), LinkType::Normal, LinkAddress::from_u64(2))
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(s.get_slotframe_from_handle(0).unwrap().links().len(), 1);
        let link = s.get_link_from_timeslot(0, 3).unwrap();
        assert_eq!(link.handle, second);
        assert_eq!(link.channel_offset, 1);
    }

    #[test]
    fn asn_lookup_wraps_by_slotframe_size() {
        let mut s = TestSchedule::new();
        s.add_slotframe(0, 5).unwrap();
        s.add_link(0, 2, 0, LinkOptions::new(link_options::RX), LinkType::Normal, LinkAddress::BROADCAST)
            .unwrap();

        assert!(s.get_link_from_asn(Asn::new(0, 2)).is_some());
        assert!(s.get_link_from_asn(Asn::new(0, 7)).is_some());
        assert!(s.get_link_from_asn(Asn::new(0, 3)).is_none());
    }

    #[test]
    fn asn_lookup_prefers_tx_across_slotframes() {
        let mut s = TestSchedule::new();
        s.add_slotframe(0, 4).unwrap();
        s.add_slotframe(1, 4).unwrap();
        s.add_link(0, 1, 0, LinkOptions::new(link_options::RX), LinkType::Normal, LinkAddress::BROADCAST)
            .unwrap();
        s.add_link(1, 1, 0, LinkOptions::new(link_options::TX), LinkType::Normal, LinkAddress::BROADCAST)
            .unwrap();

        let (handle, link) = s.get_link_from_asn(Asn::new(0, 1)).unwrap();
        assert_eq!(handle, 1);
        assert!(link.options.tx());
    }

    #[test]
    fn next_active_link_searches_forward() {
        let mut s = TestSchedule::new();
        s.add_slotframe(0, 10).unwrap();
        s.add_link(0, 5, 0, LinkOptions::new(link_options::RX), LinkType::Normal, LinkAddress::BROADCAST)
            .unwrap();

        let (offset, handle, link) = s.get_next_active_link(Asn::new(0, 1), 20).unwrap();
        assert_eq!(offset, 4);
        assert_eq!(handle, 0);
        assert_eq!(link.timeslot, 5);
    }
}
