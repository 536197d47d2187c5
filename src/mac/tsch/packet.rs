//! Concrete `Framer` (spec §6) over `ieee802154::mac`.
//!
//! Grounded on `mac_802154/packet.rs`'s `Packet::data`/`Packet::ack`/
//! `encode`/`decode` style, adapted to TSCH's needs: a synchronization IE
//! (drift + NACK bit) on ACKs, and an ASN/join-priority pair on EBs. The
//! `ieee802154` crate this host depends on has no generic IE support, so
//! both are carried as a small fixed-layout prefix on the MAC payload
//! rather than as real 802.15.4e header IEs — a simplification noted
//! here rather than silently assumed.

use ieee802154::mac::{Address, AddressMode, ExtendedAddress, FrameType, FrameVersion, Header, PanId, Security};

use super::iface::{Framer, FrameTypeBits, SyncAckBits};
use super::types::LinkAddress;

fn to_extended(addr: LinkAddress) -> Address {
    Address::Extended(PanId(0xffff), ExtendedAddress(addr.as_u64()))
}

fn from_address(addr: &Address) -> LinkAddress {
    match addr {
        Address::Extended(_, ExtendedAddress(v)) => LinkAddress::from_u64(*v),
        Address::Short(_, short) => LinkAddress::from_u64(short.0 as u64),
        Address::None => LinkAddress::BROADCAST,
    }
}

/// Sync IE payload prefix carried on data ACKs: 1 nack byte + 4 drift bytes.
const SYNC_IE_LEN: usize = 5;
/// EB payload prefix: 5 ASN bytes + 1 join-priority byte.
const EB_IE_LEN: usize = 6;

#[derive(Debug, Clone, Copy, Default)]
pub struct TschFramer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerError {
    Encode,
    Decode,
    TooShort,
    WrongFrameType,
}

impl Framer for TschFramer {
    type Error = FramerError;

    fn create_data(
        &self,
        dest: LinkAddress,
        source: LinkAddress,
        seq: u8,
        ack_request: bool,
        payload: &[u8],
        buf: &mut [u8],
    ) -> Result<usize, Self::Error> {
        let header = Header {
            frame_type: FrameType::Data,
            frame_pending: false,
            security: Security::None,
            ack_request,
            pan_id_compress: false,
            version: FrameVersion::Ieee802154_2006,
            destination: to_extended(dest),
            source: to_extended(source),
            seq,
            seq_no_suppress: false,
            ie_present: false,
        };
        let mut len = header.encode(&mut buf[..]);
        if len + payload.len() > buf.len() {
            return Err(FramerError::TooShort);
        }
        buf[len..len + payload.len()].copy_from_slice(payload);
        len += payload.len();
        Ok(len)
    }

    fn parse(&self, buf: &[u8]) -> Result<(LinkAddress, LinkAddress, u8), Self::Error> {
        let (header, _len) = Header::decode(buf).map_err(|_| FramerError::Decode)?;
        Ok((from_address(&header.source), from_address(&header.destination), header.seq))
    }

    fn data_payload<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8], Self::Error> {
        let (header, header_len) = Header::decode(buf).map_err(|_| FramerError::Decode)?;
        if header.frame_type != FrameType::Data {
            return Err(FramerError::WrongFrameType);
        }
        Ok(&buf[header_len..])
    }

    fn create_eb(&self, source: LinkAddress, seq: u8, asn: u64, join_priority: u8, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let header = Header {
            frame_type: FrameType::Beacon,
            frame_pending: false,
            security: Security::None,
            ack_request: false,
            pan_id_compress: false,
            version: FrameVersion::Ieee802154_2006,
            destination: Address::broadcast(&AddressMode::Short),
            source: to_extended(source),
            seq,
            seq_no_suppress: false,
            ie_present: false,
        };
        let mut len = header.encode(&mut buf[..]);
        if len + EB_IE_LEN > buf.len() {
            return Err(FramerError::TooShort);
        }
        buf[len..len + 5].copy_from_slice(&asn.to_be_bytes()[3..]);
        buf[len + 5] = join_priority;
        len += EB_IE_LEN;
        Ok(len)
    }

    fn make_sync_ack(&self, drift: i32, is_nack: bool, buf: &mut [u8], dest: LinkAddress, seqno: u8) -> Result<usize, Self::Error> {
        let header = Header {
            frame_type: FrameType::Acknowledgement,
            frame_pending: false,
            security: Security::None,
            ack_request: false,
            pan_id_compress: false,
            version: FrameVersion::Ieee802154_2006,
            destination: to_extended(dest),
            source: Address::None,
            seq: seqno,
            seq_no_suppress: false,
            ie_present: false,
        };
        let mut len = header.encode(&mut buf[..]);
        if len + SYNC_IE_LEN > buf.len() {
            return Err(FramerError::TooShort);
        }
        buf[len] = is_nack as u8;
        buf[len + 1..len + 5].copy_from_slice(&drift.to_be_bytes());
        len += SYNC_IE_LEN;
        Ok(len)
    }

    fn parse_sync_ack(&self, buf: &[u8], expected_seqno: u8, _is_time_source: bool) -> Result<SyncAckBits, Self::Error> {
        let (header, header_len) = Header::decode(buf).map_err(|_| FramerError::Decode)?;
        if header.frame_type != FrameType::Acknowledgement {
            return Err(FramerError::WrongFrameType);
        }
        if header.seq != expected_seqno {
            return Ok(SyncAckBits { ok: false, nack: false, has_sync_ie: false, drift: 0 });
        }
        if buf.len() < header_len + SYNC_IE_LEN {
            return Ok(SyncAckBits { ok: true, nack: false, has_sync_ie: false, drift: 0 });
        }
        let nack = buf[header_len] != 0;
        let mut drift_bytes = [0u8; 4];
        drift_bytes.copy_from_slice(&buf[header_len + 1..header_len + 5]);
        let drift = i32::from_be_bytes(drift_bytes);
        Ok(SyncAckBits { ok: true, nack, has_sync_ie: true, drift })
    }

    fn update_eb(&self, buf: &mut [u8], asn: u64, join_priority: u8) -> Result<bool, Self::Error> {
        let (_header, header_len) = Header::decode(buf).map_err(|_| FramerError::Decode)?;
        if buf.len() < header_len + EB_IE_LEN {
            return Ok(false);
        }
        buf[header_len..header_len + 5].copy_from_slice(&asn.to_be_bytes()[3..]);
        buf[header_len + 5] = join_priority;
        Ok(true)
    }

    fn parse_eb(&self, buf: &[u8]) -> Result<(LinkAddress, u64, u8), Self::Error> {
        let (header, header_len) = Header::decode(buf).map_err(|_| FramerError::Decode)?;
        if header.frame_type != FrameType::Beacon {
            return Err(FramerError::WrongFrameType);
        }
        if buf.len() < header_len + EB_IE_LEN {
            return Err(FramerError::TooShort);
        }
        let mut asn_bytes = [0u8; 8];
        asn_bytes[3..].copy_from_slice(&buf[header_len..header_len + 5]);
        let asn = u64::from_be_bytes(asn_bytes);
        let join_priority = buf[header_len + 5];
        Ok((from_address(&header.source), asn, join_priority))
    }

    fn parse_frame_type(&self, buf: &[u8]) -> Result<FrameTypeBits, Self::Error> {
        let (header, _len) = Header::decode(buf).map_err(|_| FramerError::Decode)?;
        Ok(FrameTypeBits {
            is_data: header.frame_type == FrameType::Data,
            do_ack: header.ack_request,
        })
    }

    fn extract_addresses(&self, buf: &[u8]) -> Result<(LinkAddress, LinkAddress), Self::Error> {
        let (header, _len) = Header::decode(buf).map_err(|_| FramerError::Decode)?;
        Ok((from_address(&header.source), from_address(&header.destination)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn addr(b: u8) -> LinkAddress {
        LinkAddress::from_u64(b as u64)
    }

    #[test]
    fn data_round_trip() {
        let framer = TschFramer;
        let mut buf = [0u8; 64];
        let n = framer.create_data(addr(2), addr(1), 7, true, &[0xaa, 0xbb], &mut buf).unwrap();
        let (src, dst, seq) = framer.parse(&buf[..n]).unwrap();
        assert_eq!(src, addr(1));
        assert_eq!(dst, addr(2));
        assert_eq!(seq, 7);
        assert_eq!(framer.data_payload(&buf[..n]).unwrap(), &[0xaa, 0xbb]);
    }

    #[test]
    fn sync_ack_round_trip() {
        let framer = TschFramer;
        let mut buf = [0u8; 64];
        let n = framer.make_sync_ack(-37, false, &mut buf, addr(1), 9).unwrap();
        let bits = framer.parse_sync_ack(&buf[..n], 9, true).unwrap();
        assert!(bits.ok);
        assert!(!bits.nack);
        assert!(bits.has_sync_ie);
        assert_eq!(bits.drift, -37);
    }

    #[test]
    fn sync_ack_seq_mismatch_is_not_ok() {
        let framer = TschFramer;
        let mut buf = [0u8; 64];
        let n = framer.make_sync_ack(0, false, &mut buf, addr(1), 9).unwrap();
        let bits = framer.parse_sync_ack(&buf[..n], 10, true).unwrap();
        assert!(!bits.ok);
    }

    #[test]
    fn eb_round_trip_and_update() {
        let framer = TschFramer;
        let mut buf = [0u8; 64];
        let n = framer.create_eb(addr(3), 1, 0x12_3456_789a, 2, &mut buf).unwrap();
        let (src, asn, jp) = framer.parse_eb(&buf[..n]).unwrap();
        assert_eq!(src, addr(3));
        assert_eq!(asn, 0x12_3456_789a);
        assert_eq!(jp, 2);

        framer.update_eb(&mut buf[..n], 0x12_3456_789b, 1).unwrap();
        let (_, asn2, jp2) = framer.parse_eb(&buf[..n]).unwrap();
        assert_eq!(asn2, 0x12_3456_789b);
        assert_eq!(jp2, 1);
    }
}
