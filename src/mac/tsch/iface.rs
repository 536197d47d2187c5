//! External interfaces consumed by the TSCH core (spec §6): the radio
//! driver and the frame encoder/decoder ("framer"). Both are out-of-scope
//! collaborators per spec §1 — this module only states the contract.

use super::types::LinkAddress;

/// Radio operations the slot engine needs (spec §6's radio driver list).
/// This is deliberately a standalone trait rather than a thin layer over
/// the `radio` crate traits used elsewhere in this crate (`Base`,
/// `mac::core`): TSCH's own timing-critical ops (`channel_clear`,
/// `receiving_packet`, `pending_packet`, SFD timestamping) don't map
/// onto that crate's generic `Transmit`/`Receive`/`State` traits
/// one-for-one, and spec §6 enumerates them directly.
pub trait TschRadio<E> {
    fn radio_on(&mut self) -> Result<(), E>;
    fn radio_off(&mut self) -> Result<(), E>;

    /// Tune to the given physical channel. Must complete before the next
    /// radio operation in the same slot.
    fn set_channel(&mut self, channel: u8) -> Result<(), E>;

    /// Enable/disable hardware destination-address filtering. TSCH
    /// disables this while waiting for an ACK from an address that may
    /// not match a configured hardware filter entry.
    fn set_address_decode(&mut self, enable: bool) -> Result<(), E>;

    /// Stage `data` for transmission without yet keying the radio.
    fn prepare(&mut self, data: &[u8]) -> Result<(), E>;

    /// Key the radio and send the staged frame.
    fn transmit(&mut self) -> Result<RadioTxResult, E>;

    /// Clear-channel assessment: `true` if the channel is clear.
    fn channel_clear(&mut self) -> Result<bool, E>;

    /// `true` once the radio has detected a start-of-frame delimiter and
    /// is actively receiving a packet (distinct from general busy state).
    fn receiving_packet(&mut self) -> Result<bool, E>;

    /// `true` if a fully-received packet is buffered and ready to read.
    fn pending_packet(&mut self) -> Result<bool, E>;

    /// Read the buffered packet into `buf`, returning its length.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, E>;

    /// Per-read signal quality tuple: (RSSI in dBm, correlation/LQI).
    fn last_rx_quality(&mut self) -> Result<(i16, u8), E>;
}

/// Result of a transmit attempt at the radio level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioTxResult {
    Ok,
    Err,
    Collision,
}

/// Decoded frame-type summary used by the slot RX path to decide whether
/// to ACK and where to route the frame, without fully decoding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTypeBits {
    pub is_data: bool,
    pub do_ack: bool,
}

/// Bits carried back from parsing a received (possibly sync-bearing) ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncAckBits {
    pub ok: bool,
    pub nack: bool,
    pub has_sync_ie: bool,
    pub drift: i32,
}

/// The frame encoder/decoder, consumed by the TSCH core (spec §6). An
/// implementation typically wraps `ieee802154::mac` frame encode/decode
/// plus the enhanced-beacon / synchronization information element this
/// core's data model references but does not itself parse generically.
pub trait Framer {
    type Error;

    /// Encode a unicast or broadcast data frame.
    fn create_data(
        &self,
        dest: LinkAddress,
        source: LinkAddress,
        seq: u8,
        ack_request: bool,
        payload: &[u8],
        buf: &mut [u8],
    ) -> Result<usize, Self::Error>;

    /// Decode a received frame, returning (source, destination, seqno).
    fn parse(&self, buf: &[u8]) -> Result<(LinkAddress, LinkAddress, u8), Self::Error>;

    /// Slice out the data payload of an already-validated data frame.
    fn data_payload<'a>(&self, buf: &'a [u8]) -> Result<&'a [u8], Self::Error>;

    /// Encode an enhanced beacon from `source`, stamped with `asn` and
    /// `join_priority`.
    fn create_eb(&self, source: LinkAddress, seq: u8, asn: u64, join_priority: u8, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Build an enhanced ACK carrying a synchronization IE with the given
    /// drift estimate (and NACK bit), addressed back to `dest`/`seqno`.
    fn make_sync_ack(
        &self,
        drift: i32,
        is_nack: bool,
        buf: &mut [u8],
        dest: LinkAddress,
        seqno: u8,
    ) -> Result<usize, Self::Error>;

    /// Parse a received ACK, validating it is for `expected_seqno`.
    fn parse_sync_ack(
        &self,
        buf: &[u8],
        expected_seqno: u8,
        is_time_source: bool,
    ) -> Result<SyncAckBits, Self::Error>;

    /// Stamp (or refresh) the ASN/join-priority fields of an already
    /// framed EB in place. Returns whether the buffer was updated.
    fn update_eb(&self, buf: &mut [u8], asn: u64, join_priority: u8) -> Result<bool, Self::Error>;

    /// Parse a received EB, extracting (source, asn, join_priority).
    fn parse_eb(&self, buf: &[u8]) -> Result<(LinkAddress, u64, u8), Self::Error>;

    fn parse_frame_type(&self, buf: &[u8]) -> Result<FrameTypeBits, Self::Error>;

    fn extract_addresses(&self, buf: &[u8]) -> Result<(LinkAddress, LinkAddress), Self::Error>;
}

/// Upper-layer hooks (spec §6), all optional: a no-op default is provided
/// so an embedder only overrides what it cares about.
pub trait UpperLayerHooks {
    fn do_nack(&mut self, _link_handle: u16, _src: LinkAddress, _dst: LinkAddress) -> bool {
        false
    }

    fn joining_network(&mut self) {}

    fn leaving_network(&mut self) {}

    fn new_time_source(&mut self, _old: Option<LinkAddress>, _new: Option<LinkAddress>) {}
}

/// A hook implementation that does nothing, for embedders with no
/// upper-layer callbacks wired up yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHooks;

impl UpperLayerHooks for NullHooks {}
