//! Medium Access Control (MAC) layer module.
//! Contains MAC traits and implementations.

pub mod basic;
pub mod tsch;

/// Generic MAC trait, implemented by all MACs.
///
/// `Address`/`Frame` are associated rather than fixed to the legacy
/// `ieee802154`-only `Packet` type, since not every MAC in this crate
/// addresses or frames packets the same way (TSCH's `LinkAddress`/raw
/// frame bytes vs. the CSMA cores' `ieee802154::mac::Address`/`Packet`).
pub trait Mac {
    type Error;
    type Address;
    type Frame;

    /// Queue `payload` for transmission to `dest`.
    fn transmit(&mut self, dest: Self::Address, payload: &[u8]) -> Result<(), Self::Error>;

    /// Take the next received frame, if any is buffered.
    fn receive(&mut self) -> Result<Option<Self::Frame>, Self::Error>;

    /// Advance the MAC state by one unit of work (one slot, for TSCH).
    fn tick(&mut self) -> Result<(), Self::Error>;
}


