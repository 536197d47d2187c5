
use crate::packet::Packet;
use ieee802154::mac::DecodeError;

use crate::mac::tsch::queue::QueueError;
use crate::mac::tsch::schedule::ScheduleError;

/// Basic MAC errors
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError<E> {
    /// Buffer full
    BufferFull(Packet),

    /// Transmission buffer full
    TransmitPending,

    /// Transmission failed
    TransmitFailed(Packet),

    /// Decoding error
    DecodeError(DecodeError),

    /// Wrapper for unhandled / underlying radio errors
    Radio(E),

    Timeout,

    Busy,

    /// A neighbor table or packet pool has no free slot.
    QueueFull,

    /// The schedule manager rejected the operation.
    ScheduleError,

    /// The coordination lock could not be acquired.
    LockContention,

    /// Not currently associated with a network.
    NotAssociated,

    /// Internal bookkeeping invariant violated.
    Fatal,
}

impl<E> From<QueueError> for CoreError<E> {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::LockContended => CoreError::LockContention,
            _ => CoreError::QueueFull,
        }
    }
}

impl<E> From<ScheduleError> for CoreError<E> {
    fn from(_: ScheduleError) -> Self {
        CoreError::ScheduleError
    }
}

