//! # Harness Errors
//!
//! Every fallible harness operation has a `try_*` form returning
//! [`VirtualMemoryError`]. The plain forms panic with the same message:
//! misuse of a test fixture generator is a bug in the test, not a condition
//! to recover from.

use dcr_core::types::{Address, PointerWidth};
use thiserror::Error;

use crate::reservation::ReservationId;

/// Errors raised by the virtual memory system and its builders
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VirtualMemoryError
{
    /// A new range intersects one that is already registered
    #[error("range {name} [{start:#x}, {end:#x}) overlaps {existing} [{existing_start:#x}, {existing_end:#x})")]
    Overlap
    {
        /// Name of the range being added
        name: String,
        /// Start of the range being added
        start: u64,
        /// End (exclusive) of the range being added
        end: u64,
        /// Name of the registered range it collides with
        existing: String,
        /// Start of the registered range
        existing_start: u64,
        /// End (exclusive) of the registered range
        existing_end: u64,
    },

    /// Some byte of a read is not backed by a readable range
    #[error("cannot read {length} bytes at {address}")]
    Unmapped
    {
        /// Start of the failed read
        address: Address,
        /// Bytes requested
        length: usize,
    },

    /// An address does not fit the system's pointer width
    #[error("{address} does not fit in a {width} pointer")]
    InvalidPointer
    {
        /// Offending address
        address: Address,
        /// Pointer width of the system
        width: PointerWidth,
    },

    /// No free space is left for a reservation
    #[error("no free {size}-byte hole below the top of the address space")]
    OutOfAddressSpace
    {
        /// Requested size
        size: u64,
    },

    /// A builder was given its start address twice
    #[error("start address of {name} is already set")]
    StartAlreadySet
    {
        /// Builder name
        name: String,
    },

    /// A builder was finished before its start address was set
    #[error("start address of {name} was never set")]
    StartNotSet
    {
        /// Builder name
        name: String,
    },

    /// A patch point was bound twice
    #[error("patch point at offset {offset} is already bound (created at {location})")]
    PatchAlreadySet
    {
        /// Buffer offset of the patch point
        offset: usize,
        /// Where the patch point was created
        location: String,
    },

    /// A patch point was never bound before the buffer was finished
    #[error("patch point at offset {offset} was never bound (created at {location})")]
    UnboundPatch
    {
        /// Buffer offset of the patch point
        offset: usize,
        /// Where the patch point was created
        location: String,
    },

    /// A patch does not fit inside its buffer
    #[error("{size}-byte patch at offset {offset} runs past the {len}-byte buffer")]
    PatchOutOfBounds
    {
        /// Buffer offset of the patch
        offset: usize,
        /// Bytes the patch writes
        size: usize,
        /// Buffer length
        len: usize,
    },

    /// A patch refers to a reservation that has no address yet
    #[error("reservation {0} has no address")]
    UnresolvedReservation(ReservationId),

    /// A patch point id does not belong to the buffer it was used with
    #[error("no patch point {0} in this buffer")]
    UnknownPatchPoint(usize),

    /// A value needs more bytes than the field it is written to
    #[error("{what} {value:#x} does not fit in {size} bytes")]
    ValueTooWide
    {
        /// Field being written
        what: &'static str,
        /// Value that was rejected
        value: u64,
        /// Field width in bytes
        size: usize,
    },
}

/// Convenience type alias for `Result<T, VirtualMemoryError>`
pub type VirtualResult<T> = std::result::Result<T, VirtualMemoryError>;

/// Narrow a length or count to a fixed-width field.
///
/// ## Errors
///
/// Returns [`VirtualMemoryError::ValueTooWide`] if it does not fit.
pub(crate) fn narrow<T: TryFrom<usize>>(what: &'static str, value: usize) -> VirtualResult<T>
{
    T::try_from(value).map_err(|_| VirtualMemoryError::ValueTooWide {
        what,
        value: value as u64,
        size: std::mem::size_of::<T>(),
    })
}

/// Unwrap a harness result, panicking with the error message.
#[track_caller]
pub(crate) fn fail_fast<T>(result: VirtualResult<T>) -> T
{
    match result {
        Ok(value) => value,
        Err(err) => panic!("{err}"),
    }
}
