//! Deferred writes into builder buffers.
//!
//! A [`PatchPoint`] marks a buffer offset whose bytes are not known yet. Once
//! the value's source is known it is bound to a [`Patch`]; all patches are
//! applied when the buffer is rendered, after every reservation has an
//! address.

use std::fmt;
use std::panic::Location;

use dcr_core::types::{Address, PointerWidth};

use crate::error::{VirtualMemoryError, VirtualResult};
use crate::reservation::{ReservationId, ResolvedReservations};

/// Where a patched value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch
{
    /// A 4-byte constant
    ConstU32(u32),
    /// A pointer-width constant address
    ConstPointer(Address),
    /// A pointer-width constant size
    ConstSize(u64),
    /// The absolute address of an offset in the buffer being patched
    SameBufferOffset(usize),
    /// The absolute address of an offset in another reservation
    ReservationOffset
    {
        /// Reservation whose start the value is relative to
        reservation: ReservationId,
        /// Byte offset from that start
        offset: u64,
    },
}

impl Patch
{
    /// Null pointer
    pub const NULL: Patch = Patch::ConstPointer(Address::NULL);

    /// Bytes this patch writes
    #[must_use]
    pub const fn width(&self, pointer_width: PointerWidth) -> usize
    {
        match self {
            Patch::ConstU32(_) => 4,
            _ => pointer_width.bytes(),
        }
    }

    /// Whether the written value is an address
    #[must_use]
    pub const fn is_pointer(&self) -> bool
    {
        !matches!(self, Patch::ConstU32(_) | Patch::ConstSize(_))
    }

    /// Compute the value to write.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::UnresolvedReservation`] if a referenced
    /// reservation has no address.
    pub fn resolve(&self, own_start: Address, resolved: &ResolvedReservations) -> VirtualResult<u64>
    {
        Ok(match *self {
            Patch::ConstU32(value) => u64::from(value),
            Patch::ConstPointer(address) => address.value(),
            Patch::ConstSize(size) => size,
            Patch::SameBufferOffset(offset) => own_start.value().wrapping_add(offset as u64),
            Patch::ReservationOffset { reservation, offset } => {
                resolved.address(reservation)?.value().wrapping_add(offset)
            }
        })
    }
}

/// Handle to a patch point inside one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchPointId(pub(crate) usize);

/// A buffer offset waiting for a [`Patch`]
#[derive(Debug, Clone)]
pub struct PatchPoint
{
    offset: usize,
    patch: Option<Patch>,
    location: &'static Location<'static>,
}

impl PatchPoint
{
    /// Mark `offset`, remembering the caller for diagnostics.
    #[track_caller]
    #[must_use]
    pub fn new(offset: usize) -> Self
    {
        Self {
            offset,
            patch: None,
            location: Location::caller(),
        }
    }

    /// Buffer offset written by this patch point
    #[must_use]
    pub const fn offset(&self) -> usize
    {
        self.offset
    }

    /// Bound patch, if any
    #[must_use]
    pub const fn patch(&self) -> Option<&Patch>
    {
        self.patch.as_ref()
    }

    /// Where the patch point was created
    #[must_use]
    pub const fn location(&self) -> &'static Location<'static>
    {
        self.location
    }

    /// Bind the patch.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::PatchAlreadySet`] if already bound.
    pub fn set_patch(&mut self, patch: Patch) -> VirtualResult<()>
    {
        if self.patch.is_some() {
            return Err(VirtualMemoryError::PatchAlreadySet {
                offset: self.offset,
                location: self.location.to_string(),
            });
        }
        self.patch = Some(patch);
        Ok(())
    }

    /// The bound patch.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::UnboundPatch`] if nothing was bound.
    pub fn bound(&self) -> VirtualResult<Patch>
    {
        self.patch.ok_or_else(|| VirtualMemoryError::UnboundPatch {
            offset: self.offset,
            location: self.location.to_string(),
        })
    }
}

impl fmt::Display for PatchPoint
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "patch point at offset {} ({})", self.offset, self.location)
    }
}
