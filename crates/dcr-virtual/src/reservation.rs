//! Two-phase address assignment.
//!
//! A builder that does not know its final address registers a
//! [`Reservable`] and gets a [`ReservationId`] back. Completing the system
//! then runs three passes over every pending reservation:
//!
//! 1. ask each one for its size
//! 2. assign every reservation a disjoint first-fit address and record it
//! 3. let each one render itself against the full set of addresses and
//!    register the resulting range
//!
//! Because every address is known before any buffer is rendered, builders
//! can point at each other in either direction regardless of the order they
//! were reserved in.

use std::collections::HashMap;
use std::fmt;

use dcr_core::types::{Address, TargetLayout};

use crate::error::{VirtualMemoryError, VirtualResult};
use crate::range::VirtualMemoryRange;

/// Identifies a reservation within one system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationId(pub(crate) usize);

impl ReservationId
{
    /// Raw index
    #[must_use]
    pub const fn index(self) -> usize
    {
        self.0
    }
}

impl fmt::Display for ReservationId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}", self.0)
    }
}

/// Something that needs address space before it can be built
pub trait Reservable: Send + Sync
{
    /// Bytes of address space needed
    fn requested_size(&self) -> u64;

    /// Receive the assigned start address.
    ///
    /// Called exactly once, during pass 2.
    fn set_start_address(&mut self, start: Address);

    /// Render the final range.
    ///
    /// ## Errors
    ///
    /// Any builder error, typically an unbound patch point.
    fn complete(self: Box<Self>, resolved: &ResolvedReservations) -> VirtualResult<Box<dyn VirtualMemoryRange>>;
}

/// Addresses assigned to reservations, visible to every builder in pass 3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReservations
{
    layout: TargetLayout,
    addresses: HashMap<ReservationId, Address>,
}

impl ResolvedReservations
{
    pub(crate) fn new(layout: TargetLayout) -> Self
    {
        Self {
            layout,
            addresses: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, id: ReservationId, start: Address)
    {
        self.addresses.insert(id, start);
    }

    /// Layout of the system being completed
    #[must_use]
    pub const fn layout(&self) -> &TargetLayout
    {
        &self.layout
    }

    /// Start address assigned to `id`.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::UnresolvedReservation`] if `id` has not
    /// been assigned an address.
    pub fn address(&self, id: ReservationId) -> VirtualResult<Address>
    {
        self.addresses
            .get(&id)
            .copied()
            .ok_or(VirtualMemoryError::UnresolvedReservation(id))
    }

    /// Start address assigned to `id`, if any
    #[must_use]
    pub fn get(&self, id: ReservationId) -> Option<Address>
    {
        self.addresses.get(&id).copied()
    }
}

pub(crate) struct PendingReservation
{
    pub(crate) id: ReservationId,
    pub(crate) item: Box<dyn Reservable>,
}

/// Lowest address at or above `value` that is a multiple of `align`
pub(crate) const fn align_up(value: u64, align: u64) -> Option<u64>
{
    match value.checked_add(align - 1) {
        Some(bumped) => Some(bumped / align * align),
        None => None,
    }
}

/// First-fit search over sorted, disjoint `occupied` intervals.
///
/// Returns the lowest `align`-aligned start whose `[start, start + size)`
/// stays at or below `max_address` and touches no interval.
pub(crate) fn first_fit(occupied: &[(u64, u64)], size: u64, align: u64, max_address: u64) -> Option<u64>
{
    let fits = |start: u64| {
        size == 0 || start.checked_add(size - 1).is_some_and(|last| last <= max_address)
    };
    let mut cursor = 0u64;
    for &(start, end) in occupied {
        let candidate = align_up(cursor, align)?;
        if candidate <= start && start - candidate >= size && fits(candidate) {
            return Some(candidate);
        }
        cursor = cursor.max(end);
    }
    let candidate = align_up(cursor, align)?;
    fits(candidate).then_some(candidate)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_first_fit_uses_lowest_hole()
    {
        let occupied = [(0, 0x1000), (0x1010, 0x2000)];
        assert_eq!(first_fit(&occupied, 0x10, 8, u64::MAX), Some(0x1000));
        assert_eq!(first_fit(&occupied, 0x11, 8, u64::MAX), Some(0x2000));
    }

    #[test]
    fn test_first_fit_respects_alignment_and_ceiling()
    {
        let occupied = [(0, 0x1003)];
        assert_eq!(first_fit(&occupied, 4, 8, u64::MAX), Some(0x1008));
        assert_eq!(first_fit(&occupied, 4, 8, 0x100a), None);
        assert_eq!(first_fit(&occupied, 3, 8, 0x100a), Some(0x1008));
    }

    #[test]
    fn test_align_up()
    {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(9, 8), Some(16));
        assert_eq!(align_up(u64::MAX, 8), None);
    }
}
