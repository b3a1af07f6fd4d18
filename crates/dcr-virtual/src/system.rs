//! # Virtual Memory System
//!
//! A simulated target address space made of disjoint ranges.
//!
//! ## Reads
//!
//! A read may span several adjacent ranges. [`VirtualMemorySystem::try_read`]
//! walks forward from the start address, taking as many bytes as the current
//! range holds, and moves on to the range that starts where it ended. A gap
//! or an unreadable range fails the whole read and leaves the destination
//! untouched.
//!
//! ## Addresses
//!
//! Internally every address is a plain [`Address`]. [`ExternalPtr`] is the
//! opaque form a pointer takes when viewed from outside the target: its raw
//! bits are byte-swapped when the target's byte order differs from the
//! host's. It exists so tests can produce the values a host would see.
//!
//! ## Thread Safety
//!
//! A system is built and completed on one thread. Once complete it is only
//! read, so it can be shared through an `Arc` with the
//! [`callback`](crate::callback) registry.

use std::collections::BTreeMap;
use std::fmt;

use dcr_core::error::{ReaderError, ReaderResult};
use dcr_core::memory::MemoryReader;
use dcr_core::types::{Address, Endianness, PointerWidth, TargetLayout};
use tracing::{debug, trace};

use crate::error::{fail_fast, VirtualMemoryError, VirtualResult};
use crate::range::{overlaps, NullPage, VirtualMemoryRange};
use crate::reservation::{first_fit, PendingReservation, Reservable, ReservationId, ResolvedReservations};

/// Alignment of every address handed out by a reservation
pub const RESERVATION_ALIGNMENT: u64 = 8;

/// A target pointer as raw bits seen from the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalPtr(u64);

impl ExternalPtr
{
    /// Raw bits
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }

    /// Wrap raw bits without conversion
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self
    {
        ExternalPtr(raw)
    }
}

impl fmt::Display for ExternalPtr
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "ExternalPtr(0x{:x})", self.0)
    }
}

/// One flat image covering every readable range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatImage
{
    /// Address of `bytes[0]`
    pub base: Address,
    /// Range contents, with gaps zero-filled
    pub bytes: Vec<u8>,
}

/// Simulated address space
pub struct VirtualMemorySystem
{
    layout: TargetLayout,
    ranges: BTreeMap<u64, Box<dyn VirtualMemoryRange>>,
    pending: Vec<PendingReservation>,
    resolved: ResolvedReservations,
    next_reservation: usize,
}

impl fmt::Debug for VirtualMemorySystem
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let ranges: Vec<_> = self
            .ranges
            .values()
            .map(|range| format!("{} [{:#x}, {:#x})", range.name(), range.start(), range.end()))
            .collect();
        f.debug_struct("VirtualMemorySystem")
            .field("layout", &self.layout)
            .field("ranges", &ranges)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl VirtualMemorySystem
{
    /// An empty address space with the given layout
    #[must_use]
    pub fn new(endianness: Endianness, pointer_width: PointerWidth) -> Self
    {
        let layout = TargetLayout::new(endianness, pointer_width);
        Self {
            layout,
            ranges: BTreeMap::new(),
            pending: Vec::new(),
            resolved: ResolvedReservations::new(layout),
            next_reservation: 0,
        }
    }

    /// An address space with [`NullPage`] already registered
    #[must_use]
    pub fn with_null_page(endianness: Endianness, pointer_width: PointerWidth) -> Self
    {
        let mut system = Self::new(endianness, pointer_width);
        system.add_null_page();
        system
    }

    /// Byte order and pointer width of the simulated target
    #[must_use]
    pub const fn layout(&self) -> &TargetLayout
    {
        &self.layout
    }

    /// Pointer width of the simulated target
    #[must_use]
    pub const fn pointer_width(&self) -> PointerWidth
    {
        self.layout.pointer_width
    }

    /// Byte order of the simulated target
    #[must_use]
    pub const fn endianness(&self) -> Endianness
    {
        self.layout.endianness
    }

    /// Whether the target's byte order differs from the host's
    #[must_use]
    pub fn is_opposite_endian(&self) -> bool
    {
        self.layout.endianness != Endianness::native()
    }

    /// Check that `address` fits the pointer width.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::InvalidPointer`] if it does not.
    pub fn validate_pointer(&self, address: Address) -> VirtualResult<()>
    {
        if address.value() > self.layout.pointer_width.max_address() {
            return Err(VirtualMemoryError::InvalidPointer {
                address,
                width: self.layout.pointer_width,
            });
        }
        Ok(())
    }

    /// The host view of a target address
    #[must_use]
    pub fn to_external(&self, address: Address) -> ExternalPtr
    {
        if self.is_opposite_endian() {
            ExternalPtr(address.value().swap_bytes())
        } else {
            ExternalPtr(address.value())
        }
    }

    /// The target address behind a host view
    #[must_use]
    pub fn from_external(&self, pointer: ExternalPtr) -> Address
    {
        if self.is_opposite_endian() {
            Address::new(pointer.0.swap_bytes())
        } else {
            Address::new(pointer.0)
        }
    }

    /// Register a range.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::Overlap`] if the range shares an
    /// address with a registered one, or two ranges would start at the same
    /// address.
    pub fn try_add_range(&mut self, range: Box<dyn VirtualMemoryRange>) -> VirtualResult<()>
    {
        let (start, count) = (range.start(), range.count());
        let collision = self.ranges.values().find(|existing| {
            existing.start() == start || overlaps(start, count, existing.start(), existing.count())
        });
        if let Some(existing) = collision {
            return Err(VirtualMemoryError::Overlap {
                name: range.name().to_owned(),
                start,
                end: range.end(),
                existing: existing.name().to_owned(),
                existing_start: existing.start(),
                existing_end: existing.end(),
            });
        }
        debug!(name = range.name(), start = format_args!("{start:#x}"), count, "range added");
        self.ranges.insert(start, range);
        Ok(())
    }

    /// Register a range, panicking on overlap.
    #[track_caller]
    pub fn add_range(&mut self, range: Box<dyn VirtualMemoryRange>)
    {
        fail_fast(self.try_add_range(range));
    }

    /// Register the [`NullPage`].
    #[track_caller]
    pub fn add_null_page(&mut self)
    {
        self.add_range(Box::new(NullPage));
    }

    /// Number of registered ranges
    #[must_use]
    pub fn range_count(&self) -> usize
    {
        self.ranges.len()
    }

    /// The range containing `address`
    #[must_use]
    pub fn find_range(&self, address: u64) -> Option<&dyn VirtualMemoryRange>
    {
        self.ranges
            .range(..=address)
            .next_back()
            .map(|(_, range)| range.as_ref())
            .filter(|range| range.contains(address))
    }

    /// Read `dest.len()` bytes at `address`, stitching across ranges.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::Unmapped`] if any byte is in a gap or
    /// an unreadable range, or the read leaves the pointer width. `dest` is
    /// unchanged on error.
    pub fn try_read(&self, address: Address, dest: &mut [u8]) -> VirtualResult<()>
    {
        let length = dest.len();
        let unmapped = || VirtualMemoryError::Unmapped { address, length };
        let max = self.layout.pointer_width.max_address();
        let mut scratch = vec![0u8; dest.len()];
        let mut cursor = address.value();
        let mut filled = 0usize;

        while filled < scratch.len() {
            if cursor > max {
                return Err(unmapped());
            }
            let range = self.find_range(cursor).ok_or_else(unmapped)?;
            let available = usize::try_from(range.end() - cursor).unwrap_or(usize::MAX);
            let take = available.min(scratch.len() - filled);
            if !range.try_read_extent(cursor, &mut scratch[filled..filled + take]) {
                return Err(unmapped());
            }
            trace!(name = range.name(), cursor = format_args!("{cursor:#x}"), take, "read extent");
            filled += take;
            cursor = cursor.checked_add(take as u64).ok_or_else(unmapped)?;
        }

        dest.copy_from_slice(&scratch);
        Ok(())
    }

    /// Read a `u32` in the target's byte order.
    ///
    /// ## Errors
    ///
    /// See [`VirtualMemorySystem::try_read`].
    pub fn try_read_u32(&self, address: Address) -> VirtualResult<u32>
    {
        let mut bytes = [0u8; 4];
        self.try_read(address, &mut bytes)?;
        Ok(self.layout.endianness.decode_u32(bytes))
    }

    /// Read a pointer in the target's layout.
    ///
    /// ## Errors
    ///
    /// See [`VirtualMemorySystem::try_read`].
    pub fn try_read_pointer(&self, address: Address) -> VirtualResult<Address>
    {
        let mut bytes = [0u8; 8];
        let field = &mut bytes[..self.layout.pointer_size()];
        self.try_read(address, field)?;
        Ok(self.layout.decode_pointer(field))
    }

    fn occupied(&self) -> Vec<(u64, u64)>
    {
        self.ranges.values().map(|range| (range.start(), range.end())).collect()
    }

    /// Lowest free, aligned address with room for `size` bytes.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::OutOfAddressSpace`] when no hole fits
    /// below the pointer width's ceiling.
    pub fn find_free_address(&self, size: u64) -> VirtualResult<Address>
    {
        first_fit(
            &self.occupied(),
            size,
            RESERVATION_ALIGNMENT,
            self.layout.pointer_width.max_address(),
        )
        .map(Address::new)
        .ok_or(VirtualMemoryError::OutOfAddressSpace { size })
    }

    /// Queue a reservation. Nothing is placed until [`Self::complete`].
    pub fn reserve(&mut self, item: Box<dyn Reservable>) -> ReservationId
    {
        let id = ReservationId(self.next_reservation);
        self.next_reservation += 1;
        self.pending.push(PendingReservation { id, item });
        id
    }

    /// Number of reservations waiting for [`Self::complete`]
    #[must_use]
    pub fn pending_reservations(&self) -> usize
    {
        self.pending.len()
    }

    /// Address assigned to a completed reservation
    #[must_use]
    pub fn resolved_address(&self, id: ReservationId) -> Option<Address>
    {
        self.resolved.get(id)
    }

    /// Place and build every pending reservation.
    ///
    /// ## Errors
    ///
    /// Any error from address assignment, rendering or range registration.
    /// The system is not usable afterwards.
    pub fn try_complete(&mut self) -> VirtualResult<()>
    {
        let mut pending = std::mem::take(&mut self.pending);

        let sizes: Vec<u64> = pending.iter().map(|entry| entry.item.requested_size()).collect();

        let mut occupied = self.occupied();
        let max = self.layout.pointer_width.max_address();
        for (entry, &size) in pending.iter_mut().zip(&sizes) {
            // Empty reservations still get a distinct start.
            let footprint = size.max(1);
            occupied.sort_unstable();
            let start = first_fit(&occupied, footprint, RESERVATION_ALIGNMENT, max)
                .ok_or(VirtualMemoryError::OutOfAddressSpace { size })?;
            occupied.push((start, start.saturating_add(footprint)));
            self.resolved.insert(entry.id, Address::new(start));
            entry.item.set_start_address(Address::new(start));
            debug!(reservation = %entry.id, start = format_args!("{start:#x}"), size, "reservation placed");
        }

        for entry in pending {
            let range = entry.item.complete(&self.resolved)?;
            self.try_add_range(range)?;
        }
        Ok(())
    }

    /// Place and build every pending reservation, panicking on error.
    #[track_caller]
    pub fn complete(&mut self)
    {
        fail_fast(self.try_complete());
    }

    /// Copy every readable range into one image.
    ///
    /// Unreadable ranges such as the null page are skipped. Returns `None`
    /// when nothing is readable.
    #[must_use]
    pub fn flatten(&self) -> Option<FlatImage>
    {
        let mut readable = Vec::new();
        for range in self.ranges.values() {
            let Ok(len) = usize::try_from(range.count()) else {
                continue;
            };
            let mut bytes = vec![0u8; len];
            if len > 0 && range.try_read_extent(range.start(), &mut bytes) {
                readable.push((range.start(), bytes));
            }
        }
        let base = readable.first()?.0;
        let mut image = Vec::new();
        for (start, bytes) in readable {
            let offset = usize::try_from(start - base).ok()?;
            image.resize(offset, 0);
            image.extend_from_slice(&bytes);
        }
        Some(FlatImage {
            base: Address::new(base),
            bytes: image,
        })
    }
}

impl MemoryReader for VirtualMemorySystem
{
    fn read(&self, address: Address, dest: &mut [u8]) -> ReaderResult<()>
    {
        let length = dest.len();
        self.try_read(address, dest)
            .map_err(|_| ReaderError::ReadFailure { address, length })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::range::BufferBackedRange;

    fn system() -> VirtualMemorySystem
    {
        VirtualMemorySystem::with_null_page(Endianness::Little, PointerWidth::Eight)
    }

    #[test]
    fn test_external_pointer_round_trip()
    {
        for endianness in [Endianness::Little, Endianness::Big] {
            let system = VirtualMemorySystem::new(endianness, PointerWidth::Eight);
            let external = system.to_external(Address::new(0x1234));
            assert_eq!(system.from_external(external), Address::new(0x1234));
            assert_eq!(external.raw() == 0x1234, !system.is_opposite_endian());
        }
    }

    #[test]
    fn test_null_page_reads_fail()
    {
        let system = system();
        let mut dest = [0u8; 4];
        assert!(system.try_read(Address::new(0x10), &mut dest).is_err());
    }

    #[test]
    fn test_typed_reads()
    {
        let mut system = VirtualMemorySystem::new(Endianness::Big, PointerWidth::Four);
        system.add_range(Box::new(BufferBackedRange::new(0x2000, vec![0, 0, 0x10, 0])));
        assert_eq!(system.try_read_u32(Address::new(0x2000)).unwrap(), 0x1000);
        assert_eq!(system.try_read_pointer(Address::new(0x2000)).unwrap(), Address::new(0x1000));
    }

    #[test]
    fn test_find_free_address_skips_null_page()
    {
        let system = system();
        assert_eq!(system.find_free_address(0x40).unwrap(), Address::new(0x1000));
    }

    #[test]
    fn test_flatten_fills_gaps()
    {
        let mut system = system();
        system.add_range(Box::new(BufferBackedRange::new(0x2000, vec![1, 2])));
        system.add_range(Box::new(BufferBackedRange::new(0x2004, vec![3])));
        let image = system.flatten().unwrap();
        assert_eq!(image.base, Address::new(0x2000));
        assert_eq!(image.bytes, vec![1, 2, 0, 0, 3]);
    }
}
