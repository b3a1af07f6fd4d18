//! # Buffer Builder
//!
//! A growable byte buffer laid out in the target's byte order, with patch
//! points for values that depend on addresses assigned later.
//!
//! ## Example
//!
//! ```rust
//! use dcr_core::types::{Address, Endianness, PointerWidth};
//! use dcr_virtual::{BufferBuilder, Patch, VirtualMemorySystem};
//!
//! let mut system = VirtualMemorySystem::with_null_page(Endianness::Little, PointerWidth::Eight);
//! let mut buffer = BufferBuilder::new(*system.layout(), "self-pointer");
//! buffer.write_u32(0, 0xfeed);
//! let slot = buffer.add_patch_point(8);
//! buffer.set_patch(slot, Patch::SameBufferOffset(0));
//! let id = buffer.reserve(&mut system);
//! system.complete();
//!
//! let start = system.resolved_address(id).unwrap();
//! assert_eq!(system.try_read_pointer(start + 8).unwrap(), start);
//! ```

use dcr_core::types::layout::uint_fits;
use dcr_core::types::{Address, TargetLayout};

use crate::error::{fail_fast, VirtualMemoryError, VirtualResult};
use crate::patch::{Patch, PatchPoint, PatchPointId};
use crate::range::{BufferBackedRange, VirtualMemoryRange};
use crate::reservation::{Reservable, ReservationId, ResolvedReservations};
use crate::system::VirtualMemorySystem;

/// Growable target-layout buffer with deferred writes
#[derive(Debug, Clone)]
pub struct BufferBuilder
{
    layout: TargetLayout,
    name: String,
    bytes: Vec<u8>,
    start: Option<Address>,
    patch_points: Vec<PatchPoint>,
}

impl BufferBuilder
{
    /// An empty buffer for a target with `layout`
    #[must_use]
    pub fn new(layout: TargetLayout, name: impl Into<String>) -> Self
    {
        Self {
            layout,
            name: name.into(),
            bytes: Vec::new(),
            start: None,
            patch_points: Vec::new(),
        }
    }

    /// Layout the buffer is written in
    #[must_use]
    pub const fn layout(&self) -> &TargetLayout
    {
        &self.layout
    }

    /// Diagnostic name
    #[must_use]
    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// Current length
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.bytes.len()
    }

    /// Whether nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }

    /// Pointer size of the target
    #[must_use]
    pub const fn pointer_size(&self) -> usize
    {
        self.layout.pointer_size()
    }

    /// Grow with zeros so that `[offset, offset + size)` is inside the buffer.
    pub fn ensure_capacity(&mut self, offset: usize, size: usize)
    {
        let end = offset + size;
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
    }

    fn try_write_uint(&mut self, what: &'static str, offset: usize, size: usize, value: u64) -> VirtualResult<()>
    {
        if !uint_fits(value, size) {
            return Err(VirtualMemoryError::ValueTooWide { what, value, size });
        }
        self.ensure_capacity(offset, size);
        self.layout
            .endianness
            .encode_uint(value, &mut self.bytes[offset..offset + size]);
        Ok(())
    }

    #[track_caller]
    fn write_uint(&mut self, what: &'static str, offset: usize, size: usize, value: u64)
    {
        fail_fast(self.try_write_uint(what, offset, size, value));
    }

    /// Write a `u16`.
    pub fn write_u16(&mut self, offset: usize, value: u16)
    {
        self.write_uint("u16", offset, 2, u64::from(value));
    }

    /// Write a `u32`.
    pub fn write_u32(&mut self, offset: usize, value: u32)
    {
        self.write_uint("u32", offset, 4, u64::from(value));
    }

    /// Write a `u64`.
    pub fn write_u64(&mut self, offset: usize, value: u64)
    {
        self.write_uint("u64", offset, 8, value);
    }

    /// Write a pointer-width size, panicking if it does not fit the width.
    #[track_caller]
    pub fn write_size(&mut self, offset: usize, value: u64)
    {
        self.write_uint("size", offset, self.pointer_size(), value);
    }

    /// Write a pointer, panicking if it does not fit the pointer width.
    #[track_caller]
    pub fn write_pointer(&mut self, offset: usize, address: Address)
    {
        fail_fast(self.check_pointer(address));
        self.write_uint("pointer", offset, self.pointer_size(), address.value());
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8])
    {
        self.ensure_capacity(offset, bytes.len());
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn check_pointer(&self, address: Address) -> VirtualResult<()>
    {
        if address.value() > self.layout.pointer_width.max_address() {
            return Err(VirtualMemoryError::InvalidPointer {
                address,
                width: self.layout.pointer_width,
            });
        }
        Ok(())
    }

    /// Mark a pointer-width slot at `offset` to be filled in later.
    ///
    /// The slot is zeroed until the patch is applied.
    #[track_caller]
    pub fn add_patch_point(&mut self, offset: usize) -> PatchPointId
    {
        self.ensure_capacity(offset, self.pointer_size());
        self.patch_points.push(PatchPoint::new(offset));
        PatchPointId(self.patch_points.len() - 1)
    }

    /// Bind a patch point.
    ///
    /// ## Errors
    ///
    /// - [`VirtualMemoryError::UnknownPatchPoint`]: `id` is from another buffer
    /// - [`VirtualMemoryError::PatchAlreadySet`]: the point is already bound
    pub fn try_set_patch(&mut self, id: PatchPointId, patch: Patch) -> VirtualResult<()>
    {
        self.patch_points
            .get_mut(id.0)
            .ok_or(VirtualMemoryError::UnknownPatchPoint(id.0))?
            .set_patch(patch)
    }

    /// Bind a patch point, panicking on misuse.
    #[track_caller]
    pub fn set_patch(&mut self, id: PatchPointId, patch: Patch)
    {
        fail_fast(self.try_set_patch(id, patch));
    }

    /// Add a patch point at `offset` and bind it at once.
    #[track_caller]
    pub fn patch_at(&mut self, offset: usize, patch: Patch)
    {
        let id = self.add_patch_point(offset);
        self.set_patch(id, patch);
    }

    /// Assigned start address, if any
    #[must_use]
    pub const fn start(&self) -> Option<Address>
    {
        self.start
    }

    /// Set the start address.
    ///
    /// ## Errors
    ///
    /// Returns [`VirtualMemoryError::StartAlreadySet`] on a second call.
    pub fn try_set_start(&mut self, start: Address) -> VirtualResult<()>
    {
        if self.start.is_some() {
            return Err(VirtualMemoryError::StartAlreadySet { name: self.name.clone() });
        }
        self.start = Some(start);
        Ok(())
    }

    /// Set the start address, panicking on a second call.
    #[track_caller]
    pub fn set_start(&mut self, start: Address)
    {
        fail_fast(self.try_set_start(start));
    }

    /// Apply every patch and produce the finished range.
    ///
    /// ## Errors
    ///
    /// - [`VirtualMemoryError::StartNotSet`]: no start address
    /// - [`VirtualMemoryError::UnboundPatch`]: a patch point was never bound
    /// - [`VirtualMemoryError::PatchOutOfBounds`], [`VirtualMemoryError::InvalidPointer`]:
    ///   a patch does not fit
    /// - [`VirtualMemoryError::UnresolvedReservation`]: a referenced
    ///   reservation has no address
    pub fn build(mut self, resolved: &ResolvedReservations) -> VirtualResult<BufferBackedRange>
    {
        let start = self.start.ok_or_else(|| VirtualMemoryError::StartNotSet { name: self.name.clone() })?;
        let patch_points = std::mem::take(&mut self.patch_points);
        for point in &patch_points {
            let patch = point.bound()?;
            let width = patch.width(self.layout.pointer_width);
            let offset = point.offset();
            if offset + width > self.bytes.len() {
                return Err(VirtualMemoryError::PatchOutOfBounds {
                    offset,
                    size: width,
                    len: self.bytes.len(),
                });
            }
            let value = patch.resolve(start, resolved)?;
            if patch.is_pointer() {
                self.check_pointer(Address::new(value))?;
            }
            self.try_write_uint("patch", offset, width, value)?;
        }
        Ok(BufferBackedRange::with_name(start.value(), self.bytes, self.name))
    }

    /// Queue this buffer as a reservation.
    pub fn reserve(self, system: &mut VirtualMemorySystem) -> ReservationId
    {
        system.reserve(Box::new(self))
    }
}

impl Reservable for BufferBuilder
{
    fn requested_size(&self) -> u64
    {
        self.bytes.len() as u64
    }

    fn set_start_address(&mut self, start: Address)
    {
        self.set_start(start);
    }

    fn complete(self: Box<Self>, resolved: &ResolvedReservations) -> VirtualResult<Box<dyn VirtualMemoryRange>>
    {
        let range = self.build(resolved)?;
        Ok(Box::new(range))
    }
}
