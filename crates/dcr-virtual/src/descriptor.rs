//! Descriptor header builder.
//!
//! The header is followed in the same reservation by its pointer-data table.
//! Knobs for a bad magic or bad flags produce headers the decoder must
//! reject.

use dcr_core::types::{Address, PointerWidth, TargetLayout};
use dcr_core::wire::{DescriptorHeader, DESCRIPTOR_MAGIC, FLAG_POINTER_64, FLAG_RESERVED};

use crate::buffer::BufferBuilder;
use crate::error::{fail_fast, narrow};
use crate::context::PlacedContext;
use crate::patch::Patch;
use crate::reservation::ReservationId;
use crate::system::VirtualMemorySystem;

/// Flags a well-formed header carries for `pointer_width`
#[must_use]
pub const fn default_flags(pointer_width: PointerWidth) -> u32
{
    match pointer_width {
        PointerWidth::Four => FLAG_RESERVED,
        PointerWidth::Eight => FLAG_RESERVED | FLAG_POINTER_64,
    }
}

/// Builds a descriptor header and its pointer-data table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBuilder
{
    layout: TargetLayout,
    context: Option<PlacedContext>,
    pointer_data: Vec<Patch>,
    magic: u64,
    flags: u32,
}

impl DescriptorBuilder
{
    /// A header with no payload
    #[must_use]
    pub const fn new(layout: TargetLayout) -> Self
    {
        Self {
            layout,
            context: None,
            pointer_data: Vec::new(),
            magic: DESCRIPTOR_MAGIC,
            flags: default_flags(layout.pointer_width),
        }
    }

    /// Point the payload at a placed data context.
    #[must_use]
    pub const fn with_context(mut self, context: PlacedContext) -> Self
    {
        self.context = Some(context);
        self
    }

    /// Append fixed pointer-data entries.
    #[must_use]
    pub fn with_pointer_data(mut self, addresses: impl IntoIterator<Item = Address>) -> Self
    {
        self.pointer_data.extend(addresses.into_iter().map(Patch::ConstPointer));
        self
    }

    /// Append one pointer-data entry resolved later.
    #[must_use]
    pub fn with_pointer_patch(mut self, patch: Patch) -> Self
    {
        self.pointer_data.push(patch);
        self
    }

    /// Write a different magic.
    #[must_use]
    pub const fn with_magic(mut self, magic: u64) -> Self
    {
        self.magic = magic;
        self
    }

    /// Write different platform flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self
    {
        self.flags = flags;
        self
    }

    /// Render into a buffer.
    #[must_use]
    pub fn into_buffer(self) -> BufferBuilder
    {
        let width = self.layout.pointer_size();
        let header_size = DescriptorHeader::encoded_size(self.layout.pointer_width);

        let mut buffer = BufferBuilder::new(self.layout, "descriptor");
        buffer.write_u64(0, self.magic);
        buffer.write_u32(8, self.flags);
        match self.context {
            Some(context) => {
                buffer.write_u32(12, context.len);
                buffer.patch_at(
                    16,
                    Patch::ReservationOffset {
                        reservation: context.reservation,
                        offset: 0,
                    },
                );
            }
            None => {
                buffer.write_u32(12, 0);
                buffer.patch_at(16, Patch::NULL);
            }
        }
        buffer.write_u32(16 + width, fail_fast(narrow("pointer data count", self.pointer_data.len())));
        buffer.write_u32(20 + width, 0);
        let table = if self.pointer_data.is_empty() {
            Patch::NULL
        } else {
            Patch::SameBufferOffset(header_size)
        };
        buffer.patch_at(24 + width, table);
        buffer.ensure_capacity(header_size, 0);

        for (index, entry) in self.pointer_data.into_iter().enumerate() {
            buffer.patch_at(header_size + index * width, entry);
        }
        buffer
    }

    /// Queue the descriptor as a reservation.
    pub fn reserve(self, system: &mut VirtualMemorySystem) -> ReservationId
    {
        self.into_buffer().reserve(system)
    }
}

#[cfg(test)]
mod tests
{
    use dcr_core::types::Endianness;

    use super::*;

    #[test]
    fn test_header_and_table_sizes()
    {
        let layout = TargetLayout::new(Endianness::Little, PointerWidth::Four);
        assert_eq!(DescriptorBuilder::new(layout).into_buffer().len(), 32);
        let buffer = DescriptorBuilder::new(layout)
            .with_pointer_data([Address::new(0x10), Address::new(0x20)])
            .into_buffer();
        assert_eq!(buffer.len(), 40);
    }

    #[test]
    fn test_default_flags()
    {
        assert_eq!(default_flags(PointerWidth::Four), 0b01);
        assert_eq!(default_flags(PointerWidth::Eight), 0b11);
    }
}
