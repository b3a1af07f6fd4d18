//! Data-context builder: the descriptor payload naming every stream.

use dcr_core::context::{data_context_header_size, stream_record_size, DATA_CONTEXT_MAGIC, DATA_CONTEXT_VERSION};
use dcr_core::types::TargetLayout;

use crate::buffer::BufferBuilder;
use crate::error::{fail_fast, narrow};
use crate::patch::Patch;
use crate::reservation::ReservationId;
use crate::stream::PlacedStream;
use crate::system::VirtualMemorySystem;

/// A data context placed in a system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedContext
{
    /// Reservation holding header and stream table
    pub reservation: ReservationId,
    /// Bytes in the reservation, the descriptor's payload length
    pub len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordSpec
{
    head: Patch,
    block_data_size: u64,
    max_data_size: u64,
}

/// Builds a data-context header followed by its stream table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataContextBuilder
{
    layout: TargetLayout,
    records: Vec<RecordSpec>,
    magic: u32,
    version: u16,
    header_size: Option<u16>,
}

impl DataContextBuilder
{
    /// An empty context for `layout`
    #[must_use]
    pub const fn new(layout: TargetLayout) -> Self
    {
        Self {
            layout,
            records: Vec::new(),
            magic: DATA_CONTEXT_MAGIC,
            version: DATA_CONTEXT_VERSION,
            header_size: None,
        }
    }

    /// Append the record for a placed stream.
    ///
    /// ## Panics
    ///
    /// Records are indexed by stream id, so streams must be added in id
    /// order starting at the types stream.
    #[must_use]
    #[track_caller]
    pub fn with_stream(mut self, placed: PlacedStream) -> Self
    {
        let expected = self.records.len();
        assert_eq!(
            placed.stream.index() as usize,
            expected,
            "{} stream added as record {expected}",
            placed.stream
        );
        self.records.push(RecordSpec {
            head: placed.head,
            block_data_size: placed.block_data_size,
            max_data_size: placed.max_data_size,
        });
        self
    }

    /// Append a record for a stream id the reader does not know.
    #[must_use]
    pub fn with_unknown_record(mut self) -> Self
    {
        self.records.push(RecordSpec {
            head: Patch::NULL,
            block_data_size: 0,
            max_data_size: 0,
        });
        self
    }

    /// Write a different magic.
    #[must_use]
    pub const fn with_magic(mut self, magic: u32) -> Self
    {
        self.magic = magic;
        self
    }

    /// Write a different version.
    #[must_use]
    pub const fn with_version(mut self, version: u16) -> Self
    {
        self.version = version;
        self
    }

    /// Declare a different header size. The table still follows the real
    /// header.
    #[must_use]
    pub const fn with_header_size(mut self, size: u16) -> Self
    {
        self.header_size = Some(size);
        self
    }

    /// Render into a buffer.
    #[must_use]
    pub fn into_buffer(self) -> BufferBuilder
    {
        let width = self.layout.pointer_size();
        let header_size = data_context_header_size(self.layout.pointer_width);
        let record_size = stream_record_size(self.layout.pointer_width);

        let mut buffer = BufferBuilder::new(self.layout, "data context");
        buffer.write_u32(0, self.magic);
        buffer.write_u16(4, self.header_size.unwrap_or_else(|| fail_fast(narrow("header size", header_size))));
        buffer.write_u16(6, self.version);
        buffer.write_u32(8, 0);
        buffer.write_u32(12, fail_fast(narrow("stream count", self.records.len())));
        buffer.patch_at(16, Patch::SameBufferOffset(header_size));
        buffer.ensure_capacity(header_size, self.records.len() * record_size);

        for (index, record) in self.records.iter().enumerate() {
            let offset = header_size + index * record_size;
            buffer.patch_at(offset, record.head);
            buffer.write_size(offset + width, record.block_data_size);
            buffer.write_size(offset + 2 * width, record.max_data_size);
            buffer.patch_at(offset + 3 * width, Patch::SameBufferOffset(0));
        }
        buffer
    }

    /// Queue the context as a reservation.
    pub fn reserve(self, system: &mut VirtualMemorySystem) -> PlacedContext
    {
        let buffer = self.into_buffer();
        let len = fail_fast(narrow("data context length", buffer.len()));
        PlacedContext {
            reservation: buffer.reserve(system),
            len,
        }
    }
}
