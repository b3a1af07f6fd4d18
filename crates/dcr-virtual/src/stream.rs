//! # Stream Builders
//!
//! Lays out one contract stream (types, blobs or instances) as a chain of
//! data blocks in a single reservation.
//!
//! Blocks are written oldest first. Each block header links back to the one
//! before it, and the stream's head is the last block written, so the reader
//! sees them newest first.
//!
//! ```text
//! block 0: begin | pos | end | prev=null | entities...
//! block 1: begin | pos | end | prev=block 0 | entities...   <- head
//! ```
//!
//! A stream with no blocks is "missing": its record has a null head. A stream
//! with one empty block is "empty": it has a head but no entities.
//!
//! ## Example
//!
//! ```rust
//! use dcr_core::types::{Endianness, PointerWidth};
//! use dcr_virtual::{StreamBuilder, TypeSpec, VirtualMemorySystem};
//!
//! let mut system = VirtualMemorySystem::with_null_page(Endianness::Little, PointerWidth::Eight);
//! let placed = StreamBuilder::types()
//!     .with_type(TypeSpec::new(2, "SOSBreakingChangeVersion", 1, 4))
//!     .reserve(&mut system);
//! assert!(!placed.is_missing());
//! ```

use dcr_core::context::{KnownStream, ENTITY_HEADER_SIZE};
use dcr_core::ds_type::DSType;
use dcr_core::types::Address;

use crate::buffer::BufferBuilder;
use crate::error::{fail_fast, narrow};
use crate::patch::Patch;
use crate::system::VirtualMemorySystem;

/// A type entity to emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec
{
    /// Remote numeric id
    pub id: u16,
    /// Layout version
    pub version: u16,
    /// Size in bytes, written pointer-width
    pub size: u64,
    /// `(referenced type id, offset)` pairs
    pub fields: Vec<(u16, u16)>,
    /// Type name
    pub name: String,
}

impl TypeSpec
{
    /// A type with no fields
    #[must_use]
    pub fn new(id: u16, name: impl Into<String>, version: u16, size: u64) -> Self
    {
        Self {
            id,
            version,
            size,
            fields: Vec::new(),
            name: name.into(),
        }
    }

    /// A type named after a local type, at the version the reader expects
    #[must_use]
    pub fn for_ds_type(ty: DSType, id: u16, size: u64) -> Self
    {
        Self::new(id, ty.name(), ty.version(), size)
    }

    /// Add a field offset.
    #[must_use]
    pub fn with_field(mut self, type_id: u16, offset: u16) -> Self
    {
        self.fields.push((type_id, offset));
        self
    }
}

/// A blob entity to emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSpec
{
    /// Remote type id the blob belongs to
    pub type_id: u16,
    /// Layout version
    pub version: u16,
    /// Raw bytes
    pub data: Vec<u8>,
}

impl BlobSpec
{
    /// A version-1 blob
    #[must_use]
    pub fn new(type_id: u16, data: impl Into<Vec<u8>>) -> Self
    {
        Self {
            type_id,
            version: 1,
            data: data.into(),
        }
    }
}

/// An instance entity to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceSpec
{
    /// Remote type id of the instance
    pub type_id: u16,
    /// Layout version
    pub version: u16,
    /// Where the instance lives
    pub address: Patch,
}

impl InstanceSpec
{
    /// A version-1 instance at a fixed address
    #[must_use]
    pub const fn new(type_id: u16, address: Address) -> Self
    {
        Self {
            type_id,
            version: 1,
            address: Patch::ConstPointer(address),
        }
    }

    /// A version-1 instance whose address is resolved later
    #[must_use]
    pub const fn patched(type_id: u16, address: Patch) -> Self
    {
        Self {
            type_id,
            version: 1,
            address,
        }
    }
}

/// One entity in a stream block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity
{
    /// Type entity, types stream only
    Type(TypeSpec),
    /// Blob entity, blobs stream only
    Blob(BlobSpec),
    /// Instance entity, instances stream only
    Instance(InstanceSpec),
    /// Payload bytes written as-is after an entity header, in any stream
    Raw(Vec<u8>),
}

impl Entity
{
    fn belongs_to(&self, stream: KnownStream) -> bool
    {
        match self {
            Entity::Type(_) => stream == KnownStream::Types,
            Entity::Blob(_) => stream == KnownStream::Blobs,
            Entity::Instance(_) => stream == KnownStream::Instances,
            Entity::Raw(_) => true,
        }
    }

    /// Write header and payload at `offset`, returning the bytes written.
    ///
    /// ## Panics
    ///
    /// Panics if a count, name length or the entity size overflows its
    /// field.
    #[track_caller]
    fn encode(&self, buffer: &mut BufferBuilder, offset: usize) -> usize
    {
        let payload = offset + ENTITY_HEADER_SIZE;
        let width = buffer.pointer_size();
        let end = match self {
            Entity::Type(spec) => {
                buffer.write_u16(payload, spec.id);
                buffer.write_u16(payload + 2, spec.version);
                buffer.write_u16(payload + 4, fail_fast(narrow("field count", spec.fields.len())));
                buffer.write_u16(payload + 6, fail_fast(narrow("type name length", spec.name.len())));
                buffer.write_size(payload + 8, spec.size);
                let mut cursor = payload + 8 + width;
                for &(type_id, field_offset) in &spec.fields {
                    buffer.write_u16(cursor, type_id);
                    buffer.write_u16(cursor + 2, field_offset);
                    cursor += 4;
                }
                buffer.write_bytes(cursor, spec.name.as_bytes());
                cursor + spec.name.len()
            }
            Entity::Blob(spec) => {
                buffer.write_u16(payload, spec.type_id);
                buffer.write_u16(payload + 2, spec.version);
                buffer.write_bytes(payload + 4, &spec.data);
                payload + 4 + spec.data.len()
            }
            Entity::Instance(spec) => {
                buffer.write_u16(payload, spec.type_id);
                buffer.write_u16(payload + 2, spec.version);
                buffer.write_u32(payload + 4, 0);
                buffer.patch_at(payload + 8, spec.address);
                payload + 8 + width
            }
            Entity::Raw(bytes) => {
                buffer.write_bytes(payload, bytes);
                payload + bytes.len()
            }
        };
        let size = end - offset;
        buffer.write_u32(offset, fail_fast(narrow("entity size", size)));
        buffer.write_u32(offset + 4, 0);
        size
    }
}

/// A stream placed in a system, ready to be named by a data context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedStream
{
    /// Which stream this is
    pub stream: KnownStream,
    /// Head block address, [`Patch::NULL`] when missing
    pub head: Patch,
    /// Value for the record's block-data-size field
    pub block_data_size: u64,
    /// Value for the record's max-data-size field
    pub max_data_size: u64,
}

impl PlacedStream
{
    /// A stream record with a null head
    #[must_use]
    pub const fn missing(stream: KnownStream) -> Self
    {
        Self {
            stream,
            head: Patch::NULL,
            block_data_size: 0,
            max_data_size: 0,
        }
    }

    /// Whether the record has no blocks
    #[must_use]
    pub fn is_missing(&self) -> bool
    {
        self.head == Patch::NULL
    }
}

/// Builds the block chain of one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBuilder
{
    stream: KnownStream,
    blocks: Vec<Vec<Entity>>,
    block_data_size: Option<u64>,
    max_data_size: Option<u64>,
}

impl StreamBuilder
{
    /// A stream with no blocks yet
    #[must_use]
    pub const fn new(stream: KnownStream) -> Self
    {
        Self {
            stream,
            blocks: Vec::new(),
            block_data_size: None,
            max_data_size: None,
        }
    }

    /// Types stream
    #[must_use]
    pub const fn types() -> Self
    {
        Self::new(KnownStream::Types)
    }

    /// Blobs stream
    #[must_use]
    pub const fn blobs() -> Self
    {
        Self::new(KnownStream::Blobs)
    }

    /// Instances stream
    #[must_use]
    pub const fn instances() -> Self
    {
        Self::new(KnownStream::Instances)
    }

    /// A stream with one block and no entities
    #[must_use]
    pub fn empty(stream: KnownStream) -> Self
    {
        Self::new(stream).next_block()
    }

    /// Which stream is being built
    #[must_use]
    pub const fn stream(&self) -> KnownStream
    {
        self.stream
    }

    /// Number of blocks
    #[must_use]
    pub fn block_count(&self) -> usize
    {
        self.blocks.len()
    }

    /// Start a new block. Later entities go into it.
    #[must_use]
    pub fn next_block(mut self) -> Self
    {
        self.blocks.push(Vec::new());
        self
    }

    /// Append an entity to the current block, starting one if needed.
    ///
    /// ## Panics
    ///
    /// Panics if the entity kind does not belong in this stream.
    #[track_caller]
    pub fn push(&mut self, entity: Entity)
    {
        assert!(
            entity.belongs_to(self.stream),
            "{entity:?} does not belong in the {} stream",
            self.stream
        );
        if self.blocks.is_empty() {
            self.blocks.push(Vec::new());
        }
        if let Some(block) = self.blocks.last_mut() {
            block.push(entity);
        }
    }

    /// Append a type entity.
    #[must_use]
    #[track_caller]
    pub fn with_type(mut self, spec: TypeSpec) -> Self
    {
        self.push(Entity::Type(spec));
        self
    }

    /// Append a blob entity.
    #[must_use]
    #[track_caller]
    pub fn with_blob(mut self, spec: BlobSpec) -> Self
    {
        self.push(Entity::Blob(spec));
        self
    }

    /// Append an instance entity.
    #[must_use]
    #[track_caller]
    pub fn with_instance(mut self, spec: InstanceSpec) -> Self
    {
        self.push(Entity::Instance(spec));
        self
    }

    /// Append a raw entity.
    #[must_use]
    pub fn with_raw(mut self, payload: impl Into<Vec<u8>>) -> Self
    {
        self.push(Entity::Raw(payload.into()));
        self
    }

    /// Override the record's block-data-size field.
    #[must_use]
    pub const fn with_block_data_size(mut self, size: u64) -> Self
    {
        self.block_data_size = Some(size);
        self
    }

    /// Override the record's max-data-size field.
    #[must_use]
    pub const fn with_max_data_size(mut self, size: u64) -> Self
    {
        self.max_data_size = Some(size);
        self
    }

    /// Render the blocks into `buffer`, returning the head block offset and
    /// the largest and total entity byte counts.
    fn render(&self, buffer: &mut BufferBuilder) -> Option<(usize, u64, u64)>
    {
        let width = buffer.pointer_size();
        let mut previous: Option<usize> = None;
        let (mut largest, mut total) = (0u64, 0u64);
        for entities in &self.blocks {
            let header = buffer.len();
            let data = header + 4 * width;
            buffer.ensure_capacity(header, 4 * width);
            let mut end = data;
            for entity in entities {
                end += entity.encode(buffer, end);
            }
            buffer.patch_at(header, Patch::SameBufferOffset(data));
            buffer.patch_at(header + width, Patch::SameBufferOffset(data));
            buffer.patch_at(header + 2 * width, Patch::SameBufferOffset(end));
            let prev = previous.map_or(Patch::NULL, Patch::SameBufferOffset);
            buffer.patch_at(header + 3 * width, prev);

            let len = (end - data) as u64;
            largest = largest.max(len);
            total += len;
            previous = Some(header);
        }
        previous.map(|head| (head, largest, total))
    }

    /// Queue the stream's blocks as one reservation.
    pub fn reserve(self, system: &mut VirtualMemorySystem) -> PlacedStream
    {
        let mut buffer = BufferBuilder::new(*system.layout(), format!("{} stream", self.stream));
        let Some((head, largest, total)) = self.render(&mut buffer) else {
            return PlacedStream::missing(self.stream);
        };
        let reservation = buffer.reserve(system);
        PlacedStream {
            stream: self.stream,
            head: Patch::ReservationOffset {
                reservation,
                offset: head as u64,
            },
            block_data_size: self.block_data_size.unwrap_or(largest),
            max_data_size: self.max_data_size.unwrap_or(total),
        }
    }
}
