//! # Fixtures
//!
//! One-call construction of a complete descriptor in a fresh system: the
//! three known streams, a data context naming them, and a descriptor header
//! pointing at the context.
//!
//! ## Example
//!
//! ```rust
//! use dcr_core::{DSType, Endianness, PointerWidth, Target};
//! use dcr_virtual::FixtureBuilder;
//!
//! let fixture = FixtureBuilder::new(Endianness::Big, PointerWidth::Four)
//!     .with_global(DSType::SOSBreakingChangeVersion, 2, [0x00, 0x00, 0x00, 0x07])
//!     .build();
//!
//! let descriptor = fixture.descriptor();
//! let mut target = Target::with_reader(Box::new(fixture.into_system()));
//! target.set_stream(descriptor).unwrap();
//! assert_eq!(target.breaking_change_version().unwrap(), 7);
//! ```

use std::sync::Arc;

use dcr_core::context::KnownStream;
use dcr_core::ds_type::DSType;
use dcr_core::types::{Address, Endianness, PointerWidth, TargetLayout};
use tracing::debug;

use crate::context::DataContextBuilder;
use crate::descriptor::DescriptorBuilder;
use crate::error::{fail_fast, VirtualMemoryError, VirtualResult};
use crate::stream::{BlobSpec, InstanceSpec, StreamBuilder, TypeSpec};
use crate::system::VirtualMemorySystem;

/// A completed system holding a descriptor
#[derive(Debug)]
pub struct Fixture
{
    system: VirtualMemorySystem,
    descriptor: Address,
}

impl Fixture
{
    /// Wrap a system completed by hand around the descriptor at `descriptor`
    #[must_use]
    pub const fn from_parts(system: VirtualMemorySystem, descriptor: Address) -> Self
    {
        Self { system, descriptor }
    }

    /// Address of the descriptor header
    #[must_use]
    pub const fn descriptor(&self) -> Address
    {
        self.descriptor
    }

    /// Layout the fixture was written in
    #[must_use]
    pub const fn layout(&self) -> &TargetLayout
    {
        self.system.layout()
    }

    /// The completed system
    #[must_use]
    pub const fn system(&self) -> &VirtualMemorySystem
    {
        &self.system
    }

    /// Take the completed system
    #[must_use]
    pub fn into_system(self) -> VirtualMemorySystem
    {
        self.system
    }

    /// Take the completed system for sharing with the callback registry
    #[must_use]
    pub fn into_shared(self) -> (Arc<VirtualMemorySystem>, Address)
    {
        (Arc::new(self.system), self.descriptor)
    }
}

/// Collects entities and knobs for a [`Fixture`]
#[derive(Debug, Clone)]
pub struct FixtureBuilder
{
    layout: TargetLayout,
    types: StreamBuilder,
    blobs: StreamBuilder,
    instances: StreamBuilder,
    unknown_records: usize,
    pointer_data: Vec<Address>,
    magic: Option<u64>,
    flags: Option<u32>,
}

impl FixtureBuilder
{
    /// A fixture whose streams are all missing
    #[must_use]
    pub const fn new(endianness: Endianness, pointer_width: PointerWidth) -> Self
    {
        Self {
            layout: TargetLayout::new(endianness, pointer_width),
            types: StreamBuilder::types(),
            blobs: StreamBuilder::blobs(),
            instances: StreamBuilder::instances(),
            unknown_records: 0,
            pointer_data: Vec::new(),
            magic: None,
            flags: None,
        }
    }

    /// Layout the fixture is written in
    #[must_use]
    pub const fn layout(&self) -> &TargetLayout
    {
        &self.layout
    }

    /// Add a type entity.
    #[must_use]
    #[track_caller]
    pub fn with_type(mut self, spec: TypeSpec) -> Self
    {
        self.types = self.types.with_type(spec);
        self
    }

    /// Add a blob entity.
    #[must_use]
    #[track_caller]
    pub fn with_blob(mut self, spec: BlobSpec) -> Self
    {
        self.blobs = self.blobs.with_blob(spec);
        self
    }

    /// Add an instance entity.
    #[must_use]
    #[track_caller]
    pub fn with_instance(mut self, spec: InstanceSpec) -> Self
    {
        self.instances = self.instances.with_instance(spec);
        self
    }

    /// Add a type named after `ty` with remote id `id`, and a blob holding
    /// `data` for it.
    #[must_use]
    pub fn with_global(self, ty: DSType, id: u16, data: impl Into<Vec<u8>>) -> Self
    {
        let data = data.into();
        self.with_type(TypeSpec::for_ds_type(ty, id, data.len() as u64))
            .with_blob(BlobSpec::new(id, data))
    }

    /// Replace one stream's builder, for multi-block, empty or missing
    /// streams.
    #[must_use]
    pub fn with_stream(mut self, stream: StreamBuilder) -> Self
    {
        match stream.stream() {
            KnownStream::Types => self.types = stream,
            KnownStream::Blobs => self.blobs = stream,
            KnownStream::Instances => self.instances = stream,
        }
        self
    }

    /// Add stream records past the known streams.
    #[must_use]
    pub const fn with_unknown_records(mut self, count: usize) -> Self
    {
        self.unknown_records = count;
        self
    }

    /// Append a pointer-data entry.
    #[must_use]
    pub fn with_pointer_data(mut self, address: Address) -> Self
    {
        self.pointer_data.push(address);
        self
    }

    /// Write a different descriptor magic.
    #[must_use]
    pub const fn with_magic(mut self, magic: u64) -> Self
    {
        self.magic = Some(magic);
        self
    }

    /// Write different platform flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: u32) -> Self
    {
        self.flags = Some(flags);
        self
    }

    /// Lay everything out in a fresh system with a null page.
    ///
    /// ## Errors
    ///
    /// Any error from completing the system.
    pub fn try_build(self) -> VirtualResult<Fixture>
    {
        let mut system = VirtualMemorySystem::with_null_page(self.layout.endianness, self.layout.pointer_width);

        let mut context = DataContextBuilder::new(self.layout)
            .with_stream(self.types.reserve(&mut system))
            .with_stream(self.blobs.reserve(&mut system))
            .with_stream(self.instances.reserve(&mut system));
        for _ in 0..self.unknown_records {
            context = context.with_unknown_record();
        }
        let context = context.reserve(&mut system);

        let mut descriptor = DescriptorBuilder::new(self.layout)
            .with_context(context)
            .with_pointer_data(self.pointer_data);
        if let Some(magic) = self.magic {
            descriptor = descriptor.with_magic(magic);
        }
        if let Some(flags) = self.flags {
            descriptor = descriptor.with_flags(flags);
        }
        let id = descriptor.reserve(&mut system);

        system.try_complete()?;
        let descriptor = system
            .resolved_address(id)
            .ok_or(VirtualMemoryError::UnresolvedReservation(id))?;
        debug!(%descriptor, layout = %self.layout, "fixture built");
        Ok(Fixture { system, descriptor })
    }

    /// Lay everything out, panicking on error.
    #[must_use]
    #[track_caller]
    pub fn build(self) -> Fixture
    {
        fail_fast(self.try_build())
    }
}

#[cfg(test)]
mod tests
{
    use dcr_core::memory::{MemoryReader, RemoteMemory};
    use dcr_core::wire::DESCRIPTOR_MAGIC;

    use super::*;

    #[test]
    fn test_descriptor_magic_in_target_order()
    {
        for endianness in [Endianness::Little, Endianness::Big] {
            let fixture = FixtureBuilder::new(endianness, PointerWidth::Eight).build();
            let memory = RemoteMemory::new(fixture.system());
            let magic = memory.read_u64(fixture.descriptor(), endianness).unwrap();
            assert_eq!(magic, DESCRIPTOR_MAGIC);
        }
    }

    #[test]
    fn test_descriptor_is_readable()
    {
        let fixture = FixtureBuilder::new(Endianness::Little, PointerWidth::Four).build();
        let mut header = [0u8; 32];
        fixture.system().read(fixture.descriptor(), &mut header).unwrap();
        assert_eq!(&header[8..12], &[1, 0, 0, 0]);
    }
}
