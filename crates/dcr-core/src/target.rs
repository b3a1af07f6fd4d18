//! # Target
//!
//! One reader session: a [`MemoryReader`] plus the tables parsed from the
//! most recent successful [`Target::set_stream`].
//!
//! ## Lifecycle
//!
//! 1. Create: [`Target::new`] or [`Target::with_reader`]
//! 2. Bind memory: [`Target::set_reader`] (exactly once)
//! 3. Parse: [`Target::set_stream`] with the descriptor address
//! 4. Query: [`Target::get_value`], [`Target::type_details`], ...
//!
//! ## Example
//!
//! ```rust,no_run
//! use dcr_core::{Address, DSType, FileImageReader, Target};
//!
//! let image = FileImageReader::open("target.img", Address::new(0x1000))?;
//! let mut target = Target::with_reader(Box::new(image));
//! target.set_stream(Address::new(0x1000))?;
//! let version: i32 = target.read_value(DSType::SOSBreakingChangeVersion)?;
//! println!("breaking change version {version}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Failure isolation
//!
//! `set_stream` builds the whole session off to the side and only replaces
//! the current one on success. A failed call leaves earlier results
//! answering lookups exactly as before.

use tracing::debug;

use crate::config::ReaderConfig;
use crate::context::{parse_context, ContractTables, ParsedContext, RemoteType};
use crate::ds_type::DSType;
use crate::error::{ReaderError, ReaderResult};
use crate::memory::{MemoryReader, RemoteMemory};
use crate::types::{Address, Endianness, TargetLayout};
use crate::wire::{read_descriptor, DescriptorHeader};

/// What a successful `set_stream` learned about the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig
{
    /// Where the descriptor header lives
    pub descriptor_address: Address,
    /// Negotiated byte order and pointer width
    pub layout: TargetLayout,
}

impl TargetConfig
{
    /// Whether the target stores multi-byte values little-endian
    #[must_use]
    pub const fn is_little_endian(&self) -> bool
    {
        self.layout.endianness.is_little()
    }

    /// Pointer size in bytes
    #[must_use]
    pub const fn pointer_size(&self) -> usize
    {
        self.layout.pointer_size()
    }
}

#[derive(Debug)]
struct Session
{
    config: TargetConfig,
    header: DescriptorHeader,
    context: ParsedContext,
}

/// Fixed-width integer that can be decoded out of a blob
pub trait TargetValue: Sized
{
    /// Encoded width in bytes
    const SIZE: usize;

    /// Build the value from `SIZE` native-endian bytes.
    fn from_native(bytes: &[u8]) -> Self;
}

macro_rules! impl_target_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TargetValue for $ty
            {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_native(bytes: &[u8]) -> Self
                {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_target_value!(u8, i8, u16, i16, u32, i32, u64, i64);

/// A reader session
pub struct Target
{
    reader: Option<Box<dyn MemoryReader + Send>>,
    config: ReaderConfig,
    session: Option<Session>,
}

impl Default for Target
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl std::fmt::Debug for Target
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Target")
            .field("has_reader", &self.reader.is_some())
            .field("config", &self.config)
            .field("session", &self.session.as_ref().map(|session| session.config))
            .finish()
    }
}

impl Target
{
    /// A session with no reader and default limits
    #[must_use]
    pub fn new() -> Self
    {
        Self::with_config(ReaderConfig::default())
    }

    /// A session with no reader and the given limits
    #[must_use]
    pub fn with_config(config: ReaderConfig) -> Self
    {
        Self {
            reader: None,
            config,
            session: None,
        }
    }

    /// A session already bound to `reader`
    #[must_use]
    pub fn with_reader(reader: Box<dyn MemoryReader + Send>) -> Self
    {
        let mut target = Self::new();
        target.reader = Some(reader);
        target
    }

    /// Bind the memory reader.
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::UsageError`] if a reader is already bound.
    pub fn set_reader(&mut self, reader: Box<dyn MemoryReader + Send>) -> ReaderResult<()>
    {
        if self.reader.is_some() {
            return Err(ReaderError::UsageError("a memory reader is already bound".into()));
        }
        self.reader = Some(reader);
        Ok(())
    }

    /// Whether a reader has been bound
    #[must_use]
    pub fn has_reader(&self) -> bool
    {
        self.reader.is_some()
    }

    /// Limits used by `set_stream`
    #[must_use]
    pub const fn reader_config(&self) -> &ReaderConfig
    {
        &self.config
    }

    fn memory(&self) -> ReaderResult<RemoteMemory<'_>>
    {
        self.reader
            .as_deref()
            .map(|reader| RemoteMemory::new(reader))
            .ok_or_else(|| ReaderError::UsageError("no memory reader is bound".into()))
    }

    fn session(&self) -> ReaderResult<&Session>
    {
        self.session
            .as_ref()
            .ok_or_else(|| ReaderError::UsageError("no descriptor has been parsed".into()))
    }

    /// Decode the descriptor at `address` and everything it points at.
    ///
    /// ## Errors
    ///
    /// - [`ReaderError::UsageError`]: no reader is bound
    /// - [`ReaderError::InvalidMagic`], [`ReaderError::CorruptDescriptor`]:
    ///   the header or data context is malformed
    /// - [`ReaderError::ReadFailure`]: a stream block could not be read
    /// - [`ReaderError::EnumerationFailure`]: a stream is malformed
    ///
    /// On error the previous session, if any, is kept.
    pub fn set_stream(&mut self, address: Address) -> ReaderResult<()>
    {
        let memory = self.memory()?;
        let descriptor = read_descriptor(&memory, address, &self.config)?;
        let context = parse_context(&memory, &descriptor, &self.config)?;
        let config = TargetConfig {
            descriptor_address: address,
            layout: descriptor.header.layout,
        };
        debug!(%address, layout = %config.layout, "descriptor parsed");
        self.session = Some(Session {
            config,
            header: descriptor.header,
            context,
        });
        Ok(())
    }

    /// Whether a descriptor has been parsed
    #[must_use]
    pub fn is_ready(&self) -> bool
    {
        self.session.is_some()
    }

    /// What the last successful `set_stream` negotiated
    #[must_use]
    pub fn config(&self) -> Option<&TargetConfig>
    {
        self.session.as_ref().map(|session| &session.config)
    }

    /// The decoded descriptor header
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::UsageError`] before a successful `set_stream`.
    pub fn header(&self) -> ReaderResult<&DescriptorHeader>
    {
        self.session().map(|session| &session.header)
    }

    /// Lookup tables of the current session
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::UsageError`] before a successful `set_stream`.
    pub fn tables(&self) -> ReaderResult<&ContractTables>
    {
        self.session().map(|session| &session.context.tables)
    }

    /// Raw blob bytes for `ty`, in target layout.
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::NotFound`] when the target publishes no blob
    /// for `ty` or `ty` is not mapped in this session.
    pub fn blob(&self, ty: DSType) -> ReaderResult<&[u8]>
    {
        self.tables()?
            .blob(ty)
            .ok_or_else(|| ReaderError::NotFound(format!("no blob for {ty}")))
    }

    /// Decode the blob for `ty` into `out` as a native-endian integer.
    ///
    /// `out.len()` selects the width and must be 1, 2, 4 or 8 and equal to
    /// the blob length.
    ///
    /// ## Errors
    ///
    /// - [`ReaderError::NotFound`]: no blob for `ty`
    /// - [`ReaderError::UsageError`]: unsupported width or a blob of a
    ///   different length
    pub fn get_value(&self, ty: DSType, out: &mut [u8]) -> ReaderResult<()>
    {
        if !matches!(out.len(), 1 | 2 | 4 | 8) {
            return Err(ReaderError::UsageError(format!(
                "cannot decode a {}-byte value",
                out.len()
            )));
        }
        let blob = self.blob(ty)?;
        if blob.len() != out.len() {
            return Err(ReaderError::UsageError(format!(
                "blob for {ty} holds {} bytes, {} requested",
                blob.len(),
                out.len()
            )));
        }
        let endianness = self.session()?.config.layout.endianness;
        let value = endianness.decode_uint(blob);
        Endianness::native().encode_uint(value, out);
        debug!(%ty, value, "decoded value");
        Ok(())
    }

    /// Typed form of [`Target::get_value`].
    ///
    /// ## Errors
    ///
    /// See [`Target::get_value`].
    pub fn read_value<T: TargetValue>(&self, ty: DSType) -> ReaderResult<T>
    {
        let mut raw = [0u8; 8];
        let field = &mut raw[..T::SIZE];
        self.get_value(ty, field)?;
        Ok(T::from_native(field))
    }

    /// The target's diagnostics breaking-change counter
    ///
    /// ## Errors
    ///
    /// See [`Target::get_value`].
    pub fn breaking_change_version(&self) -> ReaderResult<i32>
    {
        self.read_value(DSType::SOSBreakingChangeVersion)
    }

    /// Details of the remote type mapped to `ty`.
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::NotFound`] if `ty` is not mapped.
    pub fn type_details(&self, ty: DSType) -> ReaderResult<&RemoteType>
    {
        self.tables()?
            .type_details(ty)
            .ok_or_else(|| ReaderError::NotFound(format!("type {ty} is not published")))
    }

    /// Offset of the field of type `field` inside `ty`.
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::NotFound`] if either type is unmapped or `ty`
    /// has no field of that type.
    pub fn field_offset(&self, ty: DSType, field: DSType) -> ReaderResult<u16>
    {
        let field_id = self.type_details(field)?.id;
        self.type_details(ty)?
            .offset_of(field_id)
            .ok_or_else(|| ReaderError::NotFound(format!("{ty} has no field of type {field}")))
    }

    /// Address of the published instance of `ty`.
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::NotFound`] if no instance is published.
    pub fn instance_address(&self, ty: DSType) -> ReaderResult<Address>
    {
        self.tables()?
            .instance(ty)
            .ok_or_else(|| ReaderError::NotFound(format!("no instance of {ty}")))
    }

    /// Entry `index` of the pointer-data table.
    ///
    /// ## Errors
    ///
    /// - [`ReaderError::NotFound`]: `index` is past the end of the table
    /// - [`ReaderError::ReadFailure`]: the entry could not be read
    pub fn pointer_data(&self, index: u32) -> ReaderResult<Address>
    {
        let header = self.header()?;
        if index >= header.pointer_data_count {
            return Err(ReaderError::NotFound(format!(
                "pointer data index {index} is past the {} entries",
                header.pointer_data_count
            )));
        }
        let offset = u64::from(index) * header.layout.pointer_size() as u64;
        let address = header
            .pointer_data_address
            .checked_add(offset)
            .ok_or_else(|| ReaderError::CorruptDescriptor("pointer data table wraps the address space".into()))?;
        self.read_pointer(address)
    }

    /// Read a pointer using the session's layout.
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::UsageError`] before `set_stream` and
    /// [`ReaderError::ReadFailure`] if the read fails.
    pub fn read_pointer(&self, address: Address) -> ReaderResult<Address>
    {
        let layout = self.session()?.config.layout;
        self.memory()?.read_pointer(address, &layout)
    }

    /// Read a `u32` in the session's byte order.
    ///
    /// ## Errors
    ///
    /// See [`Target::read_pointer`].
    pub fn read_u32(&self, address: Address) -> ReaderResult<u32>
    {
        let endianness = self.session()?.config.layout.endianness;
        self.memory()?.read_u32(address, endianness)
    }

    /// Read a `u64` in the session's byte order.
    ///
    /// ## Errors
    ///
    /// See [`Target::read_pointer`].
    pub fn read_u64(&self, address: Address) -> ReaderResult<u64>
    {
        let endianness = self.session()?.config.layout.endianness;
        self.memory()?.read_u64(address, endianness)
    }
}
