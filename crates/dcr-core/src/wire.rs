//! # Descriptor Wire Format
//!
//! Decodes the fixed header a target publishes so that an out-of-process tool
//! can find everything else.
//!
//! ## Layout
//!
//! | Field              | Size          | Notes                                     |
//! |--------------------|---------------|-------------------------------------------|
//! | magic              | 8             | [`DESCRIPTOR_MAGIC`] in target byte order |
//! | platform flags     | 4             | bit 0 must be set, bit 1 selects width    |
//! | payload length     | 4             | byte count of the data context            |
//! | payload address    | pointer width | absolute remote address                   |
//! | pointer data count | 4             | entries in the pointer-fixup table        |
//! | padding            | 4             | ignored                                   |
//! | pointer data addr  | pointer width | absolute remote address                   |
//!
//! ## Negotiation
//!
//! The byte order is discovered, not assumed: the magic is read once and
//! interpreted both ways, and exactly one interpretation has to match. The
//! pointer width comes from the flags, which are decoded with the byte order
//! found in the first step.
//!
//! Each field is read on its own, so decoding the header needs a handful of
//! bytes of working memory. Only the payload is buffered as a whole.

use tracing::debug;

use crate::config::ReaderConfig;
use crate::error::{ReaderError, ReaderResult};
use crate::memory::RemoteMemory;
use crate::types::{Address, Endianness, PointerWidth, TargetLayout};

/// Descriptor magic, `"DNCCDAC\0"` when stored little-endian
pub const DESCRIPTOR_MAGIC: u64 = 0x0043_4144_4343_4e44;

/// Platform flag that every valid descriptor sets
pub const FLAG_RESERVED: u32 = 1 << 0;

/// Platform flag selecting 8-byte pointers (clear means 4-byte)
pub const FLAG_POINTER_64: u32 = 1 << 1;

/// Decoded descriptor header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeader
{
    /// Byte order and pointer width negotiated from magic and flags
    pub layout: TargetLayout,
    /// Raw platform flags
    pub flags: u32,
    /// Length of the data-context payload
    pub payload_len: u32,
    /// Where the data-context payload lives
    pub payload_address: Address,
    /// Number of entries in the pointer-fixup table
    pub pointer_data_count: u32,
    /// Where the pointer-fixup table lives
    pub pointer_data_address: Address,
}

impl DescriptorHeader
{
    /// Encoded size of a header for the given pointer width
    ///
    /// ```rust
    /// use dcr_core::types::PointerWidth;
    /// use dcr_core::wire::DescriptorHeader;
    ///
    /// assert_eq!(DescriptorHeader::encoded_size(PointerWidth::Eight), 40);
    /// assert_eq!(DescriptorHeader::encoded_size(PointerWidth::Four), 32);
    /// ```
    #[must_use]
    pub const fn encoded_size(pointer_width: PointerWidth) -> usize
    {
        24 + 2 * pointer_width.bytes()
    }
}

/// A header together with the payload it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor
{
    /// Decoded header
    pub header: DescriptorHeader,
    /// `header.payload_len` bytes read from `header.payload_address`
    pub payload: Vec<u8>,
}

/// Work out the target byte order from the raw magic bytes.
///
/// ## Errors
///
/// Returns [`ReaderError::InvalidMagic`] unless exactly one byte order turns
/// the bytes into [`DESCRIPTOR_MAGIC`].
///
/// ```rust
/// use dcr_core::types::Endianness;
/// use dcr_core::wire::{detect_endianness, DESCRIPTOR_MAGIC};
///
/// let bytes = DESCRIPTOR_MAGIC.to_be_bytes();
/// assert_eq!(detect_endianness(bytes).unwrap(), Endianness::Big);
/// ```
pub fn detect_endianness(magic: [u8; 8]) -> ReaderResult<Endianness>
{
    let little = u64::from_le_bytes(magic);
    let big = u64::from_be_bytes(magic);
    match (little == DESCRIPTOR_MAGIC, big == DESCRIPTOR_MAGIC) {
        (true, false) => Ok(Endianness::Little),
        (false, true) => Ok(Endianness::Big),
        _ => Err(ReaderError::InvalidMagic { found: little }),
    }
}

/// Validate platform flags and extract the pointer width.
///
/// ## Errors
///
/// Returns [`ReaderError::CorruptDescriptor`] when bit 0 is clear.
pub fn pointer_width_from_flags(flags: u32) -> ReaderResult<PointerWidth>
{
    if flags & FLAG_RESERVED == 0 {
        return Err(ReaderError::CorruptDescriptor(format!(
            "platform flags 0x{flags:08x} do not have bit 0 set"
        )));
    }
    if flags & FLAG_POINTER_64 == 0 {
        Ok(PointerWidth::Four)
    } else {
        Ok(PointerWidth::Eight)
    }
}

fn field_error(field: &str, source: &ReaderError) -> ReaderError
{
    ReaderError::CorruptDescriptor(format!("could not read {field}: {source}"))
}

fn advance(address: Address, by: usize) -> ReaderResult<Address>
{
    address
        .checked_add(by as u64)
        .ok_or_else(|| ReaderError::CorruptDescriptor(format!("descriptor at {address} runs past the address space")))
}

/// Decode the header at `address`.
///
/// ## Errors
///
/// - [`ReaderError::InvalidMagic`]: neither byte order matches
/// - [`ReaderError::CorruptDescriptor`]: a field could not be read, or flag
///   bit 0 is clear
pub fn read_header(memory: &RemoteMemory<'_>, address: Address) -> ReaderResult<DescriptorHeader>
{
    let magic = memory
        .read_array::<8>(address)
        .map_err(|e| field_error("magic", &e))?;
    let endianness = detect_endianness(magic)?;
    debug!(%address, %endianness, "descriptor magic matched");

    let mut cursor = advance(address, 8)?;
    let flags = memory
        .read_u32(cursor, endianness)
        .map_err(|e| field_error("platform flags", &e))?;
    let pointer_width = pointer_width_from_flags(flags)?;
    let layout = TargetLayout::new(endianness, pointer_width);
    debug!("platform flags 0x{flags:08x}, {pointer_width} pointers");

    cursor = advance(cursor, 4)?;
    let payload_len = memory
        .read_u32(cursor, endianness)
        .map_err(|e| field_error("payload length", &e))?;
    debug!(payload_len, "payload length");

    cursor = advance(cursor, 4)?;
    let payload_address = memory
        .read_pointer(cursor, &layout)
        .map_err(|e| field_error("payload address", &e))?;
    debug!(%payload_address, "payload address");

    cursor = advance(cursor, pointer_width.bytes())?;
    let pointer_data_count = memory
        .read_u32(cursor, endianness)
        .map_err(|e| field_error("pointer data count", &e))?;
    debug!(pointer_data_count, "pointer data count");

    // count, then padding
    cursor = advance(cursor, 4 + 4)?;
    let pointer_data_address = memory
        .read_pointer(cursor, &layout)
        .map_err(|e| field_error("pointer data address", &e))?;
    debug!(%pointer_data_address, "pointer data address");

    Ok(DescriptorHeader {
        layout,
        flags,
        payload_len,
        payload_address,
        pointer_data_count,
        pointer_data_address,
    })
}

/// Fetch the payload a header points at.
///
/// ## Errors
///
/// Returns [`ReaderError::CorruptDescriptor`] if the payload is larger than
/// `config.max_payload_len` or cannot be read.
pub fn read_payload(memory: &RemoteMemory<'_>, header: &DescriptorHeader, config: &ReaderConfig) -> ReaderResult<Vec<u8>>
{
    if header.payload_len > config.max_payload_len {
        return Err(ReaderError::CorruptDescriptor(format!(
            "payload length {} exceeds the configured limit of {}",
            header.payload_len, config.max_payload_len
        )));
    }
    memory
        .read_vec(header.payload_address, header.payload_len as usize)
        .map_err(|e| field_error("payload", &e))
}

/// Decode the header at `address` and fetch its payload.
///
/// ## Errors
///
/// See [`read_header`] and [`read_payload`].
pub fn read_descriptor(memory: &RemoteMemory<'_>, address: Address, config: &ReaderConfig) -> ReaderResult<Descriptor>
{
    let header = read_header(memory, address)?;
    let payload = read_payload(memory, &header, config)?;
    Ok(Descriptor { header, payload })
}
