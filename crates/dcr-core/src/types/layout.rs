//! Target byte order and pointer width.
//!
//! Both are negotiated once per session from the descriptor header and then
//! govern every multi-byte field the reader decodes.

use std::fmt;

use super::Address;

/// Byte order of the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endianness
{
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

impl Endianness
{
    /// Byte order of the host this code runs on
    #[must_use]
    pub const fn native() -> Self
    {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    /// Whether this is [`Endianness::Little`]
    #[must_use]
    pub const fn is_little(self) -> bool
    {
        matches!(self, Endianness::Little)
    }

    /// The other byte order
    #[must_use]
    pub const fn opposite(self) -> Self
    {
        match self {
            Endianness::Little => Endianness::Big,
            Endianness::Big => Endianness::Little,
        }
    }

    /// Decode an unsigned integer of up to 8 bytes.
    ///
    /// ```rust
    /// use dcr_core::types::Endianness;
    ///
    /// assert_eq!(Endianness::Little.decode_uint(&[0x01, 0x02]), 0x0201);
    /// assert_eq!(Endianness::Big.decode_uint(&[0x01, 0x02]), 0x0102);
    /// ```
    #[must_use]
    pub fn decode_uint(self, bytes: &[u8]) -> u64
    {
        debug_assert!(bytes.len() <= 8, "cannot decode {} bytes into a u64", bytes.len());
        let fold = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
        match self {
            Endianness::Little => bytes.iter().rev().fold(0, fold),
            Endianness::Big => bytes.iter().fold(0, fold),
        }
    }

    /// Encode `value` into all of `dest`.
    ///
    /// `value` must fit in `dest.len()` bytes; check with [`uint_fits`] when
    /// it comes from outside.
    pub fn encode_uint(self, value: u64, dest: &mut [u8])
    {
        debug_assert!(dest.len() <= 8, "cannot encode a u64 into {} bytes", dest.len());
        debug_assert!(uint_fits(value, dest.len()), "{value:#x} does not fit in {} bytes", dest.len());
        let len = dest.len();
        for i in 0..len {
            let byte = (value >> (8 * i)) as u8;
            match self {
                Endianness::Little => dest[i] = byte,
                Endianness::Big => dest[len - 1 - i] = byte,
            }
        }
    }

    /// Decode a `u16`.
    #[must_use]
    pub const fn decode_u16(self, bytes: [u8; 2]) -> u16
    {
        match self {
            Endianness::Little => u16::from_le_bytes(bytes),
            Endianness::Big => u16::from_be_bytes(bytes),
        }
    }

    /// Decode a `u32`.
    #[must_use]
    pub const fn decode_u32(self, bytes: [u8; 4]) -> u32
    {
        match self {
            Endianness::Little => u32::from_le_bytes(bytes),
            Endianness::Big => u32::from_be_bytes(bytes),
        }
    }

    /// Decode a `u64`.
    #[must_use]
    pub const fn decode_u64(self, bytes: [u8; 8]) -> u64
    {
        match self {
            Endianness::Little => u64::from_le_bytes(bytes),
            Endianness::Big => u64::from_be_bytes(bytes),
        }
    }
}

/// Whether `value` can be stored in `bytes` bytes without losing bits
///
/// ```rust
/// use dcr_core::types::layout::uint_fits;
///
/// assert!(uint_fits(0xffff, 2));
/// assert!(!uint_fits(0x1_0000, 2));
/// assert!(uint_fits(u64::MAX, 8));
/// ```
#[must_use]
pub const fn uint_fits(value: u64, bytes: usize) -> bool
{
    bytes >= 8 || value >> (8 * bytes) == 0
}

impl fmt::Display for Endianness
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Endianness::Little => write!(f, "little-endian"),
            Endianness::Big => write!(f, "big-endian"),
        }
    }
}

/// Size of a target pointer in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth
{
    /// 32-bit target
    Four,
    /// 64-bit target
    Eight,
}

impl PointerWidth
{
    /// Number of bytes a pointer occupies
    #[must_use]
    pub const fn bytes(self) -> usize
    {
        match self {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }

    /// Largest address representable at this width
    #[must_use]
    pub const fn max_address(self) -> u64
    {
        match self {
            PointerWidth::Four => u32::MAX as u64,
            PointerWidth::Eight => u64::MAX,
        }
    }

    /// Width for a byte count, if it is 4 or 8
    ///
    /// ```rust
    /// use dcr_core::types::PointerWidth;
    ///
    /// assert_eq!(PointerWidth::from_bytes(8), Some(PointerWidth::Eight));
    /// assert_eq!(PointerWidth::from_bytes(2), None);
    /// ```
    #[must_use]
    pub const fn from_bytes(bytes: usize) -> Option<Self>
    {
        match bytes {
            4 => Some(PointerWidth::Four),
            8 => Some(PointerWidth::Eight),
            _ => None,
        }
    }
}

impl fmt::Display for PointerWidth
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}-byte", self.bytes())
    }
}

/// Endianness and pointer width of one target, fixed for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetLayout
{
    /// Byte order of every multi-byte field
    pub endianness: Endianness,
    /// Size of every pointer-typed field
    pub pointer_width: PointerWidth,
}

impl TargetLayout
{
    /// Create a layout
    #[must_use]
    pub const fn new(endianness: Endianness, pointer_width: PointerWidth) -> Self
    {
        Self {
            endianness,
            pointer_width,
        }
    }

    /// Pointer size in bytes
    #[must_use]
    pub const fn pointer_size(&self) -> usize
    {
        self.pointer_width.bytes()
    }

    /// Decode a pointer from exactly [`Self::pointer_size`] bytes.
    #[must_use]
    pub fn decode_pointer(&self, bytes: &[u8]) -> Address
    {
        debug_assert_eq!(bytes.len(), self.pointer_size());
        Address::new(self.endianness.decode_uint(bytes))
    }

    /// Encode a pointer into exactly [`Self::pointer_size`] bytes.
    ///
    /// Addresses that do not fit the width are truncated; callers that build
    /// target memory validate against [`PointerWidth::max_address`] first.
    pub fn encode_pointer(&self, address: Address, dest: &mut [u8])
    {
        debug_assert_eq!(dest.len(), self.pointer_size());
        self.endianness.encode_uint(address.value(), dest);
    }
}

impl fmt::Display for TargetLayout
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}, {} pointers", self.endianness, self.pointer_width)
    }
}
