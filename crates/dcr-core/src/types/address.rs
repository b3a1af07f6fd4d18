//! Remote address type.

use std::fmt;
use std::ops::{Add, Sub};

/// An address in the target's logical address space
///
/// Remote addresses are never dereferenced here. They are only handed to a
/// [`MemoryReader`](crate::memory::MemoryReader), so keeping them apart from
/// local offsets and lengths catches the most common decoding mistake at
/// compile time.
///
/// The value is always held as a `u64`; a 4-byte target only constrains how
/// many bytes an address occupies on the wire.
///
/// ```rust
/// use dcr_core::types::Address;
///
/// let block = Address::new(0x7f00_1000);
/// assert_eq!((block + 0x20).value(), 0x7f00_1020);
/// assert_eq!(block.to_string(), "0x000000007f001000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// Terminates block chains and marks a missing stream
    pub const NULL: Self = Self(0);

    /// Wrap a raw remote address
    #[must_use]
    pub const fn new(value: u64) -> Self
    {
        Self(value)
    }

    /// The raw remote address
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is [`Address::NULL`]
    #[must_use]
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// `self + offset`, or `None` past the top of the address space
    ///
    /// ```rust
    /// use dcr_core::types::Address;
    ///
    /// assert_eq!(Address::new(0x10).checked_add(0x10), Some(Address::new(0x20)));
    /// assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    /// ```
    #[must_use]
    pub const fn checked_add(self, offset: u64) -> Option<Self>
    {
        match self.0.checked_add(offset) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    /// Distance from `base` up to this address, if this address is not below
    /// `base`
    ///
    /// ```rust
    /// use dcr_core::types::Address;
    ///
    /// let base = Address::new(0x1000);
    /// assert_eq!(Address::new(0x1010).offset_from(base), Some(0x10));
    /// assert_eq!(Address::new(0x0ff0).offset_from(base), None);
    /// ```
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Wrapping: offsets that leave the address space surface as failed reads,
/// not panics.
impl Add<u64> for Address
{
    type Output = Self;

    fn add(self, offset: u64) -> Self
    {
        Self(self.0.wrapping_add(offset))
    }
}

impl Sub<u64> for Address
{
    type Output = Self;

    fn sub(self, offset: u64) -> Self
    {
        Self(self.0.wrapping_sub(offset))
    }
}
