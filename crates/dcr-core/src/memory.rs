//! # Remote Memory Access
//!
//! Every byte the reader sees comes through a [`MemoryReader`]. The reader
//! never maps target memory; it asks for `length` bytes at a remote address
//! and gets either all of them or an error.
//!
//! ## Implementations
//!
//! - [`CallbackReader`]: wraps an externally registered read function plus an
//!   opaque context id. This is what the [`entrypoints`](crate::entrypoints)
//!   bind when a host calls `set_reader_func`.
//! - [`FileImageReader`]: a flat memory image loaded from disk and mapped at a
//!   fixed base address (dump files, fixtures written by `dcr fixture`).
//! - The test harness's `VirtualMemorySystem` implements the trait directly.
//!
//! ## Failure contract
//!
//! A failed read leaves `dest` untouched. [`CallbackReader`] enforces this by
//! reading through a scratch buffer, so a callback that scribbles over part of
//! the buffer before failing cannot leak half a field into the caller.

use std::fs;
use std::io;
use std::path::Path;

use tracing::trace;

use crate::error::{ReaderError, ReaderResult};
use crate::types::{Address, Endianness, TargetLayout};

/// Raw read callback supplied by the host
///
/// `read(remote_address, length, user_context, dest) -> status` where `0`
/// means `dest` was fully written and anything else is a failure. The
/// `user_context` is the opaque id the host registered alongside the function;
/// the reader never interprets it.
pub type ReadFn = fn(address: u64, length: u32, user_context: u64, dest: &mut [u8]) -> i32;

/// Source of target memory
///
/// ## Thread Safety
///
/// Readers are driven from a single thread at a time. A
/// [`Target`](crate::Target) stores its reader as `Box<dyn MemoryReader + Send>`
/// so that sessions can live in the process-wide handle table.
pub trait MemoryReader
{
    /// Copy `dest.len()` bytes starting at `address` into `dest`.
    ///
    /// ## Errors
    ///
    /// Returns [`ReaderError::ReadFailure`] on a short read, an unmapped
    /// address, or a failure reported by the underlying source. On error
    /// `dest` must be treated as unwritten.
    fn read(&self, address: Address, dest: &mut [u8]) -> ReaderResult<()>;
}

impl<T: MemoryReader + ?Sized> MemoryReader for &T
{
    fn read(&self, address: Address, dest: &mut [u8]) -> ReaderResult<()>
    {
        (**self).read(address, dest)
    }
}

impl<T: MemoryReader + ?Sized> MemoryReader for Box<T>
{
    fn read(&self, address: Address, dest: &mut [u8]) -> ReaderResult<()>
    {
        (**self).read(address, dest)
    }
}

/// A [`ReadFn`] bound to the context id it was registered with
///
/// The binding is fixed for the lifetime of the reader.
#[derive(Debug, Clone, Copy)]
pub struct CallbackReader
{
    func: ReadFn,
    user_context: u64,
}

impl CallbackReader
{
    /// Bind `func` to `user_context`.
    #[must_use]
    pub const fn new(func: ReadFn, user_context: u64) -> Self
    {
        Self { func, user_context }
    }

    /// The opaque context id passed to every call.
    #[must_use]
    pub const fn user_context(&self) -> u64
    {
        self.user_context
    }
}

impl MemoryReader for CallbackReader
{
    fn read(&self, address: Address, dest: &mut [u8]) -> ReaderResult<()>
    {
        let requested = dest.len();
        let failure = || ReaderError::ReadFailure {
            address,
            length: requested,
        };
        let length = u32::try_from(requested).map_err(|_| failure())?;

        let mut scratch = vec![0u8; requested];
        let status = (self.func)(address.value(), length, self.user_context, &mut scratch);
        trace!(%address, length, status, "read callback");
        if status != 0 {
            return Err(failure());
        }
        dest.copy_from_slice(&scratch);
        Ok(())
    }
}

/// A flat memory image mapped at `base`
///
/// Reads outside `[base, base + len)` fail. There are no holes: whatever the
/// image file contains is readable.
#[derive(Debug, Clone)]
pub struct FileImageReader
{
    base: Address,
    bytes: Vec<u8>,
}

impl FileImageReader
{
    /// Map an in-memory image at `base`.
    #[must_use]
    pub fn new(base: Address, bytes: Vec<u8>) -> Self
    {
        Self { base, bytes }
    }

    /// Load an image file and map it at `base`.
    ///
    /// ## Errors
    ///
    /// Returns any I/O error from reading the file.
    pub fn open(path: impl AsRef<Path>, base: Address) -> io::Result<Self>
    {
        let bytes = fs::read(path)?;
        Ok(Self::new(base, bytes))
    }

    /// Address the first byte of the image is mapped at
    #[must_use]
    pub const fn base(&self) -> Address
    {
        self.base
    }

    /// Image length in bytes
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.bytes.len()
    }

    /// Whether the image is empty
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.bytes.is_empty()
    }
}

impl MemoryReader for FileImageReader
{
    fn read(&self, address: Address, dest: &mut [u8]) -> ReaderResult<()>
    {
        let failure = ReaderError::ReadFailure {
            address,
            length: dest.len(),
        };
        let start = address
            .offset_from(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or_else(|| failure.clone())?;
        let end = start.checked_add(dest.len()).ok_or_else(|| failure.clone())?;
        let source = self.bytes.get(start..end).ok_or(failure)?;
        dest.copy_from_slice(source);
        Ok(())
    }
}

/// Typed reads on top of a [`MemoryReader`]
///
/// Each call reads exactly the bytes of one field into a small stack buffer,
/// so working memory stays constant no matter how large the surrounding
/// structure is.
#[derive(Clone, Copy)]
pub struct RemoteMemory<'a>
{
    reader: &'a dyn MemoryReader,
}

impl<'a> RemoteMemory<'a>
{
    /// Wrap a reader.
    #[must_use]
    pub fn new(reader: &'a dyn MemoryReader) -> Self
    {
        Self { reader }
    }

    /// Read a fixed number of bytes.
    ///
    /// ## Errors
    ///
    /// Propagates [`ReaderError::ReadFailure`] from the reader.
    pub fn read_array<const N: usize>(&self, address: Address) -> ReaderResult<[u8; N]>
    {
        let mut buffer = [0u8; N];
        self.reader.read(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Read `length` bytes into a fresh buffer.
    ///
    /// ## Errors
    ///
    /// Propagates [`ReaderError::ReadFailure`] from the reader.
    pub fn read_vec(&self, address: Address, length: usize) -> ReaderResult<Vec<u8>>
    {
        let mut buffer = vec![0u8; length];
        self.reader.read(address, &mut buffer)?;
        Ok(buffer)
    }

    /// Read a `u32` in the given byte order.
    ///
    /// ## Errors
    ///
    /// Propagates [`ReaderError::ReadFailure`] from the reader.
    pub fn read_u32(&self, address: Address, endianness: Endianness) -> ReaderResult<u32>
    {
        self.read_array::<4>(address).map(|bytes| endianness.decode_u32(bytes))
    }

    /// Read a `u64` in the given byte order.
    ///
    /// ## Errors
    ///
    /// Propagates [`ReaderError::ReadFailure`] from the reader.
    pub fn read_u64(&self, address: Address, endianness: Endianness) -> ReaderResult<u64>
    {
        self.read_array::<8>(address).map(|bytes| endianness.decode_u64(bytes))
    }

    /// Read a pointer-width value.
    ///
    /// ## Errors
    ///
    /// Propagates [`ReaderError::ReadFailure`] from the reader.
    pub fn read_pointer(&self, address: Address, layout: &TargetLayout) -> ReaderResult<Address>
    {
        let mut buffer = [0u8; 8];
        let field = &mut buffer[..layout.pointer_size()];
        self.reader.read(address, field)?;
        Ok(layout.decode_pointer(field))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::PointerWidth;

    fn failing_reader(_address: u64, _length: u32, _context: u64, dest: &mut [u8]) -> i32
    {
        dest.fill(0xee);
        -1
    }

    fn counting_reader(address: u64, _length: u32, context: u64, dest: &mut [u8]) -> i32
    {
        for (i, byte) in dest.iter_mut().enumerate() {
            *byte = (address as u8).wrapping_add(i as u8).wrapping_add(context as u8);
        }
        0
    }

    #[test]
    fn test_callback_reader_failure_leaves_dest_untouched()
    {
        let reader = CallbackReader::new(failing_reader, 7);
        let mut dest = [0x11u8; 4];
        let err = reader.read(Address::new(0x2000), &mut dest).unwrap_err();
        assert_eq!(
            err,
            ReaderError::ReadFailure {
                address: Address::new(0x2000),
                length: 4
            }
        );
        assert_eq!(dest, [0x11; 4]);
    }

    #[test]
    fn test_callback_reader_passes_context()
    {
        let reader = CallbackReader::new(counting_reader, 1);
        let mut dest = [0u8; 3];
        reader.read(Address::new(0x10), &mut dest).unwrap();
        assert_eq!(dest, [0x11, 0x12, 0x13]);
        assert_eq!(reader.user_context(), 1);
    }

    #[test]
    fn test_file_image_bounds()
    {
        let image = FileImageReader::new(Address::new(0x1000), (0u8..16).collect());
        let mut dest = [0u8; 4];
        image.read(Address::new(0x100c), &mut dest).unwrap();
        assert_eq!(dest, [12, 13, 14, 15]);
        assert!(image.read(Address::new(0x100d), &mut dest).is_err());
        assert!(image.read(Address::new(0x0fff), &mut dest).is_err());
    }

    #[test]
    fn test_remote_memory_typed_reads()
    {
        let image = FileImageReader::new(Address::new(0), vec![0x01, 0x02, 0x03, 0x04, 0, 0, 0, 0]);
        let memory = RemoteMemory::new(&image);
        assert_eq!(memory.read_u32(Address::NULL, Endianness::Little).unwrap(), 0x0403_0201);
        assert_eq!(memory.read_u32(Address::NULL, Endianness::Big).unwrap(), 0x0102_0304);
        let layout = TargetLayout::new(Endianness::Little, PointerWidth::Four);
        assert_eq!(memory.read_pointer(Address::NULL, &layout).unwrap(), Address::new(0x0403_0201));
    }
}
