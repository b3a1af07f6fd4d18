use crate::types::{Address, TargetLayout};

/// Forward-only reader over a local buffer holding target-layout bytes
///
/// Every accessor returns `None` once the buffer is exhausted; callers turn
/// that into the error that fits their stream.
#[derive(Debug, Clone)]
pub(crate) struct ByteCursor<'a>
{
    bytes: &'a [u8],
    offset: usize,
    layout: TargetLayout,
}

impl<'a> ByteCursor<'a>
{
    pub(crate) fn new(bytes: &'a [u8], layout: TargetLayout) -> Self
    {
        Self {
            bytes,
            offset: 0,
            layout,
        }
    }

    pub(crate) fn offset(&self) -> usize
    {
        self.offset
    }

    pub(crate) fn remaining(&self) -> usize
    {
        self.bytes.len() - self.offset
    }

    pub(crate) fn seek(&mut self, offset: usize) -> Option<()>
    {
        (offset <= self.bytes.len()).then(|| self.offset = offset)
    }

    pub(crate) fn take(&mut self, len: usize) -> Option<&'a [u8]>
    {
        let end = self.offset.checked_add(len)?;
        let slice = self.bytes.get(self.offset..end)?;
        self.offset = end;
        Some(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Option<()>
    {
        self.take(len).map(|_| ())
    }

    pub(crate) fn u16(&mut self) -> Option<u16>
    {
        let bytes = self.take(2)?;
        Some(self.layout.endianness.decode_u16([bytes[0], bytes[1]]))
    }

    pub(crate) fn u32(&mut self) -> Option<u32>
    {
        let bytes = self.take(4)?;
        Some(self.layout.endianness.decode_u32([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn pointer(&mut self) -> Option<Address>
    {
        let bytes = self.take(self.layout.pointer_size())?;
        Some(self.layout.decode_pointer(bytes))
    }

    /// A `size_t`-style field; same width as a pointer.
    pub(crate) fn size(&mut self) -> Option<u64>
    {
        self.pointer().map(Address::value)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::{Endianness, PointerWidth};

    #[test]
    fn test_cursor_reads_in_target_order()
    {
        let layout = TargetLayout::new(Endianness::Big, PointerWidth::Four);
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x10, 0x00, 0x00, 0x00];
        let mut cursor = ByteCursor::new(&bytes, layout);
        assert_eq!(cursor.u16(), Some(1));
        assert_eq!(cursor.u32(), Some(2));
        assert_eq!(cursor.pointer(), Some(Address::new(0x1000_0000)));
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.u16(), None);
    }

    #[test]
    fn test_cursor_short_read_does_not_advance()
    {
        let layout = TargetLayout::new(Endianness::Little, PointerWidth::Eight);
        let bytes = [0u8; 6];
        let mut cursor = ByteCursor::new(&bytes, layout);
        assert_eq!(cursor.pointer(), None);
        assert_eq!(cursor.offset(), 0);
        assert!(cursor.seek(7).is_none());
        assert!(cursor.seek(6).is_some());
    }
}
