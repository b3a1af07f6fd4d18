//! Address ranges registered with a [`VirtualMemorySystem`](crate::VirtualMemorySystem).

/// A contiguous piece of simulated target memory
///
/// Ranges never overlap once registered. A range may refuse reads (the null
/// page does), which makes a read that touches it fail.
pub trait VirtualMemoryRange: Send + Sync
{
    /// First address covered
    fn start(&self) -> u64;

    /// Number of bytes covered
    fn count(&self) -> u64;

    /// One past the last address covered
    fn end(&self) -> u64
    {
        self.start().saturating_add(self.count())
    }

    /// Whether `address` falls inside the range
    fn contains(&self, address: u64) -> bool
    {
        self.start() <= address && address < self.end()
    }

    /// Copy `dest.len()` bytes starting at `start` into `dest`.
    ///
    /// The extent is always inside the range. Returns `false` if the range
    /// does not allow reads.
    fn try_read_extent(&self, start: u64, dest: &mut [u8]) -> bool;

    /// Name used in diagnostics
    fn name(&self) -> &str
    {
        "range"
    }
}

/// Whether `[a_start, a_start + a_count)` and `[b_start, b_start + b_count)`
/// share at least one address
///
/// ```rust
/// use dcr_virtual::range::overlaps;
///
/// assert!(overlaps(0x1000, 0x10, 0x100f, 1));
/// assert!(!overlaps(0x1000, 0x10, 0x1010, 0x10));
/// assert!(!overlaps(0x1000, 0, 0x1000, 0x10));
/// ```
#[must_use]
pub fn overlaps(a_start: u64, a_count: u64, b_start: u64, b_count: u64) -> bool
{
    if a_count == 0 || b_count == 0 {
        return false;
    }
    let a_end = a_start.saturating_add(a_count);
    let b_end = b_start.saturating_add(b_count);
    a_start < b_end && b_start < a_end
}

/// The first page, mapped but unreadable so null dereferences fail
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPage;

impl NullPage
{
    /// Size of the null page
    pub const SIZE: u64 = 0x1000;
}

impl VirtualMemoryRange for NullPage
{
    fn start(&self) -> u64
    {
        0
    }

    fn count(&self) -> u64
    {
        Self::SIZE
    }

    fn try_read_extent(&self, _start: u64, _dest: &mut [u8]) -> bool
    {
        false
    }

    fn name(&self) -> &str
    {
        "null page"
    }
}

/// A range backed by an owned byte buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferBackedRange
{
    start: u64,
    bytes: Vec<u8>,
    name: String,
}

impl BufferBackedRange
{
    /// Map `bytes` at `start`.
    #[must_use]
    pub fn new(start: u64, bytes: Vec<u8>) -> Self
    {
        Self::with_name(start, bytes, "buffer")
    }

    /// Map `bytes` at `start` under a diagnostic name.
    #[must_use]
    pub fn with_name(start: u64, bytes: Vec<u8>, name: impl Into<String>) -> Self
    {
        Self {
            start,
            bytes,
            name: name.into(),
        }
    }

    /// Backing bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8]
    {
        &self.bytes
    }
}

impl VirtualMemoryRange for BufferBackedRange
{
    fn start(&self) -> u64
    {
        self.start
    }

    fn count(&self) -> u64
    {
        self.bytes.len() as u64
    }

    fn try_read_extent(&self, start: u64, dest: &mut [u8]) -> bool
    {
        let Some(offset) = start.checked_sub(self.start).and_then(|offset| usize::try_from(offset).ok()) else {
            return false;
        };
        let Some(source) = offset
            .checked_add(dest.len())
            .and_then(|end| self.bytes.get(offset..end))
        else {
            return false;
        };
        dest.copy_from_slice(source);
        true
    }

    fn name(&self) -> &str
    {
        &self.name
    }
}
