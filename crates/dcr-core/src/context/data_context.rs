//! Data-context header and stream table.
//!
//! The descriptor payload starts with a small header (legacy 4-byte magic)
//! followed, somewhere inside the payload, by a table with one record per
//! stream. The record index is the stream id.

use std::fmt;

use tracing::debug;

use super::cursor::ByteCursor;
use crate::error::{ReaderError, ReaderResult};
use crate::types::{Address, PointerWidth, TargetLayout};

/// Data-context magic, `"\0cnd"` when stored little-endian
pub const DATA_CONTEXT_MAGIC: u32 = 0x646e_6300;

/// Only data-context version understood
pub const DATA_CONTEXT_VERSION: u16 = 1;

/// Header bytes before the stream-table pointer
const FIXED_HEADER_SIZE: usize = 16;

/// Declared header size for a pointer width
#[must_use]
pub const fn data_context_header_size(pointer_width: PointerWidth) -> usize
{
    FIXED_HEADER_SIZE + pointer_width.bytes()
}

/// Size of one stream-table record for a pointer width
#[must_use]
pub const fn stream_record_size(pointer_width: PointerWidth) -> usize
{
    4 * pointer_width.bytes()
}

/// Streams this reader knows how to enumerate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum KnownStream
{
    /// Type entities
    Types = 0,
    /// Blob entities keyed by type id
    Blobs = 1,
    /// Instance addresses keyed by type id
    Instances = 2,
}

impl KnownStream
{
    /// All known streams in id order
    pub const ALL: [KnownStream; 3] = [KnownStream::Types, KnownStream::Blobs, KnownStream::Instances];

    /// Stream for a stream-table index
    #[must_use]
    pub const fn from_index(index: u32) -> Option<Self>
    {
        match index {
            0 => Some(KnownStream::Types),
            1 => Some(KnownStream::Blobs),
            2 => Some(KnownStream::Instances),
            _ => None,
        }
    }

    /// Stream-table index
    #[must_use]
    pub const fn index(self) -> u32
    {
        self as u32
    }

    /// Lowercase name used in diagnostics
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            KnownStream::Types => "types",
            KnownStream::Blobs => "blobs",
            KnownStream::Instances => "instances",
        }
    }
}

impl fmt::Display for KnownStream
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// One decoded stream-table record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRecord
{
    /// Which stream this is
    pub stream: KnownStream,
    /// Newest data block, `None` when the stream is missing
    pub head: Option<Address>,
    /// Capacity of each data block as published by the target
    pub block_data_size: u64,
    /// Upper bound on the stream's entity bytes, `0` for unbounded
    pub max_data_size: u64,
}

/// Decoded data-context header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataContext
{
    /// Header version
    pub version: u16,
    /// Number of records in the stream table, known or not
    pub stream_count: u32,
    /// Records for the streams this reader knows, in table order
    pub records: Vec<StreamRecord>,
}

impl DataContext
{
    /// Record for a stream, if the table contains one
    #[must_use]
    pub fn record(&self, stream: KnownStream) -> Option<&StreamRecord>
    {
        self.records.iter().find(|record| record.stream == stream)
    }
}

fn corrupt(reason: impl fmt::Display) -> ReaderError
{
    ReaderError::CorruptDescriptor(format!("data context: {reason}"))
}

/// Decode the data context held in `payload`.
///
/// `payload_address` is where the payload lives in the target; the stream
/// table pointer and every record's back-pointer are checked against it.
///
/// ## Errors
///
/// Returns [`ReaderError::CorruptDescriptor`] when the header is truncated,
/// has the wrong magic, size or version, or the stream table does not fit in
/// the payload or does not point back at it.
pub fn parse_data_context(payload: &[u8], payload_address: Address, layout: &TargetLayout) -> ReaderResult<DataContext>
{
    let header_size = data_context_header_size(layout.pointer_width);
    let mut cursor = ByteCursor::new(payload, *layout);
    let truncated = || corrupt(format!("payload of {} bytes is shorter than the {header_size}-byte header", payload.len()));

    let magic = cursor.u32().ok_or_else(truncated)?;
    if magic != DATA_CONTEXT_MAGIC {
        return Err(corrupt(format!("bad magic 0x{magic:08x}")));
    }
    let declared_size = cursor.u16().ok_or_else(truncated)?;
    if usize::from(declared_size) != header_size {
        return Err(corrupt(format!(
            "header size {declared_size} does not match {header_size} for {} pointers",
            layout.pointer_width
        )));
    }
    let version = cursor.u16().ok_or_else(truncated)?;
    if version != DATA_CONTEXT_VERSION {
        return Err(corrupt(format!("unsupported version {version}")));
    }
    cursor.skip(4).ok_or_else(truncated)?;
    let stream_count = cursor.u32().ok_or_else(truncated)?;
    let table_address = cursor.pointer().ok_or_else(truncated)?;
    debug!(version, stream_count, %table_address, "data context header");

    let table_offset = table_address
        .offset_from(payload_address)
        .and_then(|offset| usize::try_from(offset).ok())
        .filter(|offset| *offset >= header_size)
        .ok_or_else(|| corrupt(format!("stream table at {table_address} is outside the payload")))?;
    let table_len = (stream_count as usize)
        .checked_mul(stream_record_size(layout.pointer_width))
        .ok_or_else(|| corrupt(format!("stream count {stream_count} overflows")))?;
    cursor
        .seek(table_offset)
        .ok_or_else(|| corrupt(format!("stream table at {table_address} is outside the payload")))?;
    if cursor.remaining() < table_len {
        return Err(corrupt(format!(
            "{stream_count} stream records do not fit in the payload after offset {table_offset}"
        )));
    }

    let mut records = Vec::with_capacity(KnownStream::ALL.len());
    for index in 0..stream_count {
        let record_error = || corrupt(format!("stream record {index} is truncated"));
        let head = cursor.pointer().ok_or_else(record_error)?;
        let block_data_size = cursor.size().ok_or_else(record_error)?;
        let max_data_size = cursor.size().ok_or_else(record_error)?;
        let context = cursor.pointer().ok_or_else(record_error)?;
        if context != payload_address {
            return Err(corrupt(format!(
                "stream record {index} points at context {context}, expected {payload_address}"
            )));
        }
        let Some(stream) = KnownStream::from_index(index) else {
            debug!(index, "ignoring unknown stream");
            continue;
        };
        let head = (!head.is_null()).then_some(head);
        debug!(%stream, ?head, block_data_size, max_data_size, "stream record");
        records.push(StreamRecord {
            stream,
            head,
            block_data_size,
            max_data_size,
        });
    }

    Ok(DataContext {
        version,
        stream_count,
        records,
    })
}
