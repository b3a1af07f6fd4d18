//! Fetching stream data blocks into local buffers.
//!
//! Each stream is a singly linked list of data blocks, newest first. A block
//! header is four pointers (`begin`, `pos`, `end`, `prev`); the entity bytes
//! are `[pos, end)`. Loading copies those bytes out of the target once so
//! that entity enumeration never touches remote memory.

use std::collections::HashSet;

use tracing::{debug, trace};

use super::data_context::{DataContext, KnownStream, StreamRecord};
use crate::config::ReaderConfig;
use crate::error::{ReaderError, ReaderResult};
use crate::memory::RemoteMemory;
use crate::types::{Address, TargetLayout};

/// One data block copied out of the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock
{
    /// Address of the block header
    pub address: Address,
    /// Remote address of `entities[0]`
    pub entities_address: Address,
    /// Bytes of `[pos, end)`
    pub entities: Vec<u8>,
}

/// All blocks of one stream, newest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamImage
{
    /// Which stream the blocks belong to
    pub stream: KnownStream,
    /// Blocks in enumeration order
    pub blocks: Vec<DataBlock>,
}

impl StreamImage
{
    /// An image with no blocks, used for missing streams
    #[must_use]
    pub const fn empty(stream: KnownStream) -> Self
    {
        Self {
            stream,
            blocks: Vec::new(),
        }
    }

    /// Total entity bytes across all blocks
    #[must_use]
    pub fn data_len(&self) -> usize
    {
        self.blocks.iter().map(|block| block.entities.len()).sum()
    }
}

/// Local copies of every known stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSet
{
    /// Type entities
    pub types: StreamImage,
    /// Blob entities
    pub blobs: StreamImage,
    /// Instance entities
    pub instances: StreamImage,
}

/// Follow one stream's block chain and copy out its entity bytes.
///
/// ## Errors
///
/// - [`ReaderError::ReadFailure`]: a block header or its data could not be read
/// - [`ReaderError::EnumerationFailure`]: the chain loops, is longer than
///   `config.max_stream_blocks`, a block has `pos`/`end` out of order or is
///   larger than `config.max_block_len`, or the stream exceeds its
///   `max_data_size`
pub fn load_stream(
    memory: &RemoteMemory<'_>,
    layout: &TargetLayout,
    record: &StreamRecord,
    config: &ReaderConfig,
) -> ReaderResult<StreamImage>
{
    let stream = record.stream;
    let fail = |reason: String| ReaderError::enumeration(stream.name(), reason);
    let width = layout.pointer_size();

    let mut image = StreamImage::empty(stream);
    let mut visited = HashSet::new();
    let mut total: u64 = 0;
    let mut next = record.head;

    while let Some(address) = next {
        if !visited.insert(address) {
            return Err(fail(format!("block chain loops back to {address}")));
        }
        if image.blocks.len() >= config.max_stream_blocks {
            return Err(fail(format!("more than {} data blocks", config.max_stream_blocks)));
        }

        let header = memory.read_vec(address, 4 * width)?;
        let field = |index: usize| layout.decode_pointer(&header[index * width..(index + 1) * width]);
        let (begin, pos, end, prev) = (field(0), field(1), field(2), field(3));
        trace!(%address, %begin, %pos, %end, %prev, "data block header");

        if !(begin <= pos && pos <= end) {
            return Err(fail(format!(
                "block at {address} has begin {begin}, pos {pos}, end {end} out of order"
            )));
        }
        let len = end.value() - pos.value();
        if len > config.max_block_len {
            return Err(fail(format!(
                "block at {address} holds {len} bytes, limit is {}",
                config.max_block_len
            )));
        }
        total = total.saturating_add(len);
        if record.max_data_size != 0 && total > record.max_data_size {
            return Err(fail(format!(
                "{total} bytes of entities exceed the stream maximum of {}",
                record.max_data_size
            )));
        }

        let len = usize::try_from(len).map_err(|_| fail(format!("block at {address} is too large")))?;
        let entities = memory.read_vec(pos, len)?;
        image.blocks.push(DataBlock {
            address,
            entities_address: pos,
            entities,
        });
        next = (!prev.is_null()).then_some(prev);
    }

    debug!(%stream, blocks = image.blocks.len(), bytes = total, "loaded stream");
    Ok(image)
}

/// Load every known stream named by the data context.
///
/// Streams the table does not contain, or whose head is null, come back
/// empty.
///
/// ## Errors
///
/// See [`load_stream`].
pub fn load_streams(
    memory: &RemoteMemory<'_>,
    layout: &TargetLayout,
    context: &DataContext,
    config: &ReaderConfig,
) -> ReaderResult<StreamSet>
{
    let load = |stream: KnownStream| match context.record(stream) {
        Some(record) => load_stream(memory, layout, record, config),
        None => Ok(StreamImage::empty(stream)),
    };
    Ok(StreamSet {
        types: load(KnownStream::Types)?,
        blobs: load(KnownStream::Blobs)?,
        instances: load(KnownStream::Instances)?,
    })
}
