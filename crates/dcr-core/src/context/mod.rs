//! # Context and Stream Parsing
//!
//! Turns a decoded [`Descriptor`](crate::wire::Descriptor) into lookup
//! tables.
//!
//! ## Pipeline
//!
//! 1. [`parse_data_context`]: decode the data-context header and stream
//!    table from the payload buffer.
//! 2. [`load_streams`]: follow each stream's block chain and copy the entity
//!    bytes into local buffers.
//! 3. [`ContractTables::build`]: enumerate types, blobs and instances from
//!    those buffers and reconcile remote type names against
//!    [`DSType`](crate::DSType).
//!
//! Step 3 never reads target memory. Any failure aborts the whole parse and
//! nothing built so far escapes.

mod cursor;
pub mod data_context;
pub mod entity;
pub mod stream;
pub mod tables;

pub use data_context::{
    data_context_header_size, parse_data_context, stream_record_size, DataContext, KnownStream, StreamRecord,
    DATA_CONTEXT_MAGIC, DATA_CONTEXT_VERSION,
};
pub use entity::{
    enum_blobs, enum_instances, enum_types, BlobEntity, FieldOffset, FieldOffsets, InstanceEntity, RemoteType,
    ENTITY_HEADER_SIZE,
};
pub use stream::{load_stream, load_streams, DataBlock, StreamImage, StreamSet};
pub use tables::ContractTables;

use crate::config::ReaderConfig;
use crate::error::ReaderResult;
use crate::memory::RemoteMemory;
use crate::wire::Descriptor;

/// Everything parsed out of one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContext
{
    /// Data-context header and stream records
    pub data_context: DataContext,
    /// Reconciled lookup tables
    pub tables: ContractTables,
}

/// Parse the data context a descriptor points at.
///
/// ## Errors
///
/// Propagates [`ReaderError::CorruptDescriptor`](crate::ReaderError::CorruptDescriptor)
/// from the data-context header, [`ReaderError::ReadFailure`](crate::ReaderError::ReadFailure)
/// from block loading, and [`ReaderError::EnumerationFailure`](crate::ReaderError::EnumerationFailure)
/// from entity enumeration.
pub fn parse_context(memory: &RemoteMemory<'_>, descriptor: &Descriptor, config: &ReaderConfig) -> ReaderResult<ParsedContext>
{
    let layout = descriptor.header.layout;
    let data_context = parse_data_context(&descriptor.payload, descriptor.header.payload_address, &layout)?;
    let streams = load_streams(memory, &layout, &data_context, config)?;
    let tables = ContractTables::build(&streams, &layout, config)?;
    Ok(ParsedContext { data_context, tables })
}
