//! Entity enumeration over loaded stream images.
//!
//! Every entity starts with an 8-byte header: `size u32` (header included)
//! and a reserved `u32`. The payload layout depends on the stream. Sizes are
//! checked exactly, so a buffer built for another pointer width fails here
//! instead of being misread.

use smallvec::SmallVec;

use super::cursor::ByteCursor;
use super::stream::StreamImage;
use crate::error::{ReaderError, ReaderResult};
use crate::types::{Address, TargetLayout};

/// Bytes in every entity header
pub const ENTITY_HEADER_SIZE: usize = 8;

/// Offset of a field, keyed by the remote id of the field's type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldOffset
{
    /// Remote type id of the field
    pub type_id: u16,
    /// Byte offset within the containing type
    pub offset: u16,
}

/// Field offsets of one type; most types have only a few
pub type FieldOffsets = SmallVec<[FieldOffset; 4]>;

/// A type published by the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteType
{
    /// Remote numeric id
    pub id: u16,
    /// Layout version
    pub version: u16,
    /// Size in bytes
    pub size: u64,
    /// Field offsets in the order the target listed them
    pub offsets: FieldOffsets,
    /// Name matched against local types
    pub name: String,
}

impl RemoteType
{
    /// Offset of the first field whose type is `type_id`
    #[must_use]
    pub fn offset_of(&self, type_id: u16) -> Option<u16>
    {
        self.offsets.iter().find(|field| field.type_id == type_id).map(|field| field.offset)
    }
}

/// A blob entity borrowed from a stream image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobEntity<'a>
{
    /// Remote id of the type the blob holds a value of
    pub type_id: u16,
    /// Version of that type
    pub version: u16,
    /// Raw value bytes in target layout
    pub data: &'a [u8],
}

/// An instance entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceEntity
{
    /// Remote id of the instance's type
    pub type_id: u16,
    /// Version of that type
    pub version: u16,
    /// Where the instance lives in the target
    pub address: Address,
}

/// Walk the raw entities of a stream, newest block first.
///
/// `visit` receives the remote address of each entity header and its payload.
///
/// ## Errors
///
/// Returns [`ReaderError::EnumerationFailure`] if an entity header is
/// truncated or declares a size that does not fit in its block, and
/// propagates any error `visit` returns.
pub fn for_each_entity<'a, F>(image: &'a StreamImage, layout: &TargetLayout, mut visit: F) -> ReaderResult<()>
where
    F: FnMut(Address, &'a [u8]) -> ReaderResult<()>,
{
    let stream = image.stream.name();
    for block in &image.blocks {
        let mut cursor = ByteCursor::new(&block.entities, *layout);
        while cursor.remaining() > 0 {
            let offset = cursor.offset();
            let address = block.entities_address + offset as u64;
            let size = cursor
                .u32()
                .ok_or_else(|| ReaderError::enumeration(stream, format!("truncated entity header at {address}")))?;
            let payload_len = (size as usize)
                .checked_sub(ENTITY_HEADER_SIZE)
                .ok_or_else(|| ReaderError::enumeration(stream, format!("entity at {address} declares size {size}")))?;
            let payload = cursor
                .skip(4)
                .and_then(|()| cursor.take(payload_len))
                .ok_or_else(|| {
                    ReaderError::enumeration(stream, format!("entity at {address} of size {size} overruns its block"))
                })?;
            visit(address, payload)?;
        }
    }
    Ok(())
}

fn decode_type(payload: &[u8], layout: &TargetLayout) -> Option<RemoteType>
{
    let mut cursor = ByteCursor::new(payload, *layout);
    let id = cursor.u16()?;
    let version = cursor.u16()?;
    let field_count = cursor.u16()?;
    let name_len = cursor.u16()?;
    let size = cursor.size()?;
    let offsets = (0..field_count)
        .map(|_| {
            Some(FieldOffset {
                type_id: cursor.u16()?,
                offset: cursor.u16()?,
            })
        })
        .collect::<Option<FieldOffsets>>()?;
    let name = std::str::from_utf8(cursor.take(usize::from(name_len))?).ok()?;
    (cursor.remaining() == 0).then(|| RemoteType {
        id,
        version,
        size,
        offsets,
        name: name.to_owned(),
    })
}

/// Enumerate type entities, handing each one to `on_type`.
///
/// ## Errors
///
/// Returns [`ReaderError::EnumerationFailure`] for a malformed entity (wrong
/// size, invalid UTF-8 name) and propagates errors from `on_type`.
pub fn enum_types<F>(image: &StreamImage, layout: &TargetLayout, mut on_type: F) -> ReaderResult<()>
where
    F: FnMut(RemoteType) -> ReaderResult<()>,
{
    for_each_entity(image, layout, |address, payload| {
        let remote = decode_type(payload, layout).ok_or_else(|| {
            ReaderError::enumeration(
                image.stream.name(),
                format!("malformed type entity at {address} ({} payload bytes)", payload.len()),
            )
        })?;
        on_type(remote)
    })
}

/// Enumerate blob entities, handing each one to `on_blob`.
///
/// ## Errors
///
/// Returns [`ReaderError::EnumerationFailure`] for a payload shorter than
/// its 4-byte prefix and propagates errors from `on_blob`.
pub fn enum_blobs<'a, F>(image: &'a StreamImage, layout: &TargetLayout, mut on_blob: F) -> ReaderResult<()>
where
    F: FnMut(BlobEntity<'a>) -> ReaderResult<()>,
{
    for_each_entity(image, layout, |address, payload| {
        let mut cursor = ByteCursor::new(payload, *layout);
        let (Some(type_id), Some(version)) = (cursor.u16(), cursor.u16()) else {
            return Err(ReaderError::enumeration(
                image.stream.name(),
                format!("blob entity at {address} has no type prefix"),
            ));
        };
        on_blob(BlobEntity {
            type_id,
            version,
            data: &payload[4..],
        })
    })
}

fn decode_instance(payload: &[u8], layout: &TargetLayout) -> Option<InstanceEntity>
{
    let mut cursor = ByteCursor::new(payload, *layout);
    let type_id = cursor.u16()?;
    let version = cursor.u16()?;
    cursor.skip(4)?;
    let address = cursor.pointer()?;
    (cursor.remaining() == 0).then_some(InstanceEntity {
        type_id,
        version,
        address,
    })
}

/// Enumerate instance entities, handing each one to `on_instance`.
///
/// ## Errors
///
/// Returns [`ReaderError::EnumerationFailure`] unless each payload is
/// exactly `8 + pointer width` bytes, and propagates errors from
/// `on_instance`.
pub fn enum_instances<F>(image: &StreamImage, layout: &TargetLayout, mut on_instance: F) -> ReaderResult<()>
where
    F: FnMut(InstanceEntity) -> ReaderResult<()>,
{
    for_each_entity(image, layout, |address, payload| {
        let instance = decode_instance(payload, layout).ok_or_else(|| {
            ReaderError::enumeration(
                image.stream.name(),
                format!("malformed instance entity at {address} ({} payload bytes)", payload.len()),
            )
        })?;
        on_instance(instance)
    })
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::context::data_context::KnownStream;
    use crate::context::stream::DataBlock;
    use crate::types::{Endianness, PointerWidth};

    fn image(stream: KnownStream, entities: Vec<u8>) -> StreamImage
    {
        StreamImage {
            stream,
            blocks: vec![DataBlock {
                address: Address::new(0x1000),
                entities_address: Address::new(0x1020),
                entities,
            }],
        }
    }

    fn type_entity(width: usize) -> Vec<u8>
    {
        let name = b"Ptr";
        let size = ENTITY_HEADER_SIZE + 8 + width + 4 + name.len();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(size as u32).to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&7u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&(width as u64).to_le_bytes()[..width]);
        bytes.extend_from_slice(&3u16.to_le_bytes());
        bytes.extend_from_slice(&0x10u16.to_le_bytes());
        bytes.extend_from_slice(name);
        bytes
    }

    #[test]
    fn test_enum_types_decodes_fields()
    {
        let layout = TargetLayout::new(Endianness::Little, PointerWidth::Eight);
        let image = image(KnownStream::Types, type_entity(8));
        let mut seen = Vec::new();
        enum_types(&image, &layout, |remote| {
            seen.push(remote);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, 7);
        assert_eq!(seen[0].size, 8);
        assert_eq!(seen[0].name, "Ptr");
        assert_eq!(seen[0].offset_of(3), Some(0x10));
    }

    #[test]
    fn test_enum_types_rejects_other_width()
    {
        let layout = TargetLayout::new(Endianness::Little, PointerWidth::Four);
        let image = image(KnownStream::Types, type_entity(8));
        let err = enum_types(&image, &layout, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ReaderError::EnumerationFailure { stream: "types", .. }));
    }

    #[test]
    fn test_entity_overrunning_block_fails()
    {
        let layout = TargetLayout::new(Endianness::Little, PointerWidth::Four);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&64u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        let image = image(KnownStream::Blobs, bytes);
        let err = enum_blobs(&image, &layout, |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("overruns"));
    }

    #[test]
    fn test_callback_error_stops_enumeration()
    {
        let layout = TargetLayout::new(Endianness::Little, PointerWidth::Four);
        let mut bytes = Vec::new();
        for _ in 0..2 {
            bytes.extend_from_slice(&12u32.to_le_bytes());
            bytes.extend_from_slice(&0u32.to_le_bytes());
            bytes.extend_from_slice(&[1, 0, 1, 0]);
        }
        let image = image(KnownStream::Blobs, bytes);
        let mut calls = 0;
        let err = enum_blobs(&image, &layout, |_| {
            calls += 1;
            Err(ReaderError::NotFound("stop".into()))
        })
        .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(calls, 1);
    }
}
