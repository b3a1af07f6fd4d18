//! Tests for descriptor header decoding against harness-built images

use dcr_core::memory::RemoteMemory;
use dcr_core::wire::{read_descriptor, read_header, DescriptorHeader, DESCRIPTOR_MAGIC, FLAG_RESERVED};
use dcr_core::{Address, Endianness, PointerWidth, ReaderConfig, ReaderError, Target};
use dcr_virtual::{FixtureBuilder, TypeSpec};

const LAYOUTS: [(Endianness, PointerWidth); 4] = [
    (Endianness::Little, PointerWidth::Four),
    (Endianness::Little, PointerWidth::Eight),
    (Endianness::Big, PointerWidth::Four),
    (Endianness::Big, PointerWidth::Eight),
];

#[test]
fn test_magic_round_trip_recovers_layout()
{
    for (endianness, width) in LAYOUTS {
        let fixture = FixtureBuilder::new(endianness, width).build();
        let memory = RemoteMemory::new(fixture.system());
        let header = read_header(&memory, fixture.descriptor()).unwrap();
        assert_eq!(header.layout.endianness, endianness);
        assert_eq!(header.layout.pointer_width, width);
        assert_eq!(header.flags & FLAG_RESERVED, FLAG_RESERVED);
    }
}

#[test]
fn test_header_fields_point_at_payload()
{
    for (endianness, width) in LAYOUTS {
        let fixture = FixtureBuilder::new(endianness, width)
            .with_pointer_data(Address::new(0x1234))
            .with_pointer_data(Address::new(0x5678))
            .build();
        let memory = RemoteMemory::new(fixture.system());
        let descriptor = read_descriptor(&memory, fixture.descriptor(), &ReaderConfig::default()).unwrap();
        let header = &descriptor.header;

        // header, three stream records of 4W each
        let expected_len = 16 + width.bytes() + 3 * 4 * width.bytes();
        assert_eq!(header.payload_len as usize, expected_len);
        assert_eq!(descriptor.payload.len(), expected_len);
        assert_eq!(header.pointer_data_count, 2);
        assert_eq!(
            header.pointer_data_address,
            fixture.descriptor() + DescriptorHeader::encoded_size(width) as u64
        );
    }
}

#[test]
fn test_bad_magic_is_rejected()
{
    let fixture = FixtureBuilder::new(Endianness::Little, PointerWidth::Eight)
        .with_magic(DESCRIPTOR_MAGIC ^ 0xff)
        .build();
    let memory = RemoteMemory::new(fixture.system());
    let err = read_header(&memory, fixture.descriptor()).unwrap_err();
    assert!(matches!(err, ReaderError::InvalidMagic { .. }));
}

#[test]
fn test_cleared_reserved_flag_is_rejected()
{
    for (endianness, width) in LAYOUTS {
        let flags = dcr_virtual::default_flags(width) & !FLAG_RESERVED;
        let fixture = FixtureBuilder::new(endianness, width).with_flags(flags).build();
        let memory = RemoteMemory::new(fixture.system());
        let err = read_header(&memory, fixture.descriptor()).unwrap_err();
        assert!(matches!(err, ReaderError::CorruptDescriptor(_)), "{err}");
    }
}

#[test]
fn test_wrong_width_flag_fails_layout_checks()
{
    // Laid out with 8-byte pointers but flagged as 4-byte
    let fixture = FixtureBuilder::new(Endianness::Little, PointerWidth::Eight)
        .with_flags(FLAG_RESERVED)
        .with_type(TypeSpec::new(1, "Ptr", 1, 8))
        .build();
    let descriptor = fixture.descriptor();
    let header = read_header(&RemoteMemory::new(fixture.system()), descriptor).unwrap();
    assert_eq!(header.layout.pointer_width, PointerWidth::Four);

    let mut target = Target::with_reader(Box::new(fixture.into_system()));
    let err = target.set_stream(descriptor).unwrap_err();
    assert!(matches!(err, ReaderError::CorruptDescriptor(_)), "{err}");
    assert!(!target.is_ready());
}

#[test]
fn test_payload_limit_is_enforced()
{
    let fixture = FixtureBuilder::new(Endianness::Big, PointerWidth::Four).build();
    let memory = RemoteMemory::new(fixture.system());
    let config = ReaderConfig {
        max_payload_len: 8,
        ..ReaderConfig::default()
    };
    let err = read_descriptor(&memory, fixture.descriptor(), &config).unwrap_err();
    assert!(matches!(err, ReaderError::CorruptDescriptor(_)));
}

#[test]
fn test_unmapped_descriptor_is_corrupt()
{
    let fixture = FixtureBuilder::new(Endianness::Little, PointerWidth::Four).build();
    let memory = RemoteMemory::new(fixture.system());
    let err = read_header(&memory, Address::new(0x10)).unwrap_err();
    assert!(matches!(err, ReaderError::CorruptDescriptor(_)));
    assert!(err.to_string().contains("magic"));
}
