//! Tests for the target facade

use dcr_core::wire::FLAG_POINTER_64;
use dcr_core::{Address, DSType, Endianness, FileImageReader, PointerWidth, ReaderError, Target};
use dcr_virtual::{
    BlobSpec, DataContextBuilder, DescriptorBuilder, FixtureBuilder, InstanceSpec, StreamBuilder, TypeSpec,
    VirtualMemorySystem,
};

fn ready(fixture: dcr_virtual::Fixture) -> Target
{
    let descriptor = fixture.descriptor();
    let mut target = Target::with_reader(Box::new(fixture.into_system()));
    target.set_stream(descriptor).unwrap();
    target
}

#[test]
fn test_set_stream_without_reader_is_usage_error()
{
    let mut target = Target::new();
    let err = target.set_stream(Address::new(0x1000)).unwrap_err();
    assert!(matches!(err, ReaderError::UsageError(_)));
    assert!(!target.is_ready());
}

#[test]
fn test_reader_cannot_be_replaced()
{
    let fixture = FixtureBuilder::new(Endianness::Little, PointerWidth::Four).build();
    let mut target = Target::with_reader(Box::new(fixture.into_system()));
    let other = FixtureBuilder::new(Endianness::Little, PointerWidth::Four).build();
    let err = target.set_reader(Box::new(other.into_system())).unwrap_err();
    assert!(matches!(err, ReaderError::UsageError(_)));
    assert!(target.has_reader());
}

#[test]
fn test_lookups_before_set_stream_fail()
{
    let target = Target::new();
    assert!(target.config().is_none());
    assert!(matches!(target.header(), Err(ReaderError::UsageError(_))));
    assert!(matches!(target.blob(DSType::Ptr), Err(ReaderError::UsageError(_))));
}

#[test]
fn test_failed_set_stream_keeps_previous_session()
{
    // Two headers sharing one data context; the second has flag bit 0 clear
    let mut system = VirtualMemorySystem::with_null_page(Endianness::Big, PointerWidth::Eight);
    let layout = *system.layout();
    let types = StreamBuilder::types()
        .with_type(TypeSpec::for_ds_type(DSType::SOSBreakingChangeVersion, 2, 4))
        .reserve(&mut system);
    let blobs = StreamBuilder::blobs()
        .with_blob(BlobSpec::new(2, [0, 0, 0, 3]))
        .reserve(&mut system);
    let context = DataContextBuilder::new(layout)
        .with_stream(types)
        .with_stream(blobs)
        .reserve(&mut system);
    let good = DescriptorBuilder::new(layout).with_context(context).reserve(&mut system);
    let bad = DescriptorBuilder::new(layout)
        .with_context(context)
        .with_flags(FLAG_POINTER_64)
        .reserve(&mut system);
    system.complete();
    let good = system.resolved_address(good).unwrap();
    let bad = system.resolved_address(bad).unwrap();

    let mut target = Target::with_reader(Box::new(system));
    target.set_stream(good).unwrap();
    assert_eq!(target.breaking_change_version().unwrap(), 3);

    let err = target.set_stream(bad).unwrap_err();
    assert!(matches!(err, ReaderError::CorruptDescriptor(_)), "{err}");
    assert!(target.is_ready());
    assert_eq!(target.config().unwrap().descriptor_address, good);
    assert_eq!(target.breaking_change_version().unwrap(), 3);
}

#[test]
fn test_get_value_widths()
{
    let fixture = FixtureBuilder::new(Endianness::Little, PointerWidth::Eight)
        .with_global(DSType::ThreadStore, 1, 0x1122_3344_5566_7788_u64.to_le_bytes())
        .with_global(DSType::SOSBreakingChangeVersion, 2, [0xfe])
        .build();
    let target = ready(fixture);

    let mut wide = [0u8; 8];
    target.get_value(DSType::ThreadStore, &mut wide).unwrap();
    assert_eq!(u64::from_ne_bytes(wide), 0x1122_3344_5566_7788);

    let mut narrow = [0u8; 4];
    let err = target.get_value(DSType::ThreadStore, &mut narrow).unwrap_err();
    assert!(matches!(err, ReaderError::UsageError(_)));

    let mut odd = [0u8; 3];
    assert!(matches!(
        target.get_value(DSType::ThreadStore, &mut odd),
        Err(ReaderError::UsageError(_))
    ));

    assert_eq!(target.read_value::<i8>(DSType::SOSBreakingChangeVersion).unwrap(), -2);
    assert_eq!(target.read_value::<u8>(DSType::SOSBreakingChangeVersion).unwrap(), 0xfe);
}

#[test]
fn test_instances_resolve_to_addresses()
{
    for width in [PointerWidth::Four, PointerWidth::Eight] {
        let fixture = FixtureBuilder::new(Endianness::Big, width)
            .with_type(TypeSpec::for_ds_type(DSType::ThreadStore, 6, 0x20))
            .with_instance(InstanceSpec::new(6, Address::new(0x7000_1000)))
            .build();
        let target = ready(fixture);
        assert_eq!(target.instance_address(DSType::ThreadStore).unwrap(), Address::new(0x7000_1000));
        assert!(target.instance_address(DSType::Ptr).unwrap_err().is_not_found());
    }
}

#[test]
fn test_pointer_data_entries()
{
    let fixture = FixtureBuilder::new(Endianness::Little, PointerWidth::Four)
        .with_pointer_data(Address::new(0xaaaa_0000))
        .with_pointer_data(Address::new(0xbbbb_0000))
        .build();
    let target = ready(fixture);
    assert_eq!(target.header().unwrap().pointer_data_count, 2);
    assert_eq!(target.pointer_data(0).unwrap(), Address::new(0xaaaa_0000));
    assert_eq!(target.pointer_data(1).unwrap(), Address::new(0xbbbb_0000));
    assert!(target.pointer_data(2).unwrap_err().is_not_found());
}

#[test]
fn test_raw_reads_use_session_layout()
{
    for endianness in [Endianness::Little, Endianness::Big] {
        let fixture = FixtureBuilder::new(endianness, PointerWidth::Eight).build();
        let descriptor = fixture.descriptor();
        let target = ready(fixture);

        let config = target.config().unwrap();
        assert_eq!(config.is_little_endian(), endianness == Endianness::Little);
        assert_eq!(config.pointer_size(), 8);

        let magic = target.read_u64(descriptor).unwrap();
        assert_eq!(magic, dcr_core::wire::DESCRIPTOR_MAGIC);
        assert_eq!(target.read_u32(descriptor + 8).unwrap(), 0b11);
        let payload = target.read_pointer(descriptor + 16).unwrap();
        assert_eq!(payload, target.header().unwrap().payload_address);
    }
}

#[test]
fn test_file_image_reader_parses_flattened_fixture()
{
    let fixture = FixtureBuilder::new(Endianness::Big, PointerWidth::Four)
        .with_global(DSType::SOSBreakingChangeVersion, 2, [0, 0, 0, 12])
        .build();
    let descriptor = fixture.descriptor();
    let image = fixture.system().flatten().unwrap();

    let mut target = Target::with_reader(Box::new(FileImageReader::new(image.base, image.bytes)));
    target.set_stream(descriptor).unwrap();
    assert_eq!(target.breaking_change_version().unwrap(), 12);
}
