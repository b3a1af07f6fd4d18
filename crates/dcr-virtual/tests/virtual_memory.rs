//! Tests for the virtual memory system and its reservation protocol

use dcr_core::types::{Address, Endianness, PointerWidth};
use dcr_virtual::{
    BufferBackedRange, BufferBuilder, ExternalPtr, NullPage, Patch, VirtualMemoryError, VirtualMemorySystem,
};

fn system() -> VirtualMemorySystem
{
    VirtualMemorySystem::with_null_page(Endianness::Little, PointerWidth::Eight)
}

fn range(start: u64, len: usize) -> Box<BufferBackedRange>
{
    Box::new(BufferBackedRange::new(start, vec![0xab; len]))
}

#[test]
fn test_overlap_rejected_in_both_orders()
{
    // (first, second): partial, containment, exact
    let cases = [
        ((0x2000, 0x20), (0x2010, 0x20)),
        ((0x2000, 0x40), (0x2008, 0x08)),
        ((0x2000, 0x20), (0x2000, 0x20)),
    ];
    for ((a, a_len), (b, b_len)) in cases {
        let mut forward = system();
        forward.add_range(range(a, a_len));
        let err = forward.try_add_range(range(b, b_len)).unwrap_err();
        assert!(matches!(err, VirtualMemoryError::Overlap { .. }));

        let mut backward = system();
        backward.add_range(range(b, b_len));
        assert!(backward.try_add_range(range(a, a_len)).is_err());
    }
}

#[test]
fn test_adjacent_ranges_accepted()
{
    let mut system = system();
    system.add_range(range(0x2000, 0x10));
    system.add_range(range(0x2010, 0x10));
    assert_eq!(system.range_count(), 3);
}

#[test]
#[should_panic(expected = "overlaps")]
fn test_add_range_panics_on_overlap()
{
    let mut system = system();
    system.add_range(range(0x800, 0x10));
}

#[test]
fn test_stitched_read_across_ranges()
{
    let mut system = VirtualMemorySystem::new(Endianness::Little, PointerWidth::Eight);
    system.add_range(Box::new(BufferBackedRange::new(0x1000, (0x00..0x10).collect())));
    system.add_range(Box::new(BufferBackedRange::new(0x1010, (0x10..0x20).collect())));

    let mut dest = [0u8; 0x10];
    system.try_read(Address::new(0x1008), &mut dest).unwrap();
    let expected: Vec<u8> = (0x08..0x18).collect();
    assert_eq!(dest.as_slice(), expected.as_slice());
}

#[test]
fn test_read_across_gap_leaves_dest_untouched()
{
    let mut system = VirtualMemorySystem::new(Endianness::Little, PointerWidth::Eight);
    system.add_range(range(0x1000, 0x10));
    system.add_range(range(0x1020, 0x10));

    let mut dest = [0x55u8; 0x20];
    let err = system.try_read(Address::new(0x1008), &mut dest).unwrap_err();
    assert!(matches!(err, VirtualMemoryError::Unmapped { length: 0x20, .. }));
    assert!(dest.iter().all(|&byte| byte == 0x55));
}

#[test]
fn test_read_into_null_page_fails()
{
    let mut system = system();
    system.add_range(range(NullPage::SIZE, 0x10));
    let mut dest = [0u8; 8];
    assert!(system.try_read(Address::new(NullPage::SIZE - 4), &mut dest).is_err());
    assert!(system.try_read(Address::new(NullPage::SIZE), &mut dest).is_ok());
}

#[test]
fn test_reservations_are_disjoint_and_large_enough()
{
    let sizes = [0x30u64, 0x1, 0x200, 0x18, 0x0, 0x77];
    let mut system = system();
    system.add_range(range(0x1100, 0x40));

    let ids: Vec<_> = sizes
        .iter()
        .map(|&size| {
            let mut buffer = BufferBuilder::new(*system.layout(), format!("{size:#x}"));
            buffer.ensure_capacity(0, size as usize);
            buffer.reserve(&mut system)
        })
        .collect();
    assert_eq!(system.pending_reservations(), sizes.len());
    system.complete();
    assert_eq!(system.pending_reservations(), 0);

    let mut placed: Vec<(u64, u64)> = ids
        .iter()
        .zip(sizes)
        .map(|(&id, size)| {
            let start = system.resolved_address(id).unwrap().value();
            (start, start + size)
        })
        .collect();
    for &(start, _) in &placed {
        assert!(start >= NullPage::SIZE);
        assert_eq!(start % 8, 0);
    }
    placed.sort_unstable();
    for pair in placed.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "{pair:?} overlap");
        assert!(pair[0].0 < pair[1].0);
    }
    for &(start, end) in &placed {
        assert!(end <= 0x1100 || start >= 0x1140);
    }
}

#[test]
fn test_cross_reservation_and_self_pointers_resolve()
{
    let mut system = VirtualMemorySystem::with_null_page(Endianness::Big, PointerWidth::Four);
    let layout = *system.layout();

    let mut target = BufferBuilder::new(layout, "target");
    target.write_u32(4, 0xdead_beef);
    target.patch_at(0, Patch::SameBufferOffset(4));
    let target_id = target.reserve(&mut system);

    let mut referrer = BufferBuilder::new(layout, "referrer");
    referrer.patch_at(
        0,
        Patch::ReservationOffset {
            reservation: target_id,
            offset: 4,
        },
    );
    let referrer_id = referrer.reserve(&mut system);

    system.complete();
    let target_start = system.resolved_address(target_id).unwrap();
    assert_eq!(system.try_read_pointer(target_start).unwrap(), target_start + 4);

    let referrer_start = system.resolved_address(referrer_id).unwrap();
    let pointer = system.try_read_pointer(referrer_start).unwrap();
    assert_eq!(system.try_read_u32(pointer).unwrap(), 0xdead_beef);
}

#[test]
#[should_panic(expected = "never bound")]
fn test_unbound_patch_point_panics_on_complete()
{
    let mut system = system();
    let mut buffer = BufferBuilder::new(*system.layout(), "unbound");
    buffer.add_patch_point(0);
    buffer.reserve(&mut system);
    system.complete();
}

#[test]
#[should_panic(expected = "already bound")]
fn test_patch_set_twice_panics()
{
    let mut buffer = BufferBuilder::new(*system().layout(), "twice");
    let slot = buffer.add_patch_point(0);
    buffer.set_patch(slot, Patch::ConstSize(1));
    buffer.set_patch(slot, Patch::ConstSize(2));
}

#[test]
fn test_try_complete_reports_unbound_patch()
{
    let mut system = system();
    let mut buffer = BufferBuilder::new(*system.layout(), "unbound");
    buffer.write_u32(0, 1);
    buffer.add_patch_point(8);
    buffer.reserve(&mut system);
    let err = system.try_complete().unwrap_err();
    assert!(matches!(err, VirtualMemoryError::UnboundPatch { offset: 8, .. }));
}

#[test]
fn test_external_pointer_swaps_for_opposite_order()
{
    let opposite = Endianness::native().opposite();
    let system = VirtualMemorySystem::new(opposite, PointerWidth::Eight);
    let external = system.to_external(Address::new(0x1122_3344_5566_7788));
    assert_eq!(external, ExternalPtr::from_raw(0x8877_6655_4433_2211));
    assert_eq!(system.from_external(external), Address::new(0x1122_3344_5566_7788));
}

#[test]
fn test_pointer_width_ceiling()
{
    let system = VirtualMemorySystem::new(Endianness::Little, PointerWidth::Four);
    assert!(system.validate_pointer(Address::new(0xffff_ffff)).is_ok());
    assert!(system.validate_pointer(Address::new(0x1_0000_0000)).is_err());
}
