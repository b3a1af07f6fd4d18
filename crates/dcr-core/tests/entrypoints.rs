//! Tests for the handle-based entrypoints driven through a read callback

use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use dcr_core::entrypoints::{self, Handle, Status};
use dcr_core::{DSType, Endianness, PointerWidth};
use dcr_virtual::callback::{self, ReaderRegistration};
use dcr_virtual::FixtureBuilder;

fn session(endianness: Endianness, width: PointerWidth) -> (Handle, u64, ReaderRegistration)
{
    let (system, descriptor) = FixtureBuilder::new(endianness, width)
        .with_global(DSType::SOSBreakingChangeVersion, 2, [0x00, 0x01, 0x02, 0x03])
        .with_global(DSType::ThreadStore, 3, 0x0000_7f00_0000_1000_u64.to_be_bytes())
        .build()
        .into_shared();
    let registration = callback::register(system);

    let mut handle = Handle::INVALID;
    assert_eq!(entrypoints::init(&mut handle), Status::Ok);
    assert_ne!(handle, Handle::INVALID);
    assert_eq!(
        entrypoints::set_reader_func(handle, callback::read_callback, registration.user_context()),
        Status::Ok
    );
    (handle, descriptor.value(), registration)
}

#[test]
fn test_full_session_through_callback()
{
    for (endianness, expected) in [(Endianness::Little, 0x0302_0100), (Endianness::Big, 0x0001_0203)] {
        let (handle, descriptor, _registration) = session(endianness, PointerWidth::Eight);
        assert_eq!(entrypoints::set_stream(handle, descriptor), Status::Ok);

        let mut out = [0u8; 4];
        let code = DSType::SOSBreakingChangeVersion as u32;
        assert_eq!(entrypoints::get_value(handle, code, &mut out), Status::Ok);
        assert_eq!(i32::from_ne_bytes(out), expected);

        let mut version = 0;
        assert_eq!(entrypoints::get_breaking_change_version(handle, &mut version), Status::Ok);
        assert_eq!(version, expected);

        entrypoints::destroy(handle);
    }
}

#[test]
fn test_get_value_by_name()
{
    let (handle, descriptor, _registration) = session(Endianness::Big, PointerWidth::Four);
    assert_eq!(entrypoints::set_stream(handle, descriptor), Status::Ok);

    let mut out = [0u8; 8];
    assert_eq!(entrypoints::get_value_by_name(handle, "ThreadStore", &mut out), Status::Ok);
    assert_eq!(u64::from_ne_bytes(out), 0x0000_7f00_0000_1000);
    assert_eq!(entrypoints::get_value_by_name(handle, "threadstore", &mut out), Status::Fail);
    entrypoints::destroy(handle);
}

#[test]
fn test_failures_collapse_to_fail()
{
    let (handle, descriptor, _registration) = session(Endianness::Little, PointerWidth::Four);

    let mut out = [0u8; 4];
    // nothing parsed yet
    assert_eq!(entrypoints::get_value(handle, 1, &mut out), Status::Fail);
    // reader already bound
    assert_eq!(entrypoints::set_reader_func(handle, callback::read_callback, 0), Status::Fail);
    // unmapped descriptor
    assert_eq!(entrypoints::set_stream(handle, 0x10), Status::Fail);

    assert_eq!(entrypoints::set_stream(handle, descriptor), Status::Ok);
    // unknown local type
    assert_eq!(entrypoints::get_value(handle, 99, &mut out), Status::Fail);
    // wrong width
    let mut wide = [0u8; 8];
    assert_eq!(entrypoints::get_value(handle, 1, &mut wide), Status::Fail);
    assert_eq!(Status::Fail.code(), -1);
    entrypoints::destroy(handle);
}

#[test]
fn test_breaking_change_version_untouched_on_failure()
{
    let (handle, _descriptor, _registration) = session(Endianness::Little, PointerWidth::Eight);
    let mut version = -7;
    assert_eq!(entrypoints::get_breaking_change_version(handle, &mut version), Status::Fail);
    assert_eq!(version, -7);
    entrypoints::destroy(handle);
}

#[test]
fn test_destroyed_handle_is_rejected()
{
    let (handle, descriptor, _registration) = session(Endianness::Big, PointerWidth::Eight);
    entrypoints::destroy(handle);
    entrypoints::destroy(handle);
    assert_eq!(entrypoints::set_stream(handle, descriptor), Status::Fail);
}

#[test]
fn test_dropped_registration_fails_reads()
{
    let (handle, descriptor, registration) = session(Endianness::Little, PointerWidth::Eight);
    drop(registration);
    assert_eq!(entrypoints::set_stream(handle, descriptor), Status::Fail);
    entrypoints::destroy(handle);
}

static NESTED_SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// Opens and closes a second session on every read before serving it.
fn reentrant_read(address: u64, length: u32, user_context: u64, dest: &mut [u8]) -> i32
{
    let mut nested = Handle::INVALID;
    if entrypoints::init(&mut nested) == Status::Ok {
        entrypoints::destroy(nested);
        NESTED_SESSIONS.fetch_add(1, Ordering::SeqCst);
    }
    callback::read_callback(address, length, user_context, dest)
}

const FAULT_BASE: u64 = 0xdead_0000;

/// Serves reads normally, but panics at or above [`FAULT_BASE`].
fn faulting_read(address: u64, length: u32, user_context: u64, dest: &mut [u8]) -> i32
{
    assert!(address < FAULT_BASE, "host reader fault at {address:#x}");
    callback::read_callback(address, length, user_context, dest)
}

#[test]
fn test_read_callback_can_reenter_entrypoints()
{
    let (system, descriptor) = FixtureBuilder::new(Endianness::Little, PointerWidth::Eight)
        .with_global(DSType::SOSBreakingChangeVersion, 2, 5_i32.to_le_bytes())
        .build()
        .into_shared();
    let registration = callback::register(system);

    let mut handle = Handle::INVALID;
    assert_eq!(entrypoints::init(&mut handle), Status::Ok);
    assert_eq!(
        entrypoints::set_reader_func(handle, reentrant_read, registration.user_context()),
        Status::Ok
    );

    let before = NESTED_SESSIONS.load(Ordering::SeqCst);
    let (tx, rx) = mpsc::channel();
    let descriptor = descriptor.value();
    thread::spawn(move || {
        let _ = tx.send(entrypoints::set_stream(handle, descriptor));
    });
    let status = rx.recv_timeout(Duration::from_secs(10));
    assert_eq!(status, Ok(Status::Ok), "set_stream did not finish");
    assert!(NESTED_SESSIONS.load(Ordering::SeqCst) > before);

    let mut version = 0;
    assert_eq!(entrypoints::get_breaking_change_version(handle, &mut version), Status::Ok);
    assert_eq!(version, 5);
    entrypoints::destroy(handle);
}

#[test]
fn test_panicking_callback_becomes_fail()
{
    let (handle, descriptor, registration) = session(Endianness::Big, PointerWidth::Four);
    entrypoints::destroy(handle);

    let mut handle = Handle::INVALID;
    assert_eq!(entrypoints::init(&mut handle), Status::Ok);
    assert_eq!(
        entrypoints::set_reader_func(handle, faulting_read, registration.user_context()),
        Status::Ok
    );
    assert_eq!(entrypoints::set_stream(handle, descriptor), Status::Ok);

    let result = panic::catch_unwind(|| entrypoints::set_stream(handle, FAULT_BASE));
    assert_eq!(result.ok(), Some(Status::Fail));

    // The earlier parse survives the fault
    let mut version = 0;
    assert_eq!(entrypoints::get_breaking_change_version(handle, &mut version), Status::Ok);
    assert_eq!(version, 0x0001_0203);
    entrypoints::destroy(handle);
}
