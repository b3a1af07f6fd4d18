//! # Entrypoints
//!
//! Handle-based surface for hosts that cannot hold a [`Target`] directly.
//!
//! Every function returns a [`Status`]. Internal errors are logged and
//! collapsed to [`Status::Fail`]; no [`ReaderError`] crosses this boundary.
//! A panic, including one raised by the host's read callback, is caught and
//! reported the same way.
//!
//! ## Handles
//!
//! [`init`] allocates a session in a process-wide table and hands back an
//! opaque [`Handle`]. Handles are never reused. The read callback receives
//! only the `user_context` id registered with it, never a session reference.
//!
//! Each session has its own lock. The table itself is locked only long
//! enough to find a session, so a callback may create, use or destroy other
//! sessions while a parse is running.
//!
//! ## Example
//!
//! ```rust
//! use dcr_core::entrypoints::{self, Handle, Status};
//!
//! fn read(_address: u64, _length: u32, _context: u64, _dest: &mut [u8]) -> i32
//! {
//!     -1
//! }
//!
//! let mut handle = Handle::INVALID;
//! assert_eq!(entrypoints::init(&mut handle), Status::Ok);
//! assert_eq!(entrypoints::set_reader_func(handle, read, 0), Status::Ok);
//! // Nothing is mapped, so parsing fails without touching the session.
//! assert_eq!(entrypoints::set_stream(handle, 0x1000), Status::Fail);
//! entrypoints::destroy(handle);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::Lazy;
use tracing::{debug, error};

use crate::ds_type::DSType;
use crate::error::{ReaderError, ReaderResult};
use crate::memory::{CallbackReader, ReadFn};
use crate::target::Target;
use crate::types::Address;

/// Result of an entrypoint call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status
{
    /// The call succeeded
    Ok = 0,
    /// The call failed; details went to the log
    Fail = -1,
}

impl Status
{
    /// Raw integer code
    #[must_use]
    pub const fn code(self) -> i32
    {
        self as i32
    }

    /// Whether this is [`Status::Ok`]
    #[must_use]
    pub const fn is_ok(self) -> bool
    {
        matches!(self, Status::Ok)
    }
}

/// Opaque session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u64);

impl Handle
{
    /// Never returned by [`init`]
    pub const INVALID: Handle = Handle(0);

    /// Raw handle value
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Rebuild a handle from its raw value
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Handle(value)
    }
}

impl fmt::Display for Handle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "handle#{}", self.0)
    }
}

type Session = Arc<Mutex<Target>>;

#[derive(Default)]
struct SessionTable
{
    next: u64,
    sessions: HashMap<u64, Session>,
}

impl SessionTable
{
    fn insert(&mut self, target: Target) -> Handle
    {
        self.next += 1;
        self.sessions.insert(self.next, Arc::new(Mutex::new(target)));
        Handle(self.next)
    }

    fn get(&self, handle: Handle) -> ReaderResult<Session>
    {
        self.sessions
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| ReaderError::UsageError(format!("{handle} is not a live session")))
    }
}

static SESSIONS: Lazy<Mutex<SessionTable>> = Lazy::new(|| Mutex::new(SessionTable::default()));

/// The table lock is only held for lookups and bookkeeping, never while a
/// target runs the host's read callback.
fn sessions() -> MutexGuard<'static, SessionTable>
{
    SESSIONS.lock().unwrap_or_else(PoisonError::into_inner)
}

fn status(operation: &str, handle: Handle, result: ReaderResult<()>) -> Status
{
    match result {
        Ok(()) => Status::Ok,
        Err(err) => {
            error!(operation, %handle, error = %err, "entrypoint failed");
            Status::Fail
        }
    }
}

/// Run an entrypoint body, turning a panic into [`Status::Fail`].
fn guarded(operation: &str, handle: Handle, body: impl FnOnce() -> ReaderResult<()>) -> Status
{
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => status(operation, handle, result),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                .unwrap_or("non-string panic payload");
            error!(operation, %handle, panic = message, "entrypoint panicked");
            Status::Fail
        }
    }
}

fn with_target<T>(handle: Handle, f: impl FnOnce(&mut Target) -> ReaderResult<T>) -> ReaderResult<T>
{
    let session = sessions().get(handle)?;
    // Targets only commit a parse on success, so a poisoned one is still whole.
    let mut target = session.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut target)
}

/// Allocate a session and write its handle.
pub fn init(handle: &mut Handle) -> Status
{
    let mut created = Handle::INVALID;
    let status = guarded("init", Handle::INVALID, || {
        let target = Target::with_config(crate::config::ReaderConfig::from_env());
        created = sessions().insert(target);
        Ok(())
    });
    if status.is_ok() {
        *handle = created;
        debug!(%handle, "session created");
    }
    status
}

/// Release a session. Unknown handles are ignored.
///
/// A call still running on the session keeps it alive until it returns.
pub fn destroy(handle: Handle)
{
    let _ = guarded("destroy", handle, || {
        let removed = sessions().sessions.remove(&handle.0);
        if removed.is_some() {
            debug!(%handle, "session destroyed");
        }
        Ok(())
    });
}

/// Bind the read callback for a session.
///
/// Fails if the handle is unknown or a callback is already bound.
pub fn set_reader_func(handle: Handle, func: ReadFn, user_context: u64) -> Status
{
    guarded("set_reader_func", handle, || {
        with_target(handle, |target| {
            target.set_reader(Box::new(CallbackReader::new(func, user_context)))
        })
    })
}

/// Parse the descriptor at `descriptor_address`.
///
/// On failure the session keeps whatever an earlier successful call parsed.
/// The read callback may call back into any entrypoint except those taking
/// this same handle.
pub fn set_stream(handle: Handle, descriptor_address: u64) -> Status
{
    guarded("set_stream", handle, || {
        with_target(handle, |target| target.set_stream(Address::new(descriptor_address)))
    })
}

/// Decode the value of local type `ds_type` into `out`.
///
/// `ds_type` is the numeric value of a [`DSType`]; `out.len()` selects the
/// width (1, 2, 4 or 8 bytes) and the result is written native-endian.
pub fn get_value(handle: Handle, ds_type: u32, out: &mut [u8]) -> Status
{
    guarded("get_value", handle, || {
        let ty = DSType::try_from(ds_type)?;
        with_target(handle, |target| target.get_value(ty, out))
    })
}

/// Like [`get_value`], naming the local type instead of numbering it.
pub fn get_value_by_name(handle: Handle, name: &str, out: &mut [u8]) -> Status
{
    guarded("get_value_by_name", handle, || {
        let ty = name.parse::<DSType>()?;
        with_target(handle, |target| target.get_value(ty, out))
    })
}

/// Read the target's breaking-change version into `version`.
///
/// `version` is left alone on failure.
pub fn get_breaking_change_version(handle: Handle, version: &mut i32) -> Status
{
    guarded("get_breaking_change_version", handle, || {
        *version = with_target(handle, |target| target.breaking_change_version())?;
        Ok(())
    })
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn never_reads(_address: u64, _length: u32, _context: u64, _dest: &mut [u8]) -> i32
    {
        -1
    }

    #[test]
    fn test_handles_are_unique_and_nonzero()
    {
        let (mut a, mut b) = (Handle::INVALID, Handle::INVALID);
        assert_eq!(init(&mut a), Status::Ok);
        assert_eq!(init(&mut b), Status::Ok);
        assert_ne!(a, Handle::INVALID);
        assert_ne!(a, b);
        destroy(a);
        destroy(b);
    }

    #[test]
    fn test_double_reader_registration_fails()
    {
        let mut handle = Handle::INVALID;
        init(&mut handle);
        assert_eq!(set_reader_func(handle, never_reads, 1), Status::Ok);
        assert_eq!(set_reader_func(handle, never_reads, 2), Status::Fail);
        destroy(handle);
    }

    #[test]
    fn test_destroyed_handle_fails_and_double_destroy_is_harmless()
    {
        let mut handle = Handle::INVALID;
        init(&mut handle);
        destroy(handle);
        destroy(handle);
        assert_eq!(set_stream(handle, 0x1000), Status::Fail);
    }

    #[test]
    fn test_lookup_before_set_stream_fails()
    {
        let mut handle = Handle::INVALID;
        init(&mut handle);
        let mut out = [0u8; 4];
        assert_eq!(get_value(handle, DSType::ThreadStore as u32, &mut out), Status::Fail);
        assert_eq!(get_value(handle, 42, &mut out), Status::Fail);
        let mut version = 7;
        assert_eq!(get_breaking_change_version(handle, &mut version), Status::Fail);
        assert_eq!(version, 7);
        destroy(handle);
    }

    #[test]
    fn test_status_codes()
    {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Fail.code(), -1);
    }
}
