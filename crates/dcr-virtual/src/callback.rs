//! Plain-function read callbacks over virtual memory.
//!
//! A [`ReadFn`](dcr_core::ReadFn) carries no state beyond an integer user
//! context, so completed systems are registered in a process-wide table and
//! the context is the registration key. [`read_callback`] looks the key up
//! and reads from that system.
//!
//! ```rust
//! use dcr_core::entrypoints::{self, Handle, Status};
//! use dcr_core::{DSType, Endianness, PointerWidth};
//! use dcr_virtual::{callback, FixtureBuilder};
//!
//! let (system, descriptor) = FixtureBuilder::new(Endianness::Little, PointerWidth::Eight)
//!     .with_global(DSType::ThreadStore, 5, 0x7000_u64.to_le_bytes())
//!     .build()
//!     .into_shared();
//! let registration = callback::register(system);
//!
//! let mut handle = Handle::INVALID;
//! assert_eq!(entrypoints::init(&mut handle), Status::Ok);
//! assert_eq!(
//!     entrypoints::set_reader_func(handle, callback::read_callback, registration.user_context()),
//!     Status::Ok
//! );
//! assert_eq!(entrypoints::set_stream(handle, descriptor.value()), Status::Ok);
//! entrypoints::destroy(handle);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dcr_core::types::Address;
use once_cell::sync::Lazy;
use tracing::trace;

use crate::system::VirtualMemorySystem;

struct Registry
{
    next: u64,
    systems: HashMap<u64, Arc<VirtualMemorySystem>>,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| {
    Mutex::new(Registry {
        next: 1,
        systems: HashMap::new(),
    })
});

fn lookup(user_context: u64) -> Option<Arc<VirtualMemorySystem>>
{
    let registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    registry.systems.get(&user_context).cloned()
}

/// Keeps a system registered until dropped
#[derive(Debug)]
pub struct ReaderRegistration
{
    user_context: u64,
}

impl ReaderRegistration
{
    /// Value to pass as the callback's user context
    #[must_use]
    pub const fn user_context(&self) -> u64
    {
        self.user_context
    }
}

impl Drop for ReaderRegistration
{
    fn drop(&mut self)
    {
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        registry.systems.remove(&self.user_context);
    }
}

/// Make `system` reachable through [`read_callback`].
#[must_use]
pub fn register(system: Arc<VirtualMemorySystem>) -> ReaderRegistration
{
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    let user_context = registry.next;
    registry.next += 1;
    registry.systems.insert(user_context, system);
    ReaderRegistration { user_context }
}

/// Read callback resolving `user_context` to a registered system.
///
/// Returns 0 when every byte was read, -1 for an unknown context or a failed
/// read.
pub fn read_callback(address: u64, length: u32, user_context: u64, dest: &mut [u8]) -> i32
{
    let Some(system) = lookup(user_context) else {
        trace!(user_context, "read through unknown registration");
        return -1;
    };
    let Some(dest) = dest.get_mut(..length as usize) else {
        return -1;
    };
    match system.try_read(Address::new(address), dest) {
        Ok(()) => 0,
        Err(err) => {
            trace!(%err, "virtual read failed");
            -1
        }
    }
}
