//! # DCR Virtual
//!
//! A simulated target address space for testing the descriptor reader, and
//! the builders that lay byte-exact descriptors out inside it.
//!
//! ## Pieces
//!
//! - [`VirtualMemorySystem`]: disjoint ranges, stitched reads, a null page
//! - [`Reservable`]: two-phase address assignment so builders can point at
//!   each other before anyone has an address
//! - [`BufferBuilder`] and [`Patch`]: target-layout buffers with deferred
//!   pointer writes
//! - [`StreamBuilder`], [`DataContextBuilder`], [`DescriptorBuilder`]: the
//!   wire structures, one reservation each
//! - [`FixtureBuilder`]: all of the above in one call
//! - [`callback`]: exposes a system through a plain read function
//!
//! Misuse (overlapping ranges, unbound patch points, a start address set
//! twice) panics. Every such operation also has a `try_*` form returning
//! [`VirtualMemoryError`].

pub mod buffer;
pub mod callback;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod fixture;
pub mod patch;
pub mod range;
pub mod reservation;
pub mod stream;
pub mod system;

pub use buffer::BufferBuilder;
pub use context::{DataContextBuilder, PlacedContext};
pub use descriptor::{default_flags, DescriptorBuilder};
pub use error::{VirtualMemoryError, VirtualResult};
pub use fixture::{Fixture, FixtureBuilder};
pub use patch::{Patch, PatchPoint, PatchPointId};
pub use range::{BufferBackedRange, NullPage, VirtualMemoryRange};
pub use reservation::{Reservable, ReservationId, ResolvedReservations};
pub use stream::{BlobSpec, Entity, InstanceSpec, PlacedStream, StreamBuilder, TypeSpec};
pub use system::{ExternalPtr, FlatImage, VirtualMemorySystem, RESERVATION_ALIGNMENT};
