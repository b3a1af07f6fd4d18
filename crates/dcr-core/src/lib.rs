//! # dcr-core
//!
//! Reader for the remote data-contract descriptor a process publishes so that
//! out-of-process diagnostic tools can find type layouts and global values
//! without sharing code with it.
//!
//! This crate provides:
//! - Remote memory access through a host-supplied read callback
//! - Descriptor header decoding with byte-order and pointer-width negotiation
//! - Data-context and stream parsing into type, blob and instance tables
//! - A [`Target`] session and a handle-based [`entrypoints`] surface
//!
//! ## Data flow
//!
//! ```text
//! read callback -> MemoryReader -> wire (header, payload)
//!               -> context (data context, streams, tables) -> Target -> caller
//! ```
//!
//! ## Why no unsafe code
//!
//! The target is never mapped into this process. Every byte is copied in by
//! a [`MemoryReader`], so decoding is plain slice work.

pub mod config;
pub mod context;
pub mod ds_type;
pub mod entrypoints;
pub mod error;
pub mod memory;
pub mod target;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use config::ReaderConfig;
pub use ds_type::DSType;
pub use error::{ReaderError, ReaderResult};
pub use memory::{CallbackReader, FileImageReader, MemoryReader, ReadFn, RemoteMemory};
pub use target::{Target, TargetConfig, TargetValue};
pub use types::{Address, Endianness, PointerWidth, TargetLayout};
