//! # Error Types
//!
//! General error handling for the descriptor reader.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages. None of these types cross the
//! [`entrypoints`](crate::entrypoints) boundary: there every error collapses
//! into [`Status::Fail`](crate::entrypoints::Status::Fail).

use thiserror::Error;

use crate::types::Address;

/// Main error type for reader operations
///
/// ## Error Categories
///
/// 1. **Memory errors**: ReadFailure
/// 2. **Structural errors**: InvalidMagic, CorruptDescriptor
/// 3. **Stream errors**: EnumerationFailure
/// 4. **Lookup misses**: NotFound (not fatal, the caller decides)
/// 5. **Contract violations**: UsageError
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError
{
    /// The read callback could not supply the requested bytes
    ///
    /// Always fatal to the operation that issued the read. There is no retry
    /// and no fallback to partial data.
    #[error("Failed to read {length} bytes at {address}")]
    ReadFailure
    {
        /// Remote address of the failed read
        address: Address,
        /// Number of bytes requested
        length: usize,
    },

    /// The descriptor magic matched neither byte order
    ///
    /// `found` is the value interpreted as little-endian.
    #[error("Invalid descriptor magic: 0x{found:016x}")]
    InvalidMagic
    {
        /// Raw magic bytes read as a little-endian `u64`
        found: u64,
    },

    /// The descriptor or its payload violates a structural invariant
    ///
    /// Examples:
    /// - platform flags bit 0 is clear
    /// - the data-context header size does not match the pointer width
    /// - a stream record does not point back at its data context
    #[error("Corrupt descriptor: {0}")]
    CorruptDescriptor(String),

    /// A type, blob or instance stream could not be enumerated
    ///
    /// Partial tables built before the failure are discarded.
    #[error("Failed to enumerate {stream} stream: {reason}")]
    EnumerationFailure
    {
        /// Name of the stream being enumerated
        stream: &'static str,
        /// What went wrong
        reason: String,
    },

    /// A lookup had no match in the current session
    ///
    /// This is a normal outcome: the target runtime may simply not publish
    /// the requested type (older build, feature disabled, version skew).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The API was driven in an order or manner it does not support
    ///
    /// Examples:
    /// - registering a read callback twice
    /// - calling `set_stream` before a read callback exists
    /// - asking for a value with an unsupported primitive width
    #[error("Usage error: {0}")]
    UsageError(String),
}

impl ReaderError
{
    /// Shorthand for building an [`ReaderError::EnumerationFailure`].
    pub fn enumeration(stream: &'static str, reason: impl Into<String>) -> Self
    {
        Self::EnumerationFailure {
            stream,
            reason: reason.into(),
        }
    }

    /// Whether this error aborts the operation that produced it.
    ///
    /// Everything except [`ReaderError::NotFound`] is fatal.
    #[must_use]
    pub const fn is_fatal(&self) -> bool
    {
        !self.is_not_found()
    }

    /// Whether this error is a plain lookup miss.
    #[must_use]
    pub const fn is_not_found(&self) -> bool
    {
        matches!(self, Self::NotFound(_))
    }
}

/// Convenience type alias for `Result<T, ReaderError>`
///
/// ```rust
/// use dcr_core::error::ReaderResult;
/// fn foo() -> ReaderResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type ReaderResult<T> = std::result::Result<T, ReaderError>;
