//! # Types
//!
//! Target-agnostic value types used throughout the reader.
//!
//! Nothing here knows about descriptors or streams; these types only describe
//! where something lives in the target and how its bytes are laid out.

pub mod address;
pub mod layout;

// Re-export all public types
pub use address::Address;
pub use layout::{Endianness, PointerWidth, TargetLayout};
