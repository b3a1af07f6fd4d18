//! # Reader Configuration
//!
//! Limits applied while decoding untrusted target memory.
//!
//! ## Environment Variables
//!
//! - `DCR_MAX_PAYLOAD_BYTES`: largest data-context payload accepted (default 1 MiB)
//! - `DCR_MAX_STREAM_BLOCKS`: longest data-block chain followed per stream (default 256)
//! - `DCR_MAX_BLOCK_BYTES`: largest single data block fetched (default 16 MiB)
//! - `DCR_STRICT_VERSIONS`: `true`/`false`, whether a remote type whose version
//!   differs from the local expectation stays unmapped (default `true`)
//!
//! Unparseable values are logged and ignored.

use std::env;
use std::str::FromStr;

use tracing::warn;

/// Limits and policies for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig
{
    /// Largest payload length the descriptor may declare
    pub max_payload_len: u32,
    /// Longest chain of data blocks followed in one stream
    pub max_stream_blocks: usize,
    /// Largest `[pos, end)` extent fetched from one data block
    pub max_block_len: u64,
    /// Leave remote types with an unexpected version unmapped
    pub strict_versions: bool,
}

impl Default for ReaderConfig
{
    fn default() -> Self
    {
        Self {
            max_payload_len: 1 << 20,
            max_stream_blocks: 256,
            max_block_len: 16 << 20,
            strict_versions: true,
        }
    }
}

impl ReaderConfig
{
    /// Defaults overridden by any `DCR_*` environment variables that are set.
    ///
    /// ```rust,no_run
    /// use dcr_core::config::ReaderConfig;
    ///
    /// let config = ReaderConfig::from_env();
    /// assert!(config.max_stream_blocks > 0);
    /// ```
    #[must_use]
    pub fn from_env() -> Self
    {
        let defaults = Self::default();
        Self {
            max_payload_len: env_or("DCR_MAX_PAYLOAD_BYTES", defaults.max_payload_len),
            max_stream_blocks: env_or("DCR_MAX_STREAM_BLOCKS", defaults.max_stream_blocks),
            max_block_len: env_or("DCR_MAX_BLOCK_BYTES", defaults.max_block_len),
            strict_versions: env_or("DCR_STRICT_VERSIONS", defaults.strict_versions),
        }
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "ignoring unparseable configuration value");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults()
    {
        let config = ReaderConfig::default();
        assert_eq!(config.max_payload_len, 1 << 20);
        assert_eq!(config.max_stream_blocks, 256);
        assert!(config.strict_versions);
    }

    #[test]
    fn test_env_or_falls_back_when_unset()
    {
        assert_eq!(env_or("DCR_TEST_SURELY_UNSET_VARIABLE", 42u32), 42);
    }
}
