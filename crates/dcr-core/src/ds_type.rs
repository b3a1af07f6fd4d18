//! # Local Type Vocabulary
//!
//! [`DSType`] is the closed set of well-known names this reader knows how to
//! resolve. A target publishes types under string names with its own numeric
//! ids; each session maps remote id to `DSType` by exact, case-sensitive name
//! match. Remote names that are not listed here are skipped, which is what
//! lets newer targets add types without breaking older readers.

use std::fmt;
use std::str::FromStr;

use crate::error::ReaderError;

/// Well-known type the reader can look up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum DSType
{
    /// Target pointer; its remote size must equal the negotiated pointer width
    Ptr = 0,
    /// Version counter bumped whenever the diagnostics contract breaks
    SOSBreakingChangeVersion = 1,
    /// The runtime's global thread store
    ThreadStore = 2,
}

impl DSType
{
    /// Every local type, in numeric order
    pub const ALL: [DSType; 3] = [DSType::Ptr, DSType::SOSBreakingChangeVersion, DSType::ThreadStore];

    /// Name matched against remote type names
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            DSType::Ptr => "Ptr",
            DSType::SOSBreakingChangeVersion => "SOSBreakingChangeVersion",
            DSType::ThreadStore => "ThreadStore",
        }
    }

    /// Layout version this reader understands
    #[must_use]
    pub const fn version(self) -> u16
    {
        match self {
            DSType::Ptr | DSType::SOSBreakingChangeVersion | DSType::ThreadStore => 1,
        }
    }

    /// Look up a local type by its exact name
    ///
    /// ```rust
    /// use dcr_core::DSType;
    ///
    /// assert_eq!(DSType::from_name("ThreadStore"), Some(DSType::ThreadStore));
    /// assert_eq!(DSType::from_name("threadstore"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self>
    {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }
}

impl fmt::Display for DSType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

impl FromStr for DSType
{
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        Self::from_name(s).ok_or_else(|| ReaderError::NotFound(format!("no local type named {s:?}")))
    }
}

impl TryFrom<u32> for DSType
{
    type Error = ReaderError;

    fn try_from(value: u32) -> Result<Self, Self::Error>
    {
        Self::ALL
            .into_iter()
            .find(|ty| *ty as u32 == value)
            .ok_or_else(|| ReaderError::NotFound(format!("no local type with id {value}")))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_names_round_trip()
    {
        for ty in DSType::ALL {
            assert_eq!(ty.name().parse::<DSType>().unwrap(), ty);
            assert_eq!(DSType::try_from(ty as u32).unwrap(), ty);
        }
    }

    #[test]
    fn test_unknown_id_is_not_found()
    {
        assert!(DSType::try_from(99_u32).unwrap_err().is_not_found());
    }
}
