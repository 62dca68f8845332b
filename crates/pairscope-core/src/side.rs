//! Binary market outcome sides.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two complementary outcome tokens of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// The complementary side.
    #[inline]
    pub fn opposite(&self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }

    /// Uppercase wire/store representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
        }
    }

    /// Parse the store representation.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "YES" => Some(Self::Yes),
            "NO" => Some(Self::No),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_involution() {
        assert_eq!(Outcome::Yes.opposite(), Outcome::No);
        assert_eq!(Outcome::No.opposite().opposite(), Outcome::No);
    }

    #[test]
    fn test_round_trip() {
        for side in [Outcome::Yes, Outcome::No] {
            assert_eq!(Outcome::from_str_opt(side.as_str()), Some(side));
        }
        assert_eq!(Outcome::from_str_opt("MAYBE"), None);
    }
}
