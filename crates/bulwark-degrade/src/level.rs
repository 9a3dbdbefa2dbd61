//! Degradation levels

use serde::{Deserialize, Serialize};
use std::fmt;

/// System-wide degradation, totally ordered from `None` to `Critical`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum DegradationLevel {
    /// Fully operational
    #[default]
    None = 0,
    /// Cosmetic reductions
    Minimal = 1,
    /// Optional features off
    Moderate = 2,
    /// Only core features
    Severe = 3,
    /// Emergency mode
    Critical = 4,
}

impl DegradationLevel {
    /// All levels in ascending order
    pub const ALL: [Self; 5] = [
        Self::None,
        Self::Minimal,
        Self::Moderate,
        Self::Severe,
        Self::Critical,
    ];

    /// Numeric value
    #[inline]
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "NONE",
            Self::Minimal => "MINIMAL",
            Self::Moderate => "MODERATE",
            Self::Severe => "SEVERE",
            Self::Critical => "CRITICAL",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_matches_values() {
        for pair in DegradationLevel::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].as_u8() + 1, pair[1].as_u8());
        }
    }

    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_string(&DegradationLevel::Moderate).unwrap(),
            r#""MODERATE""#
        );
        assert_eq!(DegradationLevel::Critical.to_string(), "CRITICAL");
    }
}
