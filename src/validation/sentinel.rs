//! The closed set of formula error values

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A spreadsheet formula error state.
///
/// Internally always this enum; the literal strings only appear at the
/// workbook and JSON boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorSentinel {
    #[serde(rename = "#DIV/0!")]
    DivZero,
    #[serde(rename = "#REF!")]
    Ref,
    #[serde(rename = "#VALUE!")]
    Value,
    #[serde(rename = "#NAME?")]
    Name,
    #[serde(rename = "#NULL!")]
    Null,
    #[serde(rename = "#NUM!")]
    Num,
    #[serde(rename = "#N/A")]
    NotAvailable,
}

impl ErrorSentinel {
    pub const ALL: [ErrorSentinel; 7] = [
        ErrorSentinel::DivZero,
        ErrorSentinel::Ref,
        ErrorSentinel::Value,
        ErrorSentinel::Name,
        ErrorSentinel::Null,
        ErrorSentinel::Num,
        ErrorSentinel::NotAvailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSentinel::DivZero => "#DIV/0!",
            ErrorSentinel::Ref => "#REF!",
            ErrorSentinel::Value => "#VALUE!",
            ErrorSentinel::Name => "#NAME?",
            ErrorSentinel::Null => "#NULL!",
            ErrorSentinel::Num => "#NUM!",
            ErrorSentinel::NotAvailable => "#N/A",
        }
    }

    /// Exact, byte-for-byte match against a cached display value
    pub fn from_literal(text: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == text)
    }
}

impl fmt::Display for ErrorSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorSentinel {
    type Err = String;

    /// Accepts the literal (`#DIV/0!`) and, for CLI convenience, the bare
    /// name in any case (`div/0`, `ref`, `n/a`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(sentinel) = Self::from_literal(trimmed) {
            return Ok(sentinel);
        }
        let bare = trimmed
            .trim_start_matches('#')
            .trim_end_matches(['!', '?'])
            .to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|s| {
                s.as_str()
                    .trim_start_matches('#')
                    .trim_end_matches(['!', '?'])
                    == bare
            })
            .ok_or_else(|| format!("Unknown error type: {}", s))
    }
}
