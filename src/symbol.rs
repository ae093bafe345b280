// =============================================================================
// Symbol — validated, upper-cased instrument identifier
// =============================================================================

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Maximum byte length of a symbol, per the wire contract.
const MAX_LEN: usize = 16;

/// An opaque, uppercase market-instrument identifier.
///
/// Valid bytes are ASCII alphanumerics plus `.` and `-`; length is 1..=16.
/// Construction always upper-cases the input, so `Symbol::parse("aapl")`
/// and `Symbol::parse("AAPL")` produce equal values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(String);

impl Symbol {
    /// Validate and normalize a raw symbol string.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_LEN {
            anyhow::bail!("symbol must be 1..={} bytes, got {:?}", MAX_LEN, raw);
        }
        if !trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-')
        {
            anyhow::bail!("symbol contains invalid characters: {:?}", raw);
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Symbol::parse(value)
    }
}

impl TryFrom<String> for Symbol {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::parse(&value)
    }
}

impl Serialize for Symbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Symbol::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case() {
        assert_eq!(Symbol::parse("aapl").unwrap(), Symbol::parse("AAPL").unwrap());
    }

    #[test]
    fn accepts_dots_and_dashes() {
        assert!(Symbol::parse("BRK.B").is_ok());
        assert!(Symbol::parse("ABC-D").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("   ").is_err());
    }

    #[test]
    fn rejects_too_long() {
        assert!(Symbol::parse("ABCDEFGHIJKLMNOPQ").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(Symbol::parse("AAP!").is_err());
        assert!(Symbol::parse("AA PL").is_err());
    }

    #[test]
    fn display_round_trips_uppercase() {
        let s = Symbol::parse("msft").unwrap();
        assert_eq!(format!("{s}"), "MSFT");
    }
}
