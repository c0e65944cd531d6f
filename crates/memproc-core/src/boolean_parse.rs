//! Boolean parsing shared by the Totalizer and Comparison blocks
//! (spec.md §6): case-insensitive `1/0`, `true/false`, `on/off`, `high/low`.

use crate::error::MemprocError;

/// Parses a raw stored value string as a boolean per the fixed vocabulary.
/// Anything else is a `Parse` error — the caller should skip the sample.
pub fn parse_bool(raw: &str) -> Result<bool, MemprocError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "high" => Ok(true),
        "0" | "false" | "off" | "low" => Ok(false),
        other => Err(MemprocError::Parse(format!(
            "'{other}' is not a recognized boolean value"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_all_vocabulary_forms() {
        for s in ["1", "true", "TRUE", "on", "ON", "high", "High"] {
            assert_eq!(parse_bool(s).unwrap(), true, "{s}");
        }
        for s in ["0", "false", "FALSE", "off", "OFF", "low", "Low"] {
            assert_eq!(parse_bool(s).unwrap(), false, "{s}");
        }
    }

    #[test]
    fn rejects_unrecognized_values() {
        assert!(parse_bool("yes").is_err());
        assert!(parse_bool("").is_err());
        assert!(parse_bool("2").is_err());
    }
}
