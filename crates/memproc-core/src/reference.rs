//! Source Reference Resolver (spec.md §4.3).
//!
//! A reference string is either bare (legacy: assumed Point UUID),
//! `P:<uuid>`, or `GV:<name>`. This is the only module that knows the
//! prefixes; every block consumes a parsed [`SourceRef`].

use uuid::Uuid;

use crate::error::MemprocError;

/// A resolved, typed reference to either a Point or a Global Variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceRef {
    Point(Uuid),
    GlobalVariable(String),
}

impl SourceRef {
    pub fn is_point(&self) -> bool {
        matches!(self, Self::Point(_))
    }

    pub fn is_global_variable(&self) -> bool {
        matches!(self, Self::GlobalVariable(_))
    }

    /// Emits the canonical prefixed form, e.g. `P:<uuid>` or `GV:<name>`.
    pub fn format(&self) -> String {
        match self {
            Self::Point(id) => format!("P:{id}"),
            Self::GlobalVariable(name) => format!("GV:{name}"),
        }
    }

    /// Parses a reference string per spec.md §6.
    ///
    /// Bare strings (no `P:`/`GV:` prefix) are parsed as Point UUIDs for
    /// backward compatibility.
    pub fn parse(s: &str) -> Result<Self, MemprocError> {
        if let Some(rest) = s.strip_prefix("P:") {
            let id = Uuid::parse_str(rest)
                .map_err(|e| MemprocError::Configuration(format!("invalid point reference '{s}': {e}")))?;
            return Ok(Self::Point(id));
        }
        if let Some(rest) = s.strip_prefix("GV:") {
            if rest.is_empty() {
                return Err(MemprocError::Configuration(format!(
                    "empty global variable name in reference '{s}'"
                )));
            }
            return Ok(Self::GlobalVariable(rest.to_string()));
        }
        // Legacy bare form: assumed Point UUID.
        let id = Uuid::parse_str(s)
            .map_err(|e| MemprocError::Configuration(format!("invalid bare point reference '{s}': {e}")))?;
        Ok(Self::Point(id))
    }
}

/// Validates a Global Variable name: `[A-Za-z0-9_-]+`.
pub fn is_valid_global_variable_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_point() {
        let id = Uuid::new_v4();
        let r = SourceRef::parse(&format!("P:{id}")).unwrap();
        assert_eq!(r, SourceRef::Point(id));
        assert!(r.is_point());
    }

    #[test]
    fn parses_prefixed_global_variable() {
        let r = SourceRef::parse("GV:Tank_Level").unwrap();
        assert_eq!(r, SourceRef::GlobalVariable("Tank_Level".to_string()));
        assert!(r.is_global_variable());
    }

    #[test]
    fn parses_bare_as_point() {
        let id = Uuid::new_v4();
        let r = SourceRef::parse(&id.to_string()).unwrap();
        assert_eq!(r, SourceRef::Point(id));
    }

    #[test]
    fn formats_canonical_form() {
        let id = Uuid::new_v4();
        assert_eq!(SourceRef::Point(id).format(), format!("P:{id}"));
        assert_eq!(
            SourceRef::GlobalVariable("X".into()).format(),
            "GV:X".to_string()
        );
    }

    #[test]
    fn rejects_malformed_reference() {
        assert!(SourceRef::parse("not-a-uuid").is_err());
        assert!(SourceRef::parse("GV:").is_err());
    }

    #[test]
    fn validates_global_variable_names() {
        assert!(is_valid_global_variable_name("Tank-Level_2"));
        assert!(!is_valid_global_variable_name("bad name"));
        assert!(!is_valid_global_variable_name(""));
    }
}
