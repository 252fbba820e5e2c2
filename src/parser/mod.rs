//! Line parser registry
//!
//! Every dump format gets a named parse function `(line, source) -> Record`.
//! The pipeline looks one up by name at startup and then calls it for each
//! line. Adding a format means registering another function; the pipeline
//! itself never changes.
//!
//! Parse functions are plain `fn` pointers: they cannot capture state and must
//! not do I/O. Source id resolution happens later, in the pipeline.

pub mod builtin;

use crate::error::{ConfigError, ParseError};
use crate::record::Record;
use std::collections::BTreeMap;

/// Signature of a line parser
pub type ParseFn = fn(line: &str, source: &str) -> Result<Record, ParseError>;

/// Name → parser mapping
#[derive(Debug, Clone, Default)]
pub struct ParserRegistry {
    parsers: BTreeMap<String, ParseFn>,
}

impl ParserRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in parsers
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    /// Register a parser, returning any parser it replaced
    pub fn register(&mut self, name: impl Into<String>, parser: ParseFn) -> Option<ParseFn> {
        self.parsers.insert(name.into(), parser)
    }

    /// Look up a parser by name
    pub fn get(&self, name: &str) -> Result<ParseFn, ParseError> {
        self.parsers
            .get(name)
            .copied()
            .ok_or_else(|| ParseError::UnknownParser(name.to_string()))
    }

    /// Look up a parser at the configuration boundary
    ///
    /// Same as [`get`](Self::get) but reports the available names, since an
    /// unknown parser is a configuration mistake.
    pub fn resolve(&self, name: &str) -> Result<ParseFn, ConfigError> {
        self.get(name).map_err(|_| ConfigError::UnknownParser {
            name: name.to_string(),
            available: self.names().join(", "),
        })
    }

    /// Parse a single line with the named parser
    pub fn parse(&self, name: &str, line: &str, source: &str) -> Result<Record, ParseError> {
        let parser = self.get(name)?;
        parser(line, source)
    }

    /// Registered parser names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.parsers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper_username(line: &str, source: &str) -> Result<Record, ParseError> {
        if line.is_empty() {
            return Err(ParseError::ColumnCount);
        }
        let mut record = Record::new(source);
        record.username = Some(line.to_uppercase());
        Ok(record)
    }

    #[test]
    fn test_unknown_parser_is_distinguished() {
        let registry = ParserRegistry::with_builtin();
        let err = registry.parse("does-not-exist", "a@b.c:x", "src").unwrap_err();
        assert_eq!(err, ParseError::UnknownParser("does-not-exist".into()));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_resolve_lists_available() {
        let registry = ParserRegistry::with_builtin();
        match registry.resolve("nope") {
            Err(ConfigError::UnknownParser { name, available }) => {
                assert_eq!(name, "nope");
                assert!(available.contains("email-password"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_register_custom_parser() {
        let mut registry = ParserRegistry::new();
        assert!(registry.register("upper", upper_username).is_none());

        let record = registry.parse("upper", "bob", "custom.txt").unwrap();
        assert_eq!(record.username.as_deref(), Some("BOB"));
        assert_eq!(record.source, "custom.txt");

        let err = registry.parse("upper", "", "custom.txt").unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_builtin_names() {
        let registry = ParserRegistry::with_builtin();
        let names = registry.names();
        for expected in ["adobe", "collections", "email-password", "example", "regex-email-password"] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }
}
