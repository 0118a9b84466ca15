//! Schema Description Parser
//!
//! Two surface syntaxes produce the same [`Schema`]:
//! - the `.bridge` text format (see [`parse_schema`])
//! - JSON, via serde (see [`parse_schema_json`])
//!
//! Parsing only checks syntax. Name resolution, recursion and index rules
//! are enforced by [`crate::registry::Registry::new`].

mod idl;

pub use idl::parse_schema;

use std::path::Path;

use thiserror::Error;

use crate::types::Schema;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unexpected token {found} at line {line}, expected {expected}")]
    UnexpectedToken {
        found: String,
        expected: String,
        line: usize,
    },
    #[error("Unexpected end of input, expected {0}")]
    UnexpectedEof(String),
    #[error("Invalid character {ch:?} at line {line}")]
    InvalidChar { ch: char, line: usize },
    #[error("Invalid number {0}")]
    InvalidNumber(String),
    #[error("Missing schema version declaration")]
    MissingVersion,
    #[error("Invalid JSON schema: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Parse a schema given as JSON.
pub fn parse_schema_json(src: &str) -> Result<Schema, ParseError> {
    Ok(serde_json::from_str(src)?)
}

/// Load a schema from disk; `.json` files are JSON, everything else is text.
pub fn load_schema(path: impl AsRef<Path>) -> Result<Schema, ParseError> {
    let path = path.as_ref();
    let src = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_schema_json(&src),
        _ => parse_schema(&src),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_and_text_agree() {
        let text = parse_schema(
            r#"
            schema math version 1 {
                add: func(a: s32, b: s32) -> s32
            }
            "#,
        )
        .expect("text");
        let json = serde_json::to_string(&text).expect("serialize");
        let from_json = parse_schema_json(&json).expect("json");
        assert_eq!(from_json, text);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load_schema("/nonexistent/api.bridge").unwrap_err();
        assert!(matches!(err, ParseError::Io { .. }));
    }
}
