//! Error types for parsing, resolving and rendering templates.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Malformed template source, annotated with the offending position.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("syntax error at {line}:{column}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template chain too deep or cyclic: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("type error: {0}")]
    Type(String),

    #[error("context provider '{name}' failed: {message}")]
    Provider { name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Error::Type(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_lists_chain() {
        let err = Error::Cycle {
            chain: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "template chain too deep or cyclic: a -> b -> a"
        );
    }

    #[test]
    fn syntax_error_displays_position() {
        let err: Error = SyntaxError::new("unexpected endif", 3, 7).into();
        assert_eq!(err.to_string(), "syntax error at 3:7: unexpected endif");
    }
}
