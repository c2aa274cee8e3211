//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default upper bound for inheritance chains and include nesting.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest allowed `extends` chain and deepest `include` nesting
    pub max_depth: usize,
    /// HTML-escape interpolated values that are not marked safe
    pub autoescape: bool,
    /// Drop the first newline following a `%}`
    pub trim_blocks: bool,
    /// Cache resolved inheritance chains per leaf template
    pub cache_resolved: bool,
    /// File extensions picked up by the directory loader
    pub extensions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            autoescape: true,
            trim_blocks: false,
            cache_resolved: true,
            extensions: ["html", "htm", "txt", "jinja", "j2"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Load a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn autoescape(mut self, enabled: bool) -> Self {
        self.autoescape = enabled;
        self
    }

    pub fn trim_blocks(mut self, enabled: bool) -> Self {
        self.trim_blocks = enabled;
        self
    }

    pub fn cache_resolved(mut self, enabled: bool) -> Self {
        self.cache_resolved = enabled;
        self
    }

    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }
}
