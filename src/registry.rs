//! Template registry: parsed templates addressable by identifier.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::ast::Node;
use crate::error::{Error, Result, SyntaxError};
use crate::parser::Parser;

/// A parsed template. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    source: String,
    nodes: Vec<Node>,
    parent: Option<String>,
}

impl Template {
    pub fn parse(
        name: impl Into<String>,
        source: impl Into<String>,
        trim_blocks: bool,
    ) -> std::result::Result<Self, SyntaxError> {
        let name = name.into();
        let source = source.into();
        let nodes = Parser::new(&source)
            .with_name(&name)
            .with_trim_blocks(trim_blocks)
            .parse()?;
        let parent = match nodes.first() {
            Some(Node::Extends(parent)) => Some(parent.clone()),
            _ => None,
        };
        Ok(Self {
            name,
            source,
            nodes,
            parent,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Identifier named by this template's `extends`, if any.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Every block defined anywhere in the template, outermost first.
    pub fn blocks(&self) -> Vec<(&str, &[Node])> {
        fn walk<'t>(nodes: &'t [Node], out: &mut Vec<(&'t str, &'t [Node])>) {
            for node in nodes {
                if let Node::Block { name, body } = node {
                    out.push((name.as_str(), body.as_slice()));
                }
                for child in node.children() {
                    walk(child, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.nodes, &mut out);
        out
    }
}

/// Resolve `./x` and `../x` against the directory of `base`. Other
/// identifiers are returned unchanged. `None` if the path climbs above the
/// root.
pub(crate) fn resolve_relative(base: Option<&str>, target: &str) -> Option<String> {
    if !(target.starts_with("./") || target.starts_with("../")) {
        return Some(target.to_string());
    }

    let dir = base
        .and_then(|b| b.rsplit_once('/'))
        .map(|(dir, _)| dir)
        .unwrap_or("");
    let mut segments: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

struct Entry {
    template: Arc<Template>,
    generation: u64,
}

/// Thread-safe map from identifier to parsed template.
///
/// Parsing happens before the write lock is taken, so readers never wait on
/// the parser and a failed parse leaves the registry untouched. Every
/// mutation stamps the affected entry with a fresh generation number, which
/// the resolver uses to detect stale cached chains.
#[derive(Default)]
pub struct TemplateRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    generation: AtomicU64,
    trim_blocks: bool,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trim_blocks(mut self, trim_blocks: bool) -> Self {
        self.trim_blocks = trim_blocks;
        self
    }

    /// Parse and store a template, replacing any previous entry with the same
    /// identifier.
    pub fn register(
        &self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> std::result::Result<(), SyntaxError> {
        let template = Template::parse(name, source, self.trim_blocks)?;
        self.insert(template);
        Ok(())
    }

    /// Store an already parsed template.
    pub fn insert(&self, template: Template) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let name = template.name().to_string();
        let replaced = self
            .entries
            .write()
            .insert(
                name.clone(),
                Entry {
                    template: Arc::new(template),
                    generation,
                },
            )
            .is_some();
        if replaced {
            debug!("Replaced template: {} (generation {})", name, generation);
        } else {
            debug!("Registered template: {} (generation {})", name, generation);
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Template>> {
        self.get_versioned(name).map(|(template, _)| template)
    }

    /// The template together with the generation it was stored at.
    pub fn get_versioned(&self, name: &str) -> Result<(Arc<Template>, u64)> {
        self.entries
            .read()
            .get(name)
            .map(|entry| (Arc::clone(&entry.template), entry.generation))
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn generation_of(&self, name: &str) -> Option<u64> {
        self.entries.read().get(name).map(|entry| entry.generation)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        let removed = self.entries.write().remove(name).is_some();
        if removed {
            self.generation.fetch_add(1, Ordering::SeqCst);
            debug!("Removed template: {}", name);
        }
        removed
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get() {
        let registry = TemplateRegistry::new();
        assert!(registry.is_empty());

        registry.register("base.html", "<p>{{ x }}</p>").unwrap();
        let template = registry.get("base.html").unwrap();
        assert_eq!(template.name(), "base.html");
        assert_eq!(template.source(), "<p>{{ x }}</p>");
        assert_eq!(template.parent(), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_template_is_not_found() {
        let registry = TemplateRegistry::new();
        assert!(matches!(registry.get("nope"), Err(Error::NotFound(name)) if name == "nope"));
    }

    #[test]
    fn failed_reparse_keeps_previous_entry() {
        let registry = TemplateRegistry::new();
        registry.register("page", "old").unwrap();
        let before = registry.generation_of("page");

        assert!(registry.register("page", "{% if %}").is_err());
        assert_eq!(registry.get("page").unwrap().source(), "old");
        assert_eq!(registry.generation_of("page"), before);
    }

    #[test]
    fn reregister_bumps_generation() {
        let registry = TemplateRegistry::new();
        registry.register("page", "v1").unwrap();
        let first = registry.generation_of("page").unwrap();
        registry.register("page", "v2").unwrap();
        assert!(registry.generation_of("page").unwrap() > first);
        assert_eq!(registry.get("page").unwrap().source(), "v2");
    }

    #[test]
    fn child_may_be_registered_before_parent() {
        let registry = TemplateRegistry::new();
        registry
            .register("child", "{% extends \"base\" %}{% block a %}{% endblock %}")
            .unwrap();
        assert_eq!(registry.get("child").unwrap().parent(), Some("base"));
        assert!(!registry.contains("base"));
    }

    #[test]
    fn blocks_are_collected_at_any_depth() {
        let template = Template::parse(
            "t",
            "{% block a %}{% if x %}{% block b %}{% endblock %}{% endif %}{% endblock %}",
            false,
        )
        .unwrap();
        let names: Vec<&str> = template.blocks().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn relative_paths() {
        assert_eq!(resolve_relative(Some("a/b/c.html"), "./d.html").as_deref(), Some("a/b/d.html"));
        assert_eq!(resolve_relative(Some("a/b/c.html"), "../d.html").as_deref(), Some("a/d.html"));
        assert_eq!(resolve_relative(Some("c.html"), "./d.html").as_deref(), Some("d.html"));
        assert_eq!(resolve_relative(Some("a/c.html"), "base.html").as_deref(), Some("base.html"));
        assert_eq!(resolve_relative(Some("c.html"), "../d.html"), None);
        assert_eq!(resolve_relative(None, "./d.html").as_deref(), Some("d.html"));
    }
}
