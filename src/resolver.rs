//! Inheritance resolution: flattening an `extends` chain into one node
//! sequence.
//!
//! The chain is followed leaf → root through the registry. Walking it back
//! root → leaf, every block a template defines (at any depth) overwrites the
//! winning body for its name, so the outermost child always wins. The root's
//! nodes then become the skeleton, with each block replaced by its winner.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::ast::Node;
use crate::error::{Error, Result};
use crate::registry::{Template, TemplateRegistry};

/// The flattened node sequence for one leaf template.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTemplate {
    name: String,
    /// (identifier, registry generation) from root to leaf
    chain: Vec<(String, u64)>,
    nodes: Vec<Node>,
}

impl ResolvedTemplate {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Identifiers of the chain, root first.
    pub fn chain(&self) -> impl Iterator<Item = &str> {
        self.chain.iter().map(|(name, _)| name.as_str())
    }
}

/// Anything that can hand out resolved templates by identifier.
pub trait Resolve {
    fn resolve_template(&self, name: &str) -> Result<Arc<ResolvedTemplate>>;
}

pub struct Resolver<'r> {
    registry: &'r TemplateRegistry,
    max_depth: usize,
}

impl<'r> Resolver<'r> {
    pub fn new(registry: &'r TemplateRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    pub fn resolve(&self, leaf: &str) -> Result<ResolvedTemplate> {
        let chain = self.load_chain(leaf)?;

        let mut winners: HashMap<&str, &[Node]> = HashMap::new();
        for (template, _) in &chain {
            for (name, body) in template.blocks() {
                winners.insert(name, body);
            }
        }

        let root = &chain[0].0;
        let nodes = substitute(root.nodes(), &winners, &mut Vec::new());
        trace!(
            "Resolved {} through {} template(s) rooted at {}",
            leaf,
            chain.len(),
            root.name()
        );

        Ok(ResolvedTemplate {
            name: leaf.to_string(),
            chain: chain
                .iter()
                .map(|(template, generation)| (template.name().to_string(), *generation))
                .collect(),
            nodes,
        })
    }

    /// True while no template in the chain has been replaced or removed.
    pub fn is_current(&self, resolved: &ResolvedTemplate) -> bool {
        resolved
            .chain
            .iter()
            .all(|(name, generation)| self.registry.generation_of(name) == Some(*generation))
    }

    /// Templates from root to leaf.
    fn load_chain(&self, leaf: &str) -> Result<Vec<(Arc<Template>, u64)>> {
        let mut chain = Vec::new();
        let mut visited: Vec<String> = Vec::new();
        let mut current = leaf.to_string();

        loop {
            if visited.contains(&current) || visited.len() >= self.max_depth {
                visited.push(current);
                return Err(Error::Cycle { chain: visited });
            }
            let (template, generation) = self.registry.get_versioned(&current)?;
            let parent = template.parent().map(str::to_string);
            visited.push(current);
            chain.push((template, generation));
            match parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        chain.reverse();
        Ok(chain)
    }
}

/// Replace every block in `nodes` with its winning body. A block nested in
/// its own winning body keeps its own content instead of expanding again.
fn substitute(nodes: &[Node], winners: &HashMap<&str, &[Node]>, expanding: &mut Vec<String>) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let node = match node {
            Node::Block { name, body } => {
                let source = if expanding.contains(name) {
                    body.as_slice()
                } else {
                    winners.get(name.as_str()).copied().unwrap_or(body.as_slice())
                };
                expanding.push(name.clone());
                let body = substitute(source, winners, expanding);
                expanding.pop();
                Node::Block {
                    name: name.clone(),
                    body,
                }
            }
            Node::If { cases, else_body } => {
                let mut resolved = Vec::with_capacity(cases.len());
                for (condition, body) in cases {
                    resolved.push((condition.clone(), substitute(body, winners, expanding)));
                }
                let else_body = match else_body {
                    Some(body) => Some(substitute(body, winners, expanding)),
                    None => None,
                };
                Node::If {
                    cases: resolved,
                    else_body,
                }
            }
            Node::For {
                target,
                iterable,
                body,
            } => Node::For {
                target: target.clone(),
                iterable: iterable.clone(),
                body: substitute(body, winners, expanding),
            },
            other => other.clone(),
        };
        out.push(node);
    }
    out
}

/// Resolved templates keyed by leaf identifier, revalidated against the
/// registry generations on every lookup.
#[derive(Default)]
pub struct ResolvedCache {
    entries: Mutex<HashMap<String, Arc<ResolvedTemplate>>>,
}

impl ResolvedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_resolve(&self, resolver: &Resolver<'_>, name: &str) -> Result<Arc<ResolvedTemplate>> {
        let cached = self.entries.lock().get(name).cloned();
        if let Some(hit) = cached {
            if resolver.is_current(&hit) {
                trace!("Resolved cache hit: {}", name);
                return Ok(hit);
            }
            debug!("Invalidating stale resolved chain for {}", name);
        }

        let resolved = Arc::new(resolver.resolve(name)?);
        self.entries
            .lock()
            .insert(name.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(templates: &[(&str, &str)]) -> TemplateRegistry {
        let registry = TemplateRegistry::new();
        for (name, source) in templates {
            registry.register(*name, *source).unwrap();
        }
        registry
    }

    fn block_text(nodes: &[Node], block: &str) -> String {
        for node in nodes {
            if let Node::Block { name, body } = node {
                if name == block {
                    return body
                        .iter()
                        .map(|n| match n {
                            Node::Text(t) => t.clone(),
                            _ => String::new(),
                        })
                        .collect();
                }
            }
        }
        panic!("block {block} not found");
    }

    #[test]
    fn child_block_replaces_parent_block() {
        let registry = registry(&[
            ("base", "<{% block content %}X{% endblock %}>"),
            ("child", "{% extends \"base\" %}{% block content %}Y{% endblock %}"),
        ]);
        let resolved = Resolver::new(&registry, 64).resolve("child").unwrap();
        assert_eq!(resolved.nodes().len(), 3);
        assert_eq!(block_text(resolved.nodes(), "content"), "Y");
        assert_eq!(resolved.chain().collect::<Vec<_>>(), vec!["base", "child"]);
    }

    #[test]
    fn child_content_outside_blocks_is_dropped() {
        let registry = registry(&[
            ("base", "{% block a %}{% endblock %}"),
            ("child", "{% extends \"base\" %}ignored{% block a %}kept{% endblock %}"),
        ]);
        let resolved = Resolver::new(&registry, 64).resolve("child").unwrap();
        assert_eq!(resolved.nodes().len(), 1);
        assert_eq!(block_text(resolved.nodes(), "a"), "kept");
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let registry = registry(&[("loop", "{% extends \"loop\" %}")]);
        match Resolver::new(&registry, 64).resolve("loop") {
            Err(Error::Cycle { chain }) => assert_eq!(chain, vec!["loop", "loop"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn two_template_cycle() {
        let registry = registry(&[("a", "{% extends \"b\" %}"), ("b", "{% extends \"a\" %}")]);
        assert!(matches!(
            Resolver::new(&registry, 64).resolve("a"),
            Err(Error::Cycle { .. })
        ));
    }

    #[test]
    fn chain_longer_than_max_depth_fails() {
        let registry = registry(&[
            ("root", "r"),
            ("one", "{% extends \"root\" %}"),
            ("two", "{% extends \"one\" %}"),
        ]);
        assert!(Resolver::new(&registry, 3).resolve("two").is_ok());
        assert!(matches!(
            Resolver::new(&registry, 2).resolve("two"),
            Err(Error::Cycle { .. })
        ));
    }

    #[test]
    fn missing_ancestor_is_not_found() {
        let registry = registry(&[("child", "{% extends \"missing\" %}")]);
        assert!(matches!(
            Resolver::new(&registry, 64).resolve("child"),
            Err(Error::NotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn block_nested_in_its_own_override_does_not_recurse() {
        let registry = registry(&[
            ("base", "{% block a %}base{% endblock %}"),
            (
                "child",
                "{% extends \"base\" %}{% block outer %}{% block a %}inner{% endblock %}{% endblock %}",
            ),
        ]);
        let resolved = Resolver::new(&registry, 64).resolve("child").unwrap();
        assert_eq!(block_text(resolved.nodes(), "a"), "inner");
    }

    #[test]
    fn cache_is_invalidated_by_reregistration() {
        let registry = registry(&[
            ("base", "{% block a %}one{% endblock %}"),
            ("leaf", "{% extends \"base\" %}"),
        ]);
        let cache = ResolvedCache::new();
        let resolver = Resolver::new(&registry, 64);

        let first = cache.get_or_resolve(&resolver, "leaf").unwrap();
        let again = cache.get_or_resolve(&resolver, "leaf").unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        registry
            .register("base", "{% block a %}two{% endblock %}")
            .unwrap();
        let fresh = cache.get_or_resolve(&resolver, "leaf").unwrap();
        assert!(!Arc::ptr_eq(&first, &fresh));
        assert_eq!(block_text(fresh.nodes(), "a"), "two");
        assert_eq!(cache.len(), 1);
    }
}
