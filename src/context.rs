//! Layered render context and the context assembler.
//!
//! A [`Context`] is a stack of [`ValueMap`] layers. Lookups search from the
//! most recently pushed layer down, so per-render variables shadow values
//! injected by providers, and loop bindings shadow both for the duration of
//! an iteration.

use std::fmt;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::value::{Value, ValueMap};

/// Supplies values injected into every render.
pub trait ContextProvider: Send + Sync {
    fn provide(&self) -> anyhow::Result<ValueMap>;
}

impl<F> ContextProvider for F
where
    F: Fn() -> anyhow::Result<ValueMap> + Send + Sync,
{
    fn provide(&self) -> anyhow::Result<ValueMap> {
        self()
    }
}

/// A registered provider and the name used when reporting its failures.
#[derive(Clone)]
pub struct Provider {
    name: String,
    inner: Arc<dyn ContextProvider>,
}

impl Provider {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<ValueMap> + Send + Sync + 'static,
    {
        Self::from_provider(name, f)
    }

    pub fn from_provider(name: impl Into<String>, provider: impl ContextProvider + 'static) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(provider),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provide(&self) -> Result<ValueMap> {
        self.inner.provide().map_err(|e| {
            warn!("Context provider '{}' failed: {:#}", self.name, e);
            Error::Provider {
                name: self.name.clone(),
                message: format!("{e:#}"),
            }
        })
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    layers: Vec<ValueMap>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context with a single layer.
    pub fn from_map(map: ValueMap) -> Self {
        Self { layers: vec![map] }
    }

    pub fn push(&mut self, layer: ValueMap) {
        self.layers.push(layer);
    }

    pub fn pop(&mut self) -> Option<ValueMap> {
        self.layers.pop()
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Bind `name` in the innermost layer, creating one if the stack is empty.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        if self.layers.is_empty() {
            self.layers.push(ValueMap::new());
        }
        if let Some(layer) = self.layers.last_mut() {
            layer.insert(name.into(), value.into());
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.layers.iter().rev().find_map(|layer| layer.get(name))
    }

    /// Resolve `name`, yielding [`Value::Undefined`] when it is not bound.
    pub fn get(&self, name: &str) -> Value {
        self.lookup(name).cloned().unwrap_or_default()
    }
}

/// Assemble the context for one render: one layer per provider in
/// registration order, then the caller's variables on top.
pub fn build_context(providers: &[Provider], variables: ValueMap) -> Result<Context> {
    let mut context = Context::new();
    for provider in providers {
        let layer = provider.provide()?;
        trace!("Provider '{}' injected {} value(s)", provider.name(), layer.len());
        context.push(layer);
    }
    context.push(variables);
    Ok(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn lookup_searches_innermost_first() {
        let mut ctx = Context::from_map(map(&[("a", "outer"), ("b", "outer")]));
        ctx.push(map(&[("a", "inner")]));
        assert_eq!(ctx.get("a"), Value::from("inner"));
        assert_eq!(ctx.get("b"), Value::from("outer"));
        ctx.pop();
        assert_eq!(ctx.get("a"), Value::from("outer"));
        assert_eq!(ctx.get("missing"), Value::Undefined);
    }

    #[test]
    fn per_render_values_shadow_providers() {
        let providers = vec![
            Provider::new("site", || Ok(map(&[("title", "Site"), ("lang", "en")]))),
            Provider::new("override", || Ok(map(&[("lang", "fr")]))),
        ];
        let ctx = build_context(&providers, map(&[("title", "Page")])).unwrap();
        assert_eq!(ctx.depth(), 3);
        assert_eq!(ctx.get("title"), Value::from("Page"));
        assert_eq!(ctx.get("lang"), Value::from("fr"));
    }

    #[test]
    fn failing_provider_aborts() {
        let providers = vec![
            Provider::new("ok", || Ok(ValueMap::new())),
            Provider::new("db", || Err(anyhow::anyhow!("connection refused"))),
        ];
        let err = build_context(&providers, ValueMap::new()).unwrap_err();
        match err {
            Error::Provider { name, message } => {
                assert_eq!(name, "db");
                assert_eq!(message, "connection refused");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
