//! The engine: registration and render entry points.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::config::EngineConfig;
use crate::context::{build_context, Provider};
use crate::error::{Error, Result, SyntaxError};
use crate::eval::Evaluator;
use crate::loader::TemplateLoader;
use crate::registry::{Template, TemplateRegistry};
use crate::resolver::{Resolve, ResolvedCache, ResolvedTemplate, Resolver};
use crate::value::{Value, ValueMap};

/// Holds templates, context providers and configuration.
///
/// All methods take `&self`; an `Engine` can be shared across threads (for
/// example behind an `Arc`) and rendered from concurrently while templates
/// are being registered.
pub struct Engine {
    config: EngineConfig,
    registry: TemplateRegistry,
    cache: ResolvedCache,
    providers: RwLock<Vec<Provider>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            registry: TemplateRegistry::new().with_trim_blocks(config.trim_blocks),
            cache: ResolvedCache::new(),
            providers: RwLock::new(Vec::new()),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Parse `source` and store it under `name`, replacing any previous
    /// template of that name. On a syntax error nothing changes.
    pub fn register(
        &self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> std::result::Result<(), SyntaxError> {
        self.registry.register(name, source)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.registry.remove(name)
    }

    /// Register every template found under `dir`. Returns how many loaded.
    pub fn load_dir(&self, dir: impl AsRef<Path>) -> Result<usize> {
        TemplateLoader::new(dir.as_ref())
            .extensions(self.config.extensions.clone())
            .load_into(&self.registry)
    }

    /// Add a provider whose values are injected into every render. Providers
    /// run in registration order; later ones shadow earlier ones and the
    /// per-render variables shadow them all.
    pub fn add_context_provider<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn() -> anyhow::Result<ValueMap> + Send + Sync + 'static,
    {
        let provider = Provider::new(name, f);
        debug!("Adding context provider: {}", provider.name());
        self.providers.write().push(provider);
    }

    /// Inject one constant value into every render.
    pub fn add_global(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let mut layer = ValueMap::new();
        layer.insert(name.clone(), value.into());
        self.add_context_provider(format!("global:{name}"), move || Ok(layer.clone()));
    }

    /// The flattened inheritance chain for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<ResolvedTemplate>> {
        let resolver = Resolver::new(&self.registry, self.config.max_depth);
        if self.config.cache_resolved {
            self.cache.get_or_resolve(&resolver, name)
        } else {
            resolver.resolve(name).map(Arc::new)
        }
    }

    pub fn render(&self, name: &str, variables: ValueMap) -> Result<String> {
        let template = self.resolve(name)?;
        let providers = self.providers.read().clone();
        let mut context = build_context(&providers, variables)?;
        debug!("Rendering {}", name);
        Evaluator::new(self, &self.config).render(&template, &mut context)
    }

    /// Render with variables taken from a serializable struct or map.
    pub fn render_serialize<S: Serialize + ?Sized>(&self, name: &str, variables: &S) -> Result<String> {
        match Value::from_serialize(variables)? {
            Value::Map(map) => self.render(name, map),
            Value::None => self.render(name, ValueMap::new()),
            other => Err(Error::type_error(format!(
                "render variables must serialize to a mapping, got {}",
                other.kind()
            ))),
        }
    }
}

impl Resolve for Engine {
    fn resolve_template(&self, name: &str) -> Result<Arc<ResolvedTemplate>> {
        self.resolve(name)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("providers", &*self.providers.read())
            .finish()
    }
}

/// Render a standalone template string with default settings.
pub fn render_str(source: &str, variables: ValueMap) -> Result<String> {
    let engine = Engine::new();
    engine.registry.insert(Template::parse("<string>", source, false)?);
    engine.render("<string>", variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_registered_template() {
        let engine = Engine::new();
        engine.register("hello", "Hello {{ name }}!").unwrap();
        let mut vars = ValueMap::new();
        vars.insert("name".into(), "John".into());
        assert_eq!(engine.render("hello", vars).unwrap(), "Hello John!");
    }

    #[test]
    fn unknown_template_is_not_found() {
        let engine = Engine::new();
        assert!(matches!(
            engine.render("nope", ValueMap::new()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn globals_are_shadowed_by_variables() {
        let engine = Engine::new();
        engine.add_global("site", "Example");
        engine.add_global("title", "Default");
        engine.register("t", "{{ site }}/{{ title }}").unwrap();

        let mut vars = ValueMap::new();
        vars.insert("title".into(), "Home".into());
        assert_eq!(engine.render("t", vars).unwrap(), "Example/Home");
    }

    #[test]
    fn render_serialize_requires_a_mapping() {
        #[derive(Serialize)]
        struct Page<'a> {
            title: &'a str,
        }
        let engine = Engine::new();
        engine.register("t", "<h1>{{ title }}</h1>").unwrap();
        assert_eq!(
            engine.render_serialize("t", &Page { title: "A & B" }).unwrap(),
            "<h1>A &amp; B</h1>"
        );
        assert!(matches!(
            engine.render_serialize("t", &vec![1, 2]),
            Err(Error::Type(_))
        ));
    }

    #[test]
    fn uncached_engine_still_sees_updates() {
        let engine = Engine::with_config(EngineConfig::default().cache_resolved(false));
        engine.register("t", "one").unwrap();
        assert_eq!(engine.render("t", ValueMap::new()).unwrap(), "one");
        engine.register("t", "two").unwrap();
        assert_eq!(engine.render("t", ValueMap::new()).unwrap(), "two");
    }

    #[test]
    fn render_str_one_shot() {
        assert_eq!(render_str("{{ 'a' }}b", ValueMap::new()).unwrap(), "ab");
        assert!(matches!(render_str("{% if %}", ValueMap::new()), Err(Error::Syntax(_))));
    }
}
