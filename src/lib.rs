//! shimmyblocks: minimal Jinja-like engine with block inheritance.
//!
//! Templates are parsed once when registered and rendered many times
//! against a layered context. A template may `extends` another; blocks
//! defined by the child replace the parent's blocks of the same name, and
//! the outermost child always wins, however long the chain.
//!
//! Supported subset:
//! - Literals, preserved byte-for-byte.
//! - `{{ expr }}` interpolation, HTML-escaped unless the value is safe.
//! - `{% if %}` / `{% elif %}` / `{% else %}` / `{% endif %}`.
//! - `{% for x in seq %}` ... `{% endfor %}` with `loop.index`,
//!   `loop.index0`, `loop.first`, `loop.last`, `loop.length`.
//! - `{% block name %}` ... `{% endblock %}`, `{% extends "id" %}`,
//!   `{% include "id" %}`, `{# comments #}`.
//! - Expressions: string/number/bool/none literals, lists, `a.b`, `a[k]`,
//!   `==`, `!=`, `+`, `and`, `or`, `not`, and the filters `safe`, `escape`,
//!   `upper`, `lower`, `trim`, `length`, `default(x)`.
//!
//! Not supported:
//! - User-defined functions, filters or macros.
//! - Calling the parent's version of a block (`super()`).
//! - Arbitrary code execution of any kind.
//!
//! Undefined names render as empty, but reading an attribute or index of an
//! undefined value is a [`Error::Type`]. Inheritance and include chains
//! deeper than the configured `max_depth` fail with [`Error::Cycle`].
//!
//! ```
//! use shimmyblocks::{Engine, ValueMap};
//!
//! let engine = Engine::new();
//! engine
//!     .register("base.html", "<title>{% block title %}Site{% endblock %}</title>")
//!     .unwrap();
//! engine
//!     .register(
//!         "page.html",
//!         "{% extends \"base.html\" %}{% block title %}{{ name }}{% endblock %}",
//!     )
//!     .unwrap();
//!
//! let mut vars = ValueMap::new();
//! vars.insert("name".into(), "Tom & Jerry".into());
//! let rendered = engine.render("page.html", vars).unwrap();
//! assert_eq!(rendered, "<title>Tom &amp; Jerry</title>");
//! ```

pub mod ast;
pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod value;

pub use config::EngineConfig;
pub use context::{build_context, Context, ContextProvider, Provider};
pub use environment::{render_str, Engine};
pub use error::{Error, Result, SyntaxError};
pub use eval::{escape_html, Evaluator};
pub use loader::TemplateLoader;
pub use registry::{Template, TemplateRegistry};
pub use resolver::{Resolve, ResolvedCache, ResolvedTemplate, Resolver};
pub use value::{Value, ValueMap};
