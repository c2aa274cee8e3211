//! Loading template files from a directory tree.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::registry::TemplateRegistry;

/// Template loader.
pub struct TemplateLoader {
    root: PathBuf,
    extensions: Vec<String>,
}

impl TemplateLoader {
    /// Create a loader for `root` using the default extensions.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: EngineConfig::default().extensions,
        }
    }

    pub fn extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Register every matching file under the root. Each template is named by
    /// its root-relative path with `/` separators. Files that cannot be read
    /// as UTF-8 or fail to parse are logged and skipped.
    pub fn load_into(&self, registry: &TemplateRegistry) -> Result<usize> {
        if !self.root.exists() {
            warn!("Templates directory does not exist: {:?}", self.root);
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file() || !self.is_template(path) {
                continue;
            }
            let Some(name) = self.template_name(path) else {
                warn!("Skipping non UTF-8 template path: {:?}", path);
                continue;
            };

            debug!("Loading template {} from {:?}", name, path);
            let source = match fs::read_to_string(path) {
                Ok(source) => source,
                Err(e) => {
                    warn!("Failed to read template {} from {:?}: {}", name, path, e);
                    continue;
                }
            };
            match registry.register(name.clone(), source) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Failed to load template {}: {}", name, e),
            }
        }

        info!("Loaded {} template(s) from {:?}", loaded, self.root);
        Ok(loaded)
    }

    fn is_template(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    fn template_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
        Some(parts?.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_loader_missing_dir() {
        let temp = tempdir().unwrap();
        let registry = TemplateRegistry::new();
        let loaded = TemplateLoader::new(temp.path().join("nope"))
            .load_into(&registry)
            .unwrap();
        assert_eq!(loaded, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_loader_names_by_relative_path() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("layouts")).unwrap();
        fs::write(temp.path().join("layouts/base.html"), "{% block body %}{% endblock %}").unwrap();
        fs::write(temp.path().join("index.html"), "{% extends \"./layouts/base.html\" %}").unwrap();
        fs::write(temp.path().join("notes.md"), "ignored").unwrap();
        fs::write(temp.path().join("broken.html"), "{% if x %}").unwrap();

        let registry = TemplateRegistry::new();
        let loaded = TemplateLoader::new(temp.path()).load_into(&registry).unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(registry.names(), vec!["index.html", "layouts/base.html"]);
        assert_eq!(
            registry.get("index.html").unwrap().parent(),
            Some("layouts/base.html")
        );
    }

    #[test]
    fn test_loader_skips_unreadable_files() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.html"), "a").unwrap();
        fs::write(temp.path().join("b.txt"), [0xFF, 0xFE, 0x00]).unwrap();
        fs::write(temp.path().join("c.html"), "c").unwrap();

        let registry = TemplateRegistry::new();
        let loaded = TemplateLoader::new(temp.path()).load_into(&registry).unwrap();

        assert_eq!(loaded, 2);
        assert_eq!(registry.names(), vec!["a.html", "c.html"]);
    }
}
