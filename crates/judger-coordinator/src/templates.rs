// Copyright (C) 2025 The hpcgame-judger Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment manifest templates (namespace, RBAC, quotas, ...).
//!
//! Templates are loaded once at startup from a directory: regular files
//! ending in `.yaml` or `.yml`, in file-name order. Each is rendered with
//! `namespace` and `variables` in its context.

use std::path::{Path, PathBuf};

use minijinja::{Environment, context};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Errors loading or rendering templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Reading the template directory or a file failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A template does not parse.
    #[error("Template {name} is invalid: {source}")]
    Syntax {
        name: String,
        #[source]
        source: minijinja::Error,
    },

    /// Rendering a template failed.
    #[error("Failed to render template {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

/// An ordered set of environment manifest templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: Vec<(String, String)>,
}

impl TemplateSet {
    /// Load every `.yaml`/`.yml` file directly inside `dir`.
    pub fn load_dir(dir: &Path) -> Result<Self, TemplateError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| TemplateError::Io { path, source }
        };

        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err(dir))? {
            let entry = entry.map_err(io_err(dir))?;
            let path = entry.path();
            if !entry.file_type().map_err(io_err(&path))?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".yaml") || name.ends_with(".yml") {
                names.push(name);
            }
        }
        names.sort();

        let mut sources = Vec::with_capacity(names.len());
        for name in names {
            let path = dir.join(&name);
            let source = std::fs::read_to_string(&path).map_err(io_err(&path))?;
            sources.push((name, source));
        }

        let set = Self::from_sources(sources)?;
        debug!(dir = %dir.display(), count = set.len(), "Loaded environment templates");
        Ok(set)
    }

    /// Build a set from `(name, source)` pairs, kept in the given order.
    pub fn from_sources(sources: Vec<(String, String)>) -> Result<Self, TemplateError> {
        let env = Environment::new();
        for (name, source) in &sources {
            env.template_from_str(source)
                .map_err(|source| TemplateError::Syntax {
                    name: name.clone(),
                    source,
                })?;
        }
        Ok(Self { templates: sources })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Template names in submission order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|(name, _)| name.as_str())
    }

    /// Render every template for `namespace`, in order.
    pub fn render_all(
        &self,
        namespace: &str,
        variables: &Map<String, Value>,
    ) -> Result<Vec<(String, String)>, TemplateError> {
        let env = Environment::new();
        let ctx = context! { namespace => namespace, variables => variables };

        self.templates
            .iter()
            .map(|(name, source)| {
                env.render_str(source, &ctx)
                    .map(|rendered| (name.clone(), rendered))
                    .map_err(|source| TemplateError::Render {
                        name: name.clone(),
                        source,
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_dir_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("20-binding.yml"), "kind: ClusterRoleBinding").unwrap();
        std::fs::write(dir.path().join("10-namespace.yaml"), "kind: Namespace").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();
        std::fs::create_dir(dir.path().join("nested.yaml")).unwrap();

        let set = TemplateSet::load_dir(dir.path()).unwrap();
        assert_eq!(
            set.names().collect::<Vec<_>>(),
            vec!["10-namespace.yaml", "20-binding.yml"]
        );
    }

    #[test]
    fn test_missing_dir() {
        let err = TemplateSet::load_dir(Path::new("/nonexistent/templates")).unwrap_err();
        assert!(matches!(err, TemplateError::Io { .. }));
    }

    #[test]
    fn test_syntax_error_names_template() {
        let err = TemplateSet::from_sources(vec![(
            "broken.yaml".to_string(),
            "name: {{ namespace".to_string(),
        )])
        .unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_render_namespace_and_variables() {
        let set = TemplateSet::from_sources(vec![(
            "ns.yaml".to_string(),
            "metadata:\n  name: {{ namespace }}\n  labels:\n    cpu: \"{{ variables.cpu }}\"\n"
                .to_string(),
        )])
        .unwrap();

        let vars = json!({"cpu": "4"}).as_object().cloned().unwrap();
        let rendered = set.render_all("j-t1", &vars).unwrap();
        assert_eq!(rendered.len(), 1);
        assert!(rendered[0].1.contains("name: j-t1"));
        assert!(rendered[0].1.contains("cpu: \"4\""));
    }
}
