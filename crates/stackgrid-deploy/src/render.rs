//! Manifest rendering.
//!
//! Templates are Jinja YAML files addressed by their path relative to the
//! template directory (`base/network.yaml`, `auth.yaml`, ...). Variables that
//! are not supplied are errors, so a typo in a template fails the deploy
//! instead of rendering an empty field.

use std::collections::BTreeMap;
use std::path::Path;

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;
use tracing::debug;

use crate::error::{DeployError, DeployResult};

/// Turns template names plus values into one multi-document YAML text.
pub trait ManifestRenderer: Send + Sync {
    fn render(&self, templates: &[&str], values: &Value) -> DeployResult<String>;
}

/// Template sources held in memory.
pub struct TemplateSet {
    env: Environment<'static>,
    sources: BTreeMap<String, String>,
}

impl TemplateSet {
    pub fn from_sources<I, N, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self {
            env,
            sources: sources
                .into_iter()
                .map(|(n, s)| (n.into(), s.into()))
                .collect(),
        }
    }

    /// Load every `*.yaml` file below `dir`, named by its relative path.
    pub fn from_dir(dir: &Path) -> DeployResult<Self> {
        let read_err = |path: &Path, e: std::io::Error| DeployError::Render {
            template: path.display().to_string(),
            message: e.to_string(),
        };
        let mut sources = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = std::fs::read_dir(&current).map_err(|e| read_err(&current, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| read_err(&current, e))?;
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(dir) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let source = std::fs::read_to_string(&path).map_err(|e| read_err(&path, e))?;
                sources.push((name, source));
            }
        }
        debug!(dir = %dir.display(), templates = sources.len(), "loaded manifest templates");
        Ok(Self::from_sources(sources))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl ManifestRenderer for TemplateSet {
    fn render(&self, templates: &[&str], values: &Value) -> DeployResult<String> {
        let mut documents = Vec::with_capacity(templates.len());
        for name in templates {
            let source = self.sources.get(*name).ok_or_else(|| DeployError::Render {
                template: name.to_string(),
                message: "no such template".to_string(),
            })?;
            let rendered = self
                .env
                .render_str(source, values)
                .map_err(|e| DeployError::Render {
                    template: name.to_string(),
                    message: e.to_string(),
                })?;
            let rendered = rendered.trim();
            if !rendered.is_empty() {
                documents.push(rendered.to_string());
            }
        }
        Ok(documents.join("\n---\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stackgrid_core::{Classify, ErrorKind};

    #[test]
    fn renders_and_joins_templates() {
        let set = TemplateSet::from_sources([
            ("a.yaml", "kind: ConfigMap\nname: {{ stack.slug }}-a\n"),
            ("b.yaml", "{% if features.auth %}kind: Secret{% endif %}"),
            ("c.yaml", "kind: Service\n"),
        ]);
        let values = json!({ "stack": { "slug": "acme" }, "features": { "auth": false } });
        let text = set.render(&["a.yaml", "b.yaml", "c.yaml"], &values).unwrap();
        assert_eq!(text, "kind: ConfigMap\nname: acme-a\n---\nkind: Service");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let set = TemplateSet::from_sources([("a.yaml", "name: {{ stack.slgu }}")]);
        let err = set
            .render(&["a.yaml"], &json!({ "stack": { "slug": "acme" } }))
            .unwrap_err();
        assert!(matches!(err, DeployError::Render { ref template, .. } if template == "a.yaml"));
        assert_eq!(err.kind(), ErrorKind::Runtime);
    }

    #[test]
    fn unknown_template_is_an_error() {
        let set = TemplateSet::from_sources(Vec::<(String, String)>::new());
        assert!(set.render(&["ghost.yaml"], &json!({})).is_err());
    }

    #[test]
    fn loads_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("base")).unwrap();
        std::fs::write(dir.path().join("base/network.yaml"), "kind: Service").unwrap();
        std::fs::write(dir.path().join("auth.yaml"), "kind: Deployment").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let set = TemplateSet::from_dir(dir.path()).unwrap();
        let names: Vec<_> = set.names().collect();
        assert_eq!(names, vec!["auth.yaml", "base/network.yaml"]);
    }
}
