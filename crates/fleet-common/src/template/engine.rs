//! Template engine
//!
//! Uses minijinja with its default `{{ ... }}` delimiters and strict undefined
//! handling, so a misspelled placeholder fails the render instead of writing an
//! empty value into a manifest.

use minijinja::{Environment, UndefinedBehavior};

use super::context::TemplateContext;
use crate::{Error, Result};

/// Renders template bodies against a [`TemplateContext`]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create an engine with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Strip comments from `body` and substitute the context's fields.
    ///
    /// The output always ends with a single newline.
    pub fn render(&self, name: &str, body: &str, ctx: &TemplateContext) -> Result<String> {
        let stripped = strip_comments(body);
        let mut rendered = self
            .env
            .render_str(&stripped, ctx)
            .map_err(|source| Error::Template {
                template: name.to_string(),
                source,
            })?;
        rendered.push('\n');
        Ok(rendered)
    }
}

/// Drop blank lines and lines whose trimmed text starts with `#` or `//`.
pub fn strip_comments(body: &str) -> String {
    body.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#') && !trimmed.starts_with("//")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext {
            name: "api".to_string(),
            namespace: "staging".to_string(),
            env: "staging".to_string(),
            port: 8080,
            image: "ghcr.io/acme/api:latest".to_string(),
            image_host: "ghcr.io/acme".to_string(),
            replicas: 2,
            base_ref: "../../../base/api".to_string(),
        }
    }

    #[test]
    fn test_strip_comments() {
        let body = "\n# header\nkind: Service\n  // note\n\nmetadata:\n  name: x\n";
        assert_eq!(strip_comments(body), "kind: Service\nmetadata:\n  name: x");
    }

    #[test]
    fn test_strip_keeps_inline_hash() {
        let body = "annotations:\n  color: \"#fff\"";
        assert_eq!(strip_comments(body), body);
    }

    #[test]
    fn test_render_substitutes_fields() {
        let engine = TemplateEngine::new();
        let out = engine
            .render(
                "deployment",
                "name: {{ name }}\nreplicas: {{ replicas }}\nimage: {{ image }}\nport: {{ port }}",
                &ctx(),
            )
            .unwrap();
        assert_eq!(
            out,
            "name: api\nreplicas: 2\nimage: ghcr.io/acme/api:latest\nport: 8080\n"
        );
    }

    #[test]
    fn test_render_strips_comments_before_substitution() {
        let engine = TemplateEngine::new();
        let out = engine
            .render("ns", "# {{ not_a_field }}\nname: {{ namespace }}", &ctx())
            .unwrap();
        assert_eq!(out, "name: staging\n");
    }

    #[test]
    fn test_undefined_placeholder_errors() {
        let engine = TemplateEngine::new();
        let err = engine.render("bad", "name: {{ nmae }}", &ctx()).unwrap_err();
        match err {
            Error::Template { template, .. } => assert_eq!(template, "bad"),
            other => panic!("expected Template error, got {other:?}"),
        }
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let engine = TemplateEngine::new();
        assert!(engine.render("bad", "name: {{ name ", &ctx()).is_err());
    }
}
