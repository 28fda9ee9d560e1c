//! Template engine (§4.1): `{{var}}` substitution into a message's title
//! and body, plus a named-template registry.
//!
//! `TemplateEngine::render` is a pure function of `(message, registry)` —
//! no I/O, idempotent, and it never fails for well-formed input. Unknown
//! variables are left as the literal placeholder in non-strict mode (the
//! default); a strict engine rejects them instead. Malformed placeholders
//! (an unclosed `{{`) always fail, in both modes, with the input's byte
//! offset.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use notifyhub_common::{Message, NotifyError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unclosed placeholder starting at byte offset {offset}")]
    UnclosedPlaceholder { offset: usize },

    #[error("unknown variable '{name}' at byte offset {offset}")]
    UnknownVariable { name: String, offset: usize },

    #[error("unknown template '{0}'")]
    UnknownTemplate(String),
}

impl From<TemplateError> for NotifyError {
    fn from(e: TemplateError) -> Self {
        NotifyError::validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;

/// Concurrent, copy-on-write-by-construction store of named template
/// bodies. Cheap to clone (an `Arc<str>` per entry) so a render can hold a
/// snapshot reference without locking out concurrent `add_template` calls.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: DashMap<String, Arc<str>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&self, name: impl Into<String>, body: impl Into<String>) {
        self.templates.insert(name.into(), Arc::from(body.into()));
    }

    pub fn remove_template(&self, name: &str) -> bool {
        self.templates.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<str>> {
        self.templates.get(name).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Renders `{{name}}` placeholders against a message's `variables` map,
/// resolving `message.template` against a `TemplateRegistry` first.
#[derive(Debug, Clone, Copy)]
pub struct TemplateEngine {
    strict: bool,
}

impl TemplateEngine {
    /// Non-strict by default: unresolved placeholders pass through intact.
    pub fn new() -> Self {
        Self { strict: false }
    }

    pub fn strict() -> Self {
        Self { strict: true }
    }

    /// Render a message's title/body, resolving a named template first if
    /// `message.template` is set. Returns a new `Message` — the input is
    /// never mutated (§3 invariant: messages are copy-on-write through the
    /// pipeline).
    pub fn render(&self, message: &Message, registry: &TemplateRegistry) -> Result<Message> {
        let mut rendered = message.clone();

        if let Some(name) = &message.template {
            let body = registry
                .get(name)
                .ok_or_else(|| TemplateError::UnknownTemplate(name.clone()))?;
            rendered.body = body.to_string();
        }

        rendered.title = self.expand(&rendered.title, &message.variables)?;
        rendered.body = self.expand(&rendered.body, &message.variables)?;
        Ok(rendered)
    }

    fn expand(&self, input: &str, variables: &HashMap<String, serde_json::Value>) -> Result<String> {
        let mut out = String::with_capacity(input.len());
        let mut pos = 0usize;

        while let Some(rel_open) = input[pos..].find("{{") {
            let open = pos + rel_open;
            out.push_str(&input[pos..open]);

            let search_from = open + 2;
            let Some(rel_close) = input[search_from..].find("}}") else {
                return Err(TemplateError::UnclosedPlaceholder { offset: open });
            };
            let close = search_from + rel_close;
            let name = input[search_from..close].trim();

            match variables.get(name) {
                Some(value) => out.push_str(&value_to_string(value)),
                None if self.strict => {
                    return Err(TemplateError::UnknownVariable {
                        name: name.to_string(),
                        offset: open,
                    })
                }
                None => out.push_str(&input[open..close + 2]),
            }

            pos = close + 2;
        }

        out.push_str(&input[pos..]);
        Ok(out)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notifyhub_common::{Target, TargetType};

    fn target() -> Target {
        Target::new(TargetType::Channel, "c1", "chat")
    }

    #[test]
    fn substitutes_known_variables() {
        let engine = TemplateEngine::new();
        let registry = TemplateRegistry::new();
        let msg = Message::new("Hello {{name}}", "Your order {{id}} shipped")
            .with_target(target())
            .with_variable("name", "Ada")
            .with_variable("id", 42);

        let rendered = engine.render(&msg, &registry).unwrap();
        assert_eq!(rendered.title, "Hello Ada");
        assert_eq!(rendered.body, "Your order 42 shipped");
    }

    #[test]
    fn leaves_unknown_placeholder_intact_in_non_strict_mode() {
        let engine = TemplateEngine::new();
        let registry = TemplateRegistry::new();
        let msg = Message::new("Hi {{unknown}}", "body").with_target(target());

        let rendered = engine.render(&msg, &registry).unwrap();
        assert_eq!(rendered.title, "Hi {{unknown}}");
    }

    #[test]
    fn strict_mode_rejects_unknown_placeholder() {
        let engine = TemplateEngine::strict();
        let registry = TemplateRegistry::new();
        let msg = Message::new("Hi {{unknown}}", "body").with_target(target());

        let err = engine.render(&msg, &registry).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownVariable { .. }));
    }

    #[test]
    fn unclosed_placeholder_is_an_error_in_both_modes() {
        let registry = TemplateRegistry::new();
        let msg = Message::new("Hi {{name", "body").with_target(target());

        let err = TemplateEngine::new().render(&msg, &registry).unwrap_err();
        assert_eq!(err, TemplateError::UnclosedPlaceholder { offset: 3 });
    }

    #[test]
    fn named_template_replaces_body_before_variable_expansion() {
        let engine = TemplateEngine::new();
        let registry = TemplateRegistry::new();
        registry.add_template("welcome", "Welcome, {{name}}!");

        let mut msg = Message::new("subject", "ignored").with_target(target());
        msg.template = Some("welcome".to_string());
        msg.variables.insert("name".into(), "Grace".into());

        let rendered = engine.render(&msg, &registry).unwrap();
        assert_eq!(rendered.body, "Welcome, Grace!");
    }

    #[test]
    fn missing_template_is_an_error() {
        let engine = TemplateEngine::new();
        let registry = TemplateRegistry::new();
        let mut msg = Message::new("s", "b").with_target(target());
        msg.template = Some("missing".to_string());

        let err = engine.render(&msg, &registry).unwrap_err();
        assert_eq!(err, TemplateError::UnknownTemplate("missing".to_string()));
    }

    #[test]
    fn render_is_idempotent_for_fully_resolved_input() {
        let engine = TemplateEngine::new();
        let registry = TemplateRegistry::new();
        let msg = Message::new("Hello Ada", "no placeholders").with_target(target());

        let once = engine.render(&msg, &registry).unwrap();
        let twice = engine.render(&once, &registry).unwrap();
        assert_eq!(once.title, twice.title);
        assert_eq!(once.body, twice.body);
    }
}
