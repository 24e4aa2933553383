//! Template compilation and rendering

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use minijinja::{Environment, Error as RenderError, ErrorKind, UndefinedBehavior, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use txmail_common::types::TemplateId;
use txmail_common::Template;

const SUBJECT: &str = "subject";
const BODY: &str = "body";
const ALT_BODY: &str = "alt_body";

/// Functions callable from every template.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct TemplateFuncs {
    functions: BTreeMap<String, Value>,
}

impl TemplateFuncs {
    /// Registry without any functions
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with `date` and `ellipsis`
    pub fn with_defaults() -> Self {
        let mut funcs = Self::empty();
        funcs.insert("date", Value::from_function(date));
        funcs.insert("ellipsis", Value::from_function(ellipsis));
        funcs
    }

    /// Register a callable, usually built with [`Value::from_function`]
    pub fn insert(&mut self, name: impl Into<String>, function: Value) {
        self.functions.insert(name.into(), function);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    fn install(&self, env: &mut Environment<'static>) {
        for (name, function) in &self.functions {
            env.add_global(name.clone(), function.clone());
        }
    }
}

/// Current UTC time in strftime `format`
fn date(format: String) -> Result<String, RenderError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(RenderError::new(
            ErrorKind::InvalidOperation,
            format!("invalid date format '{}'", format),
        ));
    }
    Ok(Utc::now().format_with_items(items.iter()).to_string())
}

/// Truncate `text` to `max_len` characters, marking the cut with "..."
fn ellipsis(text: String, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text;
    }
    let mut out: String = text.chars().take(max_len).collect();
    out.push_str("...");
    out
}

/// Output of rendering a compiled template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
    pub alt_body: Option<String>,
}

/// Sources of one template compiled against a [`TemplateFuncs`] snapshot
pub struct CompiledTemplate {
    id: TemplateId,
    updated_at: DateTime<Utc>,
    has_alt_body: bool,
    env: Environment<'static>,
}

impl CompiledTemplate {
    /// Compile every source; the first syntax error aborts
    pub fn compile(template: &Template, funcs: &TemplateFuncs) -> Result<Self, RenderError> {
        let mut env = Environment::new();
        // Missing attributes render as empty, even when nested
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        funcs.install(&mut env);

        env.add_template_owned(SUBJECT, template.subject.clone())?;
        env.add_template_owned(BODY, template.body.clone())?;

        let has_alt_body = match &template.alt_body {
            Some(alt) => {
                env.add_template_owned(ALT_BODY, alt.clone())?;
                true
            }
            None => false,
        };

        Ok(Self {
            id: template.id,
            updated_at: template.updated_at,
            has_alt_body,
            env,
        })
    }

    pub fn id(&self) -> TemplateId {
        self.id
    }

    /// Timestamp of the source this was compiled from
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn has_alt_body(&self) -> bool {
        self.has_alt_body
    }

    pub fn render<C: Serialize>(&self, ctx: &C) -> Result<Rendered, RenderError> {
        let ctx = Value::from_serialize(ctx);
        let render = |name: &str| self.env.get_template(name)?.render(&ctx);

        Ok(Rendered {
            subject: render(SUBJECT)?,
            body: render(BODY)?,
            alt_body: if self.has_alt_body {
                Some(render(ALT_BODY)?)
            } else {
                None
            },
        })
    }
}

impl std::fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("id", &self.id)
            .field("updated_at", &self.updated_at)
            .field("has_alt_body", &self.has_alt_body)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn template(subject: &str, body: &str, alt_body: Option<&str>) -> Template {
        Template {
            id: 7,
            name: "welcome".to_string(),
            updated_at: Utc::now(),
            subject: subject.to_string(),
            body: body.to_string(),
            alt_body: alt_body.map(str::to_string),
        }
    }

    #[test]
    fn test_render_subscriber_and_data() {
        let tpl = template(
            "Welcome {{ subscriber.name }}",
            "Order {{ tx.data.order_id }} for {{ subscriber.email }}",
            Some("Order {{ tx.data.order_id }}"),
        );
        let compiled = CompiledTemplate::compile(&tpl, &TemplateFuncs::with_defaults()).unwrap();

        let rendered = compiled
            .render(&json!({
                "subscriber": {"name": "Ana", "email": "ana@example.com"},
                "tx": {"data": {"order_id": 42}},
            }))
            .unwrap();

        assert_eq!(
            rendered,
            Rendered {
                subject: "Welcome Ana".to_string(),
                body: "Order 42 for ana@example.com".to_string(),
                alt_body: Some("Order 42".to_string()),
            }
        );
        assert_eq!(compiled.id(), 7);
        assert_eq!(compiled.updated_at(), tpl.updated_at);
    }

    #[test]
    fn test_syntax_error_fails_compile() {
        let tpl = template("Hi", "{% if %}", None);
        assert!(CompiledTemplate::compile(&tpl, &TemplateFuncs::empty()).is_err());
    }

    #[test]
    fn test_missing_values_render_empty() {
        let tpl = template("Hi {{ subscriber.name }}", "x{{ tx.data.nothing }}x", None);
        let compiled = CompiledTemplate::compile(&tpl, &TemplateFuncs::empty()).unwrap();
        let rendered = compiled.render(&json!({"subscriber": {}})).unwrap();

        assert_eq!(rendered.subject, "Hi ");
        assert_eq!(rendered.body, "xx");
        assert_eq!(rendered.alt_body, None);
    }

    #[test]
    fn test_default_functions() {
        let tpl = template(
            "{{ ellipsis(tx.data.title, 5) }}",
            "{{ date('%Y') | length }}",
            None,
        );
        let compiled = CompiledTemplate::compile(&tpl, &TemplateFuncs::with_defaults()).unwrap();
        let rendered = compiled
            .render(&json!({"tx": {"data": {"title": "Quarterly report"}}}))
            .unwrap();

        assert_eq!(rendered.subject, "Quart...");
        assert_eq!(rendered.body, "4");
    }

    #[test]
    fn test_unregistered_function_fails_render() {
        let tpl = template("{{ ellipsis('abc', 1) }}", "", None);
        let compiled = CompiledTemplate::compile(&tpl, &TemplateFuncs::empty()).unwrap();
        assert!(compiled.render(&json!({})).is_err());
    }

    #[test]
    fn test_custom_function() {
        let mut funcs = TemplateFuncs::with_defaults();
        funcs.insert("shout", Value::from_function(|s: String| s.to_uppercase()));
        assert!(funcs.contains("shout"));

        let tpl = template("{{ shout('hi') }}", "", None);
        let compiled = CompiledTemplate::compile(&tpl, &funcs).unwrap();
        assert_eq!(compiled.render(&json!({})).unwrap().subject, "HI");
    }

    #[test]
    fn test_ellipsis_and_date_helpers() {
        assert_eq!(ellipsis("short".to_string(), 10), "short");
        assert_eq!(ellipsis("h\u{e9}llo w\u{f6}rld".to_string(), 5), "h\u{e9}llo...");
        assert!(date("%Q-%".to_string()).is_err());
    }
}
