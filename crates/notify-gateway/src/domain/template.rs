//! Caption templates with `{{key}}` placeholders.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid regex"));

/// Values available to a caption template.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: HashMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Variables for a product notification. `date` and `time` are rendered in
    /// the given local offset; `fecha` repeats the date and `hora` carries
    /// seconds.
    pub fn for_product(
        product_name: &str,
        description: &str,
        phone: &str,
        email: &str,
        now: DateTime<FixedOffset>,
    ) -> Self {
        let date = now.format("%d/%m/%Y").to_string();
        let time = now.format("%H:%M").to_string();
        let hora = now.format("%H:%M:%S").to_string();
        let mut vars = Self::new();
        vars.insert("productName", product_name)
            .insert("description", description)
            .insert("phone", phone)
            .insert("email", email)
            .insert("date", date.clone())
            .insert("time", time)
            .insert("fecha", date)
            .insert("hora", hora);
        vars
    }
}

/// Substitute every `{{key}}`. Unknown keys and empty values are left as the
/// literal placeholder.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            match vars.get(&caps[1]) {
                Some(value) if !value.is_empty() => value.to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Like [`render`], but known keys are substituted even when empty. Used for
/// the built-in caption, which must never show a placeholder to a customer.
pub fn render_filled(template: &str, vars: &TemplateVars) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
