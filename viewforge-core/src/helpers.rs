//! Application collaborators reachable from compiled views
//!
//! `@url`, `@load`, `@lang`, `@old` and `@message` resolve through
//! [`ViewHelpers`]. Routing, sessions and translation storage live outside
//! this crate; [`StaticHelpers`] is the configuration-backed implementation.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::config::ViewConfig;

pub trait ViewHelpers {
    /// Absolute application URL for `path`.
    fn url(&self, path: &str) -> String;

    /// URL of a public asset (`@load`).
    fn asset(&self, path: &str) -> String;

    /// Translated text for `key`, falling back to the key itself.
    fn lang(&self, key: &str) -> String;

    /// Previously submitted form input for `field`.
    fn old(&self, field: &str) -> Value;

    /// Flash or validation message for `field`, empty if none.
    fn message(&self, field: &str) -> String;
}

#[derive(Debug, Clone, Default)]
pub struct StaticHelpers {
    pub app_url: String,
    pub asset_prefix: String,
    pub translations: BTreeMap<String, String>,
    pub old_input: Map<String, Value>,
    pub messages: BTreeMap<String, String>,
}

impl StaticHelpers {
    pub fn from_config(config: &ViewConfig) -> Self {
        Self {
            app_url: config.app_url.clone(),
            asset_prefix: config.asset_prefix.clone(),
            translations: config.translations.clone(),
            ..Self::default()
        }
    }

    pub fn with_old_input(mut self, old_input: Map<String, Value>) -> Self {
        self.old_input = old_input;
        self
    }

    pub fn with_messages(mut self, messages: BTreeMap<String, String>) -> Self {
        self.messages = messages;
        self
    }
}

impl ViewHelpers for StaticHelpers {
    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") || path.starts_with("//") {
            return path.to_string();
        }
        format!("{}/{}", self.app_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn asset(&self, path: &str) -> String {
        let prefix = self.asset_prefix.trim_matches('/');
        if prefix.is_empty() {
            self.url(path)
        } else {
            self.url(&format!("{}/{}", prefix, path.trim_start_matches('/')))
        }
    }

    fn lang(&self, key: &str) -> String {
        self.translations.get(key).cloned().unwrap_or_else(|| key.to_string())
    }

    fn old(&self, field: &str) -> Value {
        self.old_input.get(field).cloned().unwrap_or(Value::Null)
    }

    fn message(&self, field: &str) -> String {
        self.messages.get(field).cloned().unwrap_or_default()
    }
}

/// HTML-escape text for `{{ }}` output.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn helpers() -> StaticHelpers {
        StaticHelpers {
            app_url: "https://shop.test/".into(),
            asset_prefix: "assets".into(),
            translations: BTreeMap::from([("welcome".to_string(), "Bienvenue".to_string())]),
            ..StaticHelpers::default()
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>x</b>"), "&lt;b&gt;x&lt;/b&gt;");
        assert_eq!(escape_html(r#"a & "b" 'c'"#), "a &amp; &quot;b&quot; &#039;c&#039;");
    }

    #[test]
    fn test_url_joins_base() {
        let h = helpers();
        assert_eq!(h.url("/login"), "https://shop.test/login");
        assert_eq!(h.url("cart"), "https://shop.test/cart");
        assert_eq!(h.url("https://cdn.test/x.js"), "https://cdn.test/x.js");
    }

    #[test]
    fn test_url_without_base_is_root_relative() {
        assert_eq!(StaticHelpers::default().url("login"), "/login");
    }

    #[test]
    fn test_asset_prefix() {
        assert_eq!(helpers().asset("css/app.css"), "https://shop.test/assets/css/app.css");
    }

    #[test]
    fn test_lang_falls_back_to_key() {
        let h = helpers();
        assert_eq!(h.lang("welcome"), "Bienvenue");
        assert_eq!(h.lang("goodbye"), "goodbye");
    }

    #[test]
    fn test_old_and_messages() {
        let mut old = Map::new();
        old.insert("email".into(), json!("ada@example.com"));
        let h = helpers()
            .with_old_input(old)
            .with_messages(BTreeMap::from([("email".to_string(), "Email is taken".to_string())]));
        assert_eq!(h.old("email"), json!("ada@example.com"));
        assert_eq!(h.old("name"), Value::Null);
        assert_eq!(h.message("email"), "Email is taken");
        assert_eq!(h.message("name"), "");
    }
}
