use std::{fmt::Write as _, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const PLAIN_TEXT: &str = "text/plain";
pub const JSON: &str = "application/json";
pub const HTML: &str = "text/html";

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("no formatter registered for mime type `{0}`")]
    UnsupportedMimeType(String),
    #[error("value could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Renders a produced value into the textual payload of one mime type.
///
/// Implementations must be pure: rendering never touches session state.
pub trait Formatter: Send + Sync {
    fn render(&self, value: &Value, mime_type: &str) -> Result<String, FormatError>;

    fn supports(&self, mime_type: &str) -> bool {
        !matches!(
            self.render(&Value::Null, mime_type),
            Err(FormatError::UnsupportedMimeType(_))
        )
    }
}

/// A single rendering of a value, as carried by a `ValueProduced` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedValue {
    pub mime_type: String,
    pub value: String,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl Formatter for DefaultFormatter {
    fn render(&self, value: &Value, mime_type: &str) -> Result<String, FormatError> {
        match mime_type {
            PLAIN_TEXT => Ok(plain_text(value)),
            JSON => Ok(serde_json::to_string(value)?),
            HTML => Ok(html(value)),
            other => Err(FormatError::UnsupportedMimeType(other.to_string())),
        }
    }

    fn supports(&self, mime_type: &str) -> bool {
        matches!(mime_type, PLAIN_TEXT | JSON | HTML)
    }
}

fn plain_text(value: &Value) -> String {
    match value {
        // Strings are shown without surrounding quotes
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn html(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let mut out = String::from("<table>");
            for item in items {
                let _ = write!(out, "<tr><td>{}</td></tr>", escape_html(&plain_text(item)));
            }
            out.push_str("</table>");
            out
        }
        Value::Object(fields) => {
            let mut out = String::from("<table>");
            for (key, field) in fields {
                let _ = write!(
                    out,
                    "<tr><th>{}</th><td>{}</td></tr>",
                    escape_html(key),
                    escape_html(&plain_text(field))
                );
            }
            out.push_str("</table>");
            out
        }
        scalar => format!("<pre>{}</pre>", escape_html(&plain_text(scalar))),
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Rendering configuration scoped to a session.
///
/// Holds the formatter and the mime types every produced value is rendered
/// into. Passed explicitly to whoever renders; there is no process-wide
/// registration to reset.
#[derive(Clone)]
pub struct FormatterConfig {
    formatter: Arc<dyn Formatter>,
    mime_types: Vec<String>,
}

impl FormatterConfig {
    pub fn new(formatter: Arc<dyn Formatter>, mime_types: Vec<String>) -> Self {
        Self {
            formatter,
            mime_types,
        }
    }

    pub fn mime_types(&self) -> &[String] {
        &self.mime_types
    }

    /// Fails on the first configured mime type the formatter cannot render.
    pub fn check(&self) -> Result<(), FormatError> {
        match self
            .mime_types
            .iter()
            .find(|mime_type| !self.formatter.supports(mime_type))
        {
            Some(unsupported) => Err(FormatError::UnsupportedMimeType(unsupported.clone())),
            None => Ok(()),
        }
    }

    /// Drops the mime types the formatter cannot render and returns them.
    pub fn retain_supported(&mut self) -> Vec<String> {
        let (supported, unsupported): (Vec<String>, Vec<String>) = self
            .mime_types
            .drain(..)
            .partition(|mime_type| self.formatter.supports(mime_type));
        self.mime_types = supported;
        unsupported
    }

    pub fn format(&self, value: &Value) -> Result<Vec<FormattedValue>, FormatError> {
        self.mime_types
            .iter()
            .map(|mime_type| {
                Ok(FormattedValue {
                    mime_type: mime_type.clone(),
                    value: self.formatter.render(value, mime_type)?,
                })
            })
            .collect()
    }
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self::new(Arc::new(DefaultFormatter), vec![PLAIN_TEXT.to_string()])
    }
}

impl std::fmt::Debug for FormatterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatterConfig")
            .field("mime_types", &self.mime_types)
            .finish_non_exhaustive()
    }
}
