//! Text extraction and type filters.

use serde_json::{Map, Value};

use semstreams_model::DottedPattern;

/// Default ordered property names mined for embedding text.
pub const DEFAULT_TEXT_FIELDS: [&str; 6] =
    ["title", "content", "description", "summary", "text", "name"];

/// Extracts embedding text from entity properties.
///
/// Concatenates (single-space separated) the string values of a configured
/// ordered list of property names. Entities whose concatenation is empty get
/// no vector.
#[derive(Debug, Clone)]
pub struct TextExtractor {
    fields: Vec<String>,
}

impl TextExtractor {
    /// An extractor over the given ordered field list; an empty list falls
    /// back to [`DEFAULT_TEXT_FIELDS`].
    #[must_use]
    pub fn new(fields: Vec<String>) -> Self {
        let fields = if fields.is_empty() {
            DEFAULT_TEXT_FIELDS.iter().map(|s| s.to_string()).collect()
        } else {
            fields
        };
        Self { fields }
    }

    /// The extracted text, or `None` when no configured field holds a
    /// non-empty string.
    #[must_use]
    pub fn extract(&self, properties: &Map<String, Value>) -> Option<String> {
        let mut parts = Vec::new();
        for field in &self.fields {
            if let Some(Value::String(s)) = properties.get(field) {
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed);
                }
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Allow/deny type patterns gating which entities are embedded.
///
/// `skip` is evaluated first and wins on conflict; an empty `enabled` list
/// allows everything not skipped. This is the memory bound under
/// high-volume telemetry: skipped types never enter the vector caches.
#[derive(Debug, Clone, Default)]
pub struct TypeFilter {
    enabled: Vec<DottedPattern>,
    skip: Vec<DottedPattern>,
}

impl TypeFilter {
    /// Compile allow and deny pattern lists.
    #[must_use]
    pub fn new(enabled: &[String], skip: &[String]) -> Self {
        Self {
            enabled: enabled.iter().map(|p| DottedPattern::new(p)).collect(),
            skip: skip.iter().map(|p| DottedPattern::new(p)).collect(),
        }
    }

    /// `true` if entities of this type should be embedded.
    #[must_use]
    pub fn allows(&self, entity_type: &str) -> bool {
        if self.skip.iter().any(|p| p.matches(entity_type)) {
            return false;
        }
        self.enabled.is_empty() || self.enabled.iter().any(|p| p.matches(entity_type))
    }
}
