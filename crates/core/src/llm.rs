use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ModelError;

/// Sampling options forwarded to the model backend.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: None }
    }
}

impl CompletionOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self { temperature, ..Self::default() }
    }
}

/// Text-generation backend. Structured completion and image analysis
/// are optional capabilities: the default implementations report
/// `Unsupported` and callers degrade as the pipeline requires
/// (classification falls back to text + JSON extraction, receipt
/// analysis falls back to a neutral manual-review result).
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, ModelError>;

    async fn complete_json(
        &self,
        _prompt: &str,
        _schema: &Value,
        _options: &CompletionOptions,
    ) -> Result<Value, ModelError> {
        Err(ModelError::Unsupported("complete_json"))
    }

    async fn analyze_image(
        &self,
        _image_ref: &str,
        _prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<String, ModelError> {
        Err(ModelError::Unsupported("analyze_image"))
    }

    fn supports_structured(&self) -> bool {
        false
    }

    fn supports_vision(&self) -> bool {
        false
    }
}

/// Finds the first balanced `{...}` span in free text and parses it.
/// Models that cannot be forced into structured output wrap their
/// JSON in prose; everything outside the span is discarded.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return serde_json::from_str(&text[start..end]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::extract_json_object;

    #[test]
    fn finds_the_first_balanced_object_in_prose() {
        let text = r#"Sure, here is the result: {"intent": "greeting", "confidence": 0.9} hope that helps {"ignored": true}"#;
        let value = extract_json_object(text).expect("object");
        assert_eq!(value, json!({"intent": "greeting", "confidence": 0.9}));
    }

    #[test]
    fn handles_nested_objects_and_braces_inside_strings() {
        let text = r#"{"outer": {"inner": "has } brace and \" quote"}}"#;
        let value = extract_json_object(text).expect("object");
        assert_eq!(value["outer"]["inner"], "has } brace and \" quote");
    }

    #[test]
    fn rejects_text_without_a_parsable_object() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{broken").is_none());
        assert!(extract_json_object("").is_none());
    }
}
