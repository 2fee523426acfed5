use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use vendi_core::intent::{numeric_value, ENTITY_SLOTS};
use vendi_core::llm::extract_json_object;
use vendi_core::{
    normalize_confidence, CompletionOptions, Entities, Intent, IntentResult, ModelClient,
    ModelError, TurnRecord,
};

/// How many trailing turns of history the classification prompt may
/// embed.
const HISTORY_WINDOW: usize = 6;

const CLASSIFY_TEMPERATURE: f32 = 0.2;

/// Maps one utterance (plus short history) to an intent, a normalized
/// confidence, and extracted entity slots. Classification is a
/// best-effort enhancement: every backend failure collapses to
/// `{unclear, 0, {}}` instead of aborting the turn.
pub struct IntentClassifier {
    model: Arc<dyn ModelClient>,
    enabled_intents: Vec<Intent>,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn ModelClient>, enabled_intents: Vec<Intent>) -> Self {
        Self { model, enabled_intents }
    }

    pub async fn classify(&self, message: &str, history: &[TurnRecord]) -> IntentResult {
        let prompt = self.build_prompt(message, history);
        let options = CompletionOptions::with_temperature(CLASSIFY_TEMPERATURE);

        let outcome = if self.model.supports_structured() {
            self.model.complete_json(&prompt, &classification_schema(), &options).await
        } else {
            match self.model.complete(&prompt, &options).await {
                Ok(raw) => extract_json_object(&raw)
                    .ok_or_else(|| ModelError::Malformed("no JSON object in reply".to_string())),
                Err(error) => Err(error),
            }
        };

        match outcome {
            Ok(value) => self.normalize(value),
            Err(error) => {
                debug!(event_name = "classify.absorbed_failure", error = %error);
                IntentResult::unclear()
            }
        }
    }

    fn normalize(&self, value: Value) -> IntentResult {
        let intent = value
            .get("intent")
            .and_then(Value::as_str)
            .and_then(Intent::parse)
            .filter(|candidate| self.enabled_intents.contains(candidate))
            .unwrap_or(Intent::Unclear);

        let confidence = normalize_confidence(value.get("confidence").and_then(numeric_value));

        let entities = value
            .get("entities")
            .cloned()
            .and_then(|raw| serde_json::from_value::<Entities>(raw).ok())
            .unwrap_or_default();

        IntentResult { intent, confidence, entities }
    }

    fn build_prompt(&self, message: &str, history: &[TurnRecord]) -> String {
        let mut prompt = String::new();

        let recent_start = history.len().saturating_sub(HISTORY_WINDOW);
        let recent = &history[recent_start..];
        if !recent.is_empty() {
            prompt.push_str("Recent conversation:\n");
            for turn in recent {
                let _ = writeln!(prompt, "{}: {}", turn.role.as_str(), turn.text);
            }
            prompt.push('\n');
        }

        let _ = writeln!(
            prompt,
            "You are classifying customer intent for an e-commerce sales chat.\n\n\
             Message: \"{message}\"\n\nAllowed intents:"
        );
        for intent in &self.enabled_intents {
            let _ = writeln!(prompt, "- {}", intent.as_str());
        }

        prompt.push_str("\nExtract entities when present:\n");
        for slot in ENTITY_SLOTS {
            let _ = writeln!(prompt, "- {slot}");
        }

        prompt.push_str(
            "\nRespond with JSON only:\n{\n  \"intent\": \"one_allowed_intent\",\n  \
             \"confidence\": 0.0,\n  \"entities\": {}\n}",
        );

        prompt
    }
}

fn classification_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "intent": {"type": "string"},
            "confidence": {"type": "number"},
            "entities": {"type": "object"}
        },
        "required": ["intent", "confidence", "entities"]
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use vendi_core::{
        CompletionOptions, Intent, ModelClient, ModelError, Role, TurnRecord,
    };

    use super::IntentClassifier;

    /// Model stub scripted with either a structured result or raw
    /// text, or a forced failure.
    struct ScriptedModel {
        structured: Option<Value>,
        text: Option<String>,
        fail: bool,
    }

    impl ScriptedModel {
        fn structured(value: Value) -> Self {
            Self { structured: Some(value), text: None, fail: false }
        }

        fn text(raw: &str) -> Self {
            Self { structured: None, text: Some(raw.to_string()), fail: false }
        }

        fn failing() -> Self {
            Self { structured: None, text: None, fail: true }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, ModelError> {
            if self.fail {
                return Err(ModelError::Backend("model offline".to_string()));
            }
            Ok(self.text.clone().unwrap_or_default())
        }

        async fn complete_json(
            &self,
            _prompt: &str,
            _schema: &Value,
            _options: &CompletionOptions,
        ) -> Result<Value, ModelError> {
            if self.fail {
                return Err(ModelError::Backend("model offline".to_string()));
            }
            self.structured
                .clone()
                .ok_or_else(|| ModelError::Unsupported("complete_json"))
        }

        fn supports_structured(&self) -> bool {
            self.structured.is_some()
        }
    }

    fn classifier(model: ScriptedModel) -> IntentClassifier {
        IntentClassifier::new(Arc::new(model), Intent::ALL.to_vec())
    }

    #[tokio::test]
    async fn structured_result_is_normalized() {
        let classifier = classifier(ScriptedModel::structured(json!({
            "intent": "add_to_cart",
            "confidence": "0.9",
            "entities": {"quantity": "2", "product_type": "t-shirt"}
        })));

        let result = classifier.classify("two tees please", &[]).await;
        assert_eq!(result.intent, Intent::AddToCart);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.entities.quantity, Some(2.0));
        assert_eq!(result.entities.product_type.as_deref(), Some("t-shirt"));
    }

    #[tokio::test]
    async fn free_text_reply_is_mined_for_json() {
        let classifier = classifier(ScriptedModel::text(
            r#"Here you go: {"intent": "view_cart", "confidence": 0.7, "entities": {}} enjoy"#,
        ));

        let result = classifier.classify("what's in my cart", &[]).await;
        assert_eq!(result.intent, Intent::ViewCart);
        assert_eq!(result.confidence, 0.7);
    }

    #[tokio::test]
    async fn non_json_reply_collapses_to_unclear() {
        let classifier = classifier(ScriptedModel::text("I cannot help with that"));

        let result = classifier.classify("hello", &[]).await;
        assert_eq!(result.intent, Intent::Unclear);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.entities, Default::default());
    }

    #[tokio::test]
    async fn backend_failure_collapses_to_unclear() {
        let classifier = classifier(ScriptedModel::failing());

        let result = classifier.classify("hello", &[]).await;
        assert_eq!(result.intent, Intent::Unclear);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn unknown_and_disabled_intents_collapse_to_unclear() {
        let classifier = classifier(ScriptedModel::structured(json!({
            "intent": "make_me_a_sandwich",
            "confidence": 0.99,
            "entities": {}
        })));
        let result = classifier.classify("hello", &[]).await;
        assert_eq!(result.intent, Intent::Unclear);

        let restricted = IntentClassifier::new(
            std::sync::Arc::new(ScriptedModel::structured(json!({
                "intent": "checkout",
                "confidence": 0.9,
                "entities": {}
            }))),
            vec![Intent::Greeting, Intent::Unclear],
        );
        let result = restricted.classify("check me out", &[]).await;
        assert_eq!(result.intent, Intent::Unclear, "disabled intents must not leak through");
    }

    #[tokio::test]
    async fn confidence_is_clamped() {
        let classifier = classifier(ScriptedModel::structured(json!({
            "intent": "greeting",
            "confidence": 17.3,
            "entities": {}
        })));
        let result = classifier.classify("hi", &[]).await;
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn prompt_embeds_at_most_six_turns_and_the_vocabulary() {
        let classifier = classifier(ScriptedModel::failing());
        let history: Vec<TurnRecord> = (0..10)
            .map(|index| {
                TurnRecord::new(
                    if index % 2 == 0 { Role::User } else { Role::Assistant },
                    format!("turn {index}"),
                    serde_json::Map::new(),
                )
            })
            .collect();

        let prompt = classifier.build_prompt("show hoodies", &history);
        assert!(!prompt.contains("turn 3"), "older turns must be dropped");
        assert!(prompt.contains("turn 4") && prompt.contains("turn 9"));
        assert!(prompt.contains("- browse_products"));
        assert!(prompt.contains("- order_id"));
        assert!(prompt.contains("Respond with JSON only"));
    }
}
