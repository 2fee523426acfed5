use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::customer::CustomerProfile;

/// Per-turn side-channel input. Callers integrate from surfaces with
/// different naming conventions, so the order and receipt fields
/// accept the historical spellings, resolved in priority order.
/// Unrecognized keys are carried through in `extra`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TurnMetadata {
    pub customer: Option<CustomerProfile>,
    pub order_id: Option<String>,
    pub receipt_url: Option<String>,
    pub payment_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

const ORDER_ID_ALIASES: [&str; 2] = ["order_id", "orderId"];
const RECEIPT_URL_ALIASES: [&str; 5] =
    ["receipt_url", "receiptUrl", "receiptURL", "imageUrl", "image_url"];
const PAYMENT_ID_ALIASES: [&str; 2] = ["payment_id", "paymentId"];

impl TurnMetadata {
    pub fn with_customer(customer: CustomerProfile) -> Self {
        Self { customer: Some(customer), ..Self::default() }
    }
}

// Alias resolution needs a priority order, which `#[serde(alias)]`
// cannot express, so deserialization goes through a raw map.
impl<'de> Deserialize<'de> for TurnMetadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Value::Object(mut raw) = Value::deserialize(deserializer)? else {
            return Ok(Self::default());
        };

        let customer = raw
            .remove("customer")
            .and_then(|value| serde_json::from_value::<CustomerProfile>(value).ok());
        let order_id = take_first_string(&mut raw, &ORDER_ID_ALIASES);
        let receipt_url = take_first_string(&mut raw, &RECEIPT_URL_ALIASES);
        let payment_id = take_first_string(&mut raw, &PAYMENT_ID_ALIASES);

        Ok(Self { customer, order_id, receipt_url, payment_id, extra: raw })
    }
}

/// Resolves the first alias carrying a usable value; every alias is
/// consumed from the map either way so none leak into `extra`.
fn take_first_string(raw: &mut Map<String, Value>, aliases: &[&str]) -> Option<String> {
    let mut resolved = None;
    for alias in aliases {
        let value = raw.remove(*alias);
        if resolved.is_none() {
            resolved = value.and_then(|value| match value {
                Value::String(text) => {
                    let trimmed = text.trim().to_string();
                    (!trimmed.is_empty()).then_some(trimmed)
                }
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            });
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::TurnMetadata;

    #[test]
    fn accepts_every_receipt_field_spelling() {
        for key in ["receipt_url", "receiptUrl", "receiptURL", "imageUrl", "image_url"] {
            let metadata: TurnMetadata =
                serde_json::from_value(json!({ key: "https://cdn.example.com/r.png" }))
                    .expect("metadata decode");
            assert_eq!(
                metadata.receipt_url.as_deref(),
                Some("https://cdn.example.com/r.png"),
                "spelling `{key}` should populate receipt_url"
            );
            assert!(metadata.extra.is_empty(), "aliases must not leak into extra");
        }
    }

    #[test]
    fn alias_priority_follows_declaration_order() {
        let metadata: TurnMetadata = serde_json::from_value(json!({
            "imageUrl": "https://cdn.example.com/low-priority.png",
            "receiptUrl": "https://cdn.example.com/high-priority.png"
        }))
        .expect("metadata decode");
        assert_eq!(
            metadata.receipt_url.as_deref(),
            Some("https://cdn.example.com/high-priority.png")
        );
    }

    #[test]
    fn accepts_both_order_id_spellings_and_keeps_extras() {
        let metadata: TurnMetadata = serde_json::from_value(json!({
            "orderId": 41,
            "channel": "web"
        }))
        .expect("metadata decode");
        assert_eq!(metadata.order_id.as_deref(), Some("41"));
        assert_eq!(metadata.extra.get("channel"), Some(&json!("web")));
    }

    #[test]
    fn non_object_metadata_decodes_to_empty() {
        let metadata: TurnMetadata = serde_json::from_value(json!("oops")).expect("decode");
        assert_eq!(metadata, TurnMetadata::default());
    }
}
