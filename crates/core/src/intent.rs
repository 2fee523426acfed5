use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed intent vocabulary. Classification output is always a
/// member of this set; anything else collapses to `Unclear`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    BrowseProducts,
    ProductInquiry,
    AddToCart,
    ViewCart,
    RemoveFromCart,
    Checkout,
    SubmitPaymentReceipt,
    TrackOrder,
    Complaint,
    Unclear,
}

impl Intent {
    pub const ALL: [Intent; 11] = [
        Intent::Greeting,
        Intent::BrowseProducts,
        Intent::ProductInquiry,
        Intent::AddToCart,
        Intent::ViewCart,
        Intent::RemoveFromCart,
        Intent::Checkout,
        Intent::SubmitPaymentReceipt,
        Intent::TrackOrder,
        Intent::Complaint,
        Intent::Unclear,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::BrowseProducts => "browse_products",
            Self::ProductInquiry => "product_inquiry",
            Self::AddToCart => "add_to_cart",
            Self::ViewCart => "view_cart",
            Self::RemoveFromCart => "remove_from_cart",
            Self::Checkout => "checkout",
            Self::SubmitPaymentReceipt => "submit_payment_receipt",
            Self::TrackOrder => "track_order",
            Self::Complaint => "complaint",
            Self::Unclear => "unclear",
        }
    }

    pub fn parse(label: &str) -> Option<Intent> {
        Self::ALL.iter().copied().find(|intent| intent.as_str() == label.trim())
    }
}

/// One classification outcome: intent, normalized confidence, and
/// whatever slots the model managed to fill.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    #[serde(default)]
    pub entities: Entities,
}

impl IntentResult {
    /// The safe default every classification failure collapses to.
    pub fn unclear() -> Self {
        Self { intent: Intent::Unclear, confidence: 0.0, entities: Entities::default() }
    }
}

/// Entity slots extracted alongside the intent. Models return these
/// loosely typed (numbers as strings and vice versa), so every field
/// deserializes leniently instead of failing the classification.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entities {
    #[serde(deserialize_with = "lenient_string")]
    pub product_type: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub product_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub color: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub size: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub price_range: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub order_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub receipt_url: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub payment_id: Option<String>,
}

/// Slot names advertised to the classifier prompt, in schema order.
pub const ENTITY_SLOTS: [&str; 8] = [
    "product_type",
    "product_id",
    "category",
    "color",
    "size",
    "quantity",
    "price_range",
    "order_id",
];

/// Clamps a raw model confidence into `[0, 1]`; absent or
/// non-numeric values normalize to zero.
pub fn normalize_confidence(raw: Option<f64>) -> f64 {
    match raw {
        Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Pulls a number out of a JSON value that may be a number or a
/// numeric string.
pub fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(numeric_value))
}
