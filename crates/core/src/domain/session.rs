use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-conversation state: bounded history, cart, customer snapshot,
/// and a free-form context side channel.
///
/// Deserialization is deliberately lenient: stores are treated as
/// untrusted, so `history` and `cart` tolerate missing, null, or
/// wrong-typed input and collapse to empty instead of failing the
/// load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub customer: Option<super::customer::Customer>,
    #[serde(default, deserialize_with = "lenient_history")]
    pub history: Vec<TurnRecord>,
    #[serde(default, deserialize_with = "lenient_cart")]
    pub cart: Cart,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            customer: None,
            history: Vec::new(),
            cart: Cart::default(),
            context: Map::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Drops the oldest entries until the history fits the bound.
    pub fn trim_history(&mut self, max_len: usize) {
        if self.history.len() > max_len {
            let excess = self.history.len() - max_len;
            self.history.drain(..excess);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: Role,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(role: Role, text: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self { role, text: text.into(), metadata, timestamp: Utc::now() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    pub fn subtotal(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Merges the item into the cart: an existing line with the same
    /// `(product, color, size)` key absorbs the quantity, otherwise a
    /// new line is appended.
    pub fn add_line(&mut self, item: CartItem) {
        if let Some(existing) = self.items.iter_mut().find(|line| line.line_id == item.line_id) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
        } else {
            self.items.push(item);
        }
    }

    /// Removes every line for the given product id (compared as
    /// strings, since entity values arrive untyped). Returns whether
    /// anything was removed.
    pub fn remove_product(&mut self, product_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.product_id.to_string() != product_id);
        self.items.len() != before
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub line_id: String,
    pub product_id: i64,
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl CartItem {
    pub fn new(
        product: &super::product::Product,
        quantity: u32,
        color: Option<String>,
        size: Option<String>,
    ) -> Self {
        Self {
            line_id: line_id(product.id, color.as_deref(), size.as_deref()),
            product_id: product.id,
            name: product.name.clone(),
            price: product.price,
            quantity: quantity.max(1),
            color,
            size,
            category: product.category.clone(),
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Composite line key: identical product+variant combinations merge,
/// distinct variants stay distinct lines.
pub fn line_id(product_id: i64, color: Option<&str>, size: Option<&str>) -> String {
    format!("{product_id}:{}:{}", color.unwrap_or("default"), size.unwrap_or("default"))
}

fn lenient_history<'de, D>(deserializer: D) -> Result<Vec<TurnRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(entries) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

fn lenient_cart<'de, D>(deserializer: D) -> Result<Cart, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        // Stores that keyed items by line id come back as an object.
        Value::Object(mut cart) => match cart.remove("items") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(keyed)) => keyed.into_iter().map(|(_, item)| item).collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(Cart {
        items: items.into_iter().filter_map(|item| serde_json::from_value(item).ok()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{line_id, Cart, CartItem, Role, Session};

    fn item(product_id: i64, quantity: u32, color: Option<&str>, size: Option<&str>) -> CartItem {
        CartItem {
            line_id: line_id(product_id, color, size),
            product_id,
            name: format!("product-{product_id}"),
            price: Decimal::new(2_500, 2),
            quantity,
            color: color.map(str::to_string),
            size: size.map(str::to_string),
            category: None,
        }
    }

    #[test]
    fn same_variant_merges_quantities_distinct_variant_adds_a_line() {
        let mut cart = Cart::default();
        cart.add_line(item(1, 2, Some("red"), Some("m")));
        cart.add_line(item(1, 3, Some("red"), Some("m")));
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 5);

        cart.add_line(item(1, 1, Some("red"), Some("l")));
        assert_eq!(cart.items.len(), 2);
    }

    #[test]
    fn remove_product_compares_ids_as_strings() {
        let mut cart = Cart::default();
        cart.add_line(item(1, 1, None, None));
        cart.add_line(item(12, 1, None, None));

        assert!(cart.remove_product("1"));
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].product_id, 12);
        assert!(!cart.remove_product("1"));
    }

    #[test]
    fn subtotal_sums_line_totals() {
        let mut cart = Cart::default();
        cart.add_line(item(1, 2, None, None));
        cart.add_line(item(2, 1, None, None));
        assert_eq!(cart.subtotal(), Decimal::new(7_500, 2));
        assert_eq!(cart.total_quantity(), 3);
    }

    #[test]
    fn trim_keeps_the_most_recent_entries_in_order() {
        let mut session = Session::new("s-1");
        for index in 0..10 {
            session.history.push(super::TurnRecord::new(
                Role::User,
                format!("message {index}"),
                serde_json::Map::new(),
            ));
        }
        session.trim_history(4);
        assert_eq!(session.history.len(), 4);
        assert_eq!(session.history[0].text, "message 6");
        assert_eq!(session.history[3].text, "message 9");
    }

    #[test]
    fn malformed_stored_shapes_decode_to_empty() {
        let session: Session = serde_json::from_value(json!({
            "id": "s-1",
            "history": {"unexpected": "object"},
            "cart": 7
        }))
        .expect("lenient decode");
        assert!(session.history.is_empty());
        assert!(session.cart.is_empty());

        let session: Session = serde_json::from_value(json!({
            "id": "s-2",
            "cart": {"items": {"1:default:default": {
                "line_id": "1:default:default",
                "product_id": 1,
                "name": "Tee",
                "price": 25.0,
                "quantity": 2
            }}}
        }))
        .expect("lenient decode");
        assert_eq!(session.cart.items.len(), 1);
        assert_eq!(session.cart.items[0].quantity, 2);
    }

    #[test]
    fn unparseable_history_entries_are_dropped_not_fatal() {
        let session: Session = serde_json::from_value(json!({
            "id": "s-3",
            "history": [
                {"role": "user", "text": "hi"},
                {"role": "narrator", "text": "bad role"},
                42
            ]
        }))
        .expect("lenient decode");
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].text, "hi");
    }
}
