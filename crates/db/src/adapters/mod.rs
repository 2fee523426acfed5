use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use vendi_core::config::OrdersConfig;
use vendi_core::{AdapterError, CartItem, OrderTotals};

pub mod catalog;
pub mod customers;
pub mod memory;
pub mod orders;
pub mod payments;

pub use catalog::SqlCatalogAdapter;
pub use customers::SqlCustomerAdapter;
pub use memory::{
    InMemoryCatalogAdapter, InMemoryCustomerAdapter, InMemoryOrderAdapter, InMemoryPaymentAdapter,
};
pub use orders::SqlOrderAdapter;
pub use payments::SqlPaymentAdapter;

pub(crate) fn storage(error: sqlx::Error) -> AdapterError {
    AdapterError::Storage(error.to_string())
}

/// Shared totals policy: 2-dp money, configured tax rate, flat
/// shipping waived above the free-shipping threshold. Both the SQL
/// and in-memory order adapters route through this so tests against
/// either see identical arithmetic.
pub fn compute_totals(policy: &OrdersConfig, items: &[CartItem]) -> OrderTotals {
    let subtotal: Decimal =
        items.iter().map(CartItem::line_total).sum::<Decimal>().round_dp(2);
    let tax = (subtotal * policy.tax_rate).round_dp(2);
    let shipping = if subtotal >= policy.free_shipping_threshold {
        Decimal::ZERO
    } else {
        policy.shipping_cost.round_dp(2)
    };
    let total = (subtotal + tax + shipping).round_dp(2);

    OrderTotals { subtotal, tax, shipping, total }
}

pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, AdapterError> {
    let raw: String = row.try_get(column).map_err(storage)?;
    raw.trim()
        .parse::<Decimal>()
        .map_err(|err| AdapterError::Storage(format!("bad decimal in `{column}`: {err}")))
}

pub(crate) fn timestamp_column(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, AdapterError> {
    let raw: String = row.try_get(column).map_err(storage)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|err| AdapterError::Storage(format!("bad timestamp in `{column}`: {err}")))
}

/// JSON list columns tolerate legacy shapes: null/empty/garbage all
/// read as empty.
pub(crate) fn json_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|value| serde_json::from_str::<Vec<String>>(&value).ok()).unwrap_or_default()
}

pub(crate) fn json_cart_items(raw: Option<String>) -> Vec<CartItem> {
    raw.and_then(|value| serde_json::from_str::<Vec<CartItem>>(&value).ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use vendi_core::config::OrdersConfig;
    use vendi_core::{line_id, CartItem};

    use super::{compute_totals, json_string_list};

    fn policy() -> OrdersConfig {
        OrdersConfig {
            tax_rate: Decimal::new(8, 2),
            free_shipping_threshold: Decimal::new(50, 0),
            shipping_cost: Decimal::new(5, 0),
        }
    }

    fn item(price: Decimal, quantity: u32) -> CartItem {
        CartItem {
            line_id: line_id(1, None, None),
            product_id: 1,
            name: "Tee".to_string(),
            price,
            quantity,
            color: None,
            size: None,
            category: None,
        }
    }

    #[test]
    fn totals_match_the_reference_scenario() {
        // price 25 x1: subtotal 25, tax 2, shipping 5, total 32
        let totals = compute_totals(&policy(), &[item(Decimal::new(25, 0), 1)]);
        assert_eq!(totals.subtotal, Decimal::new(25, 0));
        assert_eq!(totals.tax, Decimal::new(2, 0));
        assert_eq!(totals.shipping, Decimal::new(5, 0));
        assert_eq!(totals.total, Decimal::new(32, 0));
    }

    #[test]
    fn free_shipping_kicks_in_at_the_threshold() {
        let totals = compute_totals(&policy(), &[item(Decimal::new(25, 0), 2)]);
        assert_eq!(totals.shipping, Decimal::ZERO);
        assert_eq!(totals.total, Decimal::new(54, 0));
    }

    #[test]
    fn totals_are_monotonic_in_quantity() {
        let policy = policy();
        let mut previous = Decimal::MIN;
        for quantity in 1..=10 {
            let totals = compute_totals(&policy, &[item(Decimal::new(1_999, 2), quantity)]);
            assert!(totals.total >= previous, "total decreased at quantity {quantity}");
            previous = totals.total;
        }
    }

    #[test]
    fn json_lists_tolerate_garbage() {
        assert_eq!(json_string_list(None), Vec::<String>::new());
        assert_eq!(json_string_list(Some("not json".to_string())), Vec::<String>::new());
        assert_eq!(
            json_string_list(Some(r#"["red","blue"]"#.to_string())),
            vec!["red".to_string(), "blue".to_string()]
        );
    }
}
