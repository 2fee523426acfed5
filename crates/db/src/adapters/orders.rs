use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use vendi_core::config::OrdersConfig;
use vendi_core::{
    AdapterError, CartItem, Customer, NewOrder, Order, OrderAdapter, OrderStatus, OrderTotals,
    PaymentStatus,
};

use super::{compute_totals, decimal_column, json_cart_items, storage, timestamp_column};
use crate::DbPool;

pub struct SqlOrderAdapter {
    pool: DbPool,
    policy: OrdersConfig,
}

impl SqlOrderAdapter {
    pub fn new(pool: DbPool, policy: OrdersConfig) -> Self {
        Self { pool, policy }
    }
}

#[async_trait]
impl OrderAdapter for SqlOrderAdapter {
    async fn calculate_totals(
        &self,
        items: &[CartItem],
        _customer: Option<&Customer>,
    ) -> Result<OrderTotals, AdapterError> {
        Ok(compute_totals(&self.policy, items))
    }

    async fn create_order(&self, order: NewOrder) -> Result<Order, AdapterError> {
        if order.items.is_empty() {
            return Err(AdapterError::Invalid("Cannot create order with empty items.".to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let items_json = serde_json::to_string(&order.items)
            .map_err(|err| AdapterError::Storage(format!("could not encode items: {err}")))?;

        let mut tx = self.pool.begin().await.map_err(storage)?;

        // Stock is asserted and deducted inside the same transaction
        // as the order row; any line failing rolls everything back.
        for item in &order.items {
            let row = sqlx::query("SELECT name, stock FROM products WHERE id = ?")
                .bind(item.product_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?;

            let Some(row) = row else {
                return Err(AdapterError::NotFound(format!(
                    "Product not found: {}",
                    item.product_id
                )));
            };

            let name: String = row.try_get("name").map_err(storage)?;
            let stock: i64 = row.try_get("stock").map_err(storage)?;
            if stock < i64::from(item.quantity) {
                return Err(AdapterError::Invalid(format!(
                    "Insufficient stock for {name}. Available: {stock}."
                )));
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO orders (
                order_number, customer_id, customer_name, customer_email, customer_phone,
                customer_address, items, subtotal, tax, shipping, total,
                status, payment_status, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind("PENDING")
        .bind(order.customer.id)
        .bind(&order.customer.name)
        .bind(order.customer.email.as_deref())
        .bind(order.customer.phone.as_deref())
        .bind(order.customer.address.as_deref())
        .bind(&items_json)
        .bind(order.totals.subtotal.to_string())
        .bind(order.totals.tax.to_string())
        .bind(order.totals.shipping.to_string())
        .bind(order.totals.total.to_string())
        .bind(OrderStatus::Pending.as_str())
        .bind(PaymentStatus::Pending.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        let order_id = inserted.last_insert_rowid();
        sqlx::query("UPDATE orders SET order_number = ? WHERE id = ?")
            .bind(Order::number_for_id(order_id))
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        for item in &order.items {
            let row = sqlx::query("SELECT stock FROM products WHERE id = ?")
                .bind(item.product_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(storage)?;
            let previous_stock: i64 = row.try_get("stock").map_err(storage)?;
            let new_stock = previous_stock - i64::from(item.quantity);

            sqlx::query(
                "UPDATE products
                 SET stock = ?,
                     status = CASE WHEN ? <= 0 THEN 'out_of_stock' ELSE status END,
                     updated_at = ?
                 WHERE id = ?",
            )
            .bind(new_stock)
            .bind(new_stock)
            .bind(&now)
            .bind(item.product_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

            sqlx::query(
                "INSERT INTO inventory_log (
                    product_id, change_amount, previous_stock, new_stock, change_type,
                    order_id, created_at
                 ) VALUES (?, ?, ?, ?, 'order', ?, ?)",
            )
            .bind(item.product_id)
            .bind(-i64::from(item.quantity))
            .bind(previous_stock)
            .bind(new_stock)
            .bind(order_id)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;

        self.get_order(order_id).await?.ok_or_else(|| {
            AdapterError::Storage(format!("order {order_id} vanished after insert"))
        })
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, AdapterError> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_status(
        &self,
        id: i64,
        status: OrderStatus,
        notes: Option<&str>,
    ) -> Result<Order, AdapterError> {
        sqlx::query(
            "UPDATE orders
             SET status = ?,
                 notes = COALESCE(?, notes),
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        self.get_order(id)
            .await?
            .ok_or_else(|| AdapterError::NotFound(format!("Order {id} was not found.")))
    }
}

pub(crate) fn order_from_row(row: &SqliteRow) -> Result<Order, AdapterError> {
    let status_raw: String = row.try_get("status").map_err(storage)?;
    let status = OrderStatus::parse(&status_raw)
        .ok_or_else(|| AdapterError::Storage(format!("unknown order status `{status_raw}`")))?;

    let payment_status_raw: String = row.try_get("payment_status").map_err(storage)?;
    let payment_status = PaymentStatus::parse(&payment_status_raw).ok_or_else(|| {
        AdapterError::Storage(format!("unknown payment status `{payment_status_raw}`"))
    })?;

    let id: i64 = row.try_get("id").map_err(storage)?;
    let order_number: String = row.try_get("order_number").map_err(storage)?;

    Ok(Order {
        id,
        order_number: if order_number.is_empty() || order_number == "PENDING" {
            Order::number_for_id(id)
        } else {
            order_number
        },
        customer: Customer {
            id: row.try_get("customer_id").map_err(storage)?,
            name: row
                .try_get::<Option<String>, _>("customer_name")
                .map_err(storage)?
                .unwrap_or_default(),
            email: row.try_get("customer_email").map_err(storage)?,
            phone: row.try_get("customer_phone").map_err(storage)?,
            address: row.try_get("customer_address").map_err(storage)?,
            metadata: serde_json::Map::new(),
        },
        items: json_cart_items(row.try_get("items").map_err(storage)?),
        totals: OrderTotals {
            subtotal: decimal_column(row, "subtotal")?,
            tax: decimal_column(row, "tax")?,
            shipping: decimal_column(row, "shipping")?,
            total: decimal_column(row, "total")?,
        },
        status,
        payment_status,
        payment_id: row.try_get("payment_id").map_err(storage)?,
        payment_link: row.try_get("payment_link").map_err(storage)?,
        notes: row.try_get("notes").map_err(storage)?,
        created_at: timestamp_column(row, "created_at")?,
        updated_at: timestamp_column(row, "updated_at")?,
    })
}
