use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use vendi_core::{AdapterError, Customer, CustomerAdapter, CustomerProfile};

use super::storage;
use crate::DbPool;

pub struct SqlCustomerAdapter {
    pool: DbPool,
}

impl SqlCustomerAdapter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_column(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Customer>, AdapterError> {
        let sql = match column {
            "email" => "SELECT * FROM customers WHERE email = ?",
            "phone" => "SELECT * FROM customers WHERE phone = ?",
            _ => unreachable!("customer lookup is keyed by email or phone"),
        };
        let row =
            sqlx::query(sql).bind(value).fetch_optional(&self.pool).await.map_err(storage)?;
        row.as_ref().map(customer_from_row).transpose()
    }
}

#[async_trait]
impl CustomerAdapter for SqlCustomerAdapter {
    async fn get_or_create(&self, profile: &CustomerProfile) -> Result<Customer, AdapterError> {
        if !profile.has_identity() {
            return Err(AdapterError::Invalid(
                "Customer identifier requires email or phone.".to_string(),
            ));
        }

        if let Some(email) = profile.email.as_deref() {
            if let Some(existing) = self.find_by_column("email", email).await? {
                return Ok(existing);
            }
        }
        if let Some(phone) = profile.phone.as_deref() {
            if let Some(existing) = self.find_by_column("phone", phone).await? {
                return Ok(existing);
            }
        }

        let now = Utc::now().to_rfc3339();
        let inserted = sqlx::query(
            "INSERT INTO customers (name, email, phone, address, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, '{}', ?, ?)",
        )
        .bind(profile.name.as_deref().unwrap_or("Guest Customer"))
        .bind(profile.email.as_deref())
        .bind(profile.phone.as_deref())
        .bind(profile.address.as_deref())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        let id = inserted.last_insert_rowid();
        let row = sqlx::query("SELECT * FROM customers WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        customer_from_row(&row)
    }
}

fn customer_from_row(row: &SqliteRow) -> Result<Customer, AdapterError> {
    let metadata_raw: Option<String> = row.try_get("metadata").map_err(storage)?;
    let metadata = metadata_raw
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_else(serde_json::Map::new);

    Ok(Customer {
        id: Some(row.try_get("id").map_err(storage)?),
        name: row.try_get::<Option<String>, _>("name").map_err(storage)?.unwrap_or_default(),
        email: row.try_get("email").map_err(storage)?,
        phone: row.try_get("phone").map_err(storage)?,
        address: row.try_get("address").map_err(storage)?,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use vendi_core::{AdapterError, CustomerAdapter, CustomerProfile};

    use crate::{connect_with_settings, migrations};

    use super::SqlCustomerAdapter;

    async fn adapter() -> SqlCustomerAdapter {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SqlCustomerAdapter::new(pool)
    }

    #[tokio::test]
    async fn creates_once_then_reuses_by_email() {
        let adapter = adapter().await;
        let profile = CustomerProfile {
            email: Some("dana@example.com".to_string()),
            name: Some("Dana".to_string()),
            ..CustomerProfile::default()
        };

        let first = adapter.get_or_create(&profile).await.expect("create");
        let second = adapter.get_or_create(&profile).await.expect("reuse");
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Dana");
    }

    #[tokio::test]
    async fn phone_lookup_and_guest_name_default() {
        let adapter = adapter().await;
        let profile =
            CustomerProfile { phone: Some("+15550100".to_string()), ..CustomerProfile::default() };

        let created = adapter.get_or_create(&profile).await.expect("create");
        assert_eq!(created.name, "Guest Customer");

        let found = adapter.get_or_create(&profile).await.expect("find");
        assert_eq!(created.id, found.id);
    }

    #[tokio::test]
    async fn identity_is_required() {
        let adapter = adapter().await;
        let error = adapter
            .get_or_create(&CustomerProfile::default())
            .await
            .expect_err("must require identity");
        assert!(matches!(error, AdapterError::Invalid(_)));
    }
}
