use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use vendi_core::{
    AdapterError, Availability, CatalogAdapter, Product, ProductStatus, SearchFilters,
};

use super::{decimal_column, json_string_list, storage};
use crate::DbPool;

pub struct SqlCatalogAdapter {
    pool: DbPool,
}

impl SqlCatalogAdapter {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogAdapter for SqlCatalogAdapter {
    async fn search_products(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Product>, AdapterError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM products WHERE 1 = 1");

        let query = query.trim();
        if !query.is_empty() {
            let like = format!("%{query}%");
            builder.push(" AND (name LIKE ");
            builder.push_bind(like.clone());
            builder.push(" OR description LIKE ");
            builder.push_bind(like.clone());
            builder.push(" OR category LIKE ");
            builder.push_bind(like);
            builder.push(")");
        }

        if let Some(category) = &filters.category {
            builder.push(" AND category = ");
            builder.push_bind(category.clone());
        }
        if let Some(min_price) = filters.min_price {
            builder.push(" AND CAST(price AS REAL) >= ");
            builder.push_bind(min_price.to_f64().unwrap_or(0.0));
        }
        if let Some(max_price) = filters.max_price {
            builder.push(" AND CAST(price AS REAL) <= ");
            builder.push_bind(max_price.to_f64().unwrap_or(f64::MAX));
        }
        if !filters.include_inactive {
            builder.push(" AND status = ");
            builder.push_bind("active");
        }

        builder.push(" ORDER BY id");

        let rows = builder.build().fetch_all(&self.pool).await.map_err(storage)?;
        rows.iter().map(product_from_row).collect()
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>, AdapterError> {
        let row = sqlx::query("SELECT * FROM products WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn check_availability(
        &self,
        id: i64,
        quantity: u32,
    ) -> Result<Availability, AdapterError> {
        let Some(product) = self.get_product(id).await? else {
            return Ok(Availability { available: false, stock: 0 });
        };

        Ok(Availability {
            available: product.stock >= i64::from(quantity)
                && product.status == ProductStatus::Active,
            stock: product.stock,
        })
    }

    async fn related_products(&self, id: i64, limit: u32) -> Result<Vec<Product>, AdapterError> {
        let Some(product) = self.get_product(id).await? else {
            return Ok(Vec::new());
        };

        let rows = if let Some(category) = &product.category {
            sqlx::query(
                "SELECT * FROM products
                 WHERE category = ? AND id != ? AND status = 'active'
                 ORDER BY id DESC
                 LIMIT ?",
            )
            .bind(category)
            .bind(id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?
        } else {
            sqlx::query(
                "SELECT * FROM products
                 WHERE id != ? AND status = 'active'
                 ORDER BY id DESC
                 LIMIT ?",
            )
            .bind(id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?
        };

        rows.iter().map(product_from_row).collect()
    }
}

pub(crate) fn product_from_row(row: &SqliteRow) -> Result<Product, AdapterError> {
    let stock: i64 = row.try_get("stock").map_err(storage)?;
    let status_raw: String = row.try_get("status").map_err(storage)?;
    // Rows written before the status column was backfilled derive it
    // from stock.
    let status = ProductStatus::parse(&status_raw).unwrap_or(if stock > 0 {
        ProductStatus::Active
    } else {
        ProductStatus::OutOfStock
    });

    Ok(Product {
        id: row.try_get("id").map_err(storage)?,
        name: row.try_get("name").map_err(storage)?,
        description: row.try_get::<Option<String>, _>("description").map_err(storage)?.unwrap_or_default(),
        price: decimal_column(row, "price")?,
        stock,
        category: row.try_get("category").map_err(storage)?,
        images: json_string_list(row.try_get("images").map_err(storage)?),
        colors: json_string_list(row.try_get("colors").map_err(storage)?),
        sizes: json_string_list(row.try_get("sizes").map_err(storage)?),
        status,
    })
}

#[cfg(test)]
mod tests {
    use vendi_core::{CatalogAdapter, SearchFilters};

    use crate::fixtures::DemoCatalog;
    use crate::{connect_with_settings, migrations};

    use super::SqlCatalogAdapter;

    async fn seeded_catalog() -> SqlCatalogAdapter {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        DemoCatalog::load(&pool).await.expect("seed");
        SqlCatalogAdapter::new(pool)
    }

    #[tokio::test]
    async fn search_matches_name_description_and_category() {
        let catalog = seeded_catalog().await;

        let hits = catalog
            .search_products("t-shirt", &SearchFilters::default())
            .await
            .expect("search");
        assert!(!hits.is_empty());
        assert!(hits.iter().any(|product| product.name.contains("T-Shirt")));
    }

    #[tokio::test]
    async fn category_filter_narrows_results() {
        let catalog = seeded_catalog().await;

        let filters = SearchFilters::for_category(Some("hoodies".to_string()));
        let hits = catalog.search_products("", &filters).await.expect("search");
        assert!(hits.iter().all(|product| product.category.as_deref() == Some("hoodies")));
        assert!(!hits.is_empty());
    }

    #[tokio::test]
    async fn availability_respects_stock_and_status() {
        let catalog = seeded_catalog().await;

        let availability = catalog.check_availability(1, 1).await.expect("availability");
        assert!(availability.available);

        let too_many = catalog.check_availability(1, 10_000).await.expect("availability");
        assert!(!too_many.available);

        let missing = catalog.check_availability(999, 1).await.expect("availability");
        assert!(!missing.available);
        assert_eq!(missing.stock, 0);
    }

    #[tokio::test]
    async fn related_products_share_category_and_exclude_anchor() {
        let catalog = seeded_catalog().await;

        let related = catalog.related_products(1, 5).await.expect("related");
        assert!(related.iter().all(|product| product.id != 1));
    }
}
