use chrono::Utc;
use rust_decimal::Decimal;

use vendi_core::{Product, ProductStatus};

use crate::DbPool;

/// Deterministic apparel dataset used by `vendi seed`, the demo
/// catalog, and the end-to-end tests. Product ids are fixed so
/// scripted conversations can reference them.
pub fn demo_products() -> Vec<Product> {
    vec![
        Product {
            id: 1,
            name: "Classic Cotton T-Shirt".to_string(),
            description: "Midweight crewneck tee in combed cotton.".to_string(),
            price: Decimal::new(25, 0),
            stock: 50,
            category: Some("t-shirts".to_string()),
            images: vec!["https://cdn.example.com/products/classic-tee.jpg".to_string()],
            colors: vec!["black".to_string(), "white".to_string(), "navy".to_string()],
            sizes: vec!["S".to_string(), "M".to_string(), "L".to_string(), "XL".to_string()],
            status: ProductStatus::Active,
        },
        Product {
            id: 2,
            name: "Zip Fleece Hoodie".to_string(),
            description: "Full-zip hoodie with brushed fleece lining.".to_string(),
            price: Decimal::new(45, 0),
            stock: 30,
            category: Some("hoodies".to_string()),
            images: vec!["https://cdn.example.com/products/zip-hoodie.jpg".to_string()],
            colors: vec!["black".to_string(), "heather".to_string()],
            sizes: vec!["S".to_string(), "M".to_string(), "L".to_string(), "XL".to_string()],
            status: ProductStatus::Active,
        },
        Product {
            id: 3,
            name: "Pullover Hoodie".to_string(),
            description: "Heavyweight pullover with kangaroo pocket.".to_string(),
            price: Decimal::new(40, 0),
            stock: 25,
            category: Some("hoodies".to_string()),
            images: vec![],
            colors: vec!["olive".to_string(), "black".to_string()],
            sizes: vec!["M".to_string(), "L".to_string(), "XL".to_string()],
            status: ProductStatus::Active,
        },
        Product {
            id: 4,
            name: "Canvas Baseball Cap".to_string(),
            description: "Six-panel cap with adjustable strap.".to_string(),
            price: Decimal::new(18, 0),
            stock: 60,
            category: Some("caps".to_string()),
            images: vec![],
            colors: vec!["khaki".to_string(), "navy".to_string()],
            sizes: vec![],
            status: ProductStatus::Active,
        },
        Product {
            id: 5,
            name: "Graphic Print T-Shirt".to_string(),
            description: "Limited-run screen print on a classic tee.".to_string(),
            price: Decimal::new(29, 0),
            stock: 40,
            category: Some("t-shirts".to_string()),
            images: vec![],
            colors: vec!["white".to_string()],
            sizes: vec!["S".to_string(), "M".to_string(), "L".to_string()],
            status: ProductStatus::Active,
        },
        Product {
            id: 6,
            name: "Wool Beanie".to_string(),
            description: "Ribbed knit beanie, one size.".to_string(),
            price: Decimal::new(15, 0),
            stock: 0,
            category: Some("caps".to_string()),
            images: vec![],
            colors: vec!["charcoal".to_string()],
            sizes: vec![],
            status: ProductStatus::OutOfStock,
        },
    ]
}

#[derive(Clone, Copy, Debug)]
pub struct SeedResult {
    pub products_seeded: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct SeedVerification {
    pub all_present: bool,
    pub product_count: i64,
}

pub struct DemoCatalog;

impl DemoCatalog {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, sqlx::Error> {
        let products = demo_products();
        let now = Utc::now().to_rfc3339();

        for product in &products {
            sqlx::query(
                "INSERT INTO products (
                    id, name, description, price, stock, category,
                    images, colors, sizes, status, created_at, updated_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    price = excluded.price,
                    stock = excluded.stock,
                    category = excluded.category,
                    images = excluded.images,
                    colors = excluded.colors,
                    sizes = excluded.sizes,
                    status = excluded.status,
                    updated_at = excluded.updated_at",
            )
            .bind(product.id)
            .bind(&product.name)
            .bind(&product.description)
            .bind(product.price.to_string())
            .bind(product.stock)
            .bind(product.category.as_deref())
            .bind(serde_json::to_string(&product.images).unwrap_or_else(|_| "[]".to_string()))
            .bind(serde_json::to_string(&product.colors).unwrap_or_else(|_| "[]".to_string()))
            .bind(serde_json::to_string(&product.sizes).unwrap_or_else(|_| "[]".to_string()))
            .bind(product.status.as_str())
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await?;
        }

        Ok(SeedResult { products_seeded: products.len() })
    }

    pub async fn verify(pool: &DbPool) -> Result<SeedVerification, sqlx::Error> {
        let expected = demo_products().len() as i64;
        let (product_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
            .fetch_one(pool)
            .await?;

        Ok(SeedVerification { all_present: product_count >= expected, product_count })
    }
}
