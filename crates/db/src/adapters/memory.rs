use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use vendi_core::config::OrdersConfig;
use vendi_core::{
    AdapterError, Availability, CartItem, CatalogAdapter, Customer, CustomerAdapter,
    CustomerProfile, NewOrder, Order, OrderAdapter, OrderStatus, OrderTotals, Payment,
    PaymentAdapter, PaymentRequest, PaymentStatus, ProcessedReceipt, Product, ProductStatus,
    ReceiptDecision, ReceiptReport, SearchFilters,
};

use super::compute_totals;

/// Catalog held in memory. Used by tests, demos, and deployments that
/// load their product set at startup.
#[derive(Default)]
pub struct InMemoryCatalogAdapter {
    products: RwLock<Vec<Product>>,
}

impl InMemoryCatalogAdapter {
    pub fn with_products(products: Vec<Product>) -> Self {
        Self { products: RwLock::new(products) }
    }

    pub async fn insert(&self, product: Product) {
        let mut products = self.products.write().await;
        products.retain(|existing| existing.id != product.id);
        products.push(product);
    }

    pub(crate) async fn deduct_stock(&self, id: i64, quantity: u32) -> Result<(), AdapterError> {
        let mut products = self.products.write().await;
        let product = products
            .iter_mut()
            .find(|product| product.id == id)
            .ok_or_else(|| AdapterError::NotFound(format!("Product not found: {id}")))?;

        let quantity = i64::from(quantity);
        if product.stock < quantity {
            return Err(AdapterError::Invalid(format!(
                "Insufficient stock for {}. Available: {}.",
                product.name, product.stock
            )));
        }
        product.stock -= quantity;
        if product.stock <= 0 {
            product.status = ProductStatus::OutOfStock;
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogAdapter for InMemoryCatalogAdapter {
    async fn search_products(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Product>, AdapterError> {
        let query = query.trim().to_lowercase();
        let products = self.products.read().await;

        Ok(products
            .iter()
            .filter(|product| {
                if !query.is_empty() {
                    let haystack = format!(
                        "{} {} {}",
                        product.name.to_lowercase(),
                        product.description.to_lowercase(),
                        product.category.as_deref().unwrap_or("").to_lowercase()
                    );
                    if !haystack.contains(&query) {
                        return false;
                    }
                }
                if let Some(category) = &filters.category {
                    if !product
                        .category
                        .as_deref()
                        .is_some_and(|value| value.eq_ignore_ascii_case(category))
                    {
                        return false;
                    }
                }
                if let Some(min_price) = filters.min_price {
                    if product.price < min_price {
                        return false;
                    }
                }
                if let Some(max_price) = filters.max_price {
                    if product.price > max_price {
                        return false;
                    }
                }
                filters.include_inactive || product.status == ProductStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>, AdapterError> {
        let products = self.products.read().await;
        Ok(products.iter().find(|product| product.id == id).cloned())
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
        let Some(anchor) = self.get_product(id).await? else {
            return Ok(Vec::new());
        };

        let products = self.products.read().await;
        let mut related: Vec<Product> = products
            .iter()
            .filter(|product| {
                product.id != id
                    && product.status == ProductStatus::Active
                    && (anchor.category.is_none() || product.category == anchor.category)
            })
            .cloned()
            .collect();
        related.sort_by_key(|product| std::cmp::Reverse(product.id));
        related.truncate(limit as usize);
        Ok(related)
    }
}

#[derive(Default)]
struct OrderState {
    orders: HashMap<i64, Order>,
    next_id: i64,
}

/// Order book held in memory. When constructed with a catalog it
/// asserts and deducts stock the way the SQL adapter does; without
/// one it only records orders.
pub struct InMemoryOrderAdapter {
    policy: OrdersConfig,
    catalog: Option<Arc<InMemoryCatalogAdapter>>,
    state: RwLock<OrderState>,
}

impl InMemoryOrderAdapter {
    pub fn new(policy: OrdersConfig) -> Self {
        Self { policy, catalog: None, state: RwLock::new(OrderState::default()) }
    }

    pub fn with_catalog(policy: OrdersConfig, catalog: Arc<InMemoryCatalogAdapter>) -> Self {
        Self { policy, catalog: Some(catalog), state: RwLock::new(OrderState::default()) }
    }

    pub(crate) async fn attach_payment(
        &self,
        order_id: i64,
        payment_id: &str,
        payment_link: &str,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AdapterError::NotFound(format!("Order {order_id} not found.")))?;
        order.payment_id = Some(payment_id.to_string());
        order.payment_link = Some(payment_link.to_string());
        order.payment_status = PaymentStatus::Pending;
        order.updated_at = Utc::now();
        Ok(())
    }

    pub(crate) async fn set_payment_status(
        &self,
        order_id: i64,
        status: PaymentStatus,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AdapterError::NotFound(format!("Order {order_id} not found.")))?;
        order.payment_status = status;
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl OrderAdapter for InMemoryOrderAdapter {
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

        if let Some(catalog) = &self.catalog {
            for item in &order.items {
                let product = catalog.get_product(item.product_id).await?.ok_or_else(|| {
                    AdapterError::NotFound(format!("Product not found: {}", item.product_id))
                })?;
                if product.stock < i64::from(item.quantity) {
                    return Err(AdapterError::Invalid(format!(
                        "Insufficient stock for {}. Available: {}.",
                        product.name, product.stock
                    )));
                }
            }
            for item in &order.items {
                catalog.deduct_stock(item.product_id, item.quantity).await?;
            }
        }

        let now = Utc::now();
        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;

        let created = Order {
            id,
            order_number: Order::number_for_id(id),
            customer: order.customer,
            items: order.items,
            totals: order.totals,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            payment_link: None,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        state.orders.insert(id, created.clone());
        Ok(created)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>, AdapterError> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: i64,
        status: OrderStatus,
        notes: Option<&str>,
    ) -> Result<Order, AdapterError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| AdapterError::NotFound(format!("Order {id} was not found.")))?;
        order.status = status;
        if let Some(notes) = notes {
            order.notes = Some(notes.to_string());
        }
        order.updated_at = Utc::now();
        Ok(order.clone())
    }
}

#[derive(Default)]
struct CustomerState {
    customers: Vec<Customer>,
    next_id: i64,
}

#[derive(Default)]
pub struct InMemoryCustomerAdapter {
    state: RwLock<CustomerState>,
}

#[async_trait]
impl CustomerAdapter for InMemoryCustomerAdapter {
    async fn get_or_create(&self, profile: &CustomerProfile) -> Result<Customer, AdapterError> {
        if !profile.has_identity() {
            return Err(AdapterError::Invalid(
                "Customer identifier requires email or phone.".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let found = state.customers.iter().find(|customer| {
            (profile.email.is_some() && customer.email == profile.email)
                || (profile.phone.is_some() && customer.phone == profile.phone)
        });
        if let Some(existing) = found {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let created = Customer {
            id: Some(state.next_id),
            name: profile.name.clone().unwrap_or_else(|| "Guest Customer".to_string()),
            email: profile.email.clone(),
            phone: profile.phone.clone(),
            address: profile.address.clone(),
            metadata: serde_json::Map::new(),
        };
        state.customers.push(created.clone());
        Ok(created)
    }
}

#[derive(Clone, Debug)]
pub struct RecordedReceipt {
    pub order_id: i64,
    pub receipt_ref: String,
    pub report: ReceiptReport,
}

#[derive(Default)]
struct PaymentState {
    payments: HashMap<String, Payment>,
    receipts: Vec<RecordedReceipt>,
    next_id: u64,
}

/// Payment collaborator held in memory. When constructed with an
/// order book it enforces order existence and mirrors status updates
/// onto the order, matching the SQL adapter.
pub struct InMemoryPaymentAdapter {
    checkout_base_url: String,
    orders: Option<Arc<InMemoryOrderAdapter>>,
    state: RwLock<PaymentState>,
}

impl InMemoryPaymentAdapter {
    pub fn new(checkout_base_url: impl Into<String>) -> Self {
        Self {
            checkout_base_url: checkout_base_url.into(),
            orders: None,
            state: RwLock::new(PaymentState::default()),
        }
    }

    pub fn with_orders(
        checkout_base_url: impl Into<String>,
        orders: Arc<InMemoryOrderAdapter>,
    ) -> Self {
        Self {
            checkout_base_url: checkout_base_url.into(),
            orders: Some(orders),
            state: RwLock::new(PaymentState::default()),
        }
    }

    pub async fn recorded_receipts(&self) -> Vec<RecordedReceipt> {
        self.state.read().await.receipts.clone()
    }
}

#[async_trait]
impl PaymentAdapter for InMemoryPaymentAdapter {
    async fn create_payment(&self, request: PaymentRequest) -> Result<Payment, AdapterError> {
        if let Some(orders) = &self.orders {
            if orders.get_order(request.order_id).await?.is_none() {
                return Err(AdapterError::NotFound(format!(
                    "Order {} not found.",
                    request.order_id
                )));
            }
        }

        let mut state = self.state.write().await;
        state.next_id += 1;
        let payment_id = format!("pay_{:06}", state.next_id);
        let payment_link = format!("{}/{payment_id}", self.checkout_base_url);

        let payment = Payment {
            id: payment_id.clone(),
            order_id: request.order_id,
            amount_minor: request.amount_minor,
            currency: request.currency,
            status: PaymentStatus::Pending,
            payment_link: payment_link.clone(),
            created_at: Utc::now(),
        };
        state.payments.insert(payment_id.clone(), payment.clone());
        drop(state);

        if let Some(orders) = &self.orders {
            orders.attach_payment(request.order_id, &payment_id, &payment_link).await?;
        }

        Ok(payment)
    }

    async fn process_receipt(
        &self,
        order_id: i64,
        receipt_ref: &str,
        report: &ReceiptReport,
    ) -> Result<ProcessedReceipt, AdapterError> {
        if let Some(orders) = &self.orders {
            orders.set_payment_status(order_id, report.status).await?;
        }

        let mut state = self.state.write().await;
        state.receipts.push(RecordedReceipt {
            order_id,
            receipt_ref: receipt_ref.to_string(),
            report: report.clone(),
        });

        Ok(ProcessedReceipt {
            verified: report.decision == ReceiptDecision::Approved,
            status: report.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use vendi_core::config::OrdersConfig;
    use vendi_core::{
        line_id, AdapterError, CartItem, CatalogAdapter, Customer, NewOrder, OrderAdapter,
        PaymentAdapter, PaymentRequest, SearchFilters,
    };

    use crate::fixtures::demo_products;

    use super::{InMemoryCatalogAdapter, InMemoryOrderAdapter, InMemoryPaymentAdapter};

    fn policy() -> OrdersConfig {
        OrdersConfig {
            tax_rate: Decimal::new(8, 2),
            free_shipping_threshold: Decimal::new(50, 0),
            shipping_cost: Decimal::new(5, 0),
        }
    }

    fn tee_line(quantity: u32) -> CartItem {
        CartItem {
            line_id: line_id(1, None, None),
            product_id: 1,
            name: "Classic Cotton T-Shirt".to_string(),
            price: Decimal::new(25, 0),
            quantity,
            color: None,
            size: None,
            category: Some("t-shirts".to_string()),
        }
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_respects_filters() {
        let catalog = InMemoryCatalogAdapter::with_products(demo_products());

        let hits = catalog.search_products("T-SHIRT", &SearchFilters::default()).await.expect("ok");
        assert!(!hits.is_empty());

        let filtered = catalog
            .search_products(
                "",
                &SearchFilters {
                    max_price: Some(Decimal::new(20, 0)),
                    ..SearchFilters::default()
                },
            )
            .await
            .expect("ok");
        assert!(filtered.iter().all(|product| product.price <= Decimal::new(20, 0)));
    }

    #[tokio::test]
    async fn order_creation_deducts_shared_catalog_stock() {
        let catalog = Arc::new(InMemoryCatalogAdapter::with_products(demo_products()));
        let orders = InMemoryOrderAdapter::with_catalog(policy(), Arc::clone(&catalog));

        let items = vec![tee_line(2)];
        let totals = orders.calculate_totals(&items, None).await.expect("totals");
        let order = orders
            .create_order(NewOrder { items, customer: Customer::default(), totals })
            .await
            .expect("order");

        assert_eq!(order.order_number, "ORD-000001");
        let product = catalog.get_product(1).await.expect("ok").expect("product");
        assert_eq!(product.stock, 48);
    }

    #[tokio::test]
    async fn over_order_fails_before_any_mutation() {
        let catalog = Arc::new(InMemoryCatalogAdapter::with_products(demo_products()));
        let orders = InMemoryOrderAdapter::with_catalog(policy(), Arc::clone(&catalog));

        let items = vec![tee_line(10_000)];
        let totals = orders.calculate_totals(&items, None).await.expect("totals");
        let error = orders
            .create_order(NewOrder { items, customer: Customer::default(), totals })
            .await
            .expect_err("insufficient stock");
        assert!(matches!(error, AdapterError::Invalid(_)));

        let product = catalog.get_product(1).await.expect("ok").expect("product");
        assert_eq!(product.stock, 50);
    }

    #[tokio::test]
    async fn payments_mirror_onto_the_order_book() {
        let catalog = Arc::new(InMemoryCatalogAdapter::with_products(demo_products()));
        let orders =
            Arc::new(InMemoryOrderAdapter::with_catalog(policy(), Arc::clone(&catalog)));
        let payments =
            InMemoryPaymentAdapter::with_orders("https://pay.example.com/checkout", Arc::clone(&orders));

        let items = vec![tee_line(1)];
        let totals = orders.calculate_totals(&items, None).await.expect("totals");
        let order = orders
            .create_order(NewOrder { items, customer: Customer::default(), totals })
            .await
            .expect("order");

        let payment = payments
            .create_payment(PaymentRequest {
                amount_minor: 3_200,
                currency: "USD".to_string(),
                order_id: order.id,
                customer: Customer::default(),
            })
            .await
            .expect("payment");

        let stored = orders.get_order(order.id).await.expect("ok").expect("order");
        assert_eq!(stored.payment_link.as_deref(), Some(payment.payment_link.as_str()));
    }
}
