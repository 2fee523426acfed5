use async_trait::async_trait;

use crate::domain::customer::{Customer, CustomerProfile};
use crate::domain::order::{NewOrder, Order, OrderStatus, OrderTotals};
use crate::domain::payment::{Payment, PaymentRequest, PaymentStatus};
use crate::domain::product::{Availability, Product, SearchFilters};
use crate::domain::session::{CartItem, Session};
use crate::errors::{AdapterError, SessionStoreError};
use crate::receipts::{ReceiptAnalysis, ReceiptDecision};

/// Product catalog collaborator.
#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    async fn search_products(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<Product>, AdapterError>;

    async fn get_product(&self, id: i64) -> Result<Option<Product>, AdapterError>;

    async fn check_availability(&self, id: i64, quantity: u32)
        -> Result<Availability, AdapterError>;

    async fn related_products(&self, id: i64, limit: u32) -> Result<Vec<Product>, AdapterError>;
}

/// Order persistence and totals collaborator.
#[async_trait]
pub trait OrderAdapter: Send + Sync {
    async fn calculate_totals(
        &self,
        items: &[CartItem],
        customer: Option<&Customer>,
    ) -> Result<OrderTotals, AdapterError>;

    async fn create_order(&self, order: NewOrder) -> Result<Order, AdapterError>;

    async fn get_order(&self, id: i64) -> Result<Option<Order>, AdapterError>;

    async fn update_status(
        &self,
        id: i64,
        status: OrderStatus,
        notes: Option<&str>,
    ) -> Result<Order, AdapterError>;
}

/// Customer identity collaborator.
#[async_trait]
pub trait CustomerAdapter: Send + Sync {
    /// Resolves a canonical customer for the given identity (email or
    /// phone required), creating one on first contact.
    async fn get_or_create(&self, profile: &CustomerProfile) -> Result<Customer, AdapterError>;
}

/// What the dispatcher hands to `PaymentAdapter::process_receipt`
/// after the decision policy has run.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceiptReport {
    pub decision: ReceiptDecision,
    pub confidence: f64,
    pub reason: String,
    pub status: PaymentStatus,
    pub analysis: ReceiptAnalysis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessedReceipt {
    pub verified: bool,
    pub status: PaymentStatus,
}

/// Payment collaborator.
#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    async fn create_payment(&self, request: PaymentRequest) -> Result<Payment, AdapterError>;

    async fn process_receipt(
        &self,
        order_id: i64,
        receipt_ref: &str,
        report: &ReceiptReport,
    ) -> Result<ProcessedReceipt, AdapterError>;
}

/// Opaque key-value session persistence with an expiry side channel.
/// `save` and `update_ttl` are both called on every persist so the
/// contract stays backend-agnostic, whether or not the backend folds
/// expiry into its write.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>, SessionStoreError>;

    async fn save(&self, id: &str, session: &Session) -> Result<(), SessionStoreError>;

    async fn delete(&self, id: &str) -> Result<(), SessionStoreError>;

    async fn update_ttl(&self, id: &str, ttl_secs: u64) -> Result<(), SessionStoreError>;
}
