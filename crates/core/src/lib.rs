pub mod adapters;
pub mod config;
pub mod domain;
pub mod errors;
pub mod intent;
pub mod llm;
pub mod metadata;
pub mod receipts;

pub use adapters::{
    CatalogAdapter, CustomerAdapter, OrderAdapter, PaymentAdapter, ProcessedReceipt,
    ReceiptReport, SessionStore,
};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
pub use domain::customer::{Customer, CustomerProfile};
pub use domain::order::{NewOrder, Order, OrderStatus, OrderTotals};
pub use domain::payment::{Payment, PaymentRequest, PaymentStatus};
pub use domain::product::{Availability, Product, ProductStatus, SearchFilters};
pub use domain::session::{line_id, Cart, CartItem, Role, Session, TurnRecord};
pub use errors::{AdapterError, ModelError, SessionStoreError};
pub use intent::{normalize_confidence, Entities, Intent, IntentResult};
pub use llm::{extract_json_object, CompletionOptions, ModelClient};
pub use metadata::TurnMetadata;
pub use receipts::{
    clamp_unit, ReceiptAnalysis, ReceiptDecision, ReceiptPolicy, ReceiptValidity,
};

// Re-exported so downstream crates share one chrono/decimal surface.
pub use chrono;
pub use rust_decimal;
