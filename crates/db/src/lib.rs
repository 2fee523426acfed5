pub mod adapters;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod session;

pub use adapters::{
    compute_totals, InMemoryCatalogAdapter, InMemoryCustomerAdapter, InMemoryOrderAdapter,
    InMemoryPaymentAdapter, SqlCatalogAdapter, SqlCustomerAdapter, SqlOrderAdapter,
    SqlPaymentAdapter,
};
pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{demo_products, DemoCatalog, SeedResult, SeedVerification};
pub use session::{MemorySessionStore, SqlSessionStore};
