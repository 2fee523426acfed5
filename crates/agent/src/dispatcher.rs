use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use vendi_core::config::{BusinessConfig, PaymentsConfig};
use vendi_core::intent::numeric_value;
use vendi_core::llm::extract_json_object;
use vendi_core::receipts::clamp_unit;
use vendi_core::{
    AdapterError, Cart, CartItem, CatalogAdapter, CompletionOptions, Customer, CustomerAdapter,
    CustomerProfile, Entities, Intent, IntentResult, ModelClient, NewOrder, Order, OrderAdapter,
    OrderTotals, Payment, PaymentAdapter, PaymentRequest, PaymentStatus, Product, ReceiptAnalysis,
    ReceiptDecision, ReceiptPolicy, ReceiptReport, ReceiptValidity, SearchFilters, Session,
    TurnMetadata,
};

use crate::json::scan_confidence;

const RELATED_PRODUCTS_LIMIT: u32 = 5;
const VISION_TEMPERATURE: f32 = 0.1;
const RAW_REASON_LIMIT: usize = 300;

/// The pluggable commerce collaborators. Each is optional; intents
/// that need a missing one fail as a business error, not a crash.
#[derive(Clone, Default)]
pub struct Adapters {
    pub catalog: Option<Arc<dyn CatalogAdapter>>,
    pub orders: Option<Arc<dyn OrderAdapter>>,
    pub customers: Option<Arc<dyn CustomerAdapter>>,
    pub payments: Option<Arc<dyn PaymentAdapter>>,
}

impl Adapters {
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogAdapter>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_orders(mut self, orders: Arc<dyn OrderAdapter>) -> Self {
        self.orders = Some(orders);
        self
    }

    pub fn with_customers(mut self, customers: Arc<dyn CustomerAdapter>) -> Self {
        self.customers = Some(customers);
        self
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentAdapter>) -> Self {
        self.payments = Some(payments);
        self
    }
}

/// Business failures surfaced to the user as an apology. These are
/// captured inside `execute`; the dispatcher itself never raises.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{adapter} adapter is required for {operation}.")]
    MissingAdapter { adapter: &'static str, operation: &'static str },
    #[error("Product not found for add-to-cart request.")]
    ProductNotFound,
    #[error("Insufficient stock for {name}. Available: {stock}.")]
    InsufficientStock { name: String, stock: i64 },
    #[error("Cart is empty.")]
    EmptyCart,
    #[error("Order ID is required to verify a receipt.")]
    ReceiptOrderIdRequired,
    #[error("Receipt URL/path is required to verify a payment receipt.")]
    ReceiptRefRequired,
    #[error("Order ID is required to track an order.")]
    TrackingOrderIdRequired,
    #[error("Order {0} was not found.")]
    OrderNotFound(String),
    #[error("{0}")]
    Adapter(#[from] AdapterError),
}

/// Booleans the caller can branch on without inspecting the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionFlags {
    pub added_to_cart: bool,
    pub removed_from_cart: bool,
    pub proceed_to_checkout: bool,
}

/// Per-intent action payload. Serialized untagged so the envelope
/// carries the shape each intent naturally produces.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionData {
    Products {
        products: Vec<Product>,
    },
    #[serde(rename_all = "camelCase")]
    Inquiry {
        product: Option<Product>,
        related_products: Vec<Product>,
    },
    CartAdded {
        added: bool,
        cart: Cart,
        item: Product,
        quantity: u32,
    },
    CartView {
        items: Vec<CartItem>,
        totals: OrderTotals,
    },
    CartRemoved {
        removed: bool,
        cart: Cart,
    },
    Checkout {
        order: Order,
        payment: Option<Payment>,
        totals: OrderTotals,
    },
    #[serde(rename_all = "camelCase")]
    Receipt {
        order_id: i64,
        receipt_url: String,
        decision: ReceiptDecision,
        confidence: f64,
        payment_status: PaymentStatus,
        verified: bool,
        reason: String,
        validity: ReceiptValidity,
    },
    Tracking {
        order: Order,
    },
    Info {
        info: String,
    },
}

/// Outcome of one dispatched action. Exactly one of `data`/`error`
/// carries the real result.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ActionResult {
    pub actions: ActionFlags,
    pub data: Option<ActionData>,
    pub error: Option<String>,
}

impl Default for ActionData {
    fn default() -> Self {
        ActionData::Info { info: "No action required for this intent.".to_string() }
    }
}

/// Pure business-logic router: intent in, adapter calls out, cart
/// mutations applied to the session. Owns the checkout transaction
/// sequence and the receipt-verification decision policy.
pub struct ActionDispatcher {
    adapters: Adapters,
    model: Arc<dyn ModelClient>,
    business: BusinessConfig,
    payments: PaymentsConfig,
}

impl ActionDispatcher {
    pub fn new(
        adapters: Adapters,
        model: Arc<dyn ModelClient>,
        business: BusinessConfig,
        payments: PaymentsConfig,
    ) -> Self {
        Self { adapters, model, business, payments }
    }

    /// Runs the action for a classified intent. Business errors land
    /// in `ActionResult::error`; this method never fails.
    pub async fn execute(
        &self,
        intent_result: &IntentResult,
        session: &mut Session,
        message: &str,
        metadata: &TurnMetadata,
    ) -> ActionResult {
        let entities = &intent_result.entities;

        let outcome = match intent_result.intent {
            Intent::BrowseProducts => self.browse_products(message, entities).await,
            Intent::ProductInquiry => self.product_inquiry(message, entities).await,
            Intent::AddToCart => self.add_to_cart(session, message, entities).await,
            Intent::ViewCart => self.view_cart(session).await,
            Intent::RemoveFromCart => Ok(self.remove_from_cart(session, entities)),
            Intent::Checkout => self.checkout(session, metadata).await,
            Intent::SubmitPaymentReceipt => self.submit_payment_receipt(entities, metadata).await,
            Intent::TrackOrder => self.track_order(entities, metadata).await,
            Intent::Greeting | Intent::Complaint | Intent::Unclear => Ok(ActionData::default()),
        };

        match outcome {
            Ok(data) => {
                let actions = ActionFlags {
                    added_to_cart: matches!(data, ActionData::CartAdded { added: true, .. }),
                    removed_from_cart: matches!(data, ActionData::CartRemoved { removed: true, .. }),
                    proceed_to_checkout: matches!(data, ActionData::Checkout { .. }),
                };
                ActionResult { actions, data: Some(data), error: None }
            }
            Err(error) => {
                debug!(event_name = "action.business_error", intent = intent_result.intent.as_str(), error = %error);
                ActionResult { actions: ActionFlags::default(), data: None, error: Some(error.to_string()) }
            }
        }
    }

    fn catalog(&self, operation: &'static str) -> Result<&Arc<dyn CatalogAdapter>, ActionError> {
        self.adapters
            .catalog
            .as_ref()
            .ok_or(ActionError::MissingAdapter { adapter: "Product", operation })
    }

    fn orders(&self, operation: &'static str) -> Result<&Arc<dyn OrderAdapter>, ActionError> {
        self.adapters
            .orders
            .as_ref()
            .ok_or(ActionError::MissingAdapter { adapter: "Order", operation })
    }

    async fn browse_products(
        &self,
        message: &str,
        entities: &Entities,
    ) -> Result<ActionData, ActionError> {
        let catalog = self.catalog("browsing products")?;

        let query = entities
            .product_type
            .as_deref()
            .or(entities.category.as_deref())
            .unwrap_or(message);
        let filters = SearchFilters::for_category(entities.category.clone());

        let products = catalog.search_products(query, &filters).await?;
        Ok(ActionData::Products { products })
    }

    async fn product_inquiry(
        &self,
        message: &str,
        entities: &Entities,
    ) -> Result<ActionData, ActionError> {
        let catalog = self.catalog("product inquiry")?;

        let product = self.resolve_product(catalog, message, entities).await?;
        let related_products = match &product {
            Some(product) => {
                catalog.related_products(product.id, RELATED_PRODUCTS_LIMIT).await?
            }
            None => Vec::new(),
        };

        Ok(ActionData::Inquiry { product, related_products })
    }

    async fn add_to_cart(
        &self,
        session: &mut Session,
        message: &str,
        entities: &Entities,
    ) -> Result<ActionData, ActionError> {
        let catalog = self.catalog("add to cart")?;

        let quantity = requested_quantity(entities.quantity);
        let color = entities.color.clone();
        let size = entities.size.clone();

        let product = self
            .resolve_product(catalog, message, entities)
            .await?
            .ok_or(ActionError::ProductNotFound)?;

        let availability = catalog.check_availability(product.id, quantity).await?;
        if !availability.available {
            return Err(ActionError::InsufficientStock {
                name: product.name.clone(),
                stock: availability.stock,
            });
        }

        session.cart.add_line(CartItem::new(&product, quantity, color, size));

        Ok(ActionData::CartAdded {
            added: true,
            cart: session.cart.clone(),
            item: product,
            quantity,
        })
    }

    async fn view_cart(&self, session: &mut Session) -> Result<ActionData, ActionError> {
        let cart = &session.cart;

        let totals = match &self.adapters.orders {
            Some(orders) if !cart.is_empty() => {
                orders.calculate_totals(&cart.items, session.customer.as_ref()).await?
            }
            _ => {
                // Subtotal-only fallback when no totals collaborator
                // is wired in.
                let subtotal = cart.subtotal();
                OrderTotals {
                    subtotal,
                    tax: Decimal::ZERO,
                    shipping: Decimal::ZERO,
                    total: subtotal,
                }
            }
        };

        Ok(ActionData::CartView { items: cart.items.clone(), totals })
    }

    fn remove_from_cart(&self, session: &mut Session, entities: &Entities) -> ActionData {
        let cart = &mut session.cart;

        let removed = match entities.product_id.as_deref() {
            Some(product_id) => cart.remove_product(product_id),
            None => {
                let had_items = !cart.is_empty();
                cart.clear();
                had_items
            }
        };

        ActionData::CartRemoved { removed, cart: cart.clone() }
    }

    async fn checkout(
        &self,
        session: &mut Session,
        metadata: &TurnMetadata,
    ) -> Result<ActionData, ActionError> {
        let orders = self.orders("checkout")?;

        let customer = self.resolve_customer(session, metadata.customer.as_ref()).await?;

        if session.cart.is_empty() {
            return Err(ActionError::EmptyCart);
        }

        let items = session.cart.items.clone();
        let totals = orders.calculate_totals(&items, Some(&customer)).await?;
        let order = orders
            .create_order(NewOrder { items, customer: customer.clone(), totals })
            .await?;

        // Payment is best-effort: the order is authoritative, so a
        // payment-collaborator failure after order creation must not
        // fail the action.
        let payment = match &self.adapters.payments {
            Some(payments) => {
                let amount_minor =
                    (totals.total * Decimal::from(100)).round().to_i64().unwrap_or(0);
                match payments
                    .create_payment(PaymentRequest {
                        amount_minor,
                        currency: self.business.currency.clone(),
                        order_id: order.id,
                        customer,
                    })
                    .await
                {
                    Ok(payment) => Some(payment),
                    Err(error) => {
                        warn!(event_name = "checkout.payment_create_failed", order_id = order.id, error = %error);
                        None
                    }
                }
            }
            None => None,
        };

        session.cart.clear();

        Ok(ActionData::Checkout { order, payment, totals })
    }

    async fn submit_payment_receipt(
        &self,
        entities: &Entities,
        metadata: &TurnMetadata,
    ) -> Result<ActionData, ActionError> {
        let payments = self
            .adapters
            .payments
            .as_ref()
            .ok_or(ActionError::MissingAdapter { adapter: "Payment", operation: "receipt verification" })?;

        let order_id_raw = entities
            .order_id
            .as_deref()
            .or(metadata.order_id.as_deref())
            .ok_or(ActionError::ReceiptOrderIdRequired)?;
        let receipt_url = entities
            .receipt_url
            .as_deref()
            .or(metadata.receipt_url.as_deref())
            .ok_or(ActionError::ReceiptRefRequired)?;

        let order_id = parse_order_id(order_id_raw)?;

        let order = match &self.adapters.orders {
            Some(orders) => {
                let order = orders.get_order(order_id).await?;
                if order.is_none() {
                    return Err(ActionError::OrderNotFound(order_id_raw.to_string()));
                }
                order
            }
            None => None,
        };

        let payment_id_hint = entities
            .payment_id
            .as_deref()
            .or(metadata.payment_id.as_deref())
            .map(str::to_string)
            .or_else(|| order.as_ref().and_then(|order| order.payment_id.clone()));

        let analysis =
            self.analyze_receipt(order_id_raw, receipt_url, order.as_ref(), payment_id_hint).await;

        let policy = ReceiptPolicy::new(
            self.payments.auto_approve_threshold,
            self.payments.auto_reject_threshold,
        );
        let decision = policy.decide(analysis.confidence);
        let payment_status = decision.payment_status();

        let processed = payments
            .process_receipt(
                order_id,
                receipt_url,
                &ReceiptReport {
                    decision,
                    confidence: analysis.confidence,
                    reason: analysis.reason.clone(),
                    status: payment_status,
                    analysis: analysis.clone(),
                },
            )
            .await?;

        Ok(ActionData::Receipt {
            order_id,
            receipt_url: receipt_url.to_string(),
            decision,
            confidence: analysis.confidence,
            payment_status: processed.status,
            verified: processed.verified,
            reason: analysis.reason,
            validity: analysis.validity,
        })
    }

    /// Vision step of receipt verification. Every failure mode maps
    /// to a safe analysis; this never aborts the turn.
    async fn analyze_receipt(
        &self,
        order_id: &str,
        receipt_url: &str,
        order: Option<&Order>,
        payment_id: Option<String>,
    ) -> ReceiptAnalysis {
        if !self.model.supports_vision() {
            return ReceiptAnalysis::neutral(
                "Vision model is unavailable, pending manual verification.",
            );
        }

        let prompt = self.build_receipt_prompt(order_id, order, payment_id.as_deref());
        let options = CompletionOptions::with_temperature(VISION_TEMPERATURE);

        match self.model.analyze_image(receipt_url, &prompt, &options).await {
            Ok(raw) => {
                if let Some(parsed) = extract_json_object(&raw) {
                    let confidence = clamp_unit(
                        parsed
                            .get("validity_score")
                            .or_else(|| parsed.get("confidence"))
                            .or_else(|| parsed.get("score"))
                            .and_then(numeric_value)
                            .unwrap_or(0.5),
                        0.5,
                    );
                    let validity = parsed
                        .get("validity")
                        .or_else(|| parsed.get("classification"))
                        .and_then(serde_json::Value::as_str)
                        .map(ReceiptValidity::parse_lenient)
                        .unwrap_or(ReceiptValidity::Unclear);
                    let reason = parsed
                        .get("reason")
                        .or_else(|| parsed.get("summary"))
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("Receipt analysis completed.")
                        .to_string();

                    return ReceiptAnalysis { confidence, validity, reason, raw: Some(raw) };
                }

                let confidence = scan_confidence(&raw).unwrap_or(0.5);
                let reason = {
                    let trimmed = raw.trim();
                    if trimmed.is_empty() {
                        "Receipt analysis completed.".to_string()
                    } else {
                        truncate_chars(trimmed, RAW_REASON_LIMIT)
                    }
                };
                ReceiptAnalysis {
                    confidence,
                    validity: ReceiptValidity::Unclear,
                    reason,
                    raw: Some(raw),
                }
            }
            Err(error) => ReceiptAnalysis::neutral(format!("Vision analysis failed: {error}")),
        }
    }

    fn build_receipt_prompt(
        &self,
        order_id: &str,
        order: Option<&Order>,
        payment_id: Option<&str>,
    ) -> String {
        let order_number =
            order.map(|order| order.order_number.as_str()).unwrap_or("unknown");
        let expected_total = order
            .map(|order| format!("{} {}", order.totals.total, self.business.currency))
            .unwrap_or_else(|| "unknown".to_string());

        format!(
            "{}\n\nOrder context:\n\
             - order_id: {order_id}\n\
             - order_number: {order_number}\n\
             - expected_total: {expected_total}\n\
             - payment_id: {}\n\n\
             Return JSON only in this schema:\n\
             {{\n  \"validity_score\": 0.0,\n  \"validity\": \"valid|invalid|unclear\",\n  \"reason\": \"short explanation\"\n}}\n\n\
             Rules:\n\
             - validity_score is probability that this image is acceptable proof of payment for this order.\n\
             - Use 0 when clearly invalid and 1 when clearly valid.\n\
             - If unsure, set validity to \"unclear\" and score between 0.4 and 0.6.",
            self.payments.vision_prompt,
            payment_id.unwrap_or("unknown"),
        )
    }

    async fn track_order(
        &self,
        entities: &Entities,
        metadata: &TurnMetadata,
    ) -> Result<ActionData, ActionError> {
        let orders = self.orders("order tracking")?;

        let order_id_raw = entities
            .order_id
            .as_deref()
            .or(metadata.order_id.as_deref())
            .ok_or(ActionError::TrackingOrderIdRequired)?;
        let order_id = parse_order_id(order_id_raw)?;

        let mut order = orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ActionError::OrderNotFound(order_id_raw.to_string()))?;
        order.status = order.status.tracking();

        Ok(ActionData::Tracking { order })
    }

    /// Merges any supplied override onto the session's customer
    /// snapshot; with an identity and a customer collaborator wired
    /// in, the snapshot is replaced by the canonical record.
    async fn resolve_customer(
        &self,
        session: &mut Session,
        supplied: Option<&CustomerProfile>,
    ) -> Result<Customer, ActionError> {
        let snapshot = session.customer.clone().unwrap_or_default();
        let candidate = match supplied {
            Some(profile) => snapshot.merged_with(profile),
            None => snapshot,
        };

        let Some(customers) = &self.adapters.customers else {
            session.customer = Some(candidate.clone());
            return Ok(candidate);
        };

        if !candidate.has_identity() {
            return Ok(candidate);
        }

        let customer = customers.get_or_create(&CustomerProfile::from(&candidate)).await?;
        session.customer = Some(customer.clone());
        Ok(customer)
    }

    /// Product resolution order: explicit `product_id` entity first,
    /// then first search hit for the product type or raw message.
    async fn resolve_product(
        &self,
        catalog: &Arc<dyn CatalogAdapter>,
        message: &str,
        entities: &Entities,
    ) -> Result<Option<Product>, ActionError> {
        if let Some(raw_id) = entities.product_id.as_deref() {
            if let Ok(id) = raw_id.trim().parse::<i64>() {
                if let Some(product) = catalog.get_product(id).await? {
                    return Ok(Some(product));
                }
            }
        }

        let query = entities.product_type.as_deref().unwrap_or(message);
        let matches = catalog.search_products(query, &SearchFilters::default()).await?;
        Ok(matches.into_iter().next())
    }
}

/// `max(1, floor(quantity or 1))`, bounded to `u32`.
fn requested_quantity(raw: Option<f64>) -> u32 {
    let value = raw.filter(|value| value.is_finite()).unwrap_or(1.0);
    value.floor().clamp(1.0, u32::MAX as f64) as u32
}

fn parse_order_id(raw: &str) -> Result<i64, ActionError> {
    raw.trim()
        .trim_start_matches("ORD-")
        .parse::<i64>()
        .map_err(|_| ActionError::OrderNotFound(raw.to_string()))
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
