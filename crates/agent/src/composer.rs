use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::debug;

use vendi_core::config::{BusinessConfig, ConversationConfig, LlmConfig};
use vendi_core::{
    CompletionOptions, Intent, IntentResult, ModelClient, ReceiptDecision, Session,
};

use crate::dispatcher::{ActionData, ActionResult};

/// Turns an action result into user-facing text. The deterministic
/// per-intent templates are the system of record; the model pass is
/// an optional enhancement that defers to them whenever it fails or
/// comes back empty.
pub struct ReplyComposer {
    model: Arc<dyn ModelClient>,
    business: BusinessConfig,
    greeting_message: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl ReplyComposer {
    pub fn new(
        model: Arc<dyn ModelClient>,
        business: BusinessConfig,
        conversation: &ConversationConfig,
        llm: &LlmConfig,
    ) -> Self {
        Self {
            model,
            business,
            greeting_message: conversation.greeting_message.clone(),
            system_prompt: llm.system_prompt.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        }
    }

    pub async fn compose(
        &self,
        message: &str,
        intent_result: &IntentResult,
        action_result: &ActionResult,
        session: &Session,
    ) -> String {
        // Action errors get the fixed apology; no model call on this
        // path.
        if let Some(error) = &action_result.error {
            return format!(
                "I hit an issue: {error} Please share another option and I can continue."
            );
        }

        let prompt = self.build_prompt(message, intent_result, action_result, session);
        let options = CompletionOptions {
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        };

        match self.model.complete(&prompt, &options).await {
            Ok(text) if !text.trim().is_empty() => return text.trim().to_string(),
            Ok(_) => {}
            Err(error) => {
                debug!(event_name = "compose.enhancement_failed", error = %error);
            }
        }

        self.fallback(intent_result.intent, action_result, session)
    }

    fn build_prompt(
        &self,
        message: &str,
        intent_result: &IntentResult,
        action_result: &ActionResult,
        session: &Session,
    ) -> String {
        let action_data = action_result
            .data
            .as_ref()
            .and_then(|data| serde_json::to_string_pretty(data).ok())
            .unwrap_or_else(|| "{}".to_string());
        let entities =
            serde_json::to_string(&intent_result.entities).unwrap_or_else(|_| "{}".to_string());

        let cart_summary = if session.cart.is_empty() {
            "empty".to_string()
        } else {
            session
                .cart
                .items
                .iter()
                .map(|item| format!("{} x{}", item.name, item.quantity))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "{}\n\nBusiness: {}\nDescription: {}\nCurrency: {}\n\n\
             Customer message: \"{message}\"\n\
             Intent: {}\n\
             Confidence: {}\n\
             Entities: {entities}\n\
             Cart: {cart_summary}\n\
             Action result: {action_data}\n\n\
             Instructions:\n\
             - Reply naturally and clearly.\n\
             - Keep the response concise (2-5 sentences).\n\
             - If products are returned, suggest one strong next step.\n\
             - If checkout data is returned, include order summary and payment instructions when available.",
            self.system_prompt,
            self.business.name,
            self.business.description,
            self.business.currency,
            intent_result.intent.as_str(),
            intent_result.confidence,
        )
    }

    /// Deterministic per-intent reply templates.
    pub fn fallback(
        &self,
        intent: Intent,
        action_result: &ActionResult,
        session: &Session,
    ) -> String {
        let currency = self.business.currency.as_str();

        match (intent, action_result.data.as_ref()) {
            (Intent::Greeting, _) => self.greeting_message.clone(),
            (Intent::BrowseProducts, Some(ActionData::Products { products })) => {
                if products.is_empty() {
                    return "I could not find matching products yet. Share what type, color, or \
                            price range you want."
                        .to_string();
                }
                let names = products
                    .iter()
                    .take(3)
                    .map(|product| {
                        format!("{} ({})", product.name, format_currency(product.price, currency))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Here are a few options: {names}. Tell me which one you want to add.")
            }
            (Intent::AddToCart, _) => {
                let total_quantity = session.cart.total_quantity();
                format!("Added to cart. You now have {total_quantity} item(s) in your cart.")
            }
            (Intent::ViewCart, Some(ActionData::CartView { totals, .. })) => {
                format!(
                    "Your cart total is {}. Say \"checkout\" when ready.",
                    format_currency(totals.total, currency)
                )
            }
            (Intent::ViewCart, _) => {
                "Your cart is ready. Let me know if you want to checkout.".to_string()
            }
            (Intent::Checkout, Some(ActionData::Checkout { order, payment, .. })) => {
                let payment_part = payment
                    .as_ref()
                    .map(|payment| format!(" Complete payment here: {}", payment.payment_link))
                    .unwrap_or_default();
                format!("Order {} has been created.{payment_part}", order.order_number)
            }
            (Intent::Checkout, _) => {
                "I could not complete checkout yet. Please confirm your customer details and try \
                 again."
                    .to_string()
            }
            (Intent::TrackOrder, Some(ActionData::Tracking { order })) => {
                format!(
                    "Order {} is currently {}.",
                    order.order_number,
                    order.status.as_str()
                )
            }
            (Intent::TrackOrder, _) => {
                "I could not find that order. Please share your order ID.".to_string()
            }
            (Intent::SubmitPaymentReceipt, Some(ActionData::Receipt { order_id, decision, .. })) => {
                match decision {
                    ReceiptDecision::Approved => format!(
                        "Thanks. I verified your receipt and marked payment as completed for \
                         order {order_id}."
                    ),
                    ReceiptDecision::Rejected => format!(
                        "I could not validate that receipt for order {order_id}. Please upload a \
                         clearer payment proof or contact support."
                    ),
                    ReceiptDecision::Pending => format!(
                        "I received your receipt for order {order_id}. It is pending manual \
                         review."
                    ),
                }
            }
            _ => "I can help with products, cart updates, checkout, and order tracking. What do \
                  you want to do next?"
                .to_string(),
        }
    }
}

fn format_currency(value: Decimal, currency: &str) -> String {
    let amount = value.round_dp(2);
    match currency {
        "USD" => format!("${amount:.2}"),
        "EUR" => format!("€{amount:.2}"),
        "GBP" => format!("£{amount:.2}"),
        other => format!("{amount:.2} {other}"),
    }
}
