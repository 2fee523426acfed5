use serde_json::json;

use vendi_core::config::{AppConfig, LoadOptions};
use vendi_core::Intent;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return json!({
                "command": "config",
                "status": "error",
                "message": format!("configuration issue: {error}"),
            })
            .to_string();
        }
    };

    let payload = json!({
        "command": "config",
        "status": "ok",
        "business": {
            "name": config.business.name,
            "description": config.business.description,
            "currency": config.business.currency,
            "timezone": config.business.timezone,
        },
        "conversation": {
            "max_history_length": config.conversation.max_history_length,
            "session_ttl_secs": config.conversation.session_ttl_secs,
            "enabled_intents": config
                .conversation
                .enabled_intents
                .iter()
                .map(Intent::as_str)
                .collect::<Vec<_>>(),
        },
        "llm": {
            "provider": format!("{:?}", config.llm.provider).to_lowercase(),
            "model": config.llm.model,
            "vision_model": config.llm.vision_model,
            "base_url": config.llm.base_url,
            "api_key": config.llm.api_key.as_ref().map(|_| "<redacted>"),
            "temperature": config.llm.temperature,
            "max_tokens": config.llm.max_tokens,
            "timeout_secs": config.llm.timeout_secs,
        },
        "orders": {
            "tax_rate": config.orders.tax_rate.to_string(),
            "free_shipping_threshold": config.orders.free_shipping_threshold.to_string(),
            "shipping_cost": config.orders.shipping_cost.to_string(),
        },
        "payments": {
            "auto_approve_threshold": config.payments.auto_approve_threshold,
            "auto_reject_threshold": config.payments.auto_reject_threshold,
            "checkout_base_url": config.payments.checkout_base_url,
        },
        "database": {
            "url": config.database.url,
            "max_connections": config.database.max_connections,
            "timeout_secs": config.database.timeout_secs,
        },
        "logging": {
            "level": config.logging.level,
            "format": format!("{:?}", config.logging.format).to_lowercase(),
        },
    });

    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string())
}
