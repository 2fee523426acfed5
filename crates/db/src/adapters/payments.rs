use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use vendi_core::{
    AdapterError, Payment, PaymentAdapter, PaymentRequest, PaymentStatus, ProcessedReceipt,
    ReceiptDecision, ReceiptReport,
};

use super::storage;
use crate::DbPool;

pub struct SqlPaymentAdapter {
    pool: DbPool,
    checkout_base_url: String,
}

impl SqlPaymentAdapter {
    pub fn new(pool: DbPool, checkout_base_url: impl Into<String>) -> Self {
        Self { pool, checkout_base_url: checkout_base_url.into() }
    }
}

#[async_trait]
impl PaymentAdapter for SqlPaymentAdapter {
    async fn create_payment(&self, request: PaymentRequest) -> Result<Payment, AdapterError> {
        let exists = sqlx::query("SELECT id FROM orders WHERE id = ?")
            .bind(request.order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        if exists.is_none() {
            return Err(AdapterError::NotFound(format!(
                "Order {} not found.",
                request.order_id
            )));
        }

        let payment_id = format!("pay_{}", Uuid::new_v4().simple());
        let payment_link = format!("{}/{payment_id}", self.checkout_base_url);

        sqlx::query(
            "UPDATE orders
             SET payment_id = ?,
                 payment_link = ?,
                 payment_status = ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(&payment_id)
        .bind(&payment_link)
        .bind(PaymentStatus::Pending.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(request.order_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(Payment {
            id: payment_id,
            order_id: request.order_id,
            amount_minor: request.amount_minor,
            currency: request.currency,
            status: PaymentStatus::Pending,
            payment_link,
            created_at: Utc::now(),
        })
    }

    async fn process_receipt(
        &self,
        order_id: i64,
        receipt_ref: &str,
        report: &ReceiptReport,
    ) -> Result<ProcessedReceipt, AdapterError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO payment_verifications (
                order_id, image_path, decision, confidence, reason, status, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order_id)
        .bind(receipt_ref)
        .bind(report.decision.as_str())
        .bind(report.confidence)
        .bind(&report.reason)
        .bind(report.status.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            "UPDATE orders
             SET payment_status = ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(report.status.as_str())
        .bind(&now)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(ProcessedReceipt {
            verified: report.decision == ReceiptDecision::Approved,
            status: report.status,
        })
    }
}
