use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::customer::Customer;

/// A payment reference created at checkout. Amounts are carried in the
/// currency's smallest unit; the conversion happens at this boundary
/// only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: i64,
    pub amount_minor: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_link: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    PendingVerification,
    VerificationRejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::PendingVerification => "pending_verification",
            Self::VerificationRejected => "verification_rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "pending_verification" => Some(Self::PendingVerification),
            "verification_rejected" => Some(Self::VerificationRejected),
            _ => None,
        }
    }
}

/// Input to `PaymentAdapter::create_payment`.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentRequest {
    pub amount_minor: i64,
    pub currency: String,
    pub order_id: i64,
    pub customer: Customer,
}
