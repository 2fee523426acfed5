use serde::{Deserialize, Serialize};

use crate::domain::payment::PaymentStatus;

/// Outcome of the confidence-thresholded receipt decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptDecision {
    Approved,
    Rejected,
    Pending,
}

impl ReceiptDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Pending => "pending",
        }
    }

    /// The payment status written back for each decision.
    pub fn payment_status(&self) -> PaymentStatus {
        match self {
            Self::Approved => PaymentStatus::Paid,
            Self::Rejected => PaymentStatus::VerificationRejected,
            Self::Pending => PaymentStatus::PendingVerification,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptValidity {
    Valid,
    Invalid,
    Unclear,
}

impl ReceiptValidity {
    /// Model output is free text; anything unrecognized is `Unclear`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "valid" => Self::Valid,
            "invalid" => Self::Invalid,
            _ => Self::Unclear,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Unclear => "unclear",
        }
    }
}

/// What the vision step produced for one submitted receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptAnalysis {
    pub confidence: f64,
    pub validity: ReceiptValidity,
    pub reason: String,
    #[serde(default)]
    pub raw: Option<String>,
}

impl ReceiptAnalysis {
    /// The neutral result used when no vision backend is available or
    /// the analysis failed: mid confidence, routed to manual review.
    pub fn neutral(reason: impl Into<String>) -> Self {
        Self { confidence: 0.5, validity: ReceiptValidity::Unclear, reason: reason.into(), raw: None }
    }
}

/// Approve/reject thresholds for receipt verification. Both are
/// clamped to `[0, 1]` at construction; the inversion guard runs at
/// decision time so deserialized configs can never flip the bands.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptPolicy {
    pub auto_approve: f64,
    pub auto_reject: f64,
}

pub const DEFAULT_AUTO_APPROVE: f64 = 0.85;
pub const DEFAULT_AUTO_REJECT: f64 = 0.35;

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self { auto_approve: DEFAULT_AUTO_APPROVE, auto_reject: DEFAULT_AUTO_REJECT }
    }
}

impl ReceiptPolicy {
    pub fn new(auto_approve: f64, auto_reject: f64) -> Self {
        Self {
            auto_approve: clamp_unit(auto_approve, DEFAULT_AUTO_APPROVE),
            auto_reject: clamp_unit(auto_reject, DEFAULT_AUTO_REJECT),
        }
    }

    pub fn decide(&self, confidence: f64) -> ReceiptDecision {
        let approve = clamp_unit(self.auto_approve, DEFAULT_AUTO_APPROVE);
        let mut reject = clamp_unit(self.auto_reject, DEFAULT_AUTO_REJECT);
        if reject > approve {
            reject = (approve - 0.05).max(0.0);
        }

        let confidence = clamp_unit(confidence, 0.5);
        if confidence >= approve {
            ReceiptDecision::Approved
        } else if confidence <= reject {
            ReceiptDecision::Rejected
        } else {
            ReceiptDecision::Pending
        }
    }
}

/// Clamps into `[0, 1]`; non-finite input takes the fallback.
pub fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::payment::PaymentStatus;

    use super::{clamp_unit, ReceiptDecision, ReceiptPolicy, ReceiptValidity};

    #[test]
    fn default_thresholds_split_the_bands() {
        let policy = ReceiptPolicy::default();
        assert_eq!(policy.decide(0.9), ReceiptDecision::Approved);
        assert_eq!(policy.decide(0.85), ReceiptDecision::Approved);
        assert_eq!(policy.decide(0.5), ReceiptDecision::Pending);
        assert_eq!(policy.decide(0.35), ReceiptDecision::Rejected);
        assert_eq!(policy.decide(0.2), ReceiptDecision::Rejected);
    }

    #[test]
    fn inverted_thresholds_are_forced_apart() {
        // reject 0.9 > approve 0.85 becomes an effective reject of 0.80
        let policy = ReceiptPolicy::new(0.85, 0.9);
        assert_eq!(policy.decide(0.80), ReceiptDecision::Rejected);
        assert_eq!(policy.decide(0.82), ReceiptDecision::Pending);
        assert_eq!(policy.decide(0.85), ReceiptDecision::Approved);
    }

    #[test]
    fn out_of_range_config_is_clamped() {
        let policy = ReceiptPolicy::new(3.0, -1.0);
        assert_eq!(policy.auto_approve, 1.0);
        assert_eq!(policy.auto_reject, 0.0);

        assert_eq!(clamp_unit(f64::NAN, 0.5), 0.5);
        assert_eq!(clamp_unit(1.5, 0.0), 1.0);
    }

    #[test]
    fn non_finite_confidence_lands_in_the_pending_band() {
        let policy = ReceiptPolicy::default();
        assert_eq!(policy.decide(f64::NAN), ReceiptDecision::Pending);
    }

    #[test]
    fn decisions_map_to_payment_statuses() {
        assert_eq!(ReceiptDecision::Approved.payment_status(), PaymentStatus::Paid);
        assert_eq!(
            ReceiptDecision::Rejected.payment_status(),
            PaymentStatus::VerificationRejected
        );
        assert_eq!(
            ReceiptDecision::Pending.payment_status(),
            PaymentStatus::PendingVerification
        );
    }

    #[test]
    fn validity_parses_leniently() {
        assert_eq!(ReceiptValidity::parse_lenient(" Valid "), ReceiptValidity::Valid);
        assert_eq!(ReceiptValidity::parse_lenient("INVALID"), ReceiptValidity::Invalid);
        assert_eq!(ReceiptValidity::parse_lenient("probably fine"), ReceiptValidity::Unclear);
    }
}
