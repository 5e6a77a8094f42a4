//! Payment Error Types

use enroll_core::{EnrollError, FailureStage};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Mercado Pago API error
    #[error("Payment provider error: {0}")]
    Provider(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// No pending checkout for this reference
    #[error("Checkout not found: {0}")]
    CheckoutNotFound(String),

    /// Buyer data or checkout request is incomplete
    #[error("Invalid checkout request: {0}")]
    InvalidRequest(String),

    /// Registration or enrollment after a confirmed payment failed
    #[error("Fulfillment failed: {0}")]
    Fulfillment(#[from] EnrollError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl PaymentError {
    /// Get user-friendly message
    pub fn user_message(&self) -> &str {
        match self {
            PaymentError::Provider(_) => "Payment processing failed. Please try again.",
            PaymentError::CheckoutNotFound(_) => "Checkout not found.",
            PaymentError::InvalidRequest(_) => "Name, contact and at least one course are required.",
            PaymentError::Fulfillment(e) => e.user_message(),
            PaymentError::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }

    /// Stage of a failed fulfillment, if this is one
    pub fn stage(&self) -> Option<FailureStage> {
        match self {
            PaymentError::Fulfillment(e) => Some(e.stage()),
            _ => None,
        }
    }
}
