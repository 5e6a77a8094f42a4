//! Application State

use std::sync::Arc;

use enroll_core::{EnrollmentService, Notifier};
use enroll_payments::{CheckoutSettings, MemoryCheckoutStore, PaymentGateway, WebhookHandler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Registration and enrollment against the LMS
    pub enrollment: Arc<EnrollmentService>,

    /// False when running against the in-memory demo LMS
    pub lms_configured: bool,

    pub notifier: Arc<dyn Notifier>,

    /// Checkouts waiting for payment confirmation
    pub checkouts: Arc<MemoryCheckoutStore>,

    /// Mercado Pago (optional - None if not configured)
    pub payments: Option<Arc<Payments>>,
}

/// Everything the payment routes need
pub struct Payments {
    pub gateway: Arc<dyn PaymentGateway>,
    pub settings: CheckoutSettings,
    pub webhook: WebhookHandler<MemoryCheckoutStore>,
}

impl Payments {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        settings: CheckoutSettings,
        checkouts: Arc<MemoryCheckoutStore>,
        enrollment: Arc<EnrollmentService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let webhook = WebhookHandler::new(checkouts, gateway.clone(), enrollment, notifier);
        Self {
            gateway,
            settings,
            webhook,
        }
    }
}
