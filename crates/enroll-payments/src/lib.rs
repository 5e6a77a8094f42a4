//! # enroll-payments
//!
//! Mercado Pago checkout and payment-confirmed enrollment for
//! course-enroll-bridge.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌────────────────┐   ┌─────┐
//! │ Sales page  │──▶│ Mercado Pago     │──▶│ Webhook        │──▶│ LMS │
//! │ (checkout)  │   │ hosted checkout  │   │ (fulfillment)  │   │     │
//! └─────────────┘   └──────────────────┘   └────────────────┘   └─────┘
//! ```
//!
//! 1. The buyer's name, contact and courses are stored as a
//!    [`PendingCheckout`] and a link is created with its reference as
//!    `external_reference`.
//! 2. Mercado Pago notifies the webhook; the handler looks the payment up.
//! 3. On `approved` (or `authorized` for monthly billing) the checkout is
//!    claimed once and the buyer is registered and enrolled.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enroll_payments::{CheckoutSettings, MercadoPagoClient, PaymentGateway, PendingCheckout};
//!
//! let client = MercadoPagoClient::from_env()?;
//! let settings = CheckoutSettings::from_env()?;
//!
//! let checkout = PendingCheckout::new("Maria", "61999990000", vec![12], None)?;
//! store.save(&checkout)?;
//! let link = client.create_checkout_link(&settings.request_for(&checkout)).await?;
//!
//! // Redirect the buyer to: link.checkout_url
//! ```

mod checkout;
mod error;
mod store;
mod webhook;

pub use checkout::{
    BillingMode, CheckoutLink, CheckoutRequest, CheckoutSettings, DEFAULT_API_BASE,
    DEFAULT_PRICE, MercadoPagoClient, PaymentGateway, PaymentStatus,
};
pub use error::{PaymentError, Result};
pub use store::{
    CheckoutReference, CheckoutStatus, CheckoutStore, FulfillmentStart, MemoryCheckoutStore,
    PendingCheckout,
};
pub use webhook::{NotificationTopic, PaymentNotification, WebhookEvent, WebhookHandler};
