//! Mercado Pago Checkout Integration
//!
//! Hosted checkout: the buyer is redirected to Mercado Pago's `init_point`
//! and payment confirmation arrives later through the webhook.
//!
//! - [`BillingMode::OneTime`] creates a checkout preference
//! - [`BillingMode::Monthly`] creates a preapproval (recurring subscription)

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PaymentError, Result};
use crate::store::{CheckoutReference, PendingCheckout};

/// Mercado Pago REST endpoint
pub const DEFAULT_API_BASE: &str = "https://api.mercadopago.com";

/// Default enrollment price in BRL
pub const DEFAULT_PRICE: Decimal = dec!(59.90);

pub const DEFAULT_TITLE: &str = "Matrícula";

const CURRENCY: &str = "BRL";

/// Payment provider trait
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted checkout link for a pending checkout
    async fn create_checkout_link(&self, request: &CheckoutRequest) -> Result<CheckoutLink>;

    /// Look up a one-time payment
    async fn payment(&self, id: &str) -> Result<PaymentStatus>;

    /// Look up a recurring subscription
    async fn subscription(&self, id: &str) -> Result<PaymentStatus>;

    fn name(&self) -> &str;
}

/// How the buyer is charged
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    #[default]
    OneTime,
    Monthly,
}

impl BillingMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "one_time" | "onetime" | "once" => Ok(Self::OneTime),
            "monthly" | "subscription" => Ok(Self::Monthly),
            other => Err(PaymentError::Config(format!(
                "CHECKOUT_BILLING must be one_time or monthly, got {other:?}"
            ))),
        }
    }
}

/// Checkout pricing and redirect settings
#[derive(Clone, Debug)]
pub struct CheckoutSettings {
    pub price: Decimal,
    pub title: String,
    pub billing: BillingMode,
    pub back_url: Option<String>,
    pub notification_url: Option<String>,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            price: DEFAULT_PRICE,
            title: DEFAULT_TITLE.to_string(),
            billing: BillingMode::OneTime,
            back_url: None,
            notification_url: None,
        }
    }
}

impl CheckoutSettings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let price = match non_empty("CHECKOUT_PRICE") {
            Some(raw) => {
                let price: Decimal = raw
                    .parse()
                    .map_err(|_| PaymentError::Config(format!("invalid CHECKOUT_PRICE {raw:?}")))?;
                if price <= Decimal::ZERO {
                    return Err(PaymentError::Config("CHECKOUT_PRICE must be positive".into()));
                }
                price
            }
            None => defaults.price,
        };

        let billing = match non_empty("CHECKOUT_BILLING") {
            Some(raw) => BillingMode::parse(&raw)?,
            None => defaults.billing,
        };

        Ok(Self {
            price,
            title: non_empty("CHECKOUT_TITLE").unwrap_or(defaults.title),
            billing,
            back_url: non_empty("CHECKOUT_BACK_URL"),
            notification_url: non_empty("CHECKOUT_NOTIFICATION_URL"),
        })
    }

    /// Build the provider request for a stored checkout
    pub fn request_for(&self, checkout: &PendingCheckout) -> CheckoutRequest {
        CheckoutRequest {
            reference: checkout.reference,
            title: format!("{} - {}", self.title, checkout.name),
            price: self.price,
            billing: self.billing,
            payer_email: checkout.payer_email.clone(),
            back_url: self.back_url.clone(),
            notification_url: self.notification_url.clone(),
        }
    }
}

/// Request to create a checkout link
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub reference: CheckoutReference,
    pub title: String,
    pub price: Decimal,
    pub billing: BillingMode,

    /// Required for [`BillingMode::Monthly`]
    #[serde(default)]
    pub payer_email: Option<String>,

    #[serde(default)]
    pub back_url: Option<String>,

    #[serde(default)]
    pub notification_url: Option<String>,
}

/// Result of creating a checkout link
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckoutLink {
    /// Preference or preapproval ID
    pub id: String,

    /// URL to redirect the buyer to
    pub checkout_url: String,

    pub reference: CheckoutReference,
}

/// Payment or subscription state as reported by the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentStatus {
    pub id: String,
    pub status: String,
    pub external_reference: Option<String>,
}

impl PaymentStatus {
    /// `approved` for payments, `authorized` for preapprovals
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status.as_str(), "approved" | "authorized")
    }
}

#[derive(Debug, Serialize)]
struct PreferenceItem<'a> {
    title: &'a str,
    quantity: u32,
    currency_id: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    unit_price: Decimal,
}

#[derive(Debug, Serialize)]
struct BackUrls<'a> {
    success: &'a str,
    pending: &'a str,
    failure: &'a str,
}

#[derive(Debug, Serialize)]
struct Payer<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct PreferenceBody<'a> {
    items: Vec<PreferenceItem<'a>>,
    external_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    back_urls: Option<BackUrls<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_return: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer: Option<Payer<'a>>,
}

#[derive(Debug, Serialize)]
struct AutoRecurring {
    frequency: u32,
    frequency_type: &'static str,
    #[serde(with = "rust_decimal::serde::float")]
    transaction_amount: Decimal,
    currency_id: &'static str,
}

#[derive(Debug, Serialize)]
struct PreapprovalBody<'a> {
    reason: &'a str,
    external_reference: String,
    payer_email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    back_url: Option<&'a str>,
    auto_recurring: AutoRecurring,
    status: &'static str,
}

fn preference_body(request: &CheckoutRequest) -> PreferenceBody<'_> {
    PreferenceBody {
        items: vec![PreferenceItem {
            title: &request.title,
            quantity: 1,
            currency_id: CURRENCY,
            unit_price: request.price,
        }],
        external_reference: request.reference.to_string(),
        back_urls: request.back_url.as_deref().map(|url| BackUrls {
            success: url,
            pending: url,
            failure: url,
        }),
        auto_return: request.back_url.as_ref().map(|_| "approved"),
        notification_url: request.notification_url.as_deref(),
        payer: request.payer_email.as_deref().map(|email| Payer { email }),
    }
}

fn preapproval_body(request: &CheckoutRequest) -> Result<PreapprovalBody<'_>> {
    let payer_email = request.payer_email.as_deref().ok_or_else(|| {
        PaymentError::InvalidRequest("monthly billing requires a payer email".into())
    })?;

    Ok(PreapprovalBody {
        reason: &request.title,
        external_reference: request.reference.to_string(),
        payer_email,
        back_url: request.back_url.as_deref(),
        auto_recurring: AutoRecurring {
            frequency: 1,
            frequency_type: "months",
            transaction_amount: request.price,
            currency_id: CURRENCY,
        },
        status: "pending",
    })
}

/// Payment IDs come back as numbers, preapproval IDs as strings
fn id_field(body: &Value) -> Option<String> {
    match body.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn interpret_link(body: &Value, reference: CheckoutReference) -> Result<CheckoutLink> {
    let id = id_field(body).ok_or_else(|| PaymentError::Provider("checkout response has no id".into()))?;
    let checkout_url = body
        .get("init_point")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::Provider("No checkout URL returned".into()))?
        .to_string();

    Ok(CheckoutLink {
        id,
        checkout_url,
        reference,
    })
}

fn interpret_status(body: &Value) -> Result<PaymentStatus> {
    let id = id_field(body).ok_or_else(|| PaymentError::Provider("status response has no id".into()))?;
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| PaymentError::Provider(format!("no status for {id}")))?
        .to_string();

    Ok(PaymentStatus {
        id,
        status,
        external_reference: body
            .get("external_reference")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
    })
}

/// Mercado Pago client
pub struct MercadoPagoClient {
    http: reqwest::Client,
    access_token: String,
    base_url: String,
}

impl MercadoPagoClient {
    pub const TIMEOUT_SECS: u64 = 15;

    pub fn new(access_token: &str) -> Result<Self> {
        Self::with_base_url(access_token, DEFAULT_API_BASE)
    }

    pub fn with_base_url(access_token: &str, base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(Self::TIMEOUT_SECS))
            .build()
            .map_err(|e| PaymentError::Config(e.to_string()))?;

        Ok(Self {
            http,
            access_token: access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("MP_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| PaymentError::Config("MP_ACCESS_TOKEN not set".into()))?;

        match std::env::var("MP_API_BASE") {
            Ok(base) if !base.trim().is_empty() => Self::with_base_url(&access_token, &base),
            _ => Self::new(&access_token),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| PaymentError::Provider(format!("invalid response ({status}): {e}")))?;

        if !status.is_success() {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            return Err(PaymentError::Provider(format!("{status}: {message}")));
        }

        Ok(body)
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    async fn create_checkout_link(&self, request: &CheckoutRequest) -> Result<CheckoutLink> {
        let body = match request.billing {
            BillingMode::OneTime => {
                let url = format!("{}/checkout/preferences", self.base_url);
                self.send(self.http.post(url).json(&preference_body(request)))
                    .await?
            }
            BillingMode::Monthly => {
                let url = format!("{}/preapproval", self.base_url);
                self.send(self.http.post(url).json(&preapproval_body(request)?))
                    .await?
            }
        };

        let link = interpret_link(&body, request.reference)?;
        tracing::info!(
            reference = %request.reference,
            billing = ?request.billing,
            price = %request.price,
            provider_id = %link.id,
            "Created checkout link"
        );
        Ok(link)
    }

    async fn payment(&self, id: &str) -> Result<PaymentStatus> {
        let url = format!("{}/v1/payments/{id}", self.base_url);
        interpret_status(&self.send(self.http.get(url)).await?)
    }

    async fn subscription(&self, id: &str) -> Result<PaymentStatus> {
        let url = format!("{}/preapproval/{id}", self.base_url);
        interpret_status(&self.send(self.http.get(url)).await?)
    }

    fn name(&self) -> &str {
        "mercadopago"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(billing: BillingMode, payer_email: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            reference: CheckoutReference::generate(),
            title: "Matrícula - Maria".into(),
            price: DEFAULT_PRICE,
            billing,
            payer_email: payer_email.map(str::to_string),
            back_url: Some("https://example.com/obrigado".into()),
            notification_url: None,
        }
    }

    #[test]
    fn test_preference_body() {
        let req = request(BillingMode::OneTime, None);
        let body = serde_json::to_value(preference_body(&req)).unwrap();

        assert_eq!(body["items"][0]["unit_price"], json!(59.9));
        assert_eq!(body["items"][0]["currency_id"], "BRL");
        assert_eq!(body["items"][0]["quantity"], 1);
        assert_eq!(body["external_reference"], req.reference.to_string());
        assert_eq!(body["auto_return"], "approved");
        assert!(body.get("payer").is_none());
        assert!(body.get("notification_url").is_none());
    }

    #[test]
    fn test_preapproval_requires_email() {
        let req = request(BillingMode::Monthly, None);
        assert!(matches!(
            preapproval_body(&req),
            Err(PaymentError::InvalidRequest(_))
        ));

        let req = request(BillingMode::Monthly, Some("maria@example.com"));
        let body = serde_json::to_value(preapproval_body(&req).unwrap()).unwrap();
        assert_eq!(body["auto_recurring"]["frequency"], 1);
        assert_eq!(body["auto_recurring"]["frequency_type"], "months");
        assert_eq!(body["auto_recurring"]["transaction_amount"], json!(59.9));
        assert_eq!(body["status"], "pending");
    }

    #[test]
    fn test_interpret_link_and_status() {
        let reference = CheckoutReference::generate();
        let link = interpret_link(
            &json!({"id": "123-abc", "init_point": "https://mp.example/checkout"}),
            reference,
        )
        .unwrap();
        assert_eq!(link.checkout_url, "https://mp.example/checkout");
        assert!(interpret_link(&json!({"id": "123"}), reference).is_err());

        let status = interpret_status(&json!({
            "id": 987654,
            "status": "approved",
            "external_reference": reference.to_string(),
        }))
        .unwrap();
        assert_eq!(status.id, "987654");
        assert!(status.is_confirmed());
        assert_eq!(status.external_reference, Some(reference.to_string()));

        let pending = interpret_status(&json!({"id": "p1", "status": "pending", "external_reference": ""})).unwrap();
        assert!(!pending.is_confirmed());
        assert_eq!(pending.external_reference, None);
    }

    #[test]
    fn test_settings_from_lookup() {
        let settings = CheckoutSettings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.price, dec!(59.90));
        assert_eq!(settings.billing, BillingMode::OneTime);

        let settings = CheckoutSettings::from_lookup(|key| match key {
            "CHECKOUT_PRICE" => Some("120.00".into()),
            "CHECKOUT_BILLING" => Some("monthly".into()),
            "CHECKOUT_TITLE" => Some("Curso".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(settings.price, dec!(120));
        assert_eq!(settings.billing, BillingMode::Monthly);

        let checkout = PendingCheckout::new("Maria", "61999990000", vec![1], None).unwrap();
        assert_eq!(settings.request_for(&checkout).title, "Curso - Maria");

        assert!(CheckoutSettings::from_lookup(|k| (k == "CHECKOUT_PRICE").then(|| "-1".into())).is_err());
        assert!(CheckoutSettings::from_lookup(|k| (k == "CHECKOUT_BILLING").then(|| "weekly".into())).is_err());
    }
}
