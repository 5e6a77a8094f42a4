//! HTTP Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use enroll_core::{EnrollError, Notification, StudentId};
use enroll_payments::{
    BillingMode, CheckoutReference, CheckoutRequest, CheckoutStatus, CheckoutStore, PaymentError,
    PaymentGateway, PaymentNotification, PendingCheckout, WebhookEvent,
};

use crate::state::{AppState, Payments};

type ApiError = (StatusCode, Json<ErrorResponse>);

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub lms_configured: bool,
    pub lms_connected: bool,
    pub payments_configured: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Buyer data as the sales page sends it
#[derive(Debug, Deserialize)]
pub struct BuyerRequest {
    pub nome: String,
    pub whatsapp: String,
    pub cursos: Vec<u64>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub reference: CheckoutReference,
    pub checkout_url: String,
    pub price: Decimal,
    pub billing: BillingMode,
}

#[derive(Debug, Serialize)]
pub struct CheckoutStatusResponse {
    pub reference: CheckoutReference,
    pub status: CheckoutStatus,
}

#[derive(Debug, Serialize)]
pub struct EnrollmentResponse {
    pub status: &'static str,
    pub aluno_id: StudentId,
    pub usuario: String,
    pub email: String,
    /// Payment link, when payments are configured
    pub mp_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetryEnrollmentRequest {
    pub cursos: Vec<u64>,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub completed: usize,
}

/// Mercado Pago sends either `?type=payment&data.id=1` or `?topic=payment&id=1`
#[derive(Debug, Default, Deserialize)]
pub struct WebhookQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub topic: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "data.id")]
    pub data_id: Option<String>,
}

impl WebhookQuery {
    fn notification(&self) -> Option<PaymentNotification> {
        let topic = self.kind.as_deref().or(self.topic.as_deref())?;
        let id = self.data_id.as_deref().or(self.id.as_deref())?;
        PaymentNotification::from_query(topic, id).ok()
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub result: &'static str,
}

// ============================================================================
// Error Mapping
// ============================================================================

fn error(status: StatusCode, message: &str, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.into(),
        }),
    )
}

fn payments_disabled() -> ApiError {
    error(
        StatusCode::SERVICE_UNAVAILABLE,
        "Payments not configured",
        "PAYMENTS_DISABLED",
    )
}

fn enroll_error(e: &EnrollError) -> ApiError {
    let (status, code) = match e {
        EnrollError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        EnrollError::UpstreamUnavailable(_) | EnrollError::Token(_) | EnrollError::Lms(_) => {
            (StatusCode::BAD_GATEWAY, "LMS_UNAVAILABLE")
        }
        EnrollError::RegistrationRejected(_) | EnrollError::RetriesExhausted(_) => {
            (StatusCode::BAD_REQUEST, "REGISTRATION_FAILED")
        }
        EnrollError::EnrollmentFailed { .. } => (StatusCode::BAD_REQUEST, "ENROLLMENT_FAILED"),
        EnrollError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    };
    error(status, e.user_message(), code)
}

fn payment_error(e: &PaymentError) -> ApiError {
    let (status, code) = match e {
        PaymentError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
        PaymentError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "INVALID_NOTIFICATION"),
        PaymentError::CheckoutNotFound(_) => (StatusCode::NOT_FOUND, "CHECKOUT_NOT_FOUND"),
        PaymentError::Provider(_) => (StatusCode::BAD_GATEWAY, "CHECKOUT_ERROR"),
        PaymentError::Fulfillment(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WEBHOOK_ERROR"),
        PaymentError::Config(_) | PaymentError::Storage(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
        }
    };
    error(status, e.user_message(), code)
}

fn payments(state: &AppState) -> Result<&Payments, ApiError> {
    state.payments.as_deref().ok_or_else(payments_disabled)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let lms_connected = state.enrollment.lms().health_check().await;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        lms_configured: state.lms_configured,
        lms_connected,
        payments_configured: state.payments.is_some(),
    })
}

/// Store the buyer and create a Mercado Pago checkout link
pub async fn create_checkout(
    State(state): State<AppState>,
    Json(payload): Json<BuyerRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let payments = payments(&state)?;

    let checkout = PendingCheckout::new(
        &payload.nome,
        &payload.whatsapp,
        payload.cursos,
        payload.email,
    )
    .map_err(|e| payment_error(&e))?;

    // stored first so an early notification finds it
    state.checkouts.save(&checkout).map_err(|e| payment_error(&e))?;

    let request = payments.settings.request_for(&checkout);
    let link = payments
        .gateway
        .create_checkout_link(&request)
        .await
        .map_err(|e| {
            tracing::error!("Checkout error: {}", e);
            payment_error(&e)
        })?;

    Ok(Json(CheckoutResponse {
        reference: checkout.reference,
        checkout_url: link.checkout_url,
        price: request.price,
        billing: request.billing,
    }))
}

/// Current state of a checkout
pub async fn checkout_status(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<CheckoutStatusResponse>, ApiError> {
    let reference = CheckoutReference::parse(&reference).map_err(|e| payment_error(&e))?;

    let checkout = state
        .checkouts
        .get(&reference)
        .map_err(|e| payment_error(&e))?
        .ok_or_else(|| payment_error(&PaymentError::CheckoutNotFound(reference.to_string())))?;

    Ok(Json(CheckoutStatusResponse {
        reference,
        status: checkout.status,
    }))
}

/// Register and enroll immediately, without waiting for payment
pub async fn create_enrollment(
    State(state): State<AppState>,
    Json(payload): Json<BuyerRequest>,
) -> Result<Json<EnrollmentResponse>, ApiError> {
    let result = state
        .enrollment
        .register_student(&payload.nome, &payload.whatsapp, &payload.cursos)
        .await;

    let student = match result {
        Ok(student) => student,
        Err(e) => {
            tracing::error!(stage = %e.stage(), "Enrollment error: {}", e);
            if !matches!(e, EnrollError::InvalidRequest(_)) {
                state
                    .notifier
                    .notify(&Notification::Failed {
                        name: payload.nome.clone(),
                        contact: payload.whatsapp.clone(),
                        stage: e.stage(),
                    })
                    .await;
            }
            return Err(enroll_error(&e));
        }
    };

    state
        .notifier
        .notify(&Notification::Enrolled {
            name: payload.nome.clone(),
            contact: payload.whatsapp.clone(),
            identifier: student.identifier.clone(),
            email: student.email.clone(),
        })
        .await;

    let mp_link = match state.payments.as_deref() {
        Some(payments) => payment_link(payments, &payload).await,
        None => None,
    };

    Ok(Json(EnrollmentResponse {
        status: "sucesso",
        aluno_id: student.student_id,
        usuario: student.identifier.as_str().to_string(),
        email: student.email,
        mp_link,
    }))
}

/// Link for a student who is already enrolled. It is not stored as a
/// pending checkout, so its payment never triggers a second registration.
async fn payment_link(payments: &Payments, buyer: &BuyerRequest) -> Option<String> {
    let request = CheckoutRequest {
        reference: CheckoutReference::generate(),
        title: format!("{} - {}", payments.settings.title, buyer.nome.trim()),
        price: payments.settings.price,
        billing: BillingMode::OneTime,
        payer_email: buyer.email.clone(),
        back_url: payments.settings.back_url.clone(),
        notification_url: None,
    };

    match payments.gateway.create_checkout_link(&request).await {
        Ok(link) => Some(link.checkout_url),
        Err(e) => {
            tracing::warn!("Payment link unavailable: {}", e);
            None
        }
    }
}

/// Enroll an already registered student in courses
pub async fn retry_enrollment(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Json(payload): Json<RetryEnrollmentRequest>,
) -> Result<StatusCode, ApiError> {
    let student_id = StudentId::new(student_id);

    state
        .enrollment
        .retry_enrollment(&student_id, &payload.cursos)
        .await
        .map_err(|e| {
            tracing::error!(student_id = %student_id, "Enrollment retry error: {}", e);
            enroll_error(&e)
        })?;

    Ok(StatusCode::NO_CONTENT)
}

/// Retry enrollment for every paid checkout left unenrolled
pub async fn retry_unenrolled(
    State(state): State<AppState>,
) -> Result<Json<RetryResponse>, ApiError> {
    let payments = payments(&state)?;

    let completed = payments
        .webhook
        .retry_unenrolled()
        .await
        .map_err(|e| payment_error(&e))?;

    Ok(Json(RetryResponse { completed }))
}

/// Mercado Pago webhook handler
pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    Query(query): Query<WebhookQuery>,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let payments = payments(&state)?;

    let notification = if body.trim().is_empty() {
        query.notification()
    } else {
        PaymentNotification::from_json(&body)
            .inspect_err(|e| tracing::debug!("Webhook body not usable: {}", e))
            .ok()
            .or_else(|| query.notification())
    }
    .ok_or_else(|| {
        tracing::warn!("Webhook without payment reference");
        error(
            StatusCode::BAD_REQUEST,
            "Invalid notification",
            "INVALID_NOTIFICATION",
        )
    })?;

    let event = payments.webhook.handle(&notification).await.map_err(|e| {
        tracing::error!("Webhook processing error: {}", e);
        payment_error(&e)
    })?;

    let result = match event {
        WebhookEvent::Fulfilled { .. } => "fulfilled",
        WebhookEvent::Duplicate { .. } => "duplicate",
        WebhookEvent::NotConfirmed { .. } => "not_confirmed",
        WebhookEvent::Ignored { .. } => "ignored",
    };

    Ok(Json(WebhookResponse { result }))
}
