//! course-enroll-bridge HTTP Server
//!
//! Axum-based server that sells course access through Mercado Pago and
//! registers paying buyers in the school's LMS.

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use enroll_core::{EnrollmentService, LmsClient, LogNotifier, MockLms, Notifier, RegistrationConfig};
use enroll_payments::{CheckoutSettings, MemoryCheckoutStore, MercadoPagoClient};
use enroll_runtime::{HttpLmsClient, WebhookNotifier};

use crate::config::ServerConfig;
use crate::handlers::{
    checkout_status, create_checkout, create_enrollment, health_check, mercadopago_webhook,
    retry_enrollment, retry_unenrolled,
};
use crate::state::{AppState, Payments};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Initialize LMS client
    let (lms, lms_configured): (Arc<dyn LmsClient>, bool) = match HttpLmsClient::from_env() {
        Ok(client) => {
            tracing::info!("✓ LMS configured at {}", client.config().base_url);
            (Arc::new(client), true)
        }
        Err(e) => {
            tracing::warn!("⚠ LMS not configured ({}) - using in-memory demo roster", e);
            tracing::warn!("  Set OM_BASE, BASIC_B64 and UNIDADE_ID in .env");
            (Arc::new(MockLms::new()), false)
        }
    };

    if lms.health_check().await {
        tracing::info!("✓ Connected to {}", lms.name());
    } else {
        tracing::warn!("⚠ {} not reachable - registrations will fail", lms.name());
    }

    let registration = RegistrationConfig::from_env()?;
    tracing::info!(
        prefix = %registration.prefix,
        max_attempts = registration.max_attempts,
        "Registration configured"
    );
    let enrollment = Arc::new(EnrollmentService::builder(lms).config(registration).build());

    // Notifications
    let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_env() {
        Ok(webhook) => {
            tracing::info!("✓ Chat webhook configured");
            Arc::new(webhook)
        }
        Err(_) => {
            tracing::warn!("⚠ DISCORD_WEBHOOK not set - notifications go to the log only");
            Arc::new(LogNotifier)
        }
    };

    // Initialize payments
    let checkouts = Arc::new(MemoryCheckoutStore::new());
    let payments = match MercadoPagoClient::from_env() {
        Ok(client) => {
            let settings = CheckoutSettings::from_env()?;
            tracing::info!(
                price = %settings.price,
                billing = ?settings.billing,
                "✓ Mercado Pago configured"
            );
            Some(Arc::new(Payments::new(
                Arc::new(client),
                settings,
                checkouts.clone(),
                enrollment.clone(),
                notifier.clone(),
            )))
        }
        Err(_) => {
            tracing::warn!("⚠ Mercado Pago not configured - payments disabled");
            tracing::warn!("  Set MP_ACCESS_TOKEN in .env");
            None
        }
    };

    // Build application state
    let state = AppState {
        enrollment,
        lms_configured,
        notifier,
        checkouts,
        payments,
    };

    let app = router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 course-enroll-bridge running on http://{}", config.bind_addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                        - Health check");
    tracing::info!("  POST /api/checkout                  - Create Mercado Pago checkout");
    tracing::info!("  GET  /api/checkout/{{reference}}      - Checkout status");
    tracing::info!("  POST /api/checkouts/retry           - Retry unenrolled paid checkouts");
    tracing::info!("  POST /api/enrollments               - Register and enroll now");
    tracing::info!("  POST /api/students/{{id}}/enrollments - Retry enrollment");
    tracing::info!("  POST /webhook/mercadopago           - Payment notifications");
    tracing::info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Enrollment
        .route("/api/enrollments", post(create_enrollment))
        .route("/api/students/{id}/enrollments", post(retry_enrollment))
        // Payments
        .route("/api/checkout", post(create_checkout))
        .route("/api/checkout/{reference}", get(checkout_status))
        .route("/api/checkouts/retry", post(retry_unenrolled))
        .route("/webhook/mercadopago", post(mercadopago_webhook))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use enroll_payments::{
        CheckoutLink, CheckoutRequest, PaymentGateway, PaymentStatus, Result as PaymentResult,
    };
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Confirms every payment for the last checkout it created a link for
    #[derive(Default)]
    struct FakeGateway {
        last_reference: Mutex<Option<String>>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_checkout_link(&self, request: &CheckoutRequest) -> PaymentResult<CheckoutLink> {
            *self.last_reference.lock().unwrap() = Some(request.reference.to_string());
            Ok(CheckoutLink {
                id: "pref-1".into(),
                checkout_url: format!("https://mp.example/checkout/{}", request.reference),
                reference: request.reference,
            })
        }

        async fn payment(&self, id: &str) -> PaymentResult<PaymentStatus> {
            Ok(PaymentStatus {
                id: id.to_string(),
                status: "approved".into(),
                external_reference: self.last_reference.lock().unwrap().clone(),
            })
        }

        async fn subscription(&self, id: &str) -> PaymentResult<PaymentStatus> {
            self.payment(id).await
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn app_with(lms: MockLms, with_payments: bool) -> (Router, Arc<MockLms>) {
        let lms = Arc::new(lms);
        let enrollment = Arc::new(EnrollmentService::with_defaults(lms.clone()));
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let checkouts = Arc::new(MemoryCheckoutStore::new());

        let payments = with_payments.then(|| {
            Arc::new(Payments::new(
                Arc::new(FakeGateway::default()),
                CheckoutSettings::default(),
                checkouts.clone(),
                enrollment.clone(),
                notifier.clone(),
            ))
        });

        let state = AppState {
            enrollment,
            lms_configured: false,
            notifier,
            checkouts,
            payments,
        };
        (router(state), lms)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn buyer() -> Value {
        json!({"nome": "Maria Silva", "whatsapp": "61999990000", "cursos": [7, 9]})
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app_with(MockLms::new(), false);
        let (status, body) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["lms_connected"], true);
        assert_eq!(body["payments_configured"], false);
    }

    #[tokio::test]
    async fn test_immediate_enrollment() {
        let (app, lms) = app_with(MockLms::new().with_student_count(41), false);
        let (status, body) = send(&app, "POST", "/api/enrollments", Some(buyer())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "sucesso");
        assert_eq!(body["usuario"], "20254158042");
        assert_eq!(body["email"], "20254158042@cedbrasilia.com.br");
        assert_eq!(body["mp_link"], Value::Null);
        assert_eq!(lms.enrollments().len(), 1);
    }

    #[tokio::test]
    async fn test_enrollment_errors() {
        let (app, _) = app_with(MockLms::new(), false);
        let (status, body) = send(
            &app,
            "POST",
            "/api/enrollments",
            Some(json!({"nome": "", "whatsapp": "61999990000", "cursos": [1]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");

        let (app, _) = app_with(MockLms::new().refusing_enrollment("curso inexistente"), false);
        let (status, body) = send(&app, "POST", "/api/enrollments", Some(buyer())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "ENROLLMENT_FAILED");
        assert!(!body["error"].as_str().unwrap().contains("curso inexistente"));

        let (app, _) = app_with(MockLms::new().failing_total().failing_listing(), false);
        let (status, body) = send(&app, "POST", "/api/enrollments", Some(buyer())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "LMS_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_retry_enrollment_route() {
        let (app, lms) = app_with(MockLms::new(), false);
        let (status, _) = send(
            &app,
            "POST",
            "/api/students/1000/enrollments",
            Some(json!({"cursos": [3]})),
        )
        .await;

        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(lms.enrollments()[0].1, vec![3]);
    }

    #[tokio::test]
    async fn test_payments_disabled() {
        let (app, _) = app_with(MockLms::new(), false);

        let (status, body) = send(&app, "POST", "/api/checkout", Some(buyer())).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "PAYMENTS_DISABLED");

        let (status, _) = send(
            &app,
            "POST",
            "/webhook/mercadopago",
            Some(json!({"type": "payment", "data": {"id": "1"}})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_checkout_then_webhook() {
        let (app, lms) = app_with(MockLms::new().with_student_count(41), true);

        let (status, body) = send(&app, "POST", "/api/checkout", Some(buyer())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["price"], "59.90");
        let reference = body["reference"].as_str().unwrap().to_string();
        assert!(body["checkout_url"].as_str().unwrap().ends_with(&reference));
        assert!(lms.submitted().is_empty());

        let notification = json!({"type": "payment", "data": {"id": "555"}});
        let (status, body) =
            send(&app, "POST", "/webhook/mercadopago", Some(notification.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "fulfilled");

        let (_, body) = send(&app, "POST", "/webhook/mercadopago?topic=payment&id=555", None).await;
        assert_eq!(body["result"], "duplicate");
        assert_eq!(lms.created().len(), 1);

        let (status, body) = send(&app, "GET", &format!("/api/checkout/{reference}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"]["state"], "fulfilled");
        assert_eq!(body["status"]["identifier"], "20254158042");
    }

    #[tokio::test]
    async fn test_webhook_without_reference() {
        let (app, _) = app_with(MockLms::new(), true);
        let (status, body) = send(&app, "POST", "/webhook/mercadopago", Some(json!({"action": "x"}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_NOTIFICATION");
    }

    #[tokio::test]
    async fn test_unknown_checkout_status() {
        let (app, _) = app_with(MockLms::new(), true);
        let (status, _) = send(
            &app,
            "GET",
            "/api/checkout/00000000-0000-4000-8000-000000000000",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "POST", "/api/checkouts/retry", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["completed"], 0);
    }
}
