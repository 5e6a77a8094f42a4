//! Mercado Pago Webhook Handling
//!
//! A notification only names a payment or preapproval; the handler looks it
//! up, and when it is confirmed registers the buyer of the referenced
//! checkout. Fulfillment starts at most once per checkout, so redelivered
//! notifications are answered without touching the LMS again.

use std::sync::Arc;

use enroll_core::{EnrolledStudent, EnrollmentService, Notification, Notifier};
use serde_json::Value;

use crate::checkout::{PaymentGateway, PaymentStatus};
use crate::error::{PaymentError, Result};
use crate::store::{CheckoutReference, CheckoutStatus, CheckoutStore, FulfillmentStart, PendingCheckout};

/// What the notification is about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotificationTopic {
    Payment,
    Subscription,
    Other(String),
}

impl NotificationTopic {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "payment" => Self::Payment,
            "preapproval" | "subscription_preapproval" => Self::Subscription,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Parsed webhook notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentNotification {
    pub topic: NotificationTopic,
    pub resource_id: String,
}

impl PaymentNotification {
    /// Parse a JSON body (`{"type": "payment", "data": {"id": ...}}`)
    pub fn from_json(body: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(body).map_err(|e| PaymentError::WebhookParse(e.to_string()))?;

        let topic = value
            .get("type")
            .or_else(|| value.get("topic"))
            .and_then(Value::as_str)
            .ok_or_else(|| PaymentError::WebhookParse("missing type".into()))?;

        let id = value
            .get("data")
            .and_then(|d| d.get("id"))
            .or_else(|| value.get("id"))
            .and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| PaymentError::WebhookParse("missing data.id".into()))?;

        Self::from_query(topic, &id)
    }

    /// Build from query parameters (`?topic=payment&id=...`)
    pub fn from_query(topic: &str, id: &str) -> Result<Self> {
        let resource_id = id.trim();
        if resource_id.is_empty() {
            return Err(PaymentError::WebhookParse("empty resource id".into()));
        }

        Ok(Self {
            topic: NotificationTopic::parse(topic),
            resource_id: resource_id.to_string(),
        })
    }
}

/// Outcome of a processed notification
#[derive(Clone, Debug)]
pub enum WebhookEvent {
    /// Payment confirmed, buyer registered and enrolled
    Fulfilled {
        reference: CheckoutReference,
        student: EnrolledStudent,
    },

    /// Checkout was already being handled or finished
    Duplicate {
        reference: CheckoutReference,
        status: CheckoutStatus,
    },

    /// Payment exists but is not approved yet
    NotConfirmed { resource_id: String, status: String },

    /// Not ours or not relevant
    Ignored { reason: String },
}

/// Webhook handler
pub struct WebhookHandler<S: CheckoutStore> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
    enrollment: Arc<EnrollmentService>,
    notifier: Arc<dyn Notifier>,
}

impl<S: CheckoutStore> WebhookHandler<S> {
    pub fn new(
        store: Arc<S>,
        gateway: Arc<dyn PaymentGateway>,
        enrollment: Arc<EnrollmentService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            gateway,
            enrollment,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Process a webhook notification
    pub async fn handle(&self, notification: &PaymentNotification) -> Result<WebhookEvent> {
        tracing::info!(
            topic = ?notification.topic,
            resource_id = %notification.resource_id,
            "Processing payment webhook"
        );

        let status = match &notification.topic {
            NotificationTopic::Payment => self.gateway.payment(&notification.resource_id).await?,
            NotificationTopic::Subscription => {
                self.gateway
                    .subscription(&notification.resource_id)
                    .await?
            }
            NotificationTopic::Other(topic) => {
                tracing::debug!(topic = %topic, "Unhandled webhook topic");
                return Ok(WebhookEvent::Ignored {
                    reason: format!("topic {topic}"),
                });
            }
        };

        self.handle_status(status).await
    }

    async fn handle_status(&self, status: PaymentStatus) -> Result<WebhookEvent> {
        if !status.is_confirmed() {
            tracing::info!(resource_id = %status.id, status = %status.status, "Payment not confirmed");
            return Ok(WebhookEvent::NotConfirmed {
                resource_id: status.id,
                status: status.status,
            });
        }

        let Some(reference) = status
            .external_reference
            .as_deref()
            .and_then(|r| CheckoutReference::parse(r).ok())
        else {
            tracing::warn!(resource_id = %status.id, "Confirmed payment without a checkout reference");
            return Ok(WebhookEvent::Ignored {
                reason: "no checkout reference".into(),
            });
        };

        if self.store.get(&reference)?.is_none() {
            tracing::warn!(reference = %reference, "Confirmed payment for unknown checkout");
            return Ok(WebhookEvent::Ignored {
                reason: format!("unknown checkout {reference}"),
            });
        }

        match self.store.begin_fulfillment(&reference)? {
            FulfillmentStart::Started(checkout) => self.fulfill(checkout).await,
            FulfillmentStart::AlreadyHandled(status) => {
                tracing::info!(reference = %reference, status = ?status, "Duplicate payment notification");
                Ok(WebhookEvent::Duplicate { reference, status })
            }
        }
    }

    /// Register and enroll the buyer of a claimed checkout
    async fn fulfill(&self, mut checkout: PendingCheckout) -> Result<WebhookEvent> {
        let result = self
            .enrollment
            .register_student(&checkout.name, &checkout.contact, &checkout.course_ids)
            .await;

        match result {
            Ok(student) => {
                checkout.fulfilled(&student);
                self.store.save(&checkout)?;

                self.notifier
                    .notify(&Notification::Enrolled {
                        name: checkout.name.clone(),
                        contact: checkout.contact.clone(),
                        identifier: student.identifier.clone(),
                        email: student.email.clone(),
                    })
                    .await;

                Ok(WebhookEvent::Fulfilled {
                    reference: checkout.reference,
                    student,
                })
            }
            Err(e) => {
                tracing::error!(
                    reference = %checkout.reference,
                    stage = %e.stage(),
                    error = %e,
                    "Checkout fulfillment failed"
                );
                checkout.failed(&e);
                self.store.save(&checkout)?;

                self.notifier
                    .notify(&Notification::Failed {
                        name: checkout.name.clone(),
                        contact: checkout.contact.clone(),
                        stage: e.stage(),
                    })
                    .await;

                Err(PaymentError::Fulfillment(e))
            }
        }
    }

    /// Retry enrollment for every paid checkout whose student is registered
    /// but not enrolled, sending the login credentials for each one that
    /// completes. Returns how many were completed.
    pub async fn retry_unenrolled(&self) -> Result<usize> {
        let mut completed = 0;

        for mut checkout in self.store.unenrolled()? {
            let Some((student_id, identifier)) = checkout
                .unenrolled_student()
                .map(|(id, identifier)| (id.clone(), identifier.clone()))
            else {
                continue;
            };

            if let Err(e) = self
                .enrollment
                .retry_enrollment(&student_id, &checkout.course_ids)
                .await
            {
                tracing::warn!(reference = %checkout.reference, error = %e, "Enrollment retry failed");
                continue;
            }

            let email = self.enrollment.login_email(&identifier);
            checkout.enrollment_retried(student_id, identifier.clone());
            self.store.save(&checkout)?;

            self.notifier
                .notify(&Notification::Enrolled {
                    name: checkout.name.clone(),
                    contact: checkout.contact.clone(),
                    identifier,
                    email,
                })
                .await;

            completed += 1;
        }

        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::{CheckoutLink, CheckoutRequest};
    use crate::store::MemoryCheckoutStore;
    use async_trait::async_trait;
    use enroll_core::{FailureStage, MockLms, ScriptedReply};
    use std::sync::Mutex;

    /// Gateway answering every lookup with one status
    struct FakeGateway {
        status: String,
        reference: Option<String>,
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn create_checkout_link(&self, request: &CheckoutRequest) -> Result<CheckoutLink> {
            Ok(CheckoutLink {
                id: "pref-1".into(),
                checkout_url: "https://mp.example/checkout".into(),
                reference: request.reference,
            })
        }

        async fn payment(&self, id: &str) -> Result<PaymentStatus> {
            Ok(PaymentStatus {
                id: id.to_string(),
                status: self.status.clone(),
                external_reference: self.reference.clone(),
            })
        }

        async fn subscription(&self, id: &str) -> Result<PaymentStatus> {
            self.payment(id).await
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) {
            self.sent.lock().unwrap().push(notification.clone());
        }
    }

    struct Fixture {
        lms: Arc<MockLms>,
        notifier: Arc<RecordingNotifier>,
        handler: WebhookHandler<MemoryCheckoutStore>,
        reference: CheckoutReference,
    }

    fn fixture(lms: MockLms, status: &str) -> Fixture {
        let lms = Arc::new(lms);
        let store = Arc::new(MemoryCheckoutStore::new());
        let checkout = PendingCheckout::new("Maria Silva", "61999990000", vec![7, 9], None).unwrap();
        store.save(&checkout).unwrap();

        let gateway = Arc::new(FakeGateway {
            status: status.to_string(),
            reference: Some(checkout.reference.to_string()),
        });
        let notifier = Arc::new(RecordingNotifier::default());
        let enrollment = Arc::new(EnrollmentService::with_defaults(lms.clone()));

        Fixture {
            lms,
            notifier: notifier.clone(),
            handler: WebhookHandler::new(store, gateway, enrollment, notifier),
            reference: checkout.reference,
        }
    }

    fn payment(id: &str) -> PaymentNotification {
        PaymentNotification::from_query("payment", id).unwrap()
    }

    #[test]
    fn test_parse_notification() {
        let n = PaymentNotification::from_json(r#"{"type":"payment","data":{"id":"123"}}"#).unwrap();
        assert_eq!(n.topic, NotificationTopic::Payment);
        assert_eq!(n.resource_id, "123");

        let n = PaymentNotification::from_json(r#"{"topic":"preapproval","id":456}"#).unwrap();
        assert_eq!(n.topic, NotificationTopic::Subscription);
        assert_eq!(n.resource_id, "456");

        assert!(PaymentNotification::from_json(r#"{"data":{"id":"1"}}"#).is_err());
        assert!(PaymentNotification::from_json("not json").is_err());
        assert!(PaymentNotification::from_query("payment", " ").is_err());
    }

    #[tokio::test]
    async fn test_approved_payment_fulfills_checkout() {
        let f = fixture(MockLms::new().with_student_count(41), "approved");

        let event = f.handler.handle(&payment("555")).await.unwrap();
        let WebhookEvent::Fulfilled { student, .. } = event else {
            panic!("expected fulfillment, got {event:?}");
        };
        assert_eq!(student.identifier.as_str(), "20254158042");
        assert_eq!(f.lms.enrollments(), vec![(student.student_id.clone(), vec![7, 9])]);

        let stored = f.handler.store().get(&f.reference).unwrap().unwrap();
        assert!(matches!(stored.status, CheckoutStatus::Fulfilled { .. }));

        let sent = f.notifier.sent.lock().unwrap().clone();
        assert!(matches!(&sent[..], [Notification::Enrolled { .. }]));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_registers_once() {
        let f = fixture(MockLms::new().with_student_count(41), "approved");

        let notification = payment("555");
        let (first, second) = tokio::join!(
            f.handler.handle(&notification),
            f.handler.handle(&notification)
        );
        let events = [first.unwrap(), second.unwrap()];

        let fulfilled = events
            .iter()
            .filter(|e| matches!(e, WebhookEvent::Fulfilled { .. }))
            .count();
        let duplicates = events
            .iter()
            .filter(|e| matches!(e, WebhookEvent::Duplicate { .. }))
            .count();
        assert_eq!((fulfilled, duplicates), (1, 1));
        assert_eq!(f.lms.created().len(), 1);

        let third = f.handler.handle(&payment("555")).await.unwrap();
        assert!(matches!(
            third,
            WebhookEvent::Duplicate {
                status: CheckoutStatus::Fulfilled { .. },
                ..
            }
        ));
        assert_eq!(f.lms.created().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_payment_does_nothing() {
        let f = fixture(MockLms::new(), "in_process");

        let event = f.handler.handle(&payment("555")).await.unwrap();
        assert!(matches!(event, WebhookEvent::NotConfirmed { .. }));
        assert!(f.lms.submitted().is_empty());
        assert!(f.handler.store().get(&f.reference).unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_unknown_topic_and_reference_ignored() {
        let f = fixture(MockLms::new(), "approved");
        let merchant_order = PaymentNotification::from_query("merchant_order", "1").unwrap();
        assert!(matches!(
            f.handler.handle(&merchant_order).await.unwrap(),
            WebhookEvent::Ignored { .. }
        ));

        let foreign = WebhookHandler::new(
            f.handler.store().clone(),
            Arc::new(FakeGateway {
                status: "approved".into(),
                reference: Some(CheckoutReference::generate().to_string()),
            }),
            Arc::new(EnrollmentService::with_defaults(f.lms.clone())),
            f.notifier.clone(),
        );
        assert!(matches!(
            foreign.handle(&payment("1")).await.unwrap(),
            WebhookEvent::Ignored { .. }
        ));
        assert!(f.lms.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_registration_failure_is_recorded() {
        let lms = MockLms::new().with_script([ScriptedReply::Info("CPF inválido".into())]);
        let f = fixture(lms, "approved");

        let err = f.handler.handle(&payment("555")).await.unwrap_err();
        assert_eq!(err.stage(), Some(FailureStage::Registration));

        let stored = f.handler.store().get(&f.reference).unwrap().unwrap();
        assert!(matches!(
            stored.status,
            CheckoutStatus::Failed {
                stage: FailureStage::Registration,
                student_id: None,
                ..
            }
        ));

        // a redelivery must not retry the registration
        let again = f.handler.handle(&payment("555")).await.unwrap();
        assert!(matches!(again, WebhookEvent::Duplicate { .. }));
        assert_eq!(f.lms.submitted().len(), 1);

        let sent = f.notifier.sent.lock().unwrap().clone();
        assert!(matches!(
            &sent[..],
            [Notification::Failed {
                stage: FailureStage::Registration,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_enrollment_failure_then_retry() {
        let lms = MockLms::new()
            .with_student_count(41)
            .refusing_enrollment("curso inexistente");
        let f = fixture(lms, "approved");

        let err = f.handler.handle(&payment("555")).await.unwrap_err();
        assert_eq!(err.stage(), Some(FailureStage::Enrollment));
        assert_eq!(f.handler.store().unenrolled().unwrap().len(), 1);

        f.lms.accept_enrollments();
        assert_eq!(f.handler.retry_unenrolled().await.unwrap(), 1);

        let stored = f.handler.store().get(&f.reference).unwrap().unwrap();
        let CheckoutStatus::Fulfilled { identifier, .. } = stored.status else {
            panic!("expected fulfilled checkout, got {:?}", stored.status);
        };
        assert_eq!(identifier.as_str(), "20254158042");
        assert_eq!(f.lms.created().len(), 1);
        assert!(f.handler.store().unenrolled().unwrap().is_empty());

        let sent = f.notifier.sent.lock().unwrap().clone();
        match &sent[..] {
            [
                Notification::Failed {
                    stage: FailureStage::Enrollment,
                    ..
                },
                Notification::Enrolled {
                    identifier, email, ..
                },
            ] => {
                assert_eq!(identifier.as_str(), "20254158042");
                assert_eq!(email, "20254158042@cedbrasilia.com.br");
            }
            other => panic!("unexpected notifications: {other:?}"),
        }

        // a finished checkout is not enrolled again
        assert_eq!(f.handler.retry_unenrolled().await.unwrap(), 0);
        assert_eq!(f.lms.enrollments().len(), 1);
    }
}
