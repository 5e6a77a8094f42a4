//! Buyer notifications.

use async_trait::async_trait;

use crate::error::FailureStage;
use crate::identifier::Identifier;

/// Something worth telling the buyer (or the operators) about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// Registered and enrolled; carries the login credentials
    Enrolled {
        name: String,
        contact: String,
        identifier: Identifier,
        email: String,
    },

    /// The flow stopped; `stage` says where
    Failed {
        name: String,
        contact: String,
        stage: FailureStage,
    },
}

impl Notification {
    /// Single-line text for chat channels
    pub fn text(&self) -> String {
        match self {
            Notification::Enrolled {
                name,
                contact,
                identifier,
                email,
            } => format!("✅ {name} ({contact}) enrolled | login {identifier} | e-mail {email}"),
            Notification::Failed {
                name,
                contact,
                stage,
            } => format!("❌ {name} ({contact}) could not be enrolled ({stage} failed)"),
        }
    }
}

/// Delivery channel for notifications.
///
/// Delivery is best effort: implementations log their own failures and
/// never fail the enrollment that triggered them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log only
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) {
        tracing::info!(notification = %notification.text(), "Notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrolled_text_has_credentials() {
        let text = Notification::Enrolled {
            name: "Maria".into(),
            contact: "61999990000".into(),
            identifier: Identifier::from_raw("20254158043"),
            email: "20254158043@cedbrasilia.com.br".into(),
        }
        .text();

        assert!(text.contains("20254158043"));
        assert!(text.contains("Maria"));
    }

    #[test]
    fn test_failed_text_has_stage() {
        let text = Notification::Failed {
            name: "Maria".into(),
            contact: "61999990000".into(),
            stage: FailureStage::Enrollment,
        }
        .text();

        assert!(text.contains("enrollment failed"));
    }
}
