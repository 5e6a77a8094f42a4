//! # enroll-runtime
//!
//! HTTP collaborators for course-enroll-bridge.
//!
//! ## Clients
//!
//! - **LMS** (`http` feature, default): the unit's `/ws/v2` REST API
//! - **Chat webhook** (`http` feature, default): operator and buyer notifications
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enroll_runtime::HttpLmsClient;
//!
//! let lms = Arc::new(HttpLmsClient::from_env()?);
//! let service = EnrollmentService::builder(lms).build();
//! ```

#[cfg(feature = "http")]
pub mod lms;
#[cfg(feature = "http")]
pub mod notify;

#[cfg(feature = "http")]
pub use lms::{HttpLmsClient, LmsConfig};
#[cfg(feature = "http")]
pub use notify::WebhookNotifier;

// Re-export core types for convenience
pub use enroll_core::{
    EnrollError, EnrollmentService, LmsClient, LogNotifier, MockLms, Notification, Notifier,
    Result,
};
