//! # enroll-core
//!
//! Student registration against an external LMS with sequential,
//! collision-checked login identifiers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     EnrollmentService                         │
//! │  ┌──────────────────┐  ┌─────────────────┐  ┌─────────────┐  │
//! │  │  Registration    │  │    Sequence     │  │  LmsClient  │  │
//! │  │  Driver (FSM)    │──│    Allocator    │──│  (Strategy) │  │
//! │  └──────────────────┘  └─────────────────┘  └─────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The LMS is the only source of truth for which identifiers are taken.
//! The allocator proposes `prefix + zero_pad(count + 1 + offset, 3)` inside a
//! critical section, and the driver retries with a larger offset whenever
//! the LMS reports the candidate as already in use.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use enroll_core::{EnrollmentService, RegistrationConfig};
//!
//! let service = EnrollmentService::builder(lms)
//!     .config(RegistrationConfig::from_env()?)
//!     .build();
//!
//! let student = service.register_student("Maria", "61999990000", &[12, 15]).await?;
//! println!("login: {}", student.identifier);
//! ```

pub mod allocator;
pub mod error;
pub mod identifier;
pub mod lms;
pub mod notify;
pub mod registration;
pub mod service;

pub use allocator::{CriticalSection, MutexSection, NoopSection, SectionGuard, SequenceAllocator};
pub use error::{EnrollError, FailureStage, Result};
pub use identifier::{Identifier, IdentifierPrefix, StudentId, UnitToken};
pub use lms::{
    EnrollmentReply, LmsClient, MockLms, RegistrationForm, RegistrationReply, ScriptedReply,
    StudentProfile, StudentRecord,
};
pub use notify::{LogNotifier, Notification, Notifier};
pub use registration::{
    AbortReason, AttemptState, CollisionMatcher, DEFAULT_MAX_ATTEMPTS, RegisteredStudent,
    RegistrationConfig, RegistrationDriver, RegistrationObserver, TracingObserver,
};
pub use service::{EnrolledStudent, EnrollmentService, EnrollmentServiceBuilder};
