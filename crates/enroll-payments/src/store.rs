//! Pending Checkout Storage
//!
//! Buyer data waits here between link creation and payment confirmation.

use chrono::{DateTime, Utc};
use enroll_core::{
    EnrollError, EnrolledStudent, FailureStage, Identifier, StudentId, StudentProfile,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::{PaymentError, Result};

/// Checkout reference, sent to the provider as `external_reference`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckoutReference(Uuid);

impl CheckoutReference {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| PaymentError::CheckoutNotFound(s.to_string()))
    }
}

impl std::fmt::Display for CheckoutReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checkout lifecycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CheckoutStatus {
    /// Link created, payment not confirmed
    Pending,

    /// Payment confirmed, registration in flight
    Processing,

    Fulfilled {
        student_id: StudentId,
        identifier: Identifier,
    },

    /// `student_id` is set when registration succeeded and enrollment did not
    Failed {
        stage: FailureStage,
        student_id: Option<StudentId>,
        identifier: Option<Identifier>,
        reason: String,
    },
}

/// A checkout waiting for payment
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingCheckout {
    pub reference: CheckoutReference,
    pub name: String,
    pub contact: String,
    pub course_ids: Vec<u64>,

    /// Required for monthly billing only
    pub payer_email: Option<String>,

    pub status: CheckoutStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingCheckout {
    /// Validate buyer data and open a new checkout
    pub fn new(
        name: &str,
        contact: &str,
        course_ids: Vec<u64>,
        payer_email: Option<String>,
    ) -> Result<Self> {
        let profile = StudentProfile::new(name, contact)
            .map_err(|e| PaymentError::InvalidRequest(e.to_string()))?;
        if course_ids.is_empty() {
            return Err(PaymentError::InvalidRequest("no courses selected".into()));
        }

        let now = Utc::now();
        Ok(Self {
            reference: CheckoutReference::generate(),
            name: profile.name,
            contact: profile.contact,
            course_ids,
            payer_email: payer_email.filter(|e| !e.trim().is_empty()),
            status: CheckoutStatus::Pending,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, CheckoutStatus::Pending)
    }

    pub fn fulfilled(&mut self, student: &EnrolledStudent) {
        self.set_status(CheckoutStatus::Fulfilled {
            student_id: student.student_id.clone(),
            identifier: student.identifier.clone(),
        });
    }

    pub fn failed(&mut self, error: &EnrollError) {
        let (student_id, identifier) = match error {
            EnrollError::EnrollmentFailed {
                student_id,
                identifier,
                ..
            } => (Some(student_id.clone()), identifier.clone()),
            _ => (None, None),
        };

        self.set_status(CheckoutStatus::Failed {
            stage: error.stage(),
            student_id,
            identifier,
            reason: error.to_string(),
        });
    }

    /// Registered student still missing their courses
    pub fn unenrolled_student(&self) -> Option<(&StudentId, &Identifier)> {
        match &self.status {
            CheckoutStatus::Failed {
                stage: FailureStage::Enrollment,
                student_id: Some(student_id),
                identifier: Some(identifier),
                ..
            } => Some((student_id, identifier)),
            _ => None,
        }
    }

    pub fn enrollment_retried(&mut self, student_id: StudentId, identifier: Identifier) {
        self.set_status(CheckoutStatus::Fulfilled {
            student_id,
            identifier,
        });
    }

    fn set_status(&mut self, status: CheckoutStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Outcome of trying to start fulfillment
#[derive(Clone, Debug)]
pub enum FulfillmentStart {
    /// The caller now owns the registration
    Started(PendingCheckout),

    /// Another delivery already started or finished it
    AlreadyHandled(CheckoutStatus),
}

/// Checkout storage trait
pub trait CheckoutStore: Send + Sync {
    /// Save or update a checkout
    fn save(&self, checkout: &PendingCheckout) -> Result<()>;

    /// Get checkout by reference
    fn get(&self, reference: &CheckoutReference) -> Result<Option<PendingCheckout>>;

    /// Atomically move `Pending` to `Processing`
    fn begin_fulfillment(&self, reference: &CheckoutReference) -> Result<FulfillmentStart>;

    /// Checkouts whose registration succeeded but enrollment did not
    fn unenrolled(&self) -> Result<Vec<PendingCheckout>>;
}

/// In-memory checkout store (single process)
pub struct MemoryCheckoutStore {
    checkouts: RwLock<HashMap<CheckoutReference, PendingCheckout>>,
}

impl Default for MemoryCheckoutStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCheckoutStore {
    pub fn new() -> Self {
        Self {
            checkouts: RwLock::new(HashMap::new()),
        }
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<CheckoutReference, PendingCheckout>>> {
        self.checkouts
            .write()
            .map_err(|e| PaymentError::Storage(e.to_string()))
    }
}

impl CheckoutStore for MemoryCheckoutStore {
    fn save(&self, checkout: &PendingCheckout) -> Result<()> {
        self.write()?.insert(checkout.reference, checkout.clone());
        Ok(())
    }

    fn get(&self, reference: &CheckoutReference) -> Result<Option<PendingCheckout>> {
        let checkouts = self
            .checkouts
            .read()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        Ok(checkouts.get(reference).cloned())
    }

    fn begin_fulfillment(&self, reference: &CheckoutReference) -> Result<FulfillmentStart> {
        let mut checkouts = self.write()?;
        let checkout = checkouts
            .get_mut(reference)
            .ok_or_else(|| PaymentError::CheckoutNotFound(reference.to_string()))?;

        if !checkout.is_open() {
            return Ok(FulfillmentStart::AlreadyHandled(checkout.status.clone()));
        }

        checkout.set_status(CheckoutStatus::Processing);
        Ok(FulfillmentStart::Started(checkout.clone()))
    }

    fn unenrolled(&self) -> Result<Vec<PendingCheckout>> {
        let checkouts = self
            .checkouts
            .read()
            .map_err(|e| PaymentError::Storage(e.to_string()))?;
        Ok(checkouts
            .values()
            .filter(|c| c.unenrolled_student().is_some())
            .cloned()
            .collect())
    }
}
