//! Sequence Allocator
//!
//! Derives the next candidate identifier from the live student count.
//! The count is re-read on every call; the LMS may have been changed by
//! another registration since the last one.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{EnrollError, Result};
use crate::identifier::{Identifier, IdentifierPrefix};
use crate::lms::LmsClient;

/// Held for the duration of a critical section; dropping it releases the section
pub struct SectionGuard<'a> {
    _inner: Option<Box<dyn Send + 'a>>,
}

impl<'a> SectionGuard<'a> {
    /// Wrap whatever keeps the section held (a mutex guard, a lease, ...)
    pub fn new(inner: impl Send + 'a) -> Self {
        Self {
            _inner: Some(Box::new(inner)),
        }
    }

    /// Guard that holds nothing
    pub fn unguarded() -> Self {
        Self { _inner: None }
    }
}

/// Mutual exclusion around count-and-propose
///
/// Swap in a distributed lock when several processes share one LMS unit.
#[async_trait]
pub trait CriticalSection: Send + Sync {
    async fn enter<'a>(&'a self) -> SectionGuard<'a>;
}

/// Process-wide section backed by an async mutex
#[derive(Default)]
pub struct MutexSection {
    lock: Mutex<()>,
}

impl MutexSection {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CriticalSection for MutexSection {
    async fn enter<'a>(&'a self) -> SectionGuard<'a> {
        SectionGuard::new(self.lock.lock().await)
    }
}

/// No exclusion at all; collisions are left to the retry driver
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSection;

#[async_trait]
impl CriticalSection for NoopSection {
    async fn enter<'a>(&'a self) -> SectionGuard<'a> {
        SectionGuard::unguarded()
    }
}

/// Proposes `prefix + zero_pad(count + 1 + offset, 3)`
pub struct SequenceAllocator {
    lms: Arc<dyn LmsClient>,
    prefix: IdentifierPrefix,
    section: Arc<dyn CriticalSection>,
}

impl SequenceAllocator {
    pub fn new(
        lms: Arc<dyn LmsClient>,
        prefix: IdentifierPrefix,
        section: Arc<dyn CriticalSection>,
    ) -> Self {
        Self {
            lms,
            prefix,
            section,
        }
    }

    pub fn prefix(&self) -> &IdentifierPrefix {
        &self.prefix
    }

    /// Next candidate identifier for the given retry offset.
    ///
    /// The section is held while counting and formatting only; callers
    /// submit the candidate after it has been released.
    pub async fn next_candidate(&self, offset: u32) -> Result<Identifier> {
        let _guard = self.section.enter().await;

        let count = self.current_count().await?;
        let sequence = count + 1 + u64::from(offset);
        let candidate = Identifier::compose(&self.prefix, sequence);

        if !candidate.is_nominal_width(&self.prefix) {
            tracing::warn!(
                candidate = %candidate,
                sequence,
                "Candidate identifier exceeds the three-digit suffix"
            );
        }

        tracing::debug!(candidate = %candidate, count, offset, "Proposed identifier");
        Ok(candidate)
    }

    /// Current student count: total endpoint first, prefix listing second
    pub async fn current_count(&self) -> Result<u64> {
        match self.lms.total_students().await {
            Ok(total) => match u64::try_from(total) {
                Ok(count) => return Ok(count),
                Err(_) => tracing::warn!(total, "LMS reported a negative total, using listing"),
            },
            Err(e) => tracing::warn!(error = %e, "Total endpoint failed, using listing"),
        }

        let students = self
            .lms
            .list_students(self.prefix.as_str())
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Listing fallback failed");
                EnrollError::UpstreamUnavailable(format!("student count unavailable: {e}"))
            })?;

        Ok(students.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lms::MockLms;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts entries and exits so tests can check the section is released
    #[derive(Default)]
    struct CountingSection {
        inner: MutexSection,
        entered: AtomicUsize,
        held: Arc<AtomicUsize>,
    }

    struct Release(Arc<AtomicUsize>);

    impl Drop for Release {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CriticalSection for CountingSection {
        async fn enter<'a>(&'a self) -> SectionGuard<'a> {
            let guard = self.inner.lock.lock().await;
            self.entered.fetch_add(1, Ordering::SeqCst);
            self.held.fetch_add(1, Ordering::SeqCst);
            SectionGuard::new((guard, Release(self.held.clone())))
        }
    }

    fn allocator(lms: Arc<MockLms>, section: Arc<dyn CriticalSection>) -> SequenceAllocator {
        SequenceAllocator::new(lms, IdentifierPrefix::default(), section)
    }

    #[tokio::test]
    async fn test_candidate_from_total() {
        let lms = Arc::new(MockLms::new().with_student_count(41));
        let alloc = allocator(lms.clone(), Arc::new(NoopSection));

        assert_eq!(alloc.next_candidate(0).await.unwrap().as_str(), "20254158042");
        assert_eq!(alloc.next_candidate(1).await.unwrap().as_str(), "20254158043");
        assert_eq!(lms.total_calls(), 2);
        assert_eq!(lms.listing_calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_to_listing() {
        let lms = Arc::new(MockLms::new().with_student_count(7).failing_total());
        let alloc = allocator(lms.clone(), Arc::new(NoopSection));

        assert_eq!(alloc.next_candidate(0).await.unwrap().as_str(), "20254158008");
        assert_eq!(lms.listing_calls(), 1);
    }

    #[tokio::test]
    async fn test_negative_total_uses_listing() {
        let lms = Arc::new(MockLms::new().with_student_count(3).with_total_override(-1));
        let alloc = allocator(lms.clone(), Arc::new(NoopSection));

        assert_eq!(alloc.current_count().await.unwrap(), 3);
        assert_eq!(lms.listing_calls(), 1);
    }

    #[tokio::test]
    async fn test_both_paths_fail() {
        let lms = Arc::new(MockLms::new().failing_total().failing_listing());
        let alloc = allocator(lms, Arc::new(NoopSection));

        let err = alloc.next_candidate(0).await.unwrap_err();
        assert!(matches!(err, EnrollError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_section_released_on_error() {
        let section = Arc::new(CountingSection::default());
        let lms = Arc::new(MockLms::new().failing_total().failing_listing());
        let alloc = allocator(lms, section.clone());

        assert!(alloc.next_candidate(0).await.is_err());
        assert!(alloc.next_candidate(1).await.is_err());

        assert_eq!(section.entered.load(Ordering::SeqCst), 2);
        assert_eq!(section.held.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_padding_boundary() {
        let lms = Arc::new(MockLms::new().with_student_count(998));
        let alloc = allocator(lms, Arc::new(MutexSection::new()));

        let last = alloc.next_candidate(0).await.unwrap();
        assert_eq!(last.as_str(), "20254158999");

        let over = alloc.next_candidate(1).await.unwrap();
        assert_eq!(over.as_str(), "202541581000");
        assert!(!over.is_nominal_width(alloc.prefix()));
    }
}
