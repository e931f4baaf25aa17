use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use testprep_core::model::{CompletionSummary, SubmissionPayload};

/// Errors surfaced by submission sinks.
///
/// A sink's own timeout is reported as `Timeout` and treated like any other
/// failed delivery.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("server responded with status {0}")]
    HttpStatus(u16),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// Destination for a finished session.
///
/// One call submits every answer and marks the session complete. From the
/// runner's side it either fully succeeds or fully fails.
#[async_trait]
pub trait SubmissionSink: Send + Sync {
    /// Deliver the payload and return the grading summary.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` when the session could not be completed.
    async fn submit_all(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<CompletionSummary, TransportError>;
}

#[derive(Default)]
struct InMemoryInner {
    calls: Vec<SubmissionPayload>,
    failures: VecDeque<TransportError>,
    score: Option<(u32, u32)>,
}

/// Sink that records every delivery in memory.
///
/// Used for offline runs and tests. Failures can be queued with
/// [`InMemorySubmissionSink::fail_next`]; each queued failure is consumed by
/// one call.
#[derive(Clone, Default)]
pub struct InMemorySubmissionSink {
    inner: Arc<Mutex<InMemoryInner>>,
}

impl InMemorySubmissionSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report this score in every summary.
    #[must_use]
    pub fn with_score(self, correct: u32, total: u32) -> Self {
        if let Ok(mut guard) = self.inner.lock() {
            guard.score = Some((correct, total));
        }
        self
    }

    /// Make the next call fail with `err`.
    pub fn fail_next(&self, err: TransportError) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.failures.push_back(err);
        }
    }

    /// Every payload received so far, failed calls included.
    #[must_use]
    pub fn calls(&self) -> Vec<SubmissionPayload> {
        self.inner
            .lock()
            .map(|guard| guard.calls.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.inner.lock().map(|guard| guard.calls.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SubmissionSink for InMemorySubmissionSink {
    async fn submit_all(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<CompletionSummary, TransportError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        guard.calls.push(payload.clone());

        if let Some(err) = guard.failures.pop_front() {
            return Err(err);
        }

        let summary = CompletionSummary::ungraded(payload.session_id);
        Ok(match guard.score {
            Some((correct, total)) => summary.with_score(correct, total),
            None => summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testprep_core::model::{AnswerRecord, QuestionId, SessionId};

    fn payload() -> SubmissionPayload {
        SubmissionPayload {
            submission_id: Default::default(),
            session_id: SessionId::new(4),
            answers: vec![AnswerRecord {
                question_id: QuestionId::new(1),
                answer: Some("A".into()),
                elapsed_seconds: 3,
            }],
            session_elapsed_seconds: 3,
        }
    }

    #[tokio::test]
    async fn records_calls_and_consumes_failures() {
        let sink = InMemorySubmissionSink::new().with_score(1, 1);
        sink.fail_next(TransportError::Timeout);

        let err = sink.submit_all(&payload()).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout);

        let summary = sink.submit_all(&payload()).await.unwrap();
        assert_eq!(summary.session_id, SessionId::new(4));
        assert_eq!(summary.score.map(|s| s.correct), Some(1));
        assert_eq!(sink.call_count(), 2);
        assert_eq!(sink.calls()[0], sink.calls()[1]);
    }
}
