use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use testprep_core::Clock;
use testprep_core::model::{
    CompletionSummary, ProgressSummary, Question, QuestionId, QuestionStatus, SessionId,
    SessionSnapshot, SessionState, SessionStatus, SubmissionPayload, SubmitStep, TickOutcome,
    TimingMode,
};

use crate::error::RunnerError;
use crate::sink::SubmissionSink;

/// What a single tick did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TickReport {
    /// Session not running; nothing changed.
    Idle,
    Running {
        elapsed_seconds: u64,
        remaining_seconds: Option<u32>,
    },
    /// Countdown expired and the forced submission was confirmed.
    AutoSubmitted(CompletionSummary),
    /// Countdown expired but delivery failed. After a
    /// `RunnerError::SubmissionFailed` the session stays `Submitting` and the
    /// next [`TestSessionRunner::submit`] re-sends the same payload.
    AutoSubmitFailed(RunnerError),
}

/// Runs one test-taking session against a submission sink.
///
/// All mutating operations take `&mut self` and finish before returning, so
/// nothing interleaves with an in-flight submission.
pub struct TestSessionRunner {
    state: SessionState,
    sink: Arc<dyn SubmissionSink>,
    clock: Clock,
}

impl TestSessionRunner {
    /// Create a runner for a pre-fetched question set. The session starts
    /// with [`TestSessionRunner::activate`].
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidSession` for an empty question list,
    /// duplicate question ids, or a zero-length timed mode.
    pub fn new(
        session_id: SessionId,
        questions: Vec<Question>,
        timing: TimingMode,
        sink: Arc<dyn SubmissionSink>,
        clock: Clock,
    ) -> Result<Self, RunnerError> {
        let state = SessionState::new(session_id, questions, timing)?;
        Ok(Self { state, sink, clock })
    }

    /// # Errors
    ///
    /// Returns `RunnerError::InvalidState` if the session was already activated.
    pub fn activate(&mut self) -> Result<(), RunnerError> {
        self.state.activate(self.clock.now())?;
        debug!(
            session_id = %self.state.session_id(),
            questions = self.state.questions().len(),
            timing = ?self.state.timing(),
            "session activated"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `RunnerError::OutOfRange` for an invalid index and
    /// `RunnerError::InvalidState` unless the session is in progress.
    pub fn navigate(&mut self, index: usize) -> Result<(), RunnerError> {
        Ok(self.state.navigate(index)?)
    }

    /// # Errors
    ///
    /// See [`TestSessionRunner::navigate`].
    pub fn next(&mut self) -> Result<(), RunnerError> {
        Ok(self.state.next()?)
    }

    /// # Errors
    ///
    /// See [`TestSessionRunner::navigate`].
    pub fn previous(&mut self) -> Result<(), RunnerError> {
        Ok(self.state.previous()?)
    }

    /// # Errors
    ///
    /// Returns `RunnerError::InvalidState` unless the session is in progress.
    pub fn select_answer(&mut self, answer: impl Into<String>) -> Result<(), RunnerError> {
        Ok(self.state.select_answer(answer)?)
    }

    /// Returns whether the current question is flagged afterwards.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidState` unless the session is in progress.
    pub fn toggle_flag(&mut self) -> Result<bool, RunnerError> {
        Ok(self.state.toggle_flag()?)
    }

    /// # Errors
    ///
    /// Returns `RunnerError::InvalidState` unless the session is in progress.
    pub fn pause(&mut self) -> Result<(), RunnerError> {
        self.state.pause()?;
        debug!(session_id = %self.state.session_id(), "session paused");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `RunnerError::InvalidState` unless the session is paused.
    pub fn resume(&mut self) -> Result<(), RunnerError> {
        self.state.resume()?;
        debug!(session_id = %self.state.session_id(), "session resumed");
        Ok(())
    }

    /// Advance by one second; delivers the forced submission when a timed
    /// session runs out. Never fails: misfired ticks are ignored.
    pub async fn tick(&mut self) -> TickReport {
        match self.state.tick() {
            TickOutcome::Ignored => TickReport::Idle,
            TickOutcome::Running {
                elapsed_seconds,
                remaining_seconds,
            } => TickReport::Running {
                elapsed_seconds,
                remaining_seconds,
            },
            TickOutcome::Expired(payload) => {
                debug!(session_id = %self.state.session_id(), "countdown expired, auto-submitting");
                match self.deliver(payload).await {
                    Ok(summary) => TickReport::AutoSubmitted(summary),
                    Err(err) => TickReport::AutoSubmitFailed(err),
                }
            }
        }
    }

    /// Submit every answer and complete the session.
    ///
    /// A completed session returns its stored summary without contacting the
    /// sink. After a failed attempt the same payload is sent again.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::InvalidState` when not started or paused and
    /// `RunnerError::SubmissionFailed` when the sink fails. On a manual
    /// failure the session is back `InProgress`; after an expired countdown it
    /// stays `Submitting`.
    pub async fn submit(&mut self) -> Result<CompletionSummary, RunnerError> {
        match self.state.begin_submit()? {
            SubmitStep::AlreadyCompleted(summary) => Ok(summary),
            SubmitStep::Send(payload) => self.deliver(payload).await,
        }
    }

    async fn deliver(&mut self, payload: SubmissionPayload) -> Result<CompletionSummary, RunnerError> {
        debug!(
            session_id = %payload.session_id,
            submission_id = %payload.submission_id,
            answered = payload.answered_count(),
            "delivering submission"
        );

        match self.sink.submit_all(&payload).await {
            Ok(summary) => {
                let summary = self
                    .state
                    .complete_submission(summary, self.clock.now())?
                    .clone();
                debug!(session_id = %payload.session_id, "session completed");
                Ok(summary)
            }
            Err(err) => {
                self.state.fail_submission()?;
                Err(RunnerError::SubmissionFailed(err))
            }
        }
    }

    //
    // ─── QUERIES ──────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.state.session_id()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.state.status()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.state.current_index()
    }

    #[must_use]
    pub fn current_question(&self) -> &Question {
        self.state.current_question()
    }

    #[must_use]
    pub fn question_status(&self, id: QuestionId) -> Option<QuestionStatus> {
        self.state.question_status(id)
    }

    #[must_use]
    pub fn progress(&self) -> ProgressSummary {
        self.state.progress()
    }

    #[must_use]
    pub fn is_last_question(&self) -> bool {
        self.state.is_last_question()
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.state.remaining_seconds()
    }

    #[must_use]
    pub fn session_elapsed_seconds(&self) -> u64 {
        self.state.session_elapsed_seconds()
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state.started_at()
    }

    #[must_use]
    pub fn summary(&self) -> Option<&CompletionSummary> {
        self.state.summary()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }
}

impl fmt::Debug for TestSessionRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSessionRunner")
            .field("session_id", &self.state.session_id())
            .field("status", &self.state.status())
            .field("current", &self.state.current_index())
            .field("elapsed", &self.state.session_elapsed_seconds())
            .field("remaining", &self.state.remaining_seconds())
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySubmissionSink;
    use testprep_core::time::{fixed_clock, fixed_now};

    fn questions(n: u64) -> Vec<Question> {
        (0..n)
            .map(|i| Question::choice(QuestionId::new(i), &format!("Q{i}"), ["A", "B"]).unwrap())
            .collect()
    }

    fn runner(n: u64, timing: TimingMode) -> (TestSessionRunner, InMemorySubmissionSink) {
        let sink = InMemorySubmissionSink::new();
        let mut runner = TestSessionRunner::new(
            SessionId::new(11),
            questions(n),
            timing,
            Arc::new(sink.clone()),
            fixed_clock(),
        )
        .unwrap();
        runner.activate().unwrap();
        (runner, sink)
    }

    #[test]
    fn construction_rejects_empty_sessions() {
        let err = TestSessionRunner::new(
            SessionId::new(1),
            Vec::new(),
            TimingMode::Untimed,
            Arc::new(InMemorySubmissionSink::new()),
            fixed_clock(),
        )
        .unwrap_err();
        assert!(matches!(err, RunnerError::InvalidSession(_)));
    }

    #[test]
    fn activation_uses_injected_clock() {
        let (runner, _) = runner(1, TimingMode::Untimed);
        assert_eq!(runner.started_at(), Some(fixed_now()));
        assert_eq!(runner.status(), SessionStatus::InProgress);
    }

    #[tokio::test]
    async fn paused_submit_is_rejected_without_calling_sink() {
        let (mut runner, sink) = runner(1, TimingMode::Untimed);
        runner.pause().unwrap();
        let err = runner.submit().await.unwrap_err();
        assert!(matches!(
            err,
            RunnerError::InvalidState {
                operation: "submit",
                status: SessionStatus::Paused
            }
        ));
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test]
    async fn tick_after_completion_is_idle() {
        let (mut runner, _) = runner(1, TimingMode::Untimed);
        runner.submit().await.unwrap();
        assert_eq!(runner.tick().await, TickReport::Idle);
        assert_eq!(runner.session_elapsed_seconds(), 0);
    }

    #[tokio::test]
    async fn completion_time_defaults_to_clock() {
        let (mut runner, _) = runner(1, TimingMode::Untimed);
        runner.submit().await.unwrap();
        assert_eq!(runner.state().completed_at(), Some(fixed_now()));
    }
}
