use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::model::ids::{QuestionId, SessionId};
use crate::model::question::Question;
use crate::model::submission::{AnswerRecord, CompletionSummary, SubmissionPayload};
use crate::model::timing::{TimingError, TimingMode};

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NotStarted,
    InProgress,
    Paused,
    Submitting,
    Completed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::NotStarted => "not started",
            SessionStatus::InProgress => "in progress",
            SessionStatus::Paused => "paused",
            SessionStatus::Submitting => "submitting",
            SessionStatus::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Display status of one question.
///
/// Variants are ordered by display priority: `Answered` wins over `Flagged`,
/// which wins over `Seen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Unseen,
    Seen,
    Flagged,
    Answered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total: usize,
    pub answered: usize,
    pub flagged: usize,
}

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("a session needs at least one question")]
    NoQuestions,

    #[error("question {id} appears more than once")]
    DuplicateQuestion { id: QuestionId },

    #[error("invalid timing: {0}")]
    Timing(#[from] TimingError),

    /// `index` is `None` when stepping back from the first question.
    #[error("{}", describe_out_of_range(.index, .len))]
    OutOfRange { index: Option<usize>, len: usize },

    #[error("cannot {operation} while the session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },
}

/// Message for an `OutOfRange` error, 1-based like the question numbers a
/// student sees.
#[must_use]
pub fn describe_out_of_range(index: &Option<usize>, len: &usize) -> String {
    match *index {
        Some(index) => format!(
            "there is no question {} (the session has {len} questions)",
            index.saturating_add(1)
        ),
        None => "already at the first question".to_string(),
    }
}

impl SessionStateError {
    /// True for errors that make the session unusable from construction.
    #[must_use]
    pub fn is_invalid_session(&self) -> bool {
        matches!(
            self,
            Self::NoQuestions | Self::DuplicateQuestion { .. } | Self::Timing(_)
        )
    }
}

//
// ─── SUBMISSION STEPS ─────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    /// The student pressed submit.
    Manual,
    /// The countdown reached zero.
    Auto,
}

/// What the caller must do after asking to submit.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitStep {
    /// Deliver this payload to the submission sink.
    Send(SubmissionPayload),
    /// The session already completed; nothing to send.
    AlreadyCompleted(CompletionSummary),
}

/// Result of a single `tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Session was not running; nothing changed.
    Ignored,
    Running {
        elapsed_seconds: u64,
        remaining_seconds: Option<u32>,
    },
    /// Countdown hit zero; the session is now `Submitting` with this payload.
    Expired(SubmissionPayload),
}

#[derive(Debug, Clone, PartialEq)]
struct PendingSubmission {
    payload: SubmissionPayload,
    trigger: SubmitTrigger,
}

//
// ─── SESSION STATE ─────────────────────────────────────────────────────────────
//

/// State machine for one test-taking attempt.
///
/// Time is driven by [`SessionState::tick`], one call per second while the
/// session runs. Per-question time is measured in ticks between the moment a
/// question became active and the next flush (navigation, pause, submit).
#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: SessionId,
    questions: Vec<Question>,
    timing: TimingMode,
    status: SessionStatus,
    current: usize,
    selected: BTreeMap<QuestionId, String>,
    flagged: BTreeSet<QuestionId>,
    seen: BTreeSet<QuestionId>,
    per_question: BTreeMap<QuestionId, u64>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    elapsed: u64,
    question_mark: u64,
    remaining: Option<u32>,
    pending: Option<PendingSubmission>,
    summary: Option<CompletionSummary>,
}

impl SessionState {
    /// Create a session that has not started yet.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::NoQuestions` for an empty question list,
    /// `SessionStateError::DuplicateQuestion` when an id repeats, and
    /// `SessionStateError::Timing` for a zero-length timed mode.
    pub fn new(
        session_id: SessionId,
        questions: Vec<Question>,
        timing: TimingMode,
    ) -> Result<Self, SessionStateError> {
        if questions.is_empty() {
            return Err(SessionStateError::NoQuestions);
        }
        timing.validate()?;

        let mut ids = BTreeSet::new();
        for question in &questions {
            if !ids.insert(question.id()) {
                return Err(SessionStateError::DuplicateQuestion { id: question.id() });
            }
        }

        Ok(Self {
            session_id,
            questions,
            timing,
            status: SessionStatus::NotStarted,
            current: 0,
            selected: BTreeMap::new(),
            flagged: BTreeSet::new(),
            seen: BTreeSet::new(),
            per_question: BTreeMap::new(),
            started_at: None,
            completed_at: None,
            elapsed: 0,
            question_mark: 0,
            remaining: None,
            pending: None,
            summary: None,
        })
    }

    //
    // ─── TRANSITIONS ──────────────────────────────────────────────────────────
    //

    /// Start the session at question 0.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` unless the session is `NotStarted`.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), SessionStateError> {
        self.require(SessionStatus::NotStarted, "activate")?;

        self.status = SessionStatus::InProgress;
        self.started_at = Some(now);
        self.current = 0;
        self.question_mark = self.elapsed;
        self.remaining = self.timing.duration_secs();
        let first = self.current_id();
        self.seen.insert(first);
        Ok(())
    }

    /// Make `index` the active question.
    ///
    /// Time spent on the question being left is flushed even when `index`
    /// is the current one.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` unless in progress and
    /// `SessionStateError::OutOfRange` for an invalid index. State is unchanged on error.
    pub fn navigate(&mut self, index: usize) -> Result<(), SessionStateError> {
        self.require(SessionStatus::InProgress, "navigate")?;
        if index >= self.questions.len() {
            return Err(SessionStateError::OutOfRange {
                index: Some(index),
                len: self.questions.len(),
            });
        }

        self.flush_current();
        self.current = index;
        let id = self.current_id();
        self.seen.insert(id);
        Ok(())
    }

    /// # Errors
    ///
    /// See [`SessionState::navigate`]; fails with `OutOfRange` on the last question.
    pub fn next(&mut self) -> Result<(), SessionStateError> {
        self.navigate(self.current.saturating_add(1))
    }

    /// # Errors
    ///
    /// See [`SessionState::navigate`]; fails with `OutOfRange` on the first question.
    pub fn previous(&mut self) -> Result<(), SessionStateError> {
        self.require(SessionStatus::InProgress, "navigate")?;
        let Some(index) = self.current.checked_sub(1) else {
            return Err(SessionStateError::OutOfRange {
                index: None,
                len: self.questions.len(),
            });
        };
        self.navigate(index)
    }

    /// Record `answer` for the active question, replacing any earlier answer.
    ///
    /// Changing an answer discards a payload parked by a failed submission.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` unless in progress.
    pub fn select_answer(&mut self, answer: impl Into<String>) -> Result<(), SessionStateError> {
        self.require(SessionStatus::InProgress, "answer")?;
        let answer = answer.into();
        let id = self.current_id();
        if self.selected.get(&id) != Some(&answer) {
            self.pending = None;
        }
        self.selected.insert(id, answer);
        Ok(())
    }

    /// Toggle the review flag of the active question. Returns the new flag state.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` unless in progress.
    pub fn toggle_flag(&mut self) -> Result<bool, SessionStateError> {
        self.require(SessionStatus::InProgress, "flag")?;
        let id = self.current_id();
        if self.flagged.remove(&id) {
            Ok(false)
        } else {
            self.flagged.insert(id);
            Ok(true)
        }
    }

    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` unless in progress.
    pub fn pause(&mut self) -> Result<(), SessionStateError> {
        self.require(SessionStatus::InProgress, "pause")?;
        self.flush_current();
        self.status = SessionStatus::Paused;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` unless paused.
    pub fn resume(&mut self) -> Result<(), SessionStateError> {
        self.require(SessionStatus::Paused, "resume")?;
        self.question_mark = self.elapsed;
        self.status = SessionStatus::InProgress;
        Ok(())
    }

    /// Advance the session by one second.
    ///
    /// Outside `InProgress` this is a no-op, so a late or doubled timer
    /// callback cannot move the clocks.
    pub fn tick(&mut self) -> TickOutcome {
        if self.status != SessionStatus::InProgress {
            return TickOutcome::Ignored;
        }

        self.elapsed += 1;

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                let payload = self.freeze(SubmitTrigger::Auto);
                return TickOutcome::Expired(payload);
            }
        }

        TickOutcome::Running {
            elapsed_seconds: self.elapsed,
            remaining_seconds: self.remaining,
        }
    }

    /// Ask to submit the session.
    ///
    /// From `InProgress` this flushes timing, enters `Submitting` and returns the
    /// payload to send. A payload parked by an earlier failed attempt is returned
    /// unchanged. From `Submitting` the parked payload is returned again for a
    /// retry, and from `Completed` the stored summary is returned.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` when not started or paused.
    pub fn begin_submit(&mut self) -> Result<SubmitStep, SessionStateError> {
        match self.status {
            SessionStatus::InProgress => Ok(SubmitStep::Send(self.freeze(SubmitTrigger::Manual))),
            SessionStatus::Submitting => match &self.pending {
                Some(pending) => Ok(SubmitStep::Send(pending.payload.clone())),
                None => Err(self.invalid("submit")),
            },
            SessionStatus::Completed => match &self.summary {
                Some(summary) => Ok(SubmitStep::AlreadyCompleted(summary.clone())),
                None => Err(self.invalid("submit")),
            },
            SessionStatus::NotStarted | SessionStatus::Paused => Err(self.invalid("submit")),
        }
    }

    /// Record the sink's confirmation and finish the session.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` unless submitting.
    pub fn complete_submission(
        &mut self,
        summary: CompletionSummary,
        now: DateTime<Utc>,
    ) -> Result<&CompletionSummary, SessionStateError> {
        self.require(SessionStatus::Submitting, "complete")?;
        self.completed_at = Some(summary.completed_at.unwrap_or(now));
        self.status = SessionStatus::Completed;
        self.pending = None;
        let summary = self.summary.insert(summary);
        Ok(&*summary)
    }

    /// Record a failed delivery. Returns which path the attempt came from.
    ///
    /// A manual attempt reverts to `InProgress`; an expired countdown keeps the
    /// session in `Submitting`. The payload stays parked either way.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::InvalidState` unless submitting.
    pub fn fail_submission(&mut self) -> Result<SubmitTrigger, SessionStateError> {
        self.require(SessionStatus::Submitting, "fail submission")?;
        let trigger = self
            .pending
            .as_ref()
            .map_or(SubmitTrigger::Manual, |pending| pending.trigger);
        if trigger == SubmitTrigger::Manual {
            self.question_mark = self.elapsed;
            self.status = SessionStatus::InProgress;
        }
        Ok(trigger)
    }

    //
    // ─── QUERIES ──────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn timing(&self) -> TimingMode {
        self.timing
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_question(&self) -> &Question {
        &self.questions[self.current]
    }

    #[must_use]
    pub fn is_last_question(&self) -> bool {
        self.current + 1 == self.questions.len()
    }

    #[must_use]
    pub fn selected_answers(&self) -> &BTreeMap<QuestionId, String> {
        &self.selected
    }

    #[must_use]
    pub fn answer_for(&self, id: QuestionId) -> Option<&str> {
        self.selected.get(&id).map(String::as_str)
    }

    #[must_use]
    pub fn flagged(&self) -> &BTreeSet<QuestionId> {
        &self.flagged
    }

    #[must_use]
    pub fn seen(&self) -> &BTreeSet<QuestionId> {
        &self.seen
    }

    /// Flushed per-question totals. The active question's live portion is
    /// not included; see [`SessionState::question_elapsed_seconds`].
    #[must_use]
    pub fn per_question_elapsed(&self) -> &BTreeMap<QuestionId, u64> {
        &self.per_question
    }

    /// Seconds spent on `id`, including the unflushed time of the active question.
    #[must_use]
    pub fn question_elapsed_seconds(&self, id: QuestionId) -> u64 {
        let flushed = self.per_question.get(&id).copied().unwrap_or(0);
        if self.status == SessionStatus::InProgress && id == self.current_id() {
            flushed + (self.elapsed - self.question_mark)
        } else {
            flushed
        }
    }

    #[must_use]
    pub fn session_elapsed_seconds(&self) -> u64 {
        self.elapsed
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> Option<u32> {
        self.remaining
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn summary(&self) -> Option<&CompletionSummary> {
        self.summary.as_ref()
    }

    /// Payload parked by a submission that has not been confirmed yet.
    #[must_use]
    pub fn pending_payload(&self) -> Option<&SubmissionPayload> {
        self.pending.as_ref().map(|pending| &pending.payload)
    }

    /// Status of `id`, or `None` if the question is not part of this session.
    #[must_use]
    pub fn question_status(&self, id: QuestionId) -> Option<QuestionStatus> {
        if !self.questions.iter().any(|q| q.id() == id) {
            return None;
        }
        let status = if self.selected.contains_key(&id) {
            QuestionStatus::Answered
        } else if self.flagged.contains(&id) {
            QuestionStatus::Flagged
        } else if self.seen.contains(&id) {
            QuestionStatus::Seen
        } else {
            QuestionStatus::Unseen
        };
        Some(status)
    }

    /// Statuses of all questions in session order.
    #[must_use]
    pub fn question_statuses(&self) -> Vec<(QuestionId, QuestionStatus)> {
        self.questions
            .iter()
            .filter_map(|q| self.question_status(q.id()).map(|status| (q.id(), status)))
            .collect()
    }

    #[must_use]
    pub fn progress(&self) -> ProgressSummary {
        ProgressSummary {
            total: self.questions.len(),
            answered: self.selected.len(),
            flagged: self.flagged.len(),
        }
    }

    #[must_use]
    pub fn unanswered_count(&self) -> usize {
        self.questions.len() - self.selected.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            status: self.status,
            timing: self.timing,
            current_index: self.current,
            questions: self.questions.clone(),
            selected_answers: self.selected.clone(),
            flagged: self.flagged.clone(),
            seen: self.seen.clone(),
            per_question_elapsed_seconds: self
                .questions
                .iter()
                .map(|q| (q.id(), self.question_elapsed_seconds(q.id())))
                .collect(),
            session_started_at: self.started_at,
            session_completed_at: self.completed_at,
            session_elapsed_seconds: self.elapsed,
            remaining_seconds: self.remaining,
            progress: self.progress(),
            summary: self.summary.clone(),
        }
    }

    //
    // ─── INTERNALS ────────────────────────────────────────────────────────────
    //

    fn current_id(&self) -> QuestionId {
        self.questions[self.current].id()
    }

    fn require(
        &self,
        expected: SessionStatus,
        operation: &'static str,
    ) -> Result<(), SessionStateError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> SessionStateError {
        SessionStateError::InvalidState {
            operation,
            status: self.status,
        }
    }

    fn flush_current(&mut self) {
        let id = self.current_id();
        let spent = self.elapsed - self.question_mark;
        *self.per_question.entry(id).or_insert(0) += spent;
        self.question_mark = self.elapsed;
    }

    /// Flush timing, enter `Submitting` and return the payload to deliver.
    fn freeze(&mut self, trigger: SubmitTrigger) -> SubmissionPayload {
        self.flush_current();
        self.status = SessionStatus::Submitting;

        let payload = match self.pending.take() {
            Some(parked) => parked.payload,
            None => self.build_payload(),
        };
        self.pending = Some(PendingSubmission {
            payload: payload.clone(),
            trigger,
        });
        payload
    }

    fn build_payload(&self) -> SubmissionPayload {
        let answers = self
            .questions
            .iter()
            .map(|q| AnswerRecord {
                question_id: q.id(),
                answer: self.selected.get(&q.id()).cloned(),
                elapsed_seconds: self.per_question.get(&q.id()).copied().unwrap_or(0),
            })
            .collect();

        SubmissionPayload {
            submission_id: Uuid::new_v4(),
            session_id: self.session_id,
            answers,
            session_elapsed_seconds: self.elapsed,
        }
    }
}

/// Serializable copy of the whole session, for rendering results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub timing: TimingMode,
    pub current_index: usize,
    pub questions: Vec<Question>,
    pub selected_answers: BTreeMap<QuestionId, String>,
    pub flagged: BTreeSet<QuestionId>,
    pub seen: BTreeSet<QuestionId>,
    pub per_question_elapsed_seconds: BTreeMap<QuestionId, u64>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub session_completed_at: Option<DateTime<Utc>>,
    pub session_elapsed_seconds: u64,
    pub remaining_seconds: Option<u32>,
    pub progress: ProgressSummary,
    pub summary: Option<CompletionSummary>,
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
