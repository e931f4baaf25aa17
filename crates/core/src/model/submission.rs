use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::ids::{QuestionId, SessionId};

/// Final answer and time spent for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    /// `None` means unanswered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub elapsed_seconds: u64,
}

/// Everything sent to the submission sink in one "submit all + complete" call.
///
/// Frozen when the session enters `Submitting`; retries reuse it unchanged,
/// including `submission_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionPayload {
    pub submission_id: Uuid,
    pub session_id: SessionId,
    pub answers: Vec<AnswerRecord>,
    pub session_elapsed_seconds: u64,
}

impl SubmissionPayload {
    #[must_use]
    pub fn answer_for(&self, id: QuestionId) -> Option<&AnswerRecord> {
        self.answers.iter().find(|record| record.question_id == id)
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers
            .iter()
            .filter(|record| record.answer.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub correct: u32,
    pub total: u32,
}

impl Score {
    /// Percentage in `0.0..=100.0`; zero when `total` is zero.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        f64::from(self.correct) * 100.0 / f64::from(self.total)
    }
}

/// Result handed back by the submission sink once the session is complete.
///
/// The score is whatever the grading side reports; it may be absent when
/// grading happens later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub session_id: SessionId,
    #[serde(default)]
    pub score: Option<Score>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CompletionSummary {
    /// Summary with no grading information.
    #[must_use]
    pub fn ungraded(session_id: SessionId) -> Self {
        Self {
            session_id,
            score: None,
            completed_at: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_score(mut self, correct: u32, total: u32) -> Self {
        self.score = Some(Score { correct, total });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_percent_handles_empty_total() {
        assert_eq!(Score { correct: 0, total: 0 }.percent(), 0.0);
        assert_eq!(Score { correct: 3, total: 4 }.percent(), 75.0);
    }

    #[test]
    fn unanswered_records_omit_answer_field() {
        let record = AnswerRecord {
            question_id: QuestionId::new(5),
            answer: None,
            elapsed_seconds: 12,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"question_id": 5, "elapsed_seconds": 12})
        );
    }

    #[test]
    fn summary_tolerates_minimal_response() {
        let summary: CompletionSummary =
            serde_json::from_str(r#"{"session_id": 3}"#).unwrap();
        assert_eq!(summary, CompletionSummary::ungraded(SessionId::new(3)));
    }
}
