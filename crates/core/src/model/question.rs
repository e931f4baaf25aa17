use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question {id} has an empty prompt")]
    EmptyPrompt { id: QuestionId },

    #[error("question {id} declares options but none are usable")]
    NoOptions { id: QuestionId },
}

//
// ─── ANSWER FORMAT ────────────────────────────────────────────────────────────
//

/// How a student answers a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerFormat {
    /// Pick one of an ordered list of options.
    Choice(Vec<String>),
    /// Type a free-text answer.
    FreeText,
}

impl AnswerFormat {
    #[must_use]
    pub fn options(&self) -> Option<&[String]> {
        match self {
            AnswerFormat::Choice(options) => Some(options),
            AnswerFormat::FreeText => None,
        }
    }
}

//
// ─── QUESTION ─────────────────────────────────────────────────────────────────
//

/// A single question, immutable once loaded.
///
/// `difficulty` is carried through for display and is never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuestionRecord", into = "QuestionRecord")]
pub struct Question {
    id: QuestionId,
    prompt: String,
    format: AnswerFormat,
    difficulty: Option<String>,
}

impl Question {
    /// Build a validated question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::EmptyPrompt` for a blank prompt and
    /// `QuestionError::NoOptions` for a choice question without options.
    pub fn new(
        id: QuestionId,
        prompt: impl Into<String>,
        format: AnswerFormat,
        difficulty: Option<String>,
    ) -> Result<Self, QuestionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt { id });
        }

        let format = match format {
            AnswerFormat::Choice(options) => {
                let options: Vec<String> = options
                    .into_iter()
                    .filter(|option| !option.trim().is_empty())
                    .collect();
                if options.is_empty() {
                    return Err(QuestionError::NoOptions { id });
                }
                AnswerFormat::Choice(options)
            }
            AnswerFormat::FreeText => AnswerFormat::FreeText,
        };

        Ok(Self {
            id,
            prompt,
            format,
            difficulty,
        })
    }

    /// Shorthand for a multiple-choice question.
    ///
    /// # Errors
    ///
    /// See [`Question::new`].
    pub fn choice<I, S>(id: QuestionId, prompt: &str, options: I) -> Result<Self, QuestionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = options.into_iter().map(Into::into).collect();
        Self::new(id, prompt, AnswerFormat::Choice(options), None)
    }

    /// Shorthand for a free-text question.
    ///
    /// # Errors
    ///
    /// See [`Question::new`].
    pub fn free_text(id: QuestionId, prompt: &str) -> Result<Self, QuestionError> {
        Self::new(id, prompt, AnswerFormat::FreeText, None)
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn format(&self) -> &AnswerFormat {
        &self.format
    }

    #[must_use]
    pub fn options(&self) -> Option<&[String]> {
        self.format.options()
    }

    #[must_use]
    pub fn difficulty(&self) -> Option<&str> {
        self.difficulty.as_deref()
    }
}

/// Wire shape of a question: `options` absent or null means free text.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuestionRecord {
    id: QuestionId,
    prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    difficulty: Option<String>,
}

impl TryFrom<QuestionRecord> for Question {
    type Error = QuestionError;

    fn try_from(record: QuestionRecord) -> Result<Self, Self::Error> {
        let format = match record.options {
            Some(options) => AnswerFormat::Choice(options),
            None => AnswerFormat::FreeText,
        };
        Question::new(record.id, record.prompt, format, record.difficulty)
    }
}

impl From<Question> for QuestionRecord {
    fn from(question: Question) -> Self {
        let options = match question.format {
            AnswerFormat::Choice(options) => Some(options),
            AnswerFormat::FreeText => None,
        };
        Self {
            id: question.id,
            prompt: question.prompt,
            options,
            difficulty: question.difficulty,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
