mod ids;
mod question;
mod session;
mod submission;
mod timing;

pub use ids::{ParseIdError, QuestionId, SessionId};
pub use question::{AnswerFormat, Question, QuestionError};
pub use session::{
    ProgressSummary, QuestionStatus, SessionSnapshot, SessionState, SessionStateError,
    SessionStatus, SubmitStep, SubmitTrigger, TickOutcome, describe_out_of_range,
};
pub use submission::{AnswerRecord, CompletionSummary, Score, SubmissionPayload};
pub use timing::{TimingError, TimingMode};
