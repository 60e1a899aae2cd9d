pub mod answer;
pub mod assessment;
pub mod attempt;
pub mod progress;

pub use answer::{QuestionAnswerRecord, RawAnswer, SubmitAnswerRequest, SubmitAnswerResponse};
pub use assessment::{AnswerKey, ChoiceOption, Question, TestDefinition, TestFamily};
pub use attempt::{
    percentage, Attempt, AttemptCounts, AttemptStatus, CompletionReason, StartAttemptRequest,
    TestProgressResponse,
};
pub use progress::{ProgressEvent, ProgressEventKind, ProgressSnapshot};
