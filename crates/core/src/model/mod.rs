mod answer;
mod ids;
mod submission;
mod task;
mod viewer;

pub use answer::{AnswerValue, Answers};
pub use ids::{FieldId, ParseIdError, StudentId, SubmissionKey, TaskId, TeacherId};
pub use submission::{
    HelpMessage, SubmissionError, SubmissionStatus, TaskSubmission, validate_message,
};
pub use task::{FieldDefinition, FieldKind, Task, TaskDraft, TaskError};
pub use viewer::{Role, Viewer};
