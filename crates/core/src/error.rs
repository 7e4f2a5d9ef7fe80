use thiserror::Error;

use crate::model::{SubmissionError, TaskError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}
