use thiserror::Error;

use super::hooks::HookError;
use super::QuizId;

/// Errors raised while loading or validating quiz content.
#[derive(Debug, Error)]
pub enum QuizError {
    #[error("quiz {0} not found")]
    NotFound(QuizId),

    #[error("quiz {0} has no questions")]
    Empty(QuizId),

    #[error("quiz {quiz}, question {index}: {reason}")]
    InvalidQuestion {
        quiz: QuizId,
        index: usize,
        reason: String,
    },

    #[error("quiz id {0} appears more than once in the catalog")]
    Duplicate(QuizId),

    #[error("failed to read quiz catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse quiz catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to load quiz: {0}")]
    Content(#[from] QuizError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The session ended and released its slot, but the score store failed.
    #[error("session {session} ended with {final_score} points but the score was not recorded: {source}")]
    ScoreNotRecorded {
        session: String,
        final_score: u32,
        #[source]
        source: HookError,
    },
}
