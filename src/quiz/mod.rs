pub mod admission;
pub mod analytics;
pub mod catalog;
pub mod error;
pub mod hooks;
pub mod session;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashSet;
use std::fmt;

pub use admission::{
    Admission, AdmissionController, AdmissionPolicy, LedgerSnapshot, QueueNotify,
    QueueResolution, RejectReason, Ticket,
};
pub use analytics::{UsageSnapshot, UsageStats};
pub use catalog::{JsonCatalog, QuizSource};
pub use error::{QuizError, SchedulerError, SessionError};
pub use hooks::{Analytics, HookError, HookResult, Hooks, Presenter, ScoreStore};
pub use session::{EndReason, Phase, Session, StartParams, StepRecord, Termination};
pub use timer::{TimerHandle, TimerService};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct QuizId(pub u64);

impl fmt::Display for QuizId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The user a session belongs to. One player holds at most one active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub name: String,
    pub questions: Vec<Question>,
}

impl Quiz {
    pub fn new(id: QuizId, name: impl Into<String>, questions: Vec<Question>) -> Self {
        Self {
            id,
            name: name.into(),
            questions,
        }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Upper bound on what a single session of this quiz can score.
    pub fn max_score(&self) -> u32 {
        self.questions.iter().map(|q| q.max_points).sum()
    }

    pub fn validate(&self) -> Result<(), QuizError> {
        if self.questions.is_empty() {
            return Err(QuizError::Empty(self.id));
        }
        for (index, question) in self.questions.iter().enumerate() {
            if let Err(reason) = question.validate() {
                return Err(QuizError::InvalidQuestion {
                    quiz: self.id,
                    index,
                    reason,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Question {
    pub text: String,
    pub answers: Vec<Answer>,
    pub max_points: u32,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl Question {
    pub fn new(text: String, answers: Vec<Answer>, max_points: u32) -> Self {
        Self {
            text,
            answers,
            max_points,
            explanation: None,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn correct_answer(&self) -> Option<&Answer> {
        self.answers.iter().find(|a| a.is_correct)
    }

    pub fn is_correct(&self, key: &str) -> bool {
        self.answers.iter().any(|a| a.is_correct && a.key == key)
    }

    fn validate(&self) -> Result<(), String> {
        if self.answers.len() < 2 {
            return Err("needs at least two answers".to_string());
        }
        let mut keys = HashSet::new();
        for answer in &self.answers {
            if answer.key.is_empty() {
                return Err("answer key is empty".to_string());
            }
            // Keys travel inside `|`-separated callback data.
            if answer.key.contains('|') {
                return Err(format!("answer key '{}' contains '|'", answer.key));
            }
            if !keys.insert(answer.key.as_str()) {
                return Err(format!("duplicate answer key '{}'", answer.key));
            }
        }
        let correct = self.answers.iter().filter(|a| a.is_correct).count();
        if correct != 1 {
            return Err(format!("expected exactly one correct answer, found {}", correct));
        }
        if self.max_points == 0 {
            return Err("max_points must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Answer {
    pub key: String,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

impl Answer {
    pub fn new(key: impl Into<String>, text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
            is_correct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct: &[bool]) -> Question {
        let answers = correct
            .iter()
            .enumerate()
            .map(|(i, c)| Answer::new(((b'A' + i as u8) as char).to_string(), "option", *c))
            .collect();
        Question::new("What?".to_string(), answers, 10)
    }

    #[test]
    fn valid_quiz_passes() {
        let quiz = Quiz::new(QuizId(1), "ok", vec![question(&[true, false])]);
        assert!(quiz.validate().is_ok());
        assert_eq!(quiz.max_score(), 10);
    }

    #[test]
    fn empty_quiz_is_rejected() {
        let quiz = Quiz::new(QuizId(7), "empty", vec![]);
        assert!(matches!(quiz.validate(), Err(QuizError::Empty(QuizId(7)))));
    }

    #[test]
    fn question_needs_exactly_one_correct_answer() {
        let quiz = Quiz::new(
            QuizId(2),
            "two correct",
            vec![question(&[true, false]), question(&[true, true])],
        );
        match quiz.validate() {
            Err(QuizError::InvalidQuestion { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut q = question(&[true, false]);
        q.answers[1].key = "A".to_string();
        let quiz = Quiz::new(QuizId(3), "dup", vec![q]);
        assert!(quiz.validate().is_err());
    }

    #[test]
    fn is_correct_matches_key() {
        let q = question(&[false, true, false]);
        assert!(q.is_correct("B"));
        assert!(!q.is_correct("A"));
        assert!(!q.is_correct("Z"));
        assert_eq!(q.correct_answer().map(|a| a.key.as_str()), Some("B"));
    }
}
