use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::sync::Arc;

use async_trait::async_trait;

use super::error::QuizError;
use super::{Quiz, QuizId};

/// Where quiz content comes from. The scheduler treats what it returns as read-only.
#[async_trait]
pub trait QuizSource: Send + Sync {
    async fn load_quiz(&self, quiz: QuizId) -> Result<Arc<Quiz>, QuizError>;
}

/// Quizzes read once from a JSON array and kept in memory.
#[derive(Debug, Clone, Default)]
pub struct JsonCatalog {
    quizzes: BTreeMap<QuizId, Arc<Quiz>>,
}

impl JsonCatalog {
    pub fn new(quizzes: Vec<Quiz>) -> Result<Self, QuizError> {
        let mut catalog = BTreeMap::new();
        for quiz in quizzes {
            quiz.validate()?;
            let id = quiz.id;
            if catalog.insert(id, Arc::new(quiz)).is_some() {
                return Err(QuizError::Duplicate(id));
            }
        }
        Ok(Self { quizzes: catalog })
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, QuizError> {
        let quizzes: Vec<Quiz> = serde_json::from_reader(reader)?;
        Self::new(quizzes)
    }

    pub fn from_file(file: File) -> Result<Self, QuizError> {
        Self::from_reader(BufReader::new(file))
    }

    pub fn list(&self) -> impl Iterator<Item = &Quiz> {
        self.quizzes.values().map(|q| q.as_ref())
    }

    pub fn len(&self) -> usize {
        self.quizzes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quizzes.is_empty()
    }
}

#[async_trait]
impl QuizSource for JsonCatalog {
    async fn load_quiz(&self, quiz: QuizId) -> Result<Arc<Quiz>, QuizError> {
        self.quizzes
            .get(&quiz)
            .cloned()
            .ok_or(QuizError::NotFound(quiz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {
            "id": 1,
            "name": "Borrowing",
            "questions": [
                {
                    "text": "How many mutable borrows may be live at once?",
                    "answers": [
                        {"key": "A", "text": "One", "is_correct": true},
                        {"key": "B", "text": "Unlimited"}
                    ],
                    "max_points": 10,
                    "explanation": "Aliasing XOR mutability."
                }
            ]
        },
        {
            "id": 2,
            "name": "Traits",
            "questions": [
                {
                    "text": "Which keyword declares a trait?",
                    "answers": [
                        {"key": "A", "text": "impl"},
                        {"key": "B", "text": "trait", "is_correct": true}
                    ],
                    "max_points": 5
                }
            ]
        }
    ]"#;

    #[tokio::test]
    async fn loads_quizzes_by_id() {
        let catalog = JsonCatalog::from_reader(CATALOG.as_bytes()).unwrap();
        assert_eq!(catalog.len(), 2);

        let quiz = catalog.load_quiz(QuizId(2)).await.unwrap();
        assert_eq!(quiz.name, "Traits");
        assert!(quiz.questions[0].is_correct("B"));
        assert_eq!(quiz.questions[0].explanation, None);

        let names: Vec<_> = catalog.list().map(|q| q.name.as_str()).collect();
        assert_eq!(names, vec!["Borrowing", "Traits"]);
    }

    #[tokio::test]
    async fn missing_quiz_is_not_found() {
        let catalog = JsonCatalog::from_reader(CATALOG.as_bytes()).unwrap();
        assert!(matches!(
            catalog.load_quiz(QuizId(3)).await,
            Err(QuizError::NotFound(QuizId(3)))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let quizzes: Vec<Quiz> = serde_json::from_str(CATALOG).unwrap();
        let mut doubled = quizzes.clone();
        doubled.push(quizzes[0].clone());
        assert!(matches!(
            JsonCatalog::new(doubled),
            Err(QuizError::Duplicate(QuizId(1)))
        ));
    }

    #[test]
    fn invalid_content_is_rejected_at_load() {
        let broken = CATALOG.replace(r#""max_points": 5"#, r#""max_points": 0"#);
        assert!(matches!(
            JsonCatalog::from_reader(broken.as_bytes()),
            Err(QuizError::InvalidQuestion { quiz: QuizId(2), index: 0, .. })
        ));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            JsonCatalog::from_reader("[{".as_bytes()),
            Err(QuizError::Parse(_))
        ));
    }
}
