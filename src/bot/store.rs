use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use teloxide::dispatching::dialogue::{serializer::Json, ErasedStorage, SqliteStorage, Storage};

use super::chat_of;
use crate::quiz::{HookError, HookResult, PlayerId, QuizId, ScoreStore};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScoreEntry {
    pub quiz: QuizId,
    pub score: u32,
    /// Seconds since the Unix epoch.
    pub recorded_at: u64,
}

/// Every result a player has recorded, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScoreCard {
    pub results: Vec<ScoreEntry>,
}

impl ScoreCard {
    pub fn push(&mut self, quiz: QuizId, score: u32) {
        let recorded_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.results.push(ScoreEntry {
            quiz,
            score,
            recorded_at,
        });
    }

    pub fn best(&self, quiz: QuizId) -> Option<u32> {
        self.results
            .iter()
            .filter(|r| r.quiz == quiz)
            .map(|r| r.score)
            .max()
    }

    pub fn total(&self) -> u64 {
        self.results.iter().map(|r| u64::from(r.score)).sum()
    }

    /// Best score per quiz, ordered by quiz id.
    pub fn bests(&self) -> Vec<(QuizId, u32)> {
        let mut quizzes: Vec<QuizId> = self.results.iter().map(|r| r.quiz).collect();
        quizzes.sort();
        quizzes.dedup();
        quizzes
            .into_iter()
            .filter_map(|quiz| self.best(quiz).map(|best| (quiz, best)))
            .collect()
    }
}

/// Score cards kept in teloxide's SQLite dialogue storage, one per private chat.
pub struct SqliteScoreStore {
    storage: Arc<ErasedStorage<ScoreCard>>,
}

impl SqliteScoreStore {
    pub async fn open(path: &str) -> Result<Self, HookError> {
        let storage = SqliteStorage::open(path, Json).await?.erase();
        Ok(Self { storage })
    }

    pub async fn card(&self, player: PlayerId) -> Result<ScoreCard, HookError> {
        let card = self.storage.clone().get_dialogue(chat_of(player)?).await?;
        Ok(card.unwrap_or_default())
    }
}

#[async_trait]
impl ScoreStore for SqliteScoreStore {
    async fn record_score(&self, player: PlayerId, quiz: QuizId, final_score: u32) -> HookResult {
        // One active session per player, so this read-modify-write never races itself.
        let mut card = self.card(player).await?;
        card.push(quiz, final_score);
        self.storage
            .clone()
            .update_dialogue(chat_of(player)?, card)
            .await?;
        log::info!("recorded {} points in quiz {} for player {}", final_score, quiz, player);
        Ok(())
    }
}
