//! Telegram side of the bot: rendering, callback payloads and score storage.
//! Quizzes run in private chats only, so a player's id doubles as their chat id.

pub mod callback;
pub mod presenter;
pub mod store;

use std::num::TryFromIntError;

use teloxide::types::ChatId;

use crate::quiz::PlayerId;

pub use callback::CallbackAction;
pub use presenter::TelegramPresenter;
pub use store::{ScoreCard, SqliteScoreStore};

pub fn chat_of(player: PlayerId) -> Result<ChatId, TryFromIntError> {
    Ok(ChatId(i64::try_from(player.0)?))
}
