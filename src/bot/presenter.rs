//! Renders session events as Telegram messages.
//!
//! Hooks run inside the scheduler and must not wait on the network, so every
//! message goes into an outbox drained by a single worker task. One worker
//! keeps a player's messages in the order the session produced them.

use rand::seq::SliceRandom;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use teloxide::utils::html;
use tokio::sync::mpsc;

use super::callback::CallbackAction;
use super::chat_of;
use crate::quiz::{HookError, HookResult, PlayerId, Presenter, Question, Session, StepRecord};

struct Outgoing {
    chat: ChatId,
    text: String,
    keyboard: Option<InlineKeyboardMarkup>,
}

#[derive(Clone)]
pub struct TelegramPresenter {
    outbox: mpsc::UnboundedSender<Outgoing>,
}

impl TelegramPresenter {
    /// Spawns the delivery worker; call from within the runtime.
    pub fn new(bot: Bot) -> Self {
        let (outbox, mut pending) = mpsc::unbounded_channel::<Outgoing>();
        tokio::spawn(async move {
            while let Some(message) = pending.recv().await {
                let request = bot
                    .send_message(message.chat, message.text)
                    .parse_mode(ParseMode::Html);
                let result = match message.keyboard {
                    Some(keyboard) => request.reply_markup(keyboard).await,
                    None => request.await,
                };
                if let Err(err) = result {
                    log::warn!("failed to deliver message to chat {}: {}", message.chat.0, err);
                }
            }
            log::debug!("presenter outbox closed");
        });
        Self { outbox }
    }

    /// Queue a plain HTML message for `player`, ordered with the session's own messages.
    pub fn say(&self, player: PlayerId, text: impl Into<String>) -> HookResult {
        self.enqueue(player, text.into(), None)
    }

    fn enqueue(
        &self,
        player: PlayerId,
        text: String,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> HookResult {
        let chat = chat_of(player)?;
        self.outbox
            .send(Outgoing {
                chat,
                text,
                keyboard,
            })
            .map_err(|_| HookError::from("presenter outbox is closed"))
    }
}

impl Presenter for TelegramPresenter {
    fn on_present(&self, session: &Session, step: usize, question: &Question) -> HookResult {
        let mut order: Vec<usize> = (0..question.answers.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        let text = render_question(
            &session.quiz().name,
            step,
            session.quiz().len(),
            question,
            &order,
            session.params().step_duration.as_secs(),
        );
        let buttons = order
            .iter()
            .map(|&i| {
                let key = &question.answers[i].key;
                let action = CallbackAction::Answer {
                    tag: session.tag().to_string(),
                    step,
                    key: key.clone(),
                };
                InlineKeyboardButton::callback(key.clone(), action.encode())
            })
            .collect::<Vec<_>>();

        self.enqueue(
            session.player(),
            text,
            Some(InlineKeyboardMarkup::new(vec![buttons])),
        )
    }

    fn on_scored(&self, session: &Session, record: &StepRecord) -> HookResult {
        let Some(question) = session.quiz().questions.get(record.step) else {
            return Ok(());
        };
        self.enqueue(session.player(), render_feedback(question, record), None)
    }

    fn on_awaiting_end(&self, session: &Session) -> HookResult {
        let text = format!(
            "That was the last question! Press <b>Finish</b> to see your results, \
             or they will be posted automatically in {} seconds.",
            session.params().auto_end_after.as_secs()
        );
        let finish = CallbackAction::Finish {
            tag: session.tag().to_string(),
        };
        let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
            "Finish",
            finish.encode(),
        )]]);
        self.enqueue(session.player(), text, Some(keyboard))
    }

    fn on_terminated(&self, session: &Session, final_score: u32) -> HookResult {
        let text = render_results(&session.quiz().name, final_score, session.quiz().len());
        self.enqueue(session.player(), text, None)
    }
}

pub fn render_question(
    quiz_name: &str,
    step: usize,
    total: usize,
    question: &Question,
    order: &[usize],
    seconds: u64,
) -> String {
    let options = order
        .iter()
        .filter_map(|&i| question.answers.get(i))
        .map(|a| format!("<b>{}</b>: {}", html::escape(&a.key), html::escape(&a.text)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<b>{}</b>\nQuestion {}/{}\n\n{}\n\n{}\n\nYou have {} seconds.",
        html::escape(quiz_name),
        step + 1,
        total,
        html::escape(&question.text),
        options,
        seconds
    )
}

pub fn render_feedback(question: &Question, record: &StepRecord) -> String {
    if record.correct {
        return format!("Correct! You earned <b>{}</b> points.", record.points);
    }
    let mut text = if record.timed_out() {
        "Time's up!".to_string()
    } else {
        "Incorrect!".to_string()
    };
    if let Some(answer) = question.correct_answer() {
        text.push_str(&format!(
            " The correct answer was <b>{}</b>: {}",
            html::escape(&answer.key),
            html::escape(&answer.text)
        ));
    }
    if let Some(explanation) = &question.explanation {
        text.push_str(&format!("\n\n{}", html::escape(explanation)));
    }
    text
}

pub fn render_results(quiz_name: &str, final_score: u32, questions: usize) -> String {
    format!(
        "<b>Quiz Results</b>\nYou've completed: {}\n\nYour Score: <b>{}</b> points\nCompleted {} questions",
        html::escape(quiz_name),
        final_score,
        questions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::Answer;
    use std::time::Duration;

    fn question() -> Question {
        Question::new(
            "Is <T> a generic?".to_string(),
            vec![Answer::new("A", "Yes", true), Answer::new("B", "No", false)],
            10,
        )
        .with_explanation("Angle brackets introduce type parameters.")
    }

    fn record(choice: Option<&str>, correct: bool, points: u32) -> StepRecord {
        StepRecord {
            step: 0,
            choice: choice.map(str::to_string),
            correct,
            elapsed: Duration::from_secs(4),
            points,
        }
    }

    #[test]
    fn question_is_escaped_and_follows_order() {
        let text = render_question("Generics & co", 1, 4, &question(), &[1, 0], 20);
        assert!(text.contains("Generics &amp; co"));
        assert!(text.contains("Question 2/4"));
        assert!(text.contains("Is &lt;T&gt; a generic?"));
        let b = text.find("<b>B</b>: No").unwrap();
        let a = text.find("<b>A</b>: Yes").unwrap();
        assert!(b < a);
        assert!(text.ends_with("You have 20 seconds."));
    }

    #[test]
    fn feedback_for_each_outcome() {
        let q = question();
        assert_eq!(
            render_feedback(&q, &record(Some("A"), true, 8)),
            "Correct! You earned <b>8</b> points."
        );

        let wrong = render_feedback(&q, &record(Some("B"), false, 0));
        assert!(wrong.starts_with("Incorrect! The correct answer was <b>A</b>: Yes"));
        assert!(wrong.ends_with("Angle brackets introduce type parameters."));

        let missed = render_feedback(&q, &record(None, false, 0));
        assert!(missed.starts_with("Time's up!"));
    }

    #[test]
    fn results_show_score_and_question_count() {
        let text = render_results("Traits", 42, 5);
        assert!(text.contains("Your Score: <b>42</b> points"));
        assert!(text.contains("Completed 5 questions"));
    }
}
