//! Collaborators the scheduler calls into: presentation, score persistence and
//! analytics. Each call is an isolation boundary; a failing collaborator is
//! logged here and never changes what the session does next.

use std::sync::Arc;

use async_trait::async_trait;

use super::session::{Session, StepRecord};
use super::{PlayerId, Question, QuizId};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;
pub type HookResult = Result<(), HookError>;

/// Renders session progress to the user. Calls are fire-and-forget.
pub trait Presenter: Send + Sync {
    fn on_present(&self, session: &Session, step: usize, question: &Question) -> HookResult;

    fn on_scored(&self, session: &Session, record: &StepRecord) -> HookResult;

    fn on_awaiting_end(&self, _session: &Session) -> HookResult {
        Ok(())
    }

    fn on_terminated(&self, session: &Session, final_score: u32) -> HookResult;
}

/// Persists final scores. Called once per terminated session and never retried.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    async fn record_score(&self, player: PlayerId, quiz: QuizId, final_score: u32) -> HookResult;
}

/// Best-effort usage tracking. Errors are logged and otherwise ignored.
pub trait Analytics: Send + Sync {
    fn session_started(&self, _session: &Session) -> HookResult {
        Ok(())
    }

    fn step_scored(&self, _session: &Session, _record: &StepRecord) -> HookResult {
        Ok(())
    }

    fn session_ended(&self, _session: &Session, _final_score: u32) -> HookResult {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Hooks {
    presenter: Arc<dyn Presenter>,
    scores: Arc<dyn ScoreStore>,
    analytics: Option<Arc<dyn Analytics>>,
}

impl Hooks {
    pub fn new(presenter: Arc<dyn Presenter>, scores: Arc<dyn ScoreStore>) -> Self {
        Self {
            presenter,
            scores,
            analytics: None,
        }
    }

    pub fn with_analytics(mut self, analytics: Arc<dyn Analytics>) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub(crate) fn present(&self, session: &Session, step: usize, question: &Question) {
        if let Err(err) = self.presenter.on_present(session, step, question) {
            log::warn!(
                "session {}: presenting question {} failed: {}",
                session.tag(),
                step + 1,
                err
            );
        }
    }

    pub(crate) fn scored(&self, session: &Session, record: &StepRecord) {
        if let Err(err) = self.presenter.on_scored(session, record) {
            log::warn!(
                "session {}: reporting the result of question {} failed: {}",
                session.tag(),
                record.step + 1,
                err
            );
        }
        if let Some(analytics) = &self.analytics {
            if let Err(err) = analytics.step_scored(session, record) {
                log::debug!("session {}: analytics step_scored failed: {}", session.tag(), err);
            }
        }
    }

    pub(crate) fn awaiting_end(&self, session: &Session) {
        if let Err(err) = self.presenter.on_awaiting_end(session) {
            log::warn!("session {}: end prompt failed: {}", session.tag(), err);
        }
    }

    pub(crate) fn started(&self, session: &Session) {
        if let Some(analytics) = &self.analytics {
            if let Err(err) = analytics.session_started(session) {
                log::debug!("session {}: analytics session_started failed: {}", session.tag(), err);
            }
        }
    }

    /// Presenter and analytics run first; the score store result is handed
    /// back so the terminating caller can report it.
    pub(crate) async fn terminated(&self, session: &Session, final_score: u32) -> HookResult {
        if let Err(err) = self.presenter.on_terminated(session, final_score) {
            log::warn!("session {}: results display failed: {}", session.tag(), err);
        }
        if let Some(analytics) = &self.analytics {
            if let Err(err) = analytics.session_ended(session, final_score) {
                log::debug!("session {}: analytics session_ended failed: {}", session.tag(), err);
            }
        }
        self.scores
            .record_score(session.player(), session.quiz_id(), final_score)
            .await
    }
}
