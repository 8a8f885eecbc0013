//! Recording collaborators and a ready-made controller for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::analytics::UsageStats;
use super::hooks::{Analytics, HookResult, Hooks, Presenter, ScoreStore};
use super::session::{Session, StartParams, StepRecord};
use super::{
    Admission, AdmissionController, AdmissionPolicy, Answer, JsonCatalog, PlayerId, QueueNotify,
    QueueResolution, Question, Quiz, QuizId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Presented(PlayerId, usize),
    Scored(PlayerId, StepRecord),
    AwaitingEnd(PlayerId),
    Terminated(PlayerId, u32),
}

#[derive(Default)]
pub(crate) struct RecordingPresenter {
    events: Mutex<Vec<Event>>,
    fail: AtomicBool,
}

impl RecordingPresenter {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn terminations(&self, player: PlayerId) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Terminated(p, _) if *p == player))
            .count()
    }

    pub(crate) fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn push(&self, event: Event) -> HookResult {
        self.events.lock().unwrap().push(event);
        if self.fail.load(Ordering::SeqCst) {
            return Err("presenter unavailable".into());
        }
        Ok(())
    }
}

impl Presenter for RecordingPresenter {
    fn on_present(&self, session: &Session, step: usize, _question: &Question) -> HookResult {
        self.push(Event::Presented(session.player(), step))
    }

    fn on_scored(&self, session: &Session, record: &StepRecord) -> HookResult {
        self.push(Event::Scored(session.player(), record.clone()))
    }

    fn on_awaiting_end(&self, session: &Session) -> HookResult {
        self.push(Event::AwaitingEnd(session.player()))
    }

    fn on_terminated(&self, session: &Session, final_score: u32) -> HookResult {
        self.push(Event::Terminated(session.player(), final_score))
    }
}

#[derive(Default)]
pub(crate) struct RecordingStore {
    recorded: Mutex<Vec<(PlayerId, QuizId, u32)>>,
    fail: AtomicBool,
}

impl RecordingStore {
    pub(crate) fn recorded(&self) -> Vec<(PlayerId, QuizId, u32)> {
        self.recorded.lock().unwrap().clone()
    }

    pub(crate) fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ScoreStore for RecordingStore {
    async fn record_score(&self, player: PlayerId, quiz: QuizId, final_score: u32) -> HookResult {
        self.recorded.lock().unwrap().push((player, quiz, final_score));
        if self.fail.load(Ordering::SeqCst) {
            return Err("database is down".into());
        }
        Ok(())
    }
}

/// Quiz `id` has `id` questions, each answered correctly with "A" for 10 points.
pub(crate) fn quiz(id: u64) -> Quiz {
    let questions = (0..id)
        .map(|i| {
            Question::new(
                format!("Question {}", i + 1),
                vec![Answer::new("A", "right", true), Answer::new("B", "wrong", false)],
                10,
            )
        })
        .collect();
    Quiz::new(QuizId(id), format!("Quiz {}", id), questions)
}

pub(crate) fn params(step_secs: u64, auto_end_secs: u64) -> StartParams {
    StartParams {
        step_duration: Duration::from_secs(step_secs),
        auto_end_after: Duration::from_secs(auto_end_secs),
        display_name: None,
    }
}

pub(crate) fn ignore() -> QueueNotify {
    Box::new(|_| {})
}

/// A notify callback plus the resolutions it has received.
pub(crate) fn capture() -> (QueueNotify, Arc<Mutex<Vec<QueueResolution>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let notify: QueueNotify = Box::new(move |resolution| sink.lock().unwrap().push(resolution));
    (notify, seen)
}

pub(crate) struct Fixture {
    pub(crate) controller: Arc<AdmissionController>,
    pub(crate) presenter: Arc<RecordingPresenter>,
    pub(crate) store: Arc<RecordingStore>,
    pub(crate) usage: Arc<UsageStats>,
}

pub(crate) fn fixture(policy: AdmissionPolicy) -> Fixture {
    let usage = Arc::new(UsageStats::default());
    fixture_with_analytics(policy, usage.clone(), usage)
}

/// Like [`fixture`], but the controller reports to `analytics` instead of `usage`.
pub(crate) fn fixture_with_analytics(
    policy: AdmissionPolicy,
    analytics: Arc<dyn Analytics>,
    usage: Arc<UsageStats>,
) -> Fixture {
    let catalog = JsonCatalog::new((1..=5).map(quiz).collect()).unwrap();
    let presenter = Arc::new(RecordingPresenter::default());
    let store = Arc::new(RecordingStore::default());
    let hooks = Hooks::new(presenter.clone(), store.clone()).with_analytics(analytics);
    let controller = AdmissionController::new(policy, Arc::new(catalog), hooks);
    Fixture {
        controller,
        presenter,
        store,
        usage,
    }
}

impl Fixture {
    pub(crate) async fn request(&self, player: PlayerId, quiz: u64, params: StartParams) -> Admission {
        self.controller
            .request_start(player, QuizId(quiz), params, ignore())
            .await
            .unwrap()
    }

    pub(crate) async fn start(&self, player: PlayerId, quiz: u64, params: StartParams) -> Arc<Session> {
        match self.request(player, quiz, params).await {
            Admission::Accepted(session) => session,
            other => panic!("expected the session to be accepted, got {:?}", other),
        }
    }
}
