//! One player's run through one quiz.
//!
//! A session walks `Created → AwaitingAnswer(0) → … → AwaitingAnswer(n-1) →
//! AwaitingEnd → Terminated`, or straight to `Terminated` when the last
//! question times out. Every transition happens under the session's own
//! lock; collaborators and the admission controller are only called after the
//! lock has been dropped.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::admission::AdmissionController;
use super::error::SessionError;
use super::hooks::Hooks;
use super::timer::{TimerHandle, TimerService};
use super::{PlayerId, Quiz, QuizId};

pub const DEFAULT_STEP_DURATION: Duration = Duration::from_secs(20);
pub const MIN_STEP_DURATION: Duration = Duration::from_secs(10);
pub const DEFAULT_AUTO_END: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartParams {
    /// Time allowed for each question.
    pub step_duration: Duration,
    /// Grace period after the last question before the session ends by itself.
    pub auto_end_after: Duration,
    pub display_name: Option<String>,
}

impl Default for StartParams {
    fn default() -> Self {
        Self {
            step_duration: DEFAULT_STEP_DURATION,
            auto_end_after: DEFAULT_AUTO_END,
            display_name: None,
        }
    }
}

impl StartParams {
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Outcome of a single question. `choice` is `None` when the question timed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: usize,
    pub choice: Option<String>,
    pub correct: bool,
    pub elapsed: Duration,
    pub points: u32,
}

impl StepRecord {
    pub fn timed_out(&self) -> bool {
        self.choice.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    AwaitingAnswer(usize),
    AwaitingEnd,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The player asked for their results.
    Finished,
    /// The last question ran out of time.
    TimedOut,
    /// Nobody finished the session within the grace period.
    AutoEnded,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Ended { final_score: u32 },
    AlreadyEnded,
    /// `finish` was called before the last question was scored.
    Ignored,
}

/// Points for a correct answer, shrinking linearly to zero at the deadline.
pub fn decayed_points(max_points: u32, elapsed: Duration, duration: Duration) -> u32 {
    if duration.is_zero() {
        return 0;
    }
    let remaining = (1.0 - elapsed.as_secs_f64() / duration.as_secs_f64()).max(0.0);
    (f64::from(max_points) * remaining).round() as u32
}

struct State {
    phase: Phase,
    presented_at: Option<Instant>,
    score: u32,
    records: Vec<StepRecord>,
    step_timer: Option<TimerHandle>,
    auto_end_timer: Option<TimerHandle>,
}

/// What to announce once the lock is released.
enum Next {
    Present(usize),
    AwaitingEnd,
}

pub struct Session {
    tag: String,
    player: PlayerId,
    quiz: Arc<Quiz>,
    params: StartParams,
    started_at: Instant,
    state: Mutex<State>,
    timers: TimerService,
    hooks: Hooks,
    controller: Weak<AdmissionController>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tag", &self.tag)
            .field("player", &self.player)
            .field("quiz", &self.quiz.id)
            .finish_non_exhaustive()
    }
}

fn session_tag(player: PlayerId) -> String {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("quiz-{}-{}-{}", player, unix, suffix)
}

impl Session {
    pub(crate) fn new(
        player: PlayerId,
        quiz: Arc<Quiz>,
        params: StartParams,
        timers: TimerService,
        hooks: Hooks,
        controller: Weak<AdmissionController>,
    ) -> Arc<Self> {
        Arc::new(Self {
            tag: session_tag(player),
            player,
            quiz,
            params,
            started_at: Instant::now(),
            state: Mutex::new(State {
                phase: Phase::Created,
                presented_at: None,
                score: 0,
                records: Vec::new(),
                step_timer: None,
                auto_end_timer: None,
            }),
            timers,
            hooks,
            controller,
        })
    }

    /// Unique per session; used in logs and in callback payloads.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    pub fn quiz_id(&self) -> QuizId {
        self.quiz.id
    }

    pub fn quiz(&self) -> &Quiz {
        &self.quiz
    }

    pub fn params(&self) -> &StartParams {
        &self.params
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn display_name(&self) -> String {
        match &self.params.display_name {
            Some(name) => name.clone(),
            None => format!("User-{}", self.player),
        }
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn score(&self) -> u32 {
        self.state.lock().await.score
    }

    pub async fn records(&self) -> Vec<StepRecord> {
        self.state.lock().await.records.clone()
    }

    /// Whether the admission controller still lists this session as active.
    pub async fn is_registered(&self) -> bool {
        match self.controller.upgrade() {
            Some(controller) => controller.is_registered(self).await,
            None => false,
        }
    }

    /// Present the first question. Only the admission controller calls this.
    pub(crate) async fn start(self: &Arc<Self>) -> bool {
        let next = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::Created {
                log::debug!("session {}: start ignored in {:?}", self.tag, state.phase);
                return false;
            }
            self.advance_to(&mut state, 0)
        };
        log::info!(
            "session {}: {} started quiz {} ({} questions)",
            self.tag,
            self.display_name(),
            self.quiz.id,
            self.quiz.len()
        );
        self.announce(next);
        true
    }

    /// Score `choice` for question `step`. Answers for any question other than
    /// the one currently awaiting an answer are dropped and yield `None`.
    pub async fn submit_answer(self: &Arc<Self>, step: usize, choice: &str) -> Option<StepRecord> {
        let (record, next) = {
            let mut state = self.state.lock().await;
            let presented_at = match (state.phase, state.presented_at) {
                (Phase::AwaitingAnswer(current), Some(at)) if current == step => at,
                (phase, _) => {
                    log::debug!(
                        "session {}: dropping answer for question {} while {:?}",
                        self.tag,
                        step + 1,
                        phase
                    );
                    return None;
                }
            };
            // Cancelled inside the critical section so the timer cannot score this step again.
            if let Some(timer) = state.step_timer.take() {
                timer.cancel();
            }
            let elapsed = presented_at.elapsed().min(self.params.step_duration);
            let record = self.score_step(&mut state, step, Some(choice), elapsed);
            let next = self.advance_to(&mut state, step + 1);
            (record, next)
        };
        self.hooks.scored(self, &record);
        self.announce(next);
        Some(record)
    }

    async fn expire_step(self: &Arc<Self>, step: usize) {
        let (record, next, final_score) = {
            let mut state = self.state.lock().await;
            if state.phase != Phase::AwaitingAnswer(step) {
                return;
            }
            state.step_timer = None;
            let record = self.score_step(&mut state, step, None, self.params.step_duration);
            // A timed-out last question ends the session in the same critical
            // section, so no answer or finish can slip in between.
            let next = if step + 1 < self.quiz.len() {
                Some(self.advance_to(&mut state, step + 1))
            } else {
                Self::seal(&mut state);
                None
            };
            (record, next, state.score)
        };
        log::debug!("session {}: question {} timed out", self.tag, step + 1);
        self.hooks.scored(self, &record);
        match next {
            Some(next) => self.announce(next),
            None => {
                if let Err(err) = self.teardown(EndReason::TimedOut, final_score).await {
                    log::warn!("{}", err);
                }
            }
        }
    }

    /// End the session on the player's request. Only allowed after the last question.
    pub async fn finish(self: &Arc<Self>) -> Result<Termination, SessionError> {
        self.close(EndReason::Finished, true).await
    }

    /// End the session now, whatever state it is in. Safe to call any number
    /// of times from any number of tasks; only the first call does anything.
    pub async fn terminate(self: &Arc<Self>, reason: EndReason) -> Result<Termination, SessionError> {
        self.close(reason, false).await
    }

    async fn close(
        self: &Arc<Self>,
        reason: EndReason,
        only_when_awaiting_end: bool,
    ) -> Result<Termination, SessionError> {
        let final_score = {
            let mut state = self.state.lock().await;
            match state.phase {
                Phase::Terminated => return Ok(Termination::AlreadyEnded),
                Phase::AwaitingEnd => {}
                phase if only_when_awaiting_end => {
                    log::debug!("session {}: finish ignored in {:?}", self.tag, phase);
                    return Ok(Termination::Ignored);
                }
                _ => {}
            }
            Self::seal(&mut state)
        };
        self.teardown(reason, final_score).await
    }

    /// Move to `Terminated` and stop both timers. Returns the final score.
    fn seal(state: &mut State) -> u32 {
        if let Some(timer) = state.step_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = state.auto_end_timer.take() {
            timer.cancel();
        }
        state.phase = Phase::Terminated;
        state.presented_at = None;
        state.score
    }

    /// Runs once per session, after `seal` and outside the lock.
    async fn teardown(
        self: &Arc<Self>,
        reason: EndReason,
        final_score: u32,
    ) -> Result<Termination, SessionError> {
        log::info!(
            "session {}: ended ({:?}) with {} points after {:?}",
            self.tag,
            reason,
            final_score,
            self.started_at.elapsed()
        );

        // The slot goes back before anything that can fail.
        match self.controller.upgrade() {
            Some(controller) => controller.release(self).await,
            None => log::warn!("session {}: admission controller is gone", self.tag),
        }

        match self.hooks.terminated(self, final_score).await {
            Ok(()) => Ok(Termination::Ended { final_score }),
            Err(source) => {
                log::warn!(
                    "session {}: failed to record score {} for {}: {}",
                    self.tag,
                    final_score,
                    self.display_name(),
                    source
                );
                Err(SessionError::ScoreNotRecorded {
                    session: self.tag.clone(),
                    final_score,
                    source,
                })
            }
        }
    }

    fn score_step(
        &self,
        state: &mut State,
        step: usize,
        choice: Option<&str>,
        elapsed: Duration,
    ) -> StepRecord {
        let question = self.quiz.questions.get(step);
        let correct = match (question, choice) {
            (Some(question), Some(choice)) => question.is_correct(choice),
            _ => false,
        };
        let points = match question {
            Some(question) if correct => {
                decayed_points(question.max_points, elapsed, self.params.step_duration)
            }
            _ => 0,
        };
        state.score = state.score.saturating_add(points);
        let record = StepRecord {
            step,
            choice: choice.map(str::to_owned),
            correct,
            elapsed,
            points,
        };
        state.records.push(record.clone());
        record
    }

    /// Move to question `step`, or to `AwaitingEnd` when there is none, arming
    /// the matching timer.
    fn advance_to(self: &Arc<Self>, state: &mut State, step: usize) -> Next {
        let session = Arc::downgrade(self);
        if step < self.quiz.len() {
            state.phase = Phase::AwaitingAnswer(step);
            state.presented_at = Some(Instant::now());
            state.step_timer = Some(self.timers.schedule(self.params.step_duration, async move {
                if let Some(session) = session.upgrade() {
                    session.expire_step(step).await;
                }
            }));
            Next::Present(step)
        } else {
            state.phase = Phase::AwaitingEnd;
            state.presented_at = None;
            state.auto_end_timer = Some(self.timers.schedule(self.params.auto_end_after, async move {
                if let Some(session) = session.upgrade() {
                    log::info!("session {}: auto-ending after inactivity", session.tag());
                    if let Err(err) = session.terminate(EndReason::AutoEnded).await {
                        log::warn!("{}", err);
                    }
                }
            }));
            Next::AwaitingEnd
        }
    }

    fn announce(&self, next: Next) {
        match next {
            Next::Present(step) => {
                if let Some(question) = self.quiz.questions.get(step) {
                    self.hooks.present(self, step, question);
                }
            }
            Next::AwaitingEnd => self.hooks.awaiting_end(self),
        }
    }
}
