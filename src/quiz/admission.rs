//! Admission control: a global cap on running sessions, a cooldown per player
//! and a FIFO backlog for requests that arrive while every slot is taken.
//!
//! The ledger lock only ever guards map and queue updates. Loading quizzes,
//! starting sessions and notifying callers all happen after it is dropped.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use super::catalog::QuizSource;
use super::error::SchedulerError;
use super::hooks::Hooks;
use super::session::{Session, StartParams};
use super::timer::TimerService;
use super::{PlayerId, Quiz, QuizId};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionPolicy {
    pub max_concurrent: usize,
    /// Quiet period after a session ends before the same player may start another.
    pub cooldown: Duration,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Handle for a request waiting in the backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    AlreadyActive,
    AlreadyQueued(Ticket),
    CoolingDown { remaining: Duration },
    ShuttingDown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::AlreadyActive => write!(
                f,
                "You already have an active quiz. Please finish it before starting a new one."
            ),
            RejectReason::AlreadyQueued(ticket) => {
                write!(f, "You are already waiting for a quiz slot (ticket {}).", ticket)
            }
            RejectReason::CoolingDown { remaining } => {
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                write!(f, "Please wait {} seconds before starting another quiz.", secs)
            }
            RejectReason::ShuttingDown => write!(f, "The quiz service is shutting down."),
        }
    }
}

#[derive(Debug)]
pub enum Admission {
    Accepted(Arc<Session>),
    Rejected(RejectReason),
    Queued(Ticket),
}

/// How a queued request was eventually resolved.
#[derive(Debug)]
pub enum QueueResolution {
    Admitted(Arc<Session>),
    Rejected(RejectReason),
}

pub type QueueNotify = Box<dyn FnOnce(QueueResolution) + Send + 'static>;

struct PendingStart {
    ticket: Ticket,
    player: PlayerId,
    quiz: Arc<Quiz>,
    params: StartParams,
    notify: QueueNotify,
}

#[derive(Default)]
struct Ledger {
    active: HashMap<PlayerId, Arc<Session>>,
    cooldown_until: HashMap<PlayerId, Instant>,
    backlog: VecDeque<PendingStart>,
    next_ticket: u64,
    admitted_total: u64,
    released_total: u64,
    closed: bool,
}

impl Ledger {
    fn check_eligible(&self, player: PlayerId, now: Instant) -> Result<(), RejectReason> {
        if self.closed {
            return Err(RejectReason::ShuttingDown);
        }
        if self.active.contains_key(&player) {
            return Err(RejectReason::AlreadyActive);
        }
        if let Some(pending) = self.backlog.iter().find(|p| p.player == player) {
            return Err(RejectReason::AlreadyQueued(pending.ticket));
        }
        match self.cooldown_until.get(&player) {
            Some(until) if *until > now => Err(RejectReason::CoolingDown {
                remaining: *until - now,
            }),
            _ => Ok(()),
        }
    }

    fn issue_ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub active: usize,
    pub queued: usize,
    pub cooling_down: usize,
    pub admitted_total: u64,
    pub released_total: u64,
}

pub struct AdmissionController {
    policy: AdmissionPolicy,
    ledger: Mutex<Ledger>,
    source: Arc<dyn QuizSource>,
    hooks: Hooks,
    timers: TimerService,
    me: Weak<AdmissionController>,
}

impl AdmissionController {
    pub fn new(policy: AdmissionPolicy, source: Arc<dyn QuizSource>, hooks: Hooks) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            policy,
            ledger: Mutex::new(Ledger::default()),
            source,
            hooks,
            timers: TimerService::new(),
            me: me.clone(),
        })
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    pub fn timers(&self) -> &TimerService {
        &self.timers
    }

    /// Ask for a session of `quiz` on behalf of `player`.
    ///
    /// When every slot is taken the request joins the backlog and `notify`
    /// is called later with the outcome; in every other case `notify` is
    /// dropped unused.
    pub async fn request_start(
        &self,
        player: PlayerId,
        quiz: QuizId,
        params: StartParams,
        notify: QueueNotify,
    ) -> Result<Admission, SchedulerError> {
        // Cheap check first so rejected players never hit the content source.
        let eligible = self.ledger.lock().await.check_eligible(player, Instant::now());
        if let Err(reason) = eligible {
            log::info!("player {}: start of quiz {} rejected: {:?}", player, quiz, reason);
            return Ok(Admission::Rejected(reason));
        }

        let quiz = self.source.load_quiz(quiz).await?;

        let admission = {
            let mut ledger = self.ledger.lock().await;
            if let Err(reason) = ledger.check_eligible(player, Instant::now()) {
                log::info!("player {}: start of quiz {} rejected: {:?}", player, quiz.id, reason);
                return Ok(Admission::Rejected(reason));
            }
            if ledger.active.len() < self.policy.max_concurrent && ledger.backlog.is_empty() {
                Admission::Accepted(self.admit(&mut ledger, player, quiz, params))
            } else {
                let ticket = ledger.issue_ticket();
                log::info!(
                    "player {}: all {} slots busy, queued quiz {} as {} ({} waiting)",
                    player,
                    self.policy.max_concurrent,
                    quiz.id,
                    ticket,
                    ledger.backlog.len() + 1
                );
                ledger.backlog.push_back(PendingStart {
                    ticket,
                    player,
                    quiz,
                    params,
                    notify,
                });
                Admission::Queued(ticket)
            }
        };

        if let Admission::Accepted(session) = &admission {
            self.launch(session).await;
        }
        Ok(admission)
    }

    /// Drop a queued request. Returns `false` if it was already admitted or never existed.
    pub async fn cancel_queued(&self, ticket: Ticket) -> bool {
        let removed = {
            let mut ledger = self.ledger.lock().await;
            match ledger.backlog.iter().position(|p| p.ticket == ticket) {
                Some(index) => ledger.backlog.remove(index),
                None => None,
            }
        };
        match removed {
            Some(pending) => {
                log::info!("player {}: left the queue ({})", pending.player, ticket);
                true
            }
            None => false,
        }
    }

    /// Give back the slot held by `session`. Called once, by the session itself,
    /// when it terminates.
    pub(crate) async fn release(&self, session: &Session) {
        let admitted = {
            let mut ledger = self.ledger.lock().await;
            let player = session.player();
            let registered = ledger
                .active
                .get(&player)
                .is_some_and(|active| std::ptr::eq(active.as_ref(), session));
            if !registered {
                log::error!(
                    "session {}: release requested but it is not the registered session for player {}",
                    session.tag(),
                    player
                );
                debug_assert!(registered, "released session {} was not registered", session.tag());
                return;
            }

            let now = Instant::now();
            ledger.active.remove(&player);
            ledger.released_total += 1;
            ledger.cooldown_until.retain(|_, until| *until > now);
            ledger.cooldown_until.insert(player, now + self.policy.cooldown);

            let mut admitted = Vec::new();
            while ledger.active.len() < self.policy.max_concurrent {
                let Some(pending) = ledger.backlog.pop_front() else {
                    break;
                };
                let session = self.admit(&mut ledger, pending.player, pending.quiz, pending.params);
                admitted.push((session, pending.notify, pending.ticket));
            }
            admitted
        };

        log::info!(
            "player {}: released slot, cooldown {:?}",
            session.player(),
            self.policy.cooldown
        );

        for (session, notify, ticket) in admitted {
            log::info!("player {}: {} admitted from the queue", session.player(), ticket);
            notify(QueueResolution::Admitted(session.clone()));
            self.launch(&session).await;
        }
    }

    /// Refuse every new request and reject everything still waiting in the backlog.
    pub async fn shutdown(&self) -> usize {
        let drained: Vec<PendingStart> = {
            let mut ledger = self.ledger.lock().await;
            ledger.closed = true;
            ledger.backlog.drain(..).collect()
        };
        let count = drained.len();
        for pending in drained {
            (pending.notify)(QueueResolution::Rejected(RejectReason::ShuttingDown));
        }
        log::info!("admission closed, {} queued requests rejected", count);
        count
    }

    pub async fn active_session(&self, player: PlayerId) -> Option<Arc<Session>> {
        self.ledger.lock().await.active.get(&player).cloned()
    }

    pub async fn is_registered(&self, session: &Session) -> bool {
        self.ledger
            .lock()
            .await
            .active
            .get(&session.player())
            .is_some_and(|active| std::ptr::eq(active.as_ref(), session))
    }

    pub async fn queued_ticket(&self, player: PlayerId) -> Option<Ticket> {
        self.ledger
            .lock()
            .await
            .backlog
            .iter()
            .find(|p| p.player == player)
            .map(|p| p.ticket)
    }

    /// 1-based position of `ticket` in the backlog.
    pub async fn queue_position(&self, ticket: Ticket) -> Option<usize> {
        self.ledger
            .lock()
            .await
            .backlog
            .iter()
            .position(|p| p.ticket == ticket)
            .map(|i| i + 1)
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let ledger = self.ledger.lock().await;
        let now = Instant::now();
        LedgerSnapshot {
            active: ledger.active.len(),
            queued: ledger.backlog.len(),
            cooling_down: ledger.cooldown_until.values().filter(|u| **u > now).count(),
            admitted_total: ledger.admitted_total,
            released_total: ledger.released_total,
        }
    }

    fn admit(
        &self,
        ledger: &mut Ledger,
        player: PlayerId,
        quiz: Arc<Quiz>,
        params: StartParams,
    ) -> Arc<Session> {
        let session = Session::new(
            player,
            quiz,
            params,
            self.timers.clone(),
            self.hooks.clone(),
            self.me.clone(),
        );
        ledger.cooldown_until.remove(&player);
        ledger.active.insert(player, session.clone());
        ledger.admitted_total += 1;
        log::info!(
            "player {}: admitted as session {} ({}/{} slots in use)",
            player,
            session.tag(),
            ledger.active.len(),
            self.policy.max_concurrent
        );
        session
    }

    async fn launch(&self, session: &Arc<Session>) {
        if session.start().await {
            self.hooks.started(session);
        }
    }
}
