use std::sync::atomic::{AtomicU64, Ordering};

use super::hooks::{Analytics, HookResult};
use super::session::{Session, StepRecord};

/// In-memory usage counters since process start.
#[derive(Debug, Default)]
pub struct UsageStats {
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    questions_answered: AtomicU64,
    correct_answers: AtomicU64,
    timeouts: AtomicU64,
    points_awarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub questions_answered: u64,
    pub correct_answers: u64,
    pub timeouts: u64,
    pub points_awarded: u64,
}

impl UsageSnapshot {
    /// Share of answered questions that were correct, in percent.
    pub fn accuracy(&self) -> f64 {
        if self.questions_answered == 0 {
            return 0.0;
        }
        self.correct_answers as f64 * 100.0 / self.questions_answered as f64
    }
}

impl UsageStats {
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            correct_answers: self.correct_answers.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            points_awarded: self.points_awarded.load(Ordering::Relaxed),
        }
    }
}

impl Analytics for UsageStats {
    fn session_started(&self, _session: &Session) -> HookResult {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn step_scored(&self, _session: &Session, record: &StepRecord) -> HookResult {
        if record.timed_out() {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.questions_answered.fetch_add(1, Ordering::Relaxed);
        if record.correct {
            self.correct_answers.fetch_add(1, Ordering::Relaxed);
        }
        self.points_awarded
            .fetch_add(u64::from(record.points), Ordering::Relaxed);
        Ok(())
    }

    fn session_ended(&self, _session: &Session, _final_score: u32) -> HookResult {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
