//! Runtime settings, read from the environment after `dotenv` has loaded `.env`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::quiz::admission::{AdmissionPolicy, DEFAULT_COOLDOWN, DEFAULT_MAX_CONCURRENT};
use crate::quiz::session::{StartParams, DEFAULT_AUTO_END, DEFAULT_STEP_DURATION, MIN_STEP_DURATION};

pub const MAX_CONCURRENT_VAR: &str = "QUIZ_MAX_CONCURRENT";
pub const COOLDOWN_VAR: &str = "QUIZ_COOLDOWN_SECS";
pub const STEP_VAR: &str = "QUIZ_STEP_SECS";
pub const AUTO_END_VAR: &str = "QUIZ_AUTO_END_SECS";
pub const CATALOG_VAR: &str = "QUIZ_CATALOG";
pub const SCORE_DB_VAR: &str = "QUIZ_SCORE_DB";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub admission: AdmissionPolicy,
    /// Defaults for every session started by the bot.
    pub session: StartParams,
    pub catalog_path: PathBuf,
    pub score_db: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admission: AdmissionPolicy::default(),
            session: StartParams::default(),
            catalog_path: PathBuf::from("quizzes.json"),
            score_db: "scores.sqlite".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let number = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                None => Ok(default),
                Some(value) => value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber { key, value }),
            }
        };

        let max_concurrent = number(MAX_CONCURRENT_VAR, DEFAULT_MAX_CONCURRENT as u64)?;
        if max_concurrent == 0 {
            return Err(ConfigError::Zero(MAX_CONCURRENT_VAR));
        }
        let cooldown = Duration::from_secs(number(COOLDOWN_VAR, DEFAULT_COOLDOWN.as_secs())?);

        let mut step_duration =
            Duration::from_secs(number(STEP_VAR, DEFAULT_STEP_DURATION.as_secs())?);
        if step_duration.is_zero() {
            return Err(ConfigError::Zero(STEP_VAR));
        }
        if step_duration < MIN_STEP_DURATION {
            log::warn!(
                "{} of {:?} is too short, using {:?}",
                STEP_VAR,
                step_duration,
                DEFAULT_STEP_DURATION
            );
            step_duration = DEFAULT_STEP_DURATION;
        }
        let auto_end_after = Duration::from_secs(number(AUTO_END_VAR, DEFAULT_AUTO_END.as_secs())?);

        let defaults = Config::default();
        Ok(Self {
            admission: AdmissionPolicy {
                max_concurrent: max_concurrent as usize,
                cooldown,
            },
            session: StartParams {
                step_duration,
                auto_end_after,
                display_name: None,
            },
            catalog_path: lookup(CATALOG_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.catalog_path),
            score_db: lookup(SCORE_DB_VAR).unwrap_or(defaults.score_db),
        })
    }
}
