use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

static DEFAULT_DATA_DIR: &str = "data";
static DEFAULT_MINER: &str = "admin";

const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const DIFFICULTY_KEY: &str = "LEDGER_DIFFICULTY";
const MINER_KEY: &str = "LEDGER_MINER";

pub const DEFAULT_DIFFICULTY: usize = 2;
pub const DEFAULT_MINING_REWARD: f64 = 1.0;
pub const MIN_DIFFICULTY: usize = 0;
/// Each extra hex zero multiplies the expected work by 16
pub const MAX_DIFFICULTY: usize = 8;

/// Settings for one ledger instance, owned by the process and handed to
/// `Ledger::open`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the sled database
    pub data_dir: PathBuf,
    /// Required leading zero hex characters in a block hash
    pub difficulty: usize,
    pub mining_reward: f64,
    /// Identity credited with the reward when none is given
    pub miner: String,
    /// Upper bound for a single proof-of-work search
    pub mining_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            difficulty: DEFAULT_DIFFICULTY,
            mining_reward: DEFAULT_MINING_REWARD,
            miner: String::from(DEFAULT_MINER),
            mining_timeout_secs: None,
        }
    }
}

impl Config {
    /// Defaults overridden by the optional TOML file, then by environment
    /// variables. Not validated; callers still layering overrides on top
    /// validate the final value.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// `load` with command-line overrides applied last, validated once
    pub fn resolve(
        path: Option<&Path>,
        data_dir: Option<PathBuf>,
        difficulty: Option<usize>,
    ) -> Result<Config> {
        let mut config = Self::load(path)?;
        if let Some(dir) = data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(difficulty) = difficulty {
            config = config.with_difficulty(difficulty);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(|e| {
            LedgerError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Config> {
        let config: Config = toml::from_str(text)?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(dir) = env::var(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(value) = env::var(DIFFICULTY_KEY) {
            self.difficulty = value.parse().map_err(|e| {
                LedgerError::Config(format!("{DIFFICULTY_KEY} must be a number: {e}"))
            })?;
        }
        if let Ok(miner) = env::var(MINER_KEY) {
            self.miner = miner;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&self.difficulty) {
            return Err(LedgerError::Config(format!(
                "Difficulty {} is outside valid range [{MIN_DIFFICULTY}, {MAX_DIFFICULTY}]",
                self.difficulty
            )));
        }
        if !self.mining_reward.is_finite() || self.mining_reward < 0.0 {
            return Err(LedgerError::Config(format!(
                "Mining reward must be a non-negative number, got {}",
                self.mining_reward
            )));
        }
        if self.miner.trim().is_empty() {
            return Err(LedgerError::Config(
                "Miner identity must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Config {
        self.data_dir = dir.into();
        self
    }

    pub fn with_difficulty(mut self, difficulty: usize) -> Config {
        self.difficulty = difficulty;
        self
    }

    pub fn mining_timeout(&self) -> Option<Duration> {
        self.mining_timeout_secs.map(Duration::from_secs)
    }
}
