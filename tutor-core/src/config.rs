//! Runtime configuration: where data lives and which backend to talk to

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::chat::DEFAULT_LEVEL;
use crate::error::{Error, Result};
use crate::speech::DEFAULT_DEBOUNCE;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

const DATABASE_FILE: &str = "tutor.db";
const PREFERENCES_FILE: &str = "prefs.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutorConfig {
    /// Directory holding the database and the preferences file
    pub data_dir: PathBuf,
    pub api_base_url: String,
    /// Learner level sent with every chat message
    pub level: String,
    pub speech_debounce: Duration,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            api_base_url: DEFAULT_API_URL.to_string(),
            level: DEFAULT_LEVEL.to_string(),
            speech_debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Get the default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tutor")
}

impl TutorConfig {
    /// Defaults overridden by `TUTOR_DATA_DIR`, `TUTOR_API_URL`, `TUTOR_LEVEL` and
    /// `TUTOR_SPEECH_DEBOUNCE_MS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = lookup("TUTOR_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("TUTOR_API_URL") {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Config(format!("TUTOR_API_URL must be http(s): {url}")));
            }
            config.api_base_url = url;
        }
        if let Some(level) = lookup("TUTOR_LEVEL") {
            config.level = level;
        }
        if let Some(ms) = lookup("TUTOR_SPEECH_DEBOUNCE_MS") {
            let ms = ms.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("TUTOR_SPEECH_DEBOUNCE_MS is not a number: {e}"))
            })?;
            config.speech_debounce = Duration::from_millis(ms);
        }

        debug!("Loaded config: {:?}", config);
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn prefs_path(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_FILE)
    }
}
