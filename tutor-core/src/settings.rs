//! Settings store: per-device preferences with forward-compatible loading
//!
//! The persisted blob is merged over the defaults field by field, so a blob written
//! by an older build (missing fields) or holding a value this build does not
//! understand still loads: each such field simply keeps its default.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::theme::ThemeController;
use crate::types::{Dialect, Theme, UserLanguage};

/// Key the settings blob is persisted under
pub const SETTINGS_KEY: &str = "settings";

/// User preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: Theme,
    pub dialect: Dialect,
    pub user_language: UserLanguage,
    pub voice_enabled: bool,
    #[serde(rename = "autoPlayTTS")]
    pub auto_play_tts: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: Theme::Dark,
            dialect: Dialect::Neutral,
            user_language: UserLanguage::Auto,
            voice_enabled: true,
            auto_play_tts: false,
        }
    }
}

impl Settings {
    /// Parse a persisted blob, keeping the default for every field that is missing
    /// or invalid. Never fails.
    pub fn from_persisted(raw: &str) -> Self {
        let defaults = Self::default();

        let persisted = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!("Persisted settings are not an object ({}), using defaults", other);
                return defaults;
            }
            Err(e) => {
                warn!("Failed to parse persisted settings, using defaults: {}", e);
                return defaults;
            }
        };

        let mut merged: Map<String, Value> = match serde_json::to_value(&defaults) {
            Ok(Value::Object(map)) => map,
            _ => return defaults,
        };

        for (key, value) in persisted {
            if !merged.contains_key(&key) {
                debug!("Ignoring unknown setting {}", key);
                continue;
            }
            let previous = merged.insert(key.clone(), value);
            if serde_json::from_value::<Self>(Value::Object(merged.clone())).is_err() {
                warn!("Ignoring invalid value for setting {}", key);
                if let Some(previous) = previous {
                    merged.insert(key, previous);
                }
            }
        }

        serde_json::from_value(Value::Object(merged)).unwrap_or(defaults)
    }
}

/// A partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<Dialect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_language: Option<UserLanguage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_enabled: Option<bool>,
    #[serde(
        default,
        rename = "autoPlayTTS",
        skip_serializing_if = "Option::is_none"
    )]
    pub auto_play_tts: Option<bool>,
}

impl SettingsPatch {
    pub fn theme(theme: Theme) -> Self {
        Self {
            theme: Some(theme),
            ..Self::default()
        }
    }

    pub fn dialect(dialect: Dialect) -> Self {
        Self {
            dialect: Some(dialect),
            ..Self::default()
        }
    }

    pub fn voice_enabled(enabled: bool) -> Self {
        Self {
            voice_enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn auto_play_tts(enabled: bool) -> Self {
        Self {
            auto_play_tts: Some(enabled),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, settings: &mut Settings) {
        if let Some(theme) = self.theme {
            settings.theme = theme;
        }
        if let Some(dialect) = self.dialect {
            settings.dialect = dialect;
        }
        if let Some(user_language) = self.user_language {
            settings.user_language = user_language;
        }
        if let Some(voice_enabled) = self.voice_enabled {
            settings.voice_enabled = voice_enabled;
        }
        if let Some(auto_play_tts) = self.auto_play_tts {
            settings.auto_play_tts = auto_play_tts;
        }
    }
}

/// Process-wide settings: loaded once, persisted on every update
pub struct SettingsStore {
    kv: Arc<dyn KeyValueStore>,
    current: Mutex<Settings>,
    theme: Option<ThemeController>,
}

impl SettingsStore {
    /// Load persisted settings merged over the defaults
    ///
    /// A malformed blob degrades to defaults; a failing store is an error.
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        let settings = match kv.get(SETTINGS_KEY)? {
            Some(raw) => Settings::from_persisted(&raw),
            None => Settings::default(),
        };

        info!("Loaded settings: {:?}", settings);

        Ok(Self {
            kv,
            current: Mutex::new(settings),
            theme: None,
        })
    }

    /// Apply the loaded theme now and on every later theme change
    pub fn with_theme(mut self, theme: ThemeController) -> Self {
        theme.apply(self.current.lock().theme);
        self.theme = Some(theme);
        self
    }

    pub fn current(&self) -> Settings {
        self.current.lock().clone()
    }

    /// Merge `patch` into the current settings and persist the full result
    ///
    /// Updates apply in call order. If persisting fails nothing changes in memory.
    pub fn update(&self, patch: SettingsPatch) -> Result<Settings> {
        let mut current = self.current.lock();

        let mut next = current.clone();
        patch.apply_to(&mut next);
        self.kv.set(SETTINGS_KEY, &serde_json::to_string(&next)?)?;

        let theme_changed = next.theme != current.theme;
        *current = next.clone();

        if theme_changed {
            if let Some(theme) = &self.theme {
                theme.apply(next.theme);
            }
        }

        debug!("Settings updated: {:?}", patch);
        Ok(next)
    }
}
