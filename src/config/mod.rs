//! Widget configuration.
//!
//! Provides the unified configuration consumed by the widget driver:
//! - defaults mirroring the hosted RealCaptcha deployment
//! - partial overrides (`WidgetOptions`) loadable from JSON for `configure`
//! - localized user-visible messages

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_ENDPOINT: &str = "https://api.realcatcha.com";

/// Errors raised while building or merging configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid api endpoint '{0}': {1}")]
    Endpoint(String, url::ParseError),
    #[error("invalid options payload: {0}")]
    Options(#[from] serde_json::Error),
    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),
}

/// Visual theme requested by the host page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// Language used for user-visible messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    #[default]
    Ko,
    En,
}

/// Keys for every message the widget can surface to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKey {
    ConnectionFailed,
    InvalidSelection,
    LowConfidence,
    WrongAnswer,
    ChallengeExpired,
    EmptyDrawing,
    Locked,
    SelectImagesPrompt,
}

impl Locale {
    pub fn message(self, key: MessageKey) -> &'static str {
        match (self, key) {
            (Locale::Ko, MessageKey::ConnectionFailed) => {
                "서버 연결에 실패했습니다. 다시 시도해주세요."
            }
            (Locale::Ko, MessageKey::InvalidSelection) => "잘못된 선택입니다. 다시 확인해주세요.",
            (Locale::Ko, MessageKey::LowConfidence) => "확인에 실패했습니다. 다시 시도해주세요.",
            (Locale::Ko, MessageKey::WrongAnswer) => "정답이 아닙니다. 다시 시도해주세요.",
            (Locale::Ko, MessageKey::ChallengeExpired) => {
                "시간이 만료되어 새로운 문제로 갱신합니다."
            }
            (Locale::Ko, MessageKey::EmptyDrawing) => "먼저 키워드를 손으로 써주세요.",
            (Locale::Ko, MessageKey::Locked) => "시도 횟수를 초과했습니다.",
            (Locale::Ko, MessageKey::SelectImagesPrompt) => "이미지를 선택하세요",
            (Locale::En, MessageKey::ConnectionFailed) => "Connection failed. Please try again.",
            (Locale::En, MessageKey::InvalidSelection) => "Invalid selection. Please try again.",
            (Locale::En, MessageKey::LowConfidence) => "Verification failed. Please try again.",
            (Locale::En, MessageKey::WrongAnswer) => "That is not correct. Please try again.",
            (Locale::En, MessageKey::ChallengeExpired) => {
                "Time expired, loading a new challenge."
            }
            (Locale::En, MessageKey::EmptyDrawing) => "Please write the keywords first.",
            (Locale::En, MessageKey::Locked) => "Too many attempts.",
            (Locale::En, MessageKey::SelectImagesPrompt) => "Select the images",
        }
    }
}

/// Spatial/temporal debounce applied to desktop pointer-move sampling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebounceConfig {
    pub min_distance_px: f64,
    pub min_interval_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            min_distance_px: 10.0,
            min_interval_ms: 50,
        }
    }
}

/// Full configuration used by [`crate::CaptchaWidget`].
#[derive(Debug, Clone)]
pub struct WidgetConfig {
    pub api_endpoint: Url,
    pub api_key: Option<String>,
    pub theme: Theme,
    pub locale: Locale,
    /// Scores strictly below this value (0-100 scale) count as low confidence.
    pub low_confidence_threshold: f64,
    pub lockout_threshold: u32,
    pub debounce: DebounceConfig,
    pub flush_interval: Duration,
    pub default_ttl: Duration,
    pub grid_size: u32,
    pub max_reference_images: usize,
    pub max_undo_history: usize,
    /// Pixels per millisecond.
    pub hesitation_speed_threshold: f64,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub request_timeout: Duration,
    /// Spawn the TTL ticker and the periodic telemetry flush on render.
    pub background_timers: bool,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            api_endpoint: default_endpoint(),
            api_key: None,
            theme: Theme::default(),
            locale: Locale::default(),
            low_confidence_threshold: 50.0,
            lockout_threshold: 3,
            debounce: DebounceConfig::default(),
            flush_interval: Duration::from_secs(10),
            default_ttl: Duration::from_secs(45),
            grid_size: 3,
            max_reference_images: 5,
            max_undo_history: 32,
            hesitation_speed_threshold: 0.1,
            canvas_width: 300,
            canvas_height: 150,
            request_timeout: Duration::from_secs(10),
            background_timers: true,
        }
    }
}

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_API_ENDPOINT).expect("default api endpoint is a valid url")
}

impl WidgetConfig {
    pub fn message(&self, key: MessageKey) -> &'static str {
        self.locale.message(key)
    }

    /// Merge host-supplied overrides onto this configuration.
    pub fn apply(&mut self, options: &WidgetOptions) -> Result<(), ConfigError> {
        if let Some(ref endpoint) = options.api_endpoint {
            self.api_endpoint = Url::parse(endpoint)
                .map_err(|err| ConfigError::Endpoint(endpoint.clone(), err))?;
        }
        if let Some(ref key) = options.api_key {
            self.api_key = Some(key.clone());
        }
        if let Some(theme) = options.theme {
            self.theme = theme;
        }
        if let Some(locale) = options.locale {
            self.locale = locale;
        }
        if let Some(threshold) = options.low_confidence_threshold {
            self.low_confidence_threshold = threshold;
        }
        if let Some(limit) = options.lockout_threshold {
            if limit == 0 {
                return Err(ConfigError::NonPositive("lockout_threshold"));
            }
            self.lockout_threshold = limit;
        }
        if let Some(secs) = options.default_ttl_secs {
            if secs == 0 {
                return Err(ConfigError::NonPositive("default_ttl_secs"));
            }
            self.default_ttl = Duration::from_secs(secs);
        }
        if let Some(debounce) = options.debounce {
            self.debounce = debounce;
        }
        Ok(())
    }
}

/// Partial overrides accepted by `configure`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetOptions {
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub theme: Option<Theme>,
    pub locale: Option<Locale>,
    pub low_confidence_threshold: Option<f64>,
    pub lockout_threshold: Option<u32>,
    pub default_ttl_secs: Option<u64>,
    pub debounce: Option<DebounceConfig>,
}

impl WidgetOptions {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }
}
