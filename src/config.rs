use std::path::PathBuf;
use std::time::Duration;

use crate::dialogue::{DEFAULT_FALLBACK_PAGE, ENTRY_QUESTION_ID};
use crate::narration::NarrationConfig;

pub const DEFAULT_TTS_URL: &str = "http://localhost:5000/tts";

#[derive(Debug, Clone)]
pub struct WidgetConfig {
    /// JSON document holding every page's question graph.
    pub questions_path: PathBuf,
    /// Speech synthesis endpoint (form-encoded POST).
    pub tts_url: String,
    pub synthesis_timeout_ms: u64,
    pub playback_timeout_ms: u64,
    /// Audio player binary; detected on `PATH` when unset.
    pub player: Option<PathBuf>,
    pub start_muted: bool,
    pub entry_question_id: String,
    pub fallback_page: String,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            questions_path: PathBuf::from("data/questions.json"),
            tts_url: DEFAULT_TTS_URL.to_string(),
            synthesis_timeout_ms: 20_000,
            playback_timeout_ms: 120_000,
            player: None,
            start_muted: false,
            entry_question_id: ENTRY_QUESTION_ID.to_string(),
            fallback_page: DEFAULT_FALLBACK_PAGE.to_string(),
        }
    }
}

impl WidgetConfig {
    /// Defaults overlaid with `GUIDEBOT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|s| !s.is_empty());
        let defaults = Self::default();

        Self {
            questions_path: var("GUIDEBOT_QUESTIONS")
                .map(PathBuf::from)
                .unwrap_or(defaults.questions_path),
            tts_url: var("GUIDEBOT_TTS_URL").unwrap_or(defaults.tts_url),
            synthesis_timeout_ms: var("GUIDEBOT_TTS_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.synthesis_timeout_ms),
            playback_timeout_ms: var("GUIDEBOT_PLAYBACK_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.playback_timeout_ms),
            player: var("GUIDEBOT_PLAYER").map(PathBuf::from),
            start_muted: var("GUIDEBOT_MUTED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.start_muted),
            ..defaults
        }
    }

    pub fn narration(&self) -> NarrationConfig {
        NarrationConfig {
            synthesis_timeout: Duration::from_millis(self.synthesis_timeout_ms),
            playback_timeout: Duration::from_millis(self.playback_timeout_ms),
            start_muted: self.start_muted,
        }
    }
}
