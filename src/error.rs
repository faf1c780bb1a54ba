use thiserror::Error;

/// Everything that can go wrong inside a chat session.
///
/// None of these interrupt the dialogue. They are logged where they happen
/// and the session degrades to text-only or "no active question".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Both the requested page graph and the fallback graph failed to load.
    #[error("no question graph available for page '{page_id}'")]
    GraphUnavailable { page_id: String },

    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("audio playback failed: {0}")]
    PlaybackFailed(String),

    /// A graph load that was superseded by a newer navigation.
    #[error("discarded stale graph load for page '{page_id}'")]
    StaleLoad { page_id: String },
}

/// Failures of a single graph lookup in a [`crate::dialogue::GraphSource`].
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("no question graph for page '{0}'")]
    NotFound(String),

    #[error("invalid page id '{0}'")]
    InvalidPageId(String),

    #[error("malformed question graph for page '{page_id}': {reason}")]
    Malformed { page_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    pub fn malformed(page_id: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            page_id: page_id.to_string(),
            reason: reason.into(),
        }
    }
}
