//! Guided chat widget core: per-page question graphs, the dialogue state
//! machine that walks them, and narration of bot lines through a speech
//! synthesis service.

pub mod config;
pub mod dialogue;
pub mod error;
pub mod narration;
pub mod session;

pub use config::WidgetConfig;
pub use dialogue::{
    AnswerOption, Dialogue, GraphLoader, GraphStore, QuestionGraph, QuestionNode, Sender,
    TranscriptEntry,
};
pub use error::{ChatError, GraphError};
pub use narration::{NarrationController, NarrationPhase, NarrationState};
pub use session::ChatSession;
