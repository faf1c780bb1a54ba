pub mod graph;
pub mod loader;
pub mod node;

use std::sync::Arc;

use log::{debug, info, warn};

pub use graph::{GraphSource, GraphStore, QuestionGraph};
pub use loader::{is_valid_page_id, normalize_page_id, GraphLoader, DEFAULT_FALLBACK_PAGE};
pub use node::{AnswerOption, OptionAction, QuestionNode};

/// Conventional id of the first question on every page.
pub const ENTRY_QUESTION_ID: &str = "q1";

/// The bot's reply to anything typed into the free-text box.
pub fn acknowledge(text: &str) -> String {
    format!("You said: \"{text}\". How can I assist you further?")
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub sender: Sender,
    pub text: String,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::User,
            text: text.into(),
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            sender: Sender::Bot,
            text: text.into(),
        }
    }
}

impl std::fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sender {
            Sender::User => write!(f, "[You]: {}", self.text),
            Sender::Bot => write!(f, "[Assistant]: {}", self.text),
        }
    }
}

// ---------------------------------------------------------------------------
// Dialogue state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueState {
    current_question_id: String,
    /// Append-only. Question texts are not recorded here; the shell renders
    /// the current question separately.
    transcript: Vec<TranscriptEntry>,
}

impl DialogueState {
    pub fn new(entry_id: impl Into<String>) -> Self {
        Self {
            current_question_id: entry_id.into(),
            transcript: Vec::new(),
        }
    }

    pub fn current_question_id(&self) -> &str {
        &self.current_question_id
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }
}

/// What a user action produced beyond the transcript entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transition {
    /// A bot line that should be spoken.
    pub narrate: Option<String>,
    /// Set when the current question changed.
    pub moved_to: Option<String>,
}

/// The dialogue state machine for one page graph.
#[derive(Debug, Clone)]
pub struct Dialogue {
    graph: Option<Arc<QuestionGraph>>,
    state: DialogueState,
}

impl Dialogue {
    /// Start at `entry_id` with an empty transcript. `None` means the page
    /// has no navigable content.
    pub fn new(graph: Option<Arc<QuestionGraph>>, entry_id: &str) -> Self {
        if let Some(graph) = &graph {
            if !graph.contains(entry_id) {
                warn!("Question graph has no entry question '{entry_id}'");
            }
        }
        Self {
            graph,
            state: DialogueState::new(entry_id),
        }
    }

    pub fn graph(&self) -> Option<&Arc<QuestionGraph>> {
        self.graph.as_ref()
    }

    pub fn state(&self) -> &DialogueState {
        &self.state
    }

    pub fn current_question_id(&self) -> &str {
        &self.state.current_question_id
    }

    /// The question to render, or `None` when the id is not in the graph
    /// (or there is no graph at all).
    pub fn current_question(&self) -> Option<&QuestionNode> {
        self.graph.as_ref()?.get(&self.state.current_question_id)
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.state.transcript
    }

    /// Apply a button press. Always appends exactly one user entry and at
    /// most one bot entry.
    pub fn select_option(&mut self, option: &AnswerOption) -> Transition {
        self.state.transcript.push(TranscriptEntry::user(&option.label));

        match option.action() {
            OptionAction::Answer(answer) => {
                debug!("Option '{}' answered in place", option.label);
                self.state.transcript.push(TranscriptEntry::bot(answer));
                Transition {
                    narrate: Some(answer.to_string()),
                    moved_to: None,
                }
            }
            OptionAction::Goto(next) if next == self.state.current_question_id => {
                debug!("Option '{}' stays on {next}", option.label);
                Transition::default()
            }
            OptionAction::Goto(next) => {
                info!(
                    "Transition: {} -> {next} (option '{}')",
                    self.state.current_question_id, option.label
                );
                self.state.current_question_id = next.to_string();
                let narrate = match self.current_question() {
                    Some(node) => Some(node.text.clone()),
                    None => {
                        warn!("Question '{next}' is not in the current graph");
                        None
                    }
                };
                Transition {
                    narrate,
                    moved_to: Some(next.to_string()),
                }
            }
            OptionAction::Noop => {
                debug!("Option '{}' has nothing attached", option.label);
                Transition::default()
            }
        }
    }

    /// Select the current question's option at `index`. `None` when there is
    /// no active question or the index is out of range.
    pub fn select_option_at(&mut self, index: usize) -> Option<Transition> {
        let option = self.current_question()?.options.get(index)?.clone();
        Some(self.select_option(&option))
    }

    /// Record typed input and the canned acknowledgement. Blank input is
    /// rejected with `None` and changes nothing.
    pub fn submit_free_text(&mut self, text: &str) -> Option<Transition> {
        if text.trim().is_empty() {
            return None;
        }
        info!("User input: \"{text}\"");

        let reply = acknowledge(text);
        self.state.transcript.push(TranscriptEntry::user(text));
        self.state.transcript.push(TranscriptEntry::bot(&reply));
        Some(Transition {
            narrate: Some(reply),
            moved_to: None,
        })
    }
}
