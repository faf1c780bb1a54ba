use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dialogue::{
    normalize_page_id, AnswerOption, Dialogue, GraphLoader, QuestionGraph, QuestionNode,
    TranscriptEntry, Transition,
};
use crate::error::ChatError;
use crate::narration::{NarrationController, NarrationState};

struct GraphLoaded {
    generation: u64,
    page_id: String,
    result: Result<Arc<QuestionGraph>, ChatError>,
}

/// One visitor's chat widget, from mount to teardown.
///
/// Owns the dialogue for the active page and the narration controller.
/// Graph loads run in the background; only the most recently requested page
/// may become active.
pub struct ChatSession {
    loader: Arc<GraphLoader>,
    narrator: NarrationController,
    entry_question_id: String,
    dialogue: Dialogue,
    /// Page whose graph load last resolved.
    page_id: Option<String>,
    /// Page most recently passed to `navigate`.
    requested: Option<String>,
    is_open: bool,
    generation: u64,
    pending: Option<JoinHandle<()>>,
    loads_tx: mpsc::UnboundedSender<GraphLoaded>,
    loads_rx: mpsc::UnboundedReceiver<GraphLoaded>,
}

impl ChatSession {
    /// Create a closed widget with no page loaded yet.
    pub fn mount(
        loader: GraphLoader,
        narrator: NarrationController,
        entry_question_id: impl Into<String>,
    ) -> Self {
        let entry_question_id = entry_question_id.into();
        let (loads_tx, loads_rx) = mpsc::unbounded_channel();
        Self {
            loader: Arc::new(loader),
            narrator,
            dialogue: Dialogue::new(None, &entry_question_id),
            entry_question_id,
            page_id: None,
            requested: None,
            is_open: false,
            generation: 0,
            pending: None,
            loads_tx,
            loads_rx,
        }
    }

    // -----------------------------------------------------------------------
    // Page loading
    // -----------------------------------------------------------------------

    /// Start loading the graph for `page_id`, superseding any load still in
    /// flight. Navigating to the page already requested does nothing.
    pub fn navigate(&mut self, page_id: &str) {
        if self.requested.as_deref() == Some(page_id) {
            debug!("Already on page '{page_id}'");
            return;
        }
        info!("Navigating to page '{page_id}'");

        self.requested = Some(page_id.to_string());
        self.generation += 1;
        if let Some(stale) = self.pending.take() {
            stale.abort();
        }

        let loader = Arc::clone(&self.loader);
        let loads = self.loads_tx.clone();
        let generation = self.generation;
        let page_id = page_id.to_string();
        self.pending = Some(tokio::spawn(async move {
            let result = loader.load(&page_id).await;
            let _ = loads.send(GraphLoaded {
                generation,
                page_id,
                result,
            });
        }));
    }

    /// Navigate by location path, e.g. `/services/`.
    pub fn navigate_path(&mut self, path: &str) {
        self.navigate(&normalize_page_id(path));
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Wait for the next graph load to resolve and apply it (or discard it if
    /// stale). Never resolves when no load is pending.
    pub async fn next_load(&mut self) {
        if let Some(loaded) = self.loads_rx.recv().await {
            self.apply_load(loaded);
        }
    }

    /// Wait until the most recently requested page has resolved.
    pub async fn wait_for_graph(&mut self) {
        while self.is_loading() {
            self.next_load().await;
        }
    }

    fn apply_load(&mut self, loaded: GraphLoaded) {
        if loaded.generation != self.generation {
            debug!(
                "{}",
                ChatError::StaleLoad {
                    page_id: loaded.page_id
                }
            );
            return;
        }
        self.pending = None;

        let graph = match loaded.result {
            Ok(graph) => Some(graph),
            Err(e) => {
                warn!("{e}; continuing without questions");
                None
            }
        };
        self.dialogue = Dialogue::new(graph, &self.entry_question_id);
        self.page_id = Some(loaded.page_id);

        if self.is_open {
            self.narrate_entry_question();
        }
    }

    // -----------------------------------------------------------------------
    // Visibility
    // -----------------------------------------------------------------------

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Show the widget. Opening a closed widget narrates the entry question.
    pub fn open(&mut self) {
        if self.is_open {
            return;
        }
        self.is_open = true;
        debug!("Widget opened");
        self.narrate_entry_question();
    }

    pub fn close(&mut self) {
        self.is_open = false;
        debug!("Widget closed");
    }

    fn narrate_entry_question(&self) {
        let entry = self
            .dialogue
            .graph()
            .and_then(|graph| graph.get(&self.entry_question_id));
        if let Some(question) = entry {
            self.narrator.narrate(question.text.clone());
        }
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    pub fn select_option(&mut self, option: &AnswerOption) -> Transition {
        let transition = self.dialogue.select_option(option);
        self.speak(&transition);
        transition
    }

    /// Press the current question's button at `index`.
    pub fn select_option_at(&mut self, index: usize) -> Option<Transition> {
        let transition = self.dialogue.select_option_at(index)?;
        self.speak(&transition);
        Some(transition)
    }

    pub fn submit_free_text(&mut self, text: &str) -> Option<Transition> {
        let transition = self.dialogue.submit_free_text(text)?;
        self.speak(&transition);
        Some(transition)
    }

    pub fn toggle_mute(&self) {
        self.narrator.toggle_mute();
    }

    pub fn set_muted(&self, muted: bool) {
        self.narrator.set_muted(muted);
    }

    fn speak(&self, transition: &Transition) {
        if let Some(line) = &transition.narrate {
            self.narrator.narrate(line.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    pub fn page_id(&self) -> Option<&str> {
        self.page_id.as_deref()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.dialogue.transcript()
    }

    pub fn current_question_id(&self) -> &str {
        self.dialogue.current_question_id()
    }

    pub fn current_question(&self) -> Option<&QuestionNode> {
        self.dialogue.current_question()
    }

    pub fn narrator(&self) -> &NarrationController {
        &self.narrator
    }

    pub fn narration(&self) -> NarrationState {
        self.narrator.state()
    }

    /// Unmount: cancel any pending load and stop narration, releasing held
    /// audio.
    pub async fn shutdown(mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
        self.narrator.shutdown().await;
        debug!("Chat session closed");
    }
}
