use std::sync::{Arc, OnceLock};

use log::{debug, info, warn};
use regex::Regex;

use crate::dialogue::graph::{GraphSource, QuestionGraph};
use crate::error::{ChatError, GraphError};

pub const DEFAULT_FALLBACK_PAGE: &str = "home";

/// Turn a location path into a page id: `/Services/` -> `services`,
/// `/` -> `home`.
pub fn normalize_page_id(path: &str) -> String {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        DEFAULT_FALLBACK_PAGE.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

/// Page ids come from the visitor's URL, so only plain slugs are looked up.
pub fn is_valid_page_id(page_id: &str) -> bool {
    static PAGE_ID: OnceLock<Regex> = OnceLock::new();
    PAGE_ID
        .get_or_init(|| Regex::new(r"^[a-z0-9_-]+(/[a-z0-9_-]+)*$").expect("page id pattern"))
        .is_match(page_id)
}

/// Resolves a page id to its question graph, falling back to the default
/// page when the specific graph cannot be loaded.
pub struct GraphLoader {
    source: Arc<dyn GraphSource>,
    fallback_page: String,
}

impl GraphLoader {
    pub fn new(source: Arc<dyn GraphSource>) -> Self {
        Self {
            source,
            fallback_page: DEFAULT_FALLBACK_PAGE.to_string(),
        }
    }

    pub fn with_fallback(mut self, page_id: impl Into<String>) -> Self {
        self.fallback_page = page_id.into();
        self
    }

    pub fn fallback_page(&self) -> &str {
        &self.fallback_page
    }

    /// Load `page_id`, or the fallback page if that fails for any reason.
    pub async fn load(&self, page_id: &str) -> Result<Arc<QuestionGraph>, ChatError> {
        match self.fetch_checked(page_id).await {
            Ok(graph) => {
                info!("Loaded question graph for page '{page_id}' ({} questions)", graph.len());
                return Ok(Arc::new(graph));
            }
            Err(e) if page_id == self.fallback_page => {
                warn!("Fallback page '{page_id}' failed to load: {e}");
                return Err(ChatError::GraphUnavailable {
                    page_id: page_id.to_string(),
                });
            }
            Err(e) => {
                debug!("Page '{page_id}' unavailable ({e}); trying '{}'", self.fallback_page);
            }
        }

        match self.fetch_checked(&self.fallback_page).await {
            Ok(graph) => {
                info!(
                    "Using fallback graph '{}' for page '{page_id}' ({} questions)",
                    self.fallback_page,
                    graph.len()
                );
                Ok(Arc::new(graph))
            }
            Err(e) => {
                warn!(
                    "Neither page '{page_id}' nor fallback '{}' could be loaded: {e}",
                    self.fallback_page
                );
                Err(ChatError::GraphUnavailable {
                    page_id: page_id.to_string(),
                })
            }
        }
    }

    async fn fetch_checked(&self, page_id: &str) -> Result<QuestionGraph, GraphError> {
        if !is_valid_page_id(page_id) {
            return Err(GraphError::InvalidPageId(page_id.to_string()));
        }
        self.source.fetch(page_id).await
    }
}
