use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::dialogue::node::QuestionNode;
use crate::error::GraphError;

/// All questions for one page: a map of question-id -> QuestionNode.
///
/// Immutable once loaded. Insertion order carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct QuestionGraph {
    nodes: HashMap<String, QuestionNode>,
}

impl QuestionGraph {
    pub fn from_nodes(nodes: impl IntoIterator<Item = QuestionNode>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();
        Self { nodes }
    }

    pub fn get(&self, id: &str) -> Option<&QuestionNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// `(from, to)` pairs for every option pointing at a question that does
    /// not exist in this graph.
    pub fn dangling_references(&self) -> Vec<(&str, &str)> {
        let mut dangling = Vec::new();
        for node in self.nodes.values() {
            let links = node
                .options
                .iter()
                .filter_map(|option| option.next_question_id.as_deref());
            for next in links {
                if !next.is_empty() && !self.nodes.contains_key(next) {
                    dangling.push((node.id.as_str(), next));
                }
            }
        }
        dangling.sort_unstable();
        dangling
    }

    /// Reject graphs that cannot be navigated at all. Broken links are only
    /// warned about: they degrade to "no active question" at runtime.
    pub fn validate(&self, page_id: &str) -> Result<(), GraphError> {
        if self.nodes.is_empty() {
            return Err(GraphError::malformed(page_id, "graph has no questions"));
        }
        for (key, node) in &self.nodes {
            if key != &node.id {
                return Err(GraphError::malformed(
                    page_id,
                    format!("question keyed '{key}' declares id '{}'", node.id),
                ));
            }
            for option in node.options.iter().filter(|o| o.is_ambiguous()) {
                warn!(
                    "Page '{page_id}': option '{}' on {} has both an answer and a next question; the answer wins",
                    option.label, node.id
                );
            }
        }
        for (from, to) in self.dangling_references() {
            warn!("Page '{page_id}': {from} links to unknown question {to}");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Graph sources
// ---------------------------------------------------------------------------

/// Where question graphs come from, keyed by page id.
#[async_trait]
pub trait GraphSource: Send + Sync {
    async fn fetch(&self, page_id: &str) -> Result<QuestionGraph, GraphError>;
}

#[derive(Debug, Clone)]
enum StoredGraph {
    Parsed(QuestionGraph),
    Raw(Value),
}

/// An indexed, in-memory store of page graphs.
///
/// Raw pages are only deserialized on lookup, so one malformed page falls
/// back to the default graph without poisoning the others.
#[derive(Debug, Clone, Default)]
pub struct GraphStore {
    pages: HashMap<String, StoredGraph>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document of the shape `{ "<page>": { "<question-id>": node } }`.
    pub fn from_json_str(raw: &str) -> Result<Self, GraphError> {
        let doc: Value = serde_json::from_str(raw)
            .map_err(|e| GraphError::malformed("*", e.to_string()))?;
        let Value::Object(pages) = doc else {
            return Err(GraphError::malformed("*", "top level must be an object"));
        };

        let pages = pages
            .into_iter()
            .map(|(page_id, graph)| (page_id, StoredGraph::Raw(graph)))
            .collect();
        Ok(Self { pages })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, GraphError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let store = Self::from_json_str(&raw)?;
        debug!(
            "Loaded {} page graph(s) from {}",
            store.pages.len(),
            path.as_ref().display()
        );
        Ok(store)
    }

    pub fn with_page(mut self, page_id: impl Into<String>, graph: QuestionGraph) -> Self {
        self.pages.insert(page_id.into(), StoredGraph::Parsed(graph));
        self
    }

    pub fn with_raw_page(mut self, page_id: impl Into<String>, graph: Value) -> Self {
        self.pages.insert(page_id.into(), StoredGraph::Raw(graph));
        self
    }

    pub fn page_ids(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }
}

#[async_trait]
impl GraphSource for GraphStore {
    async fn fetch(&self, page_id: &str) -> Result<QuestionGraph, GraphError> {
        let graph = match self.pages.get(page_id) {
            Some(StoredGraph::Parsed(graph)) => graph.clone(),
            Some(StoredGraph::Raw(raw)) => serde_json::from_value(raw.clone())
                .map_err(|e| GraphError::malformed(page_id, e.to_string()))?,
            None => return Err(GraphError::NotFound(page_id.to_string())),
        };
        graph.validate(page_id)?;
        Ok(graph)
    }
}
