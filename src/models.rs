//! Core data models that flow through the ingestion pipeline.
//!
//! The walker produces [`FileRecord`]s, a [`RepoGraph`] and a
//! [`WalkManifest`]; the extraction pipeline produces [`Node`]s.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// One fetched and decoded source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    /// Path relative to the repository root (`src/lib.rs`).
    pub path: String,
    /// File name (`lib.rs`).
    pub name: String,
    /// Extension including the dot (`.rs`), empty when there is none.
    pub extension: String,
    /// Decoded content split into lines.
    pub lines: Vec<String>,
    /// Size in bytes as reported by GitHub.
    pub size: u64,
    pub lines_of_code: usize,
    /// Browsable URL of the file.
    pub html_url: String,
    /// Date of the last commit touching this file, when resolved.
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// The file content with lines re-joined by `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// A node in the directory graph.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphNode {
    /// Serialized as the string `"file"`.
    File,
    Dir(BTreeMap<String, GraphNode>),
}

impl Serialize for GraphNode {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            GraphNode::File => s.serialize_str("file"),
            GraphNode::Dir(children) => children.serialize(s),
        }
    }
}

/// Mirror of the remote folder structure rooted at the repository name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepoGraph {
    pub root: String,
    pub tree: BTreeMap<String, GraphNode>,
}

impl RepoGraph {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            tree: BTreeMap::new(),
        }
    }

    /// Record a directory at `path` (slash separated, relative to the walk
    /// root). Missing parents are created.
    pub fn insert_dir(&mut self, path: &str) {
        let mut level = &mut self.tree;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let node = level
                .entry(part.to_string())
                .or_insert_with(|| GraphNode::Dir(BTreeMap::new()));
            if !matches!(node, GraphNode::Dir(_)) {
                *node = GraphNode::Dir(BTreeMap::new());
            }
            let GraphNode::Dir(children) = node else {
                return;
            };
            level = children;
        }
    }

    /// Record a file at `path`. Missing parents are created as directories.
    pub fn insert_file(&mut self, path: &str) {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let Some((file, dirs)) = parts.split_last() else {
            return;
        };
        self.insert_dir(&dirs.join("/"));
        let mut level = &mut self.tree;
        for part in dirs {
            level = match level.get_mut(*part) {
                Some(GraphNode::Dir(children)) => children,
                _ => return,
            };
        }
        level.insert(file.to_string(), GraphNode::File);
    }

    /// Number of file markers in the graph.
    pub fn leaf_count(&self) -> usize {
        fn count(map: &BTreeMap<String, GraphNode>) -> usize {
            map.values()
                .map(|n| match n {
                    GraphNode::File => 1,
                    GraphNode::Dir(children) => count(children),
                })
                .sum()
        }
        count(&self.tree)
    }

    /// Render as `{ "<repo>": { ... } }`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut outer = serde_json::Map::new();
        outer.insert(
            self.root.clone(),
            serde_json::to_value(&self.tree).unwrap_or_default(),
        );
        serde_json::Value::Object(outer)
    }
}

/// Whether a failed entry was a file or a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry that could not be fetched, listed or decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub path: String,
    pub kind: EntryKind,
    pub error: String,
}

/// Failures collected during a traversal, reported to the caller at the end.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WalkManifest {
    pub failures: Vec<FetchFailure>,
}

impl WalkManifest {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn push(&mut self, path: impl Into<String>, kind: EntryKind, error: impl ToString) {
        self.failures.push(FetchFailure {
            path: path.into(),
            kind,
            error: error.to_string(),
        });
    }
}

/// A chunk of a document produced by the splitter and annotated by the
/// extractors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    /// Start and end token offsets (approximate) within the document.
    pub token_span: (usize, usize),
    pub text: String,
    pub hash: String,
    /// Inherited document metadata plus derived fields.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Node {
    pub fn title(&self) -> Option<&str> {
        self.metadata.get("document_title").and_then(|v| v.as_str())
    }

    pub fn questions(&self) -> Vec<String> {
        self.metadata
            .get("questions_this_excerpt_can_answer")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|q| q.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
