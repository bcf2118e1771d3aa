//! Metadata-extraction pipeline.
//!
//! Runs per document: split into nodes, then each extractor in order
//! (title, then questions). A failure inside any extractor drops that
//! document's nodes and is recorded in [`ExtractionReport::failures`];
//! the remaining documents are processed normally.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::chunk::TokenTextSplitter;
use crate::config::ExtractionConfig;
use crate::document::Document;
use crate::llm::LanguageModel;
use crate::models::Node;

pub const TITLE_KEY: &str = "document_title";
pub const QUESTIONS_KEY: &str = "questions_this_excerpt_can_answer";

const TITLE_NODE_PROMPT: &str = "Context: {context_str}. Give a title that summarizes all of \
the unique entities, titles or themes found in the context. Title: ";

const TITLE_COMBINE_PROMPT: &str = "{context_str}. Based on the above candidate titles and \
content, what is the comprehensive title for this document? Title: ";

const QUESTIONS_PROMPT: &str = "Here is the context:\n{context_str}\n\nGiven the contextual \
information, generate {num_questions} questions this context can provide specific answers to \
which are unlikely to be found elsewhere.\n\nHigher-level summaries of surrounding context may \
be provided as well. Try using these summaries to generate better questions that this context \
can answer.\n\n";

/// Annotates the nodes of a single document in place.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, nodes: &mut [Node]) -> Result<()>;
}

/// Derives one title per document from its leading nodes.
pub struct TitleExtractor {
    llm: Arc<dyn LanguageModel>,
    nodes: usize,
}

impl TitleExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, nodes: usize) -> Self {
        Self {
            llm,
            nodes: nodes.max(1),
        }
    }
}

#[async_trait]
impl MetadataExtractor for TitleExtractor {
    fn name(&self) -> &str {
        "title"
    }

    async fn extract(&self, nodes: &mut [Node]) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        let mut candidates = Vec::new();
        for node in nodes.iter().take(self.nodes) {
            let prompt = TITLE_NODE_PROMPT.replace("{context_str}", &node.text);
            candidates.push(self.llm.complete(&prompt).await?);
        }

        let prompt = TITLE_COMBINE_PROMPT.replace("{context_str}", &candidates.join(", "));
        let title = clean_title(&self.llm.complete(&prompt).await?);
        if title.is_empty() {
            bail!("language model returned an empty title");
        }

        for node in nodes.iter_mut() {
            node.metadata
                .insert(TITLE_KEY.to_string(), serde_json::Value::String(title.clone()));
        }
        Ok(())
    }
}

/// Asks for questions each node can answer.
pub struct QuestionExtractor {
    llm: Arc<dyn LanguageModel>,
    questions: usize,
}

impl QuestionExtractor {
    pub fn new(llm: Arc<dyn LanguageModel>, questions: usize) -> Self {
        Self { llm, questions }
    }
}

#[async_trait]
impl MetadataExtractor for QuestionExtractor {
    fn name(&self) -> &str {
        "questions"
    }

    async fn extract(&self, nodes: &mut [Node]) -> Result<()> {
        for node in nodes.iter_mut() {
            let prompt = QUESTIONS_PROMPT
                .replace("{context_str}", &node.text)
                .replace("{num_questions}", &self.questions.to_string());
            let response = self.llm.complete(&prompt).await?;
            let questions: Vec<serde_json::Value> = parse_questions(&response)
                .into_iter()
                .take(self.questions)
                .map(serde_json::Value::String)
                .collect();
            node.metadata.insert(
                QUESTIONS_KEY.to_string(),
                serde_json::Value::Array(questions),
            );
        }
        Ok(())
    }
}

/// Strip quotes and a leading `Title:` label.
fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("Title:")
        .map(str::trim)
        .unwrap_or(trimmed);
    trimmed.trim_matches('"').trim().to_string()
}

/// One question per non-empty line, with list markers removed.
pub fn parse_questions(response: &str) -> Vec<String> {
    response
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')', '-', '*'])
                .trim()
                .to_string()
        })
        .filter(|q| !q.is_empty())
        .collect()
}

/// A document whose extraction failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionFailure {
    pub document_id: String,
    pub path: String,
    pub error: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ExtractionReport {
    pub nodes: Vec<Node>,
    pub failures: Vec<ExtractionFailure>,
}

/// Splitter followed by zero or more extractors.
pub struct ExtractionPipeline {
    splitter: TokenTextSplitter,
    extractors: Vec<Box<dyn MetadataExtractor>>,
}

impl ExtractionPipeline {
    pub fn new(splitter: TokenTextSplitter) -> Self {
        Self {
            splitter,
            extractors: Vec::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn MetadataExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    /// Splitter plus, when extraction is enabled, title then question
    /// extractors backed by `llm`.
    pub fn from_config(config: &ExtractionConfig, llm: Option<Arc<dyn LanguageModel>>) -> Result<Self> {
        let mut pipeline = Self::new(TokenTextSplitter::from_config(config)?);
        if config.enabled {
            let Some(llm) = llm else {
                bail!("extraction is enabled but no language model is configured");
            };
            pipeline = pipeline
                .with_extractor(Box::new(TitleExtractor::new(llm.clone(), config.title_nodes)))
                .with_extractor(Box::new(QuestionExtractor::new(llm, config.questions)));
        }
        Ok(pipeline)
    }

    pub async fn run(&self, docs: &[Document]) -> ExtractionReport {
        let mut report = ExtractionReport::default();

        for doc in docs {
            let mut nodes = self.splitter.split_document(doc);
            match self.annotate(&mut nodes).await {
                Ok(()) => {
                    tracing::debug!("{}: {} nodes", doc.path, nodes.len());
                    report.nodes.extend(nodes);
                }
                Err(e) => {
                    tracing::warn!("Extraction failed for {}: {:#}", doc.path, e);
                    report.failures.push(ExtractionFailure {
                        document_id: doc.id.clone(),
                        path: doc.path.clone(),
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        tracing::info!(
            "Extracted {} nodes from {} documents ({} failed)",
            report.nodes.len(),
            docs.len(),
            report.failures.len()
        );
        report
    }

    async fn annotate(&self, nodes: &mut [Node]) -> Result<()> {
        for extractor in &self.extractors {
            extractor
                .extract(nodes)
                .await
                .map_err(|e| e.context(format!("{} extractor", extractor.name())))?;
        }
        Ok(())
    }
}
