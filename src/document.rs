//! Document builder.
//!
//! Turns each [`FileRecord`] into a [`Document`]: the file's text plus seven
//! fixed metadata fields, rendered with a fixed template:
//!
//! ```text
//! Metadata: file_name=>lib.rs::githubrepo=>acme/widgets::...
//! -----
//! Content: <file text>
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::Config;
use crate::models::FileRecord;
use crate::rate_limit::RateLimiter;

pub const METADATA_SEPARATOR: &str = "::";
pub const METADATA_TEMPLATE: &str = "{key}=>{value}";
pub const TEXT_TEMPLATE: &str = "Metadata: {metadata_str}\n-----\nContent: {content}";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The fixed metadata attached to every document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub file_name: String,
    /// `owner/name` of the originating repository.
    pub githubrepo: String,
    pub extension: String,
    #[serde(rename = "modifiedOn")]
    pub modified_on: String,
    pub size: u64,
    pub github_url: String,
    pub lines: usize,
}

impl DocumentMetadata {
    /// Metadata fields in rendering order.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("file_name", self.file_name.clone()),
            ("githubrepo", self.githubrepo.clone()),
            ("extension", self.extension.clone()),
            ("modifiedOn", self.modified_on.clone()),
            ("size", self.size.to_string()),
            ("github_url", self.github_url.clone()),
            ("lines", self.lines.to_string()),
        ]
    }

    pub fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
        let mut map = BTreeMap::new();
        map.insert("file_name".to_string(), self.file_name.clone().into());
        map.insert("githubrepo".to_string(), self.githubrepo.clone().into());
        map.insert("extension".to_string(), self.extension.clone().into());
        map.insert("modifiedOn".to_string(), self.modified_on.clone().into());
        map.insert("size".to_string(), self.size.into());
        map.insert("github_url".to_string(), self.github_url.clone().into());
        map.insert("lines".to_string(), (self.lines as u64).into());
        map
    }
}

/// Text plus metadata, ready for splitting and embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: String,
    /// Repository-relative path of the source file.
    pub path: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub metadata_separator: String,
    pub metadata_template: String,
    pub text_template: String,
}

impl Document {
    /// `key=>value` pairs joined by the metadata separator.
    pub fn metadata_str(&self) -> String {
        self.metadata
            .entries()
            .into_iter()
            .map(|(key, value)| {
                self.metadata_template
                    .replace("{key}", key)
                    .replace("{value}", &value)
            })
            .collect::<Vec<_>>()
            .join(&self.metadata_separator)
    }

    /// Full rendered text including the metadata block.
    pub fn render(&self) -> String {
        self.text_template
            .replace("{metadata_str}", &self.metadata_str())
            .replace("{content}", &self.text)
    }
}

/// Builds documents for one repository.
pub struct DocumentBuilder {
    repo: String,
    limiter: RateLimiter,
}

impl DocumentBuilder {
    pub fn new(config: &Config) -> Self {
        Self::with_limiter(
            config.repository.full_name(),
            RateLimiter::from_millis(config.documents.min_interval_ms),
        )
    }

    pub fn with_limiter(repo: impl Into<String>, limiter: RateLimiter) -> Self {
        Self {
            repo: repo.into(),
            limiter,
        }
    }

    /// Build one document per record, in input order, honouring the
    /// configured spacing between constructions.
    pub async fn build(&mut self, records: &[FileRecord]) -> Vec<Document> {
        let mut docs = Vec::with_capacity(records.len());
        for record in records {
            self.limiter.acquire().await;
            docs.push(build_document(&self.repo, record, Utc::now()));
        }
        tracing::info!("Built {} documents for {}", docs.len(), self.repo);
        docs
    }
}

/// Build a single document. `now` is used for `modifiedOn` only when the
/// record carries no source timestamp.
pub fn build_document(repo: &str, record: &FileRecord, now: DateTime<Utc>) -> Document {
    let modified = record.last_modified.unwrap_or(now);

    let metadata = DocumentMetadata {
        file_name: record.name.clone(),
        githubrepo: repo.to_string(),
        extension: record.extension.clone(),
        modified_on: modified.format(TIMESTAMP_FORMAT).to_string(),
        size: record.size,
        github_url: record.html_url.clone(),
        lines: record.lines_of_code,
    };

    Document {
        id: document_id(repo, &record.path),
        path: record.path.clone(),
        text: record.text(),
        metadata,
        metadata_separator: METADATA_SEPARATOR.to_string(),
        metadata_template: METADATA_TEMPLATE.to_string(),
        text_template: TEXT_TEMPLATE.to_string(),
    }
}

/// Stable id derived from repository and path.
pub fn document_id(repo: &str, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo.as_bytes());
    hasher.update(b"\0");
    hasher.update(path.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!(
        "{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    )
}
