//! GitHub repository walker.
//!
//! Lists a repository's tree through the contents API
//! (`GET /repos/{owner}/{name}/contents/{path}`), fetches and base64-decodes
//! every file, and returns:
//!
//! - a [`RepoGraph`] mirroring the directory structure,
//! - a flat list of [`FileRecord`]s for every file that decoded cleanly,
//! - a [`WalkManifest`] of entries that could not be listed, fetched or
//!   decoded.
//!
//! # Concurrency
//!
//! Directories and files are processed from a work queue by a pool of tokio
//! tasks bounded by `github.concurrency`. Nothing recurses on the stack.
//!
//! # Failure policy
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Root listing fails | traversal returns `Err` |
//! | HTTP 401/403 anywhere | traversal aborts, in-flight tasks are cancelled |
//! | HTTP 429, 5xx, network | retried with exponential backoff |
//! | Anything else below the root | warning + manifest entry |

use base64::Engine;
use globset::{Glob, GlobSet, GlobSetBuilder};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, LINK};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{Config, GithubConfig, RepositoryConfig};
use crate::error::FetchError;
use crate::models::{EntryKind, FileRecord, RepoGraph, WalkManifest};

/// One entry of a contents listing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ContentEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl ContentEntry {
    pub fn is_dir(&self) -> bool {
        self.entry_type == "dir"
    }
}

/// A single-file response from the contents endpoint.
#[derive(Debug, Deserialize)]
struct FileDescriptor {
    name: String,
    path: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// Result of [`RepoWalker::traverse`].
#[derive(Debug, Clone, Serialize)]
pub struct WalkOutput {
    pub graph: RepoGraph,
    pub files: Vec<FileRecord>,
    pub manifest: WalkManifest,
}

/// Client for walking one GitHub repository.
#[derive(Clone)]
pub struct RepoWalker {
    client: reqwest::Client,
    /// `{api_url}/repos/{owner}/{name}`
    repo_url: String,
    repo_name: String,
    git_ref: Option<String>,
    token: Option<String>,
    concurrency: usize,
    max_retries: u32,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    resolve_commit_dates: bool,
}

enum TaskOutput {
    Listed {
        path: String,
        result: Result<Vec<ContentEntry>, FetchError>,
    },
    Fetched {
        path: String,
        result: Result<FileRecord, FetchError>,
    },
}

impl RepoWalker {
    /// Build a walker from configuration, reading the access token from the
    /// environment variable named by `github.token_env`.
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Self::from_parts(
            &config.repository,
            &config.github,
            config.github.access_token(),
        )
    }

    /// Build a walker with an explicit token.
    pub fn from_parts(
        repo: &RepositoryConfig,
        github: &GithubConfig,
        token: Option<String>,
    ) -> Result<Self, FetchError> {
        if repo.owner.trim().is_empty() || repo.name.trim().is_empty() {
            return Err(FetchError::Config(
                "repository owner and name are required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(github.timeout_secs))
            .user_agent(concat!("code-rag/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;

        let include = if github.include_globs.is_empty() {
            None
        } else {
            Some(build_globset(&github.include_globs)?)
        };
        let exclude = if github.exclude_globs.is_empty() {
            None
        } else {
            Some(build_globset(&github.exclude_globs)?)
        };

        Ok(Self {
            client,
            repo_url: format!(
                "{}/repos/{}/{}",
                github.api_url.trim_end_matches('/'),
                repo.owner,
                repo.name
            ),
            repo_name: repo.name.clone(),
            git_ref: repo.git_ref.clone(),
            token,
            concurrency: github.concurrency.max(1),
            max_retries: github.max_retries,
            include,
            exclude,
            resolve_commit_dates: github.resolve_commit_dates,
        })
    }

    /// Headers sent with every request. `Authorization` is present only
    /// when a token is configured.
    pub fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        if let Some(token) = &self.token {
            if let Ok(value) = HeaderValue::from_str(&format!("token {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    /// List the entries directly under `path`, following `Link: rel="next"`
    /// pagination. A path that names a file yields a single entry.
    pub async fn get_file_list(&self, path: &str) -> Result<Vec<ContentEntry>, FetchError> {
        let mut entries = Vec::new();
        let mut next = Some(self.contents_url(path)?);

        while let Some(url) = next.take() {
            let response = self.send_with_retry(&url).await?;
            next = next_link(response.headers());
            let body: serde_json::Value =
                response
                    .json()
                    .await
                    .map_err(|e| FetchError::InvalidResponse {
                        url: url.to_string(),
                        message: e.to_string(),
                    })?;

            match body {
                serde_json::Value::Array(_) => {
                    let page: Vec<ContentEntry> =
                        serde_json::from_value(body).map_err(|e| FetchError::InvalidResponse {
                            url: url.to_string(),
                            message: e.to_string(),
                        })?;
                    entries.extend(page);
                }
                serde_json::Value::Object(_) => {
                    let entry: ContentEntry =
                        serde_json::from_value(body).map_err(|e| FetchError::InvalidResponse {
                            url: url.to_string(),
                            message: e.to_string(),
                        })?;
                    entries.push(entry);
                }
                other => {
                    return Err(FetchError::InvalidResponse {
                        url: url.to_string(),
                        message: format!("expected array or object, got {}", other),
                    })
                }
            }
        }

        tracing::debug!("Listed {} entries under '{}'", entries.len(), path);
        Ok(entries)
    }

    /// Fetch and decode one file.
    pub async fn get_file_data(&self, file_path: &str) -> Result<FileRecord, FetchError> {
        let url = self.contents_url(file_path)?;
        let response = self.send_with_retry(&url).await?;
        let descriptor: FileDescriptor =
            response
                .json()
                .await
                .map_err(|e| FetchError::InvalidResponse {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

        let content = descriptor
            .content
            .as_deref()
            .ok_or_else(|| FetchError::MissingContent {
                path: descriptor.path.clone(),
            })?;
        if let Some(encoding) = descriptor.encoding.as_deref() {
            if encoding != "base64" {
                return Err(FetchError::Decode {
                    path: descriptor.path.clone(),
                    reason: format!("unsupported encoding '{}'", encoding),
                });
            }
        }

        let text = decode_content(&descriptor.path, content)?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();

        let last_modified = if self.resolve_commit_dates {
            match self.last_commit_date(&descriptor.path).await {
                Ok(date) => date,
                Err(e) => {
                    tracing::warn!(
                        "Could not resolve last commit date for {}: {}",
                        descriptor.path,
                        e
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(FileRecord {
            extension: file_extension(&descriptor.path),
            lines_of_code: lines.len(),
            lines,
            size: descriptor.size,
            html_url: descriptor.html_url.unwrap_or_default(),
            name: descriptor.name,
            path: descriptor.path,
            last_modified,
        })
    }

    /// Date of the most recent commit touching `file_path`.
    pub async fn last_commit_date(
        &self,
        file_path: &str,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, FetchError> {
        let mut url = Url::parse(&format!("{}/commits", self.repo_url)).map_err(|e| {
            FetchError::Config(format!("invalid GitHub API URL '{}': {}", self.repo_url, e))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("path", file_path);
            query.append_pair("per_page", "1");
            if let Some(git_ref) = &self.git_ref {
                query.append_pair("sha", git_ref);
            }
        }

        let response = self.send_with_retry(&url).await?;
        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| FetchError::InvalidResponse {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

        let date = body
            .get(0)
            .and_then(|c| c.pointer("/commit/committer/date"))
            .and_then(|d| d.as_str())
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| d.with_timezone(&chrono::Utc));
        Ok(date)
    }

    /// Walk the tree rooted at `path` ("" for the repository root).
    pub async fn traverse(&self, path: &str) -> Result<WalkOutput, FetchError> {
        let root = path.trim_matches('/').to_string();
        tracing::info!(
            "Traversing {} from '{}' (concurrency {})",
            self.repo_url,
            root,
            self.concurrency
        );

        // A failing root listing has nothing to salvage.
        let root_entries = self.get_file_list(&root).await?;

        let mut graph = RepoGraph::new(self.repo_name.clone());
        let mut files = Vec::new();
        let mut manifest = WalkManifest::default();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut queue: VecDeque<ContentEntry> = root_entries.into();

        loop {
            while let Some(entry) = queue.pop_front() {
                let relative = relative_path(&root, &entry);
                if entry.is_dir() {
                    graph.insert_dir(&relative);
                    let walker = self.clone();
                    let permits = semaphore.clone();
                    tasks.spawn(async move {
                        let _permit = permits.acquire_owned().await.ok();
                        let result = walker.get_file_list(&entry.path).await;
                        TaskOutput::Listed {
                            path: entry.path,
                            result,
                        }
                    });
                } else {
                    graph.insert_file(&relative);
                    if !self.accepts(&entry.path) {
                        tracing::debug!("Skipping filtered path {}", entry.path);
                        continue;
                    }
                    let walker = self.clone();
                    let permits = semaphore.clone();
                    tasks.spawn(async move {
                        let _permit = permits.acquire_owned().await.ok();
                        let result = walker.get_file_data(&entry.path).await;
                        TaskOutput::Fetched {
                            path: entry.path,
                            result,
                        }
                    });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let output = match joined {
                Ok(output) => output,
                Err(e) => {
                    tasks.abort_all();
                    return Err(FetchError::Task(e.to_string()));
                }
            };

            match output {
                TaskOutput::Listed {
                    result: Ok(entries),
                    ..
                } => queue.extend(entries),
                TaskOutput::Fetched {
                    result: Ok(record), ..
                } => files.push(record),
                TaskOutput::Listed {
                    result: Err(e), ..
                }
                | TaskOutput::Fetched {
                    result: Err(e), ..
                } if e.is_fatal() => {
                    tracing::error!("Aborting traversal: {}", e);
                    tasks.abort_all();
                    return Err(e);
                }
                TaskOutput::Listed {
                    path,
                    result: Err(e),
                } => {
                    tracing::warn!("Failed to list directory {}: {}", path, e);
                    manifest.push(path, EntryKind::Dir, e);
                }
                TaskOutput::Fetched {
                    path,
                    result: Err(e),
                } => {
                    tracing::warn!("Failed to fetch file {}: {}", path, e);
                    manifest.push(path, EntryKind::File, e);
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        manifest.failures.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::info!(
            "Traversal complete: {} files, {} failures",
            files.len(),
            manifest.failures.len()
        );

        Ok(WalkOutput {
            graph,
            files,
            manifest,
        })
    }

    fn accepts(&self, path: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(path) {
                return false;
            }
        }
        match &self.include {
            Some(include) => include.is_match(path),
            None => true,
        }
    }

    fn contents_url(&self, path: &str) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}/contents", self.repo_url)).map_err(|e| {
            FetchError::Config(format!("invalid GitHub API URL '{}': {}", self.repo_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Config(format!("cannot-be-a-base URL: {}", self.repo_url)))?
            .extend(path.split('/').filter(|s| !s.is_empty()));
        if let Some(git_ref) = &self.git_ref {
            url.query_pairs_mut().append_pair("ref", git_ref);
        }
        Ok(url)
    }

    /// GET `url`, retrying 429/5xx/network failures with exponential backoff.
    async fn send_with_retry(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // 500ms, 1s, 2s, 4s, ...
                let delay = Duration::from_millis(500 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            tracing::debug!("GET {} (attempt {})", url, attempt + 1);
            let sent = self
                .client
                .get(url.clone())
                .headers(self.request_headers())
                .send()
                .await;

            let err = match sent {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    FetchError::Status {
                        status,
                        url: url.to_string(),
                        body: body.chars().take(300).collect(),
                    }
                }
                Err(e) => FetchError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                },
            };

            if !err.is_retryable() {
                return Err(err);
            }
            tracing::debug!("Retryable error: {}", err);
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| FetchError::Network {
            url: url.to_string(),
            message: "request failed after retries".to_string(),
        }))
    }
}

/// Decode GitHub's base64 payload (wrapped at 60 columns) into UTF-8 text.
pub fn decode_content(path: &str, content: &str) -> Result<String, FetchError> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| FetchError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| FetchError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Extension including the leading dot, or an empty string.
pub fn file_extension(path: &str) -> String {
    std::path::Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// Extract the `rel="next"` target from a `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == "rel=\"next\"");
        if !is_next {
            return None;
        }
        Url::parse(target.trim_start_matches('<').trim_end_matches('>')).ok()
    })
}

/// Graph path of `entry` below `root`. A root naming the file itself maps to
/// the file name.
fn relative_path(root: &str, entry: &ContentEntry) -> String {
    if root.is_empty() {
        return entry.path.clone();
    }
    match entry.path.strip_prefix(root) {
        Some("") => entry.name.clone(),
        Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/').to_string(),
        _ => entry.path.clone(),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, FetchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| FetchError::Config(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| FetchError::Config(e.to_string()))
}
