use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use code_rag::config::{parse_config, Config};
use code_rag::embedding::EmbeddingProvider;
use code_rag::extract::{ExtractionPipeline, QUESTIONS_KEY, TITLE_KEY};
use code_rag::ingest::{collect_documents, node_vector_id, store_nodes};
use code_rag::llm::{LanguageModel, OpenAiChatModel};
use code_rag::search::{search, SearchOptions};
use code_rag::store::memory::InMemoryStore;
use code_rag::vectordb::VectorDbHandle;
use serde_json::json;

/// Bag-of-letters embedding: similar words land close under L2.
struct LetterEmbedder;

#[async_trait]
impl EmbeddingProvider for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                let mut total = 0.0f32;
                for c in t.to_ascii_lowercase().chars().filter(|c| c.is_ascii_lowercase()) {
                    v[(c as u8 - b'a') as usize] += 1.0;
                    total += 1.0;
                }
                if total > 0.0 {
                    v.iter_mut().for_each(|x| *x /= total);
                }
                v
            })
            .collect())
    }
}

fn test_config(url: &str) -> Config {
    parse_config(&format!(
        r#"
[repository]
owner = "acme"
name = "widgets"

[github]
api_url = "{url}"
token_env = "CODERAG_TEST_UNSET_TOKEN"
max_retries = 0

[extraction]
enabled = true
chunk_size = 64
chunk_overlap = 8
title_nodes = 2
questions = 2
base_url = "{url}/v1"
max_retries = 0

[vectordb]
backend = "memory"
collection = "widgets"
"#
    ))
    .unwrap()
}

async fn mock_github(server: &mut mockito::Server) -> Vec<mockito::Mock> {
    let b64 = |s: &str| base64::engine::general_purpose::STANDARD.encode(s);
    let file = |path: &str, text: &str| {
        json!({
            "name": path.rsplit('/').next().unwrap(),
            "path": path,
            "size": text.len(),
            "html_url": format!("https://github.com/acme/widgets/blob/main/{}", path),
            "content": b64(text),
            "encoding": "base64",
        })
        .to_string()
    };

    vec![
        server
            .mock("GET", "/repos/acme/widgets/contents")
            .with_body(
                json!([
                    {"name": "retry.rs", "path": "retry.rs", "type": "file"},
                    {"name": "zebra.md", "path": "zebra.md", "type": "file"}
                ])
                .to_string(),
            )
            .create_async()
            .await,
        server
            .mock("GET", "/repos/acme/widgets/contents/retry.rs")
            .with_body(file(
                "retry.rs",
                "pub fn retry_with_backoff() {\n    // retry retry retry\n}\n",
            ))
            .create_async()
            .await,
        server
            .mock("GET", "/repos/acme/widgets/contents/zebra.md")
            .with_body(file("zebra.md", "# Zebra\n\nzzz quiz jazz buzz\n"))
            .create_async()
            .await,
    ]
}

async fn mock_llm(server: &mut mockito::Server) -> mockito::Mock {
    server
        .mock("POST", "/v1/chat/completions")
        .with_body(
            json!({
                "choices": [{"message": {"content": "1. What does this do?\n2. How is it used?"}}]
            })
            .to_string(),
        )
        .create_async()
        .await
}

#[tokio::test]
async fn test_documents_carry_file_metadata() {
    let mut server = mockito::Server::new_async().await;
    let _github = mock_github(&mut server).await;
    let config = test_config(&server.url());

    let (walk, docs) = collect_documents(&config, None).await.unwrap();
    assert_eq!(walk.files.len(), 2);
    assert_eq!(docs.len(), 2);

    let doc = &docs[0];
    assert_eq!(doc.path, "retry.rs");
    assert_eq!(doc.metadata.file_name, "retry.rs");
    assert_eq!(doc.metadata.githubrepo, "acme/widgets");
    assert_eq!(doc.metadata.extension, ".rs");
    assert_eq!(doc.metadata.lines, 3);
    let rendered = doc.render();
    assert!(rendered.starts_with("Metadata: file_name=>retry.rs::"));
    assert!(rendered.contains("\n-----\nContent: pub fn retry_with_backoff()"));

    let (_, limited) = collect_documents(&config, Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_ingest_then_search() {
    let mut server = mockito::Server::new_async().await;
    let _github = mock_github(&mut server).await;
    let _llm = mock_llm(&mut server).await;
    let config = test_config(&server.url());

    let (_, docs) = collect_documents(&config, None).await.unwrap();
    let llm = OpenAiChatModel::with_api_key(&config.extraction, "test-key").unwrap();
    let pipeline = ExtractionPipeline::from_config(
        &config.extraction,
        Some(Arc::new(llm) as Arc<dyn LanguageModel>),
    )
    .unwrap();
    let report = pipeline.run(&docs).await;
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert!(report.nodes.len() >= 2);
    for node in &report.nodes {
        assert!(node.metadata.contains_key(TITLE_KEY));
        assert_eq!(node.metadata[QUESTIONS_KEY].as_array().unwrap().len(), 2);
    }

    let handle =
        VectorDbHandle::new(Box::new(InMemoryStore::new())).with_embedder(Box::new(LetterEmbedder));
    let stored = store_nodes(&config, &handle, &report.nodes, false)
        .await
        .unwrap();
    assert_eq!(stored, report.nodes.len());
    assert_eq!(
        handle.count_vectors("widgets").await.unwrap(),
        report.nodes.len() as u64
    );

    // Re-ingesting replaces rows under the same ids.
    store_nodes(&config, &handle, &report.nodes, false)
        .await
        .unwrap();
    assert_eq!(
        handle.count_vectors("widgets").await.unwrap(),
        report.nodes.len() as u64
    );

    let options = SearchOptions {
        top_k: 1,
        ..SearchOptions::default()
    };
    let results = search(&config, &handle, "retry with backoff", &options)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].file_name.as_deref(), Some("retry.rs"));
    assert!(results[0].title.is_some());

    let zebra_id = report
        .nodes
        .iter()
        .find(|n| n.metadata["file_name"] == "zebra.md")
        .map(node_vector_id)
        .unwrap();
    let filtered = SearchOptions {
        top_k: 5,
        filter: Some("file_name == \"zebra.md\"".to_string()),
        ..SearchOptions::default()
    };
    let results = search(&config, &handle, "retry with backoff", &filtered)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.file_name.as_deref() == Some("zebra.md")));
    assert!(results.iter().any(|r| r.id == zebra_id));
}

#[tokio::test]
async fn test_store_nodes_requires_embedder() {
    let config = test_config("http://127.0.0.1:9");
    let handle = VectorDbHandle::new(Box::new(InMemoryStore::new()));
    assert!(store_nodes(&config, &handle, &[], false).await.is_err());
}

#[tokio::test]
async fn test_empty_query_returns_nothing() {
    let config = test_config("http://127.0.0.1:9");
    let handle =
        VectorDbHandle::new(Box::new(InMemoryStore::new())).with_embedder(Box::new(LetterEmbedder));
    let results = search(&config, &handle, "   ", &SearchOptions::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}
