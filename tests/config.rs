use std::fs;

use code_rag::config::load_config;
use tempfile::TempDir;

#[test]
fn test_example_config_loads() {
    let cfg = load_config(std::path::Path::new("config/coderag.example.toml")).unwrap();
    assert_eq!(cfg.repository.full_name(), "rust-lang/log");
    assert_eq!(cfg.embedding.provider, "openai");
    assert_eq!(cfg.embedding.dims, Some(512));
    assert_eq!(cfg.vectordb.collection, "code_docs");
    assert_eq!(cfg.vectordb.metric_type, "L2");
    assert!(!cfg.reranker.is_enabled());
}

#[test]
fn test_load_from_file_with_defaults() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("coderag.toml");
    fs::write(
        &path,
        r#"
[repository]
owner = "acme"
name = "widgets"
path = "src"
ref = "v1.2.0"
"#,
    )
    .unwrap();

    let cfg = load_config(&path).unwrap();
    assert_eq!(cfg.repository.path, "src");
    assert_eq!(cfg.repository.git_ref.as_deref(), Some("v1.2.0"));
    assert_eq!(cfg.github.api_url, "https://api.github.com");
    assert_eq!(cfg.github.token_env, "GITHUB_ACCESS_TOKEN");
    assert_eq!(cfg.extraction.chunk_size, 512);
    assert_eq!(cfg.extraction.chunk_overlap, 128);
    assert!(!cfg.embedding.is_enabled());
    assert_eq!(cfg.vectordb.backend, "milvus");
    assert_eq!(cfg.vectordb.vector_field, "vector_field");
}

#[test]
fn test_missing_file_names_path() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nope.toml");
    let err = load_config(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("nope.toml"));
}

#[test]
fn test_invalid_values_rejected() {
    let tmp = TempDir::new().unwrap();
    let cases = [
        "[repository]\nowner = \"\"\nname = \"x\"\n",
        "[repository]\nowner = \"a\"\nname = \"b\"\n[extraction]\nchunk_size = 10\nchunk_overlap = 10\n",
        "[repository]\nowner = \"a\"\nname = \"b\"\n[embedding]\nprovider = \"openai\"\nmodel = \"m\"\n",
        "[repository]\nowner = \"a\"\nname = \"b\"\n[vectordb]\nbackend = \"qdrant\"\n",
    ];
    for (i, content) in cases.iter().enumerate() {
        let path = tmp.path().join(format!("bad{}.toml", i));
        fs::write(&path, content).unwrap();
        assert!(load_config(&path).is_err(), "case {} should fail", i);
    }
}
