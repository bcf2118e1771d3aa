use code_rag::config::VectorDbConfig;
use code_rag::error::VectorDbError;
use code_rag::store::milvus::MilvusStore;
use code_rag::store::{CollectionSchema, DataType, IndexParams, InsertBatch, JsonMap};
use code_rag::vectordb::VectorDbHandle;
use mockito::Matcher;
use serde_json::json;

fn config(server: &mockito::Server) -> VectorDbConfig {
    VectorDbConfig {
        url: server.url(),
        ..VectorDbConfig::default()
    }
}

fn handle(server: &mockito::Server) -> VectorDbHandle {
    VectorDbHandle::new(Box::new(MilvusStore::new(&config(server)).unwrap()))
}

#[tokio::test]
async fn test_search_request_shape() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/vectordb/entities/search")
        .match_body(Matcher::PartialJson(json!({
            "collectionName": "code_docs",
            "annsField": "vector_field",
            "data": [[0.5, 0.25]],
            "limit": 5,
            "searchParams": {"metricType": "L2", "params": {"nprobe": 10}},
            "outputFields": ["*"],
        })))
        .with_body(
            json!({
                "code": 0,
                "data": [
                    {"id": 11, "distance": 0.1, "text": "fn retry()", "file_name": "retry.rs", "vector_field": [0.5, 0.25]},
                    {"id": 12, "distance": 0.4, "text": "fn other()"}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let mut params = JsonMap::new();
    params.insert("nprobe".to_string(), json!(10));
    let hits = handle(&server)
        .search_vectors("code_docs", &[0.5, 0.25], 5, "L2", params)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, 11);
    assert_eq!(hits[0].text(), Some("fn retry()"));
    assert_eq!(hits[0].payload["file_name"], "retry.rs");
    assert!(!hits[0].payload.contains_key("vector_field"));
    assert!(hits[0].distance < hits[1].distance);
}

#[tokio::test]
async fn test_hybrid_search_sends_filter() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/vectordb/entities/search")
        .match_body(Matcher::PartialJson(json!({"filter": "id in [1, 2]"})))
        .with_body(r#"{"code":0,"data":[]}"#)
        .create_async()
        .await;

    let hits = handle(&server)
        .hybrid_search("code_docs", &[1.0], "id in [1, 2]", 3, "IP", JsonMap::new())
        .await
        .unwrap();
    assert!(hits.is_empty());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_nonzero_code_is_backend_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v2/vectordb/collections/describe")
        .with_body(r#"{"code":100,"message":"collection not found[collection=missing]"}"#)
        .create_async()
        .await;

    let err = handle(&server).get_schema("missing").await.unwrap_err();
    match err {
        VectorDbError::Backend { code, message } => {
            assert_eq!(code, 100);
            assert!(message.contains("missing"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_http_failure_is_http_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/v2/vectordb/collections/list")
        .with_status(502)
        .create_async()
        .await;

    let err = handle(&server).list_collections().await.unwrap_err();
    assert!(matches!(err, VectorDbError::Http(_)));
}

#[tokio::test]
async fn test_collection_admin_calls() {
    let mut server = mockito::Server::new_async().await;
    let _list = server
        .mock("POST", "/v2/vectordb/collections/list")
        .with_body(r#"{"code":0,"data":["code_docs","scratch"]}"#)
        .create_async()
        .await;
    let _has = server
        .mock("POST", "/v2/vectordb/collections/has")
        .match_body(Matcher::PartialJson(json!({"collectionName": "code_docs"})))
        .with_body(r#"{"code":0,"data":{"has":true}}"#)
        .create_async()
        .await;
    let _stats = server
        .mock("POST", "/v2/vectordb/collections/get_stats")
        .with_body(r#"{"code":0,"data":{"rowCount":42}}"#)
        .create_async()
        .await;
    let _count = server
        .mock("POST", "/v2/vectordb/entities/query")
        .match_body(Matcher::PartialJson(json!({"outputFields": ["count(*)"]})))
        .with_body(r#"{"code":0,"data":[{"count(*)":41}]}"#)
        .create_async()
        .await;

    let handle = handle(&server);
    assert_eq!(
        handle.list_collections().await.unwrap(),
        vec!["code_docs", "scratch"]
    );
    assert!(handle.collection_exists("code_docs").await.unwrap());
    assert_eq!(
        handle.get_collection_stats("code_docs").await.unwrap().row_count,
        42
    );
    assert_eq!(handle.count_vectors("code_docs").await.unwrap(), 41);
}

#[tokio::test]
async fn test_create_collection_and_index() {
    let mut server = mockito::Server::new_async().await;
    let create = server
        .mock("POST", "/v2/vectordb/collections/create")
        .match_body(Matcher::PartialJson(json!({
            "collectionName": "code_docs",
            "schema": {
                "autoId": false,
                "fields": [
                    {"fieldName": "id", "dataType": "Int64", "isPrimary": true},
                    {"fieldName": "text", "dataType": "VarChar", "isPrimary": false,
                     "elementTypeParams": {"max_length": "65535"}},
                    {"fieldName": "vector_field", "dataType": "FloatVector", "isPrimary": false,
                     "elementTypeParams": {"dim": "4"}}
                ]
            }
        })))
        .with_body(r#"{"code":0,"data":{}}"#)
        .create_async()
        .await;
    let index = server
        .mock("POST", "/v2/vectordb/indexes/create")
        .match_body(Matcher::PartialJson(json!({
            "collectionName": "code_docs",
            "indexParams": [{
                "fieldName": "vector_field",
                "metricType": "L2",
                "params": {"index_type": "IVF_FLAT", "nlist": 128}
            }]
        })))
        .with_body(r#"{"code":0,"data":{}}"#)
        .create_async()
        .await;

    let handle = handle(&server);
    let schema = CollectionSchema::for_documents("vector_field", 4);
    assert_eq!(schema.fields[2].dtype, DataType::FloatVector);
    handle.create_collection("code_docs", &schema).await.unwrap();
    handle
        .create_index(
            "code_docs",
            "vector_field",
            &IndexParams::new("IVF_FLAT", "L2").with_param("nlist", 128),
        )
        .await
        .unwrap();

    create.assert_async().await;
    index.assert_async().await;
}

#[tokio::test]
async fn test_insert_and_delete_with_token() {
    std::env::set_var("CODERAG_TEST_MILVUS_TOKEN", "root:Milvus");
    let mut server = mockito::Server::new_async().await;
    let insert = server
        .mock("POST", "/v2/vectordb/entities/insert")
        .match_header("authorization", "Bearer root:Milvus")
        .match_body(Matcher::PartialJson(json!({
            "collectionName": "code_docs",
            "data": [{"id": 42, "vector_field": [1.0, 2.0, 3.0], "text": "hello"}]
        })))
        .with_body(r#"{"code":0,"data":{"insertCount":1,"insertIds":[42]}}"#)
        .create_async()
        .await;
    let delete = server
        .mock("POST", "/v2/vectordb/entities/delete")
        .match_body(Matcher::PartialJson(json!({"filter": "id in [7, 8]"})))
        .with_body(r#"{"code":0,"data":{}}"#)
        .create_async()
        .await;

    let config = VectorDbConfig {
        url: server.url(),
        token_env: Some("CODERAG_TEST_MILVUS_TOKEN".to_string()),
        ..VectorDbConfig::default()
    };
    let store = MilvusStore::new(&config).unwrap();
    let handle = VectorDbHandle::new(Box::new(store));

    let mut payload = JsonMap::new();
    payload.insert("text".to_string(), json!("hello"));
    let batch = InsertBatch::new(vec![42], vec![vec![1.0, 2.0, 3.0]])
        .unwrap()
        .with_payloads(vec![payload])
        .unwrap();
    let inserted = handle.store().insert("code_docs", &batch).await.unwrap();
    assert_eq!(inserted, 1);
    handle.delete_vectors("code_docs", &[7, 8]).await.unwrap();

    insert.assert_async().await;
    delete.assert_async().await;
}
