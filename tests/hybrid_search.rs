use std::io::Cursor;

use hybert::{
    CollectionState,
    EmbeddingProvider,
    Error,
    HashingProvider,
    HybridSearcher,
    Ingestor,
    RedbStore,
    ResultFormatter,
    SchemaManager,
    VectorStore,
    config::SchemaConfig,
    ingestion::{Document, parse_jsonl},
    schema::DENSE_SPACE,
    store::QueryVector,
};

const PRODUCTS: &str = r#"{"title": "red shoes", "user_id": "1"}
{"title": "blue jacket", "user_id": "1"}
{"title": "red jacket", "user_id": "2"}
"#;

fn open_store() -> (tempfile::TempDir, RedbStore) {
    let tmp = tempfile::tempdir().unwrap();
    let store = RedbStore::open(&tmp.path().join("store.redb")).unwrap();
    (tmp, store)
}

fn products() -> Vec<Document> {
    parse_jsonl(Cursor::new(PRODUCTS), "title", None).unwrap().0
}

fn load(store: &RedbStore, provider: &HashingProvider, docs: &[Document]) {
    let ingestor = Ingestor::new(store, provider, "products").with_config(
        hybert::config::IngestConfig {
            store_text: true,
            ..Default::default()
        },
    );
    ingestor.ingest(docs).unwrap();
}

#[test]
fn red_documents_outrank_blue_jacket() {
    let (_tmp, store) = open_store();
    let provider = HashingProvider::default();
    load(&store, &provider, &products());

    let red_ids = [0u64, 2];

    let sparse = store
        .query(
            "products",
            "sparse",
            &QueryVector::Sparse(provider.embed_sparse("red").unwrap()),
            20,
            None,
        )
        .unwrap();
    let mut sparse_ids: Vec<u64> = sparse.iter().map(|p| p.id).collect();
    sparse_ids.sort();
    assert_eq!(sparse_ids, red_ids);

    let dense = store
        .query(
            "products",
            DENSE_SPACE,
            &QueryVector::Dense(provider.embed_dense("red").unwrap()),
            20,
            None,
        )
        .unwrap();
    let blue_pos = dense.iter().position(|p| p.id == 1).unwrap();
    for id in red_ids {
        let pos = dense.iter().position(|p| p.id == id).unwrap();
        assert!(pos < blue_pos);
    }

    let searcher = HybridSearcher::new(&store, &provider, "products");
    let results = searcher.search("red", 10, 20).unwrap();
    assert_eq!(results.len(), 3);
    let mut top_two: Vec<u64> = results[..2].iter().map(|r| r.id).collect();
    top_two.sort();
    assert_eq!(top_two, red_ids);
    assert_eq!(results[2].id, 1);
    assert!(results[0].score > results[2].score);

    let formatted = ResultFormatter::default().format(&results);
    assert_eq!(formatted.len(), 3);
    assert_eq!(formatted[2].title, "blue jacket");
}

#[test]
fn unknown_collection_returns_no_results() {
    let (_tmp, store) = open_store();
    let provider = HashingProvider::default();
    load(&store, &provider, &products());

    let searcher = HybridSearcher::new(&store, &provider, "missing");
    let err = searcher.search("red", 10, 20).unwrap_err();
    assert!(matches!(err, Error::CollectionNotFound(ref name) if name == "missing"));
    assert!(!err.is_retryable());
}

#[test]
fn null_titles_are_not_ingested() {
    let input = r#"{"title": "red shoes"}
{"title": null, "user_id": "9"}
{"title": "red jacket"}
{"user_id": "3"}
"#;
    let (docs, stats) = parse_jsonl(Cursor::new(input), "title", None).unwrap();
    assert_eq!(stats.skipped, 2);

    let (_tmp, store) = open_store();
    let provider = HashingProvider::default();
    load(&store, &provider, &docs);
    assert_eq!(store.count("products").unwrap(), 2);
}

#[test]
fn identical_queries_give_identical_results() {
    let (_tmp, store) = open_store();
    let provider = HashingProvider::default();
    load(&store, &provider, &products());

    let searcher = HybridSearcher::new(&store, &provider, "products");
    let first = searcher.search("red jacket", 10, 20).unwrap();
    let second = searcher.search("red jacket", 10, 20).unwrap();
    assert_eq!(first, second);
}

#[test]
fn results_are_the_same_before_and_after_finalize() {
    let (_tmp, store) = open_store();
    let provider = HashingProvider::default();
    load(&store, &provider, &products());

    let searcher = HybridSearcher::new(&store, &provider, "products");
    let before = searcher.search("red", 10, 20).unwrap();

    let manager = SchemaManager::new(&store, SchemaConfig::default());
    assert_eq!(manager.finalize("products").unwrap(), CollectionState::Indexed);
    let after = searcher.search("red", 10, 20).unwrap();

    assert_eq!(before, after);
}

#[test]
fn reingesting_keeps_point_count_and_schema() {
    let (_tmp, store) = open_store();
    let provider = HashingProvider::default();
    load(&store, &provider, &products());
    let schema = serde_json::to_vec(&store.collection_info("products").unwrap())
        .unwrap();

    load(&store, &provider, &products());

    assert_eq!(store.count("products").unwrap(), 3);
    let again = serde_json::to_vec(&store.collection_info("products").unwrap())
        .unwrap();
    assert_eq!(schema, again);
}

#[test]
fn ingesting_with_other_dimensions_conflicts() {
    let (_tmp, store) = open_store();
    load(&store, &HashingProvider::default(), &products());

    let narrow = HashingProvider::new(64, 16);
    let err = Ingestor::new(&store, &narrow, "products")
        .ingest(&products())
        .unwrap_err();
    assert!(matches!(err, Error::SchemaConflict { .. }));
}
