use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{
    config::SearchConfig,
    embedding::EmbeddingProvider,
    error::{Error, Result},
    fusion::reciprocal_rank_fusion,
    reranker,
    schema::DENSE_SPACE,
    store::{Filter, Payload, QueryVector, ScoredPoint, VectorStore},
    vectors::MultiVector,
};

/// Parameters of one hybrid query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub query: String,
    pub limit: usize,
    pub prefetch_limit: usize,
    pub rrf_k: f32,
    pub rerank_limit: Option<usize>,
    /// Payload filter applied to both prefetches.
    pub filter: Option<Filter>,
    /// Abort with `RetrievalUnavailable` once this instant has passed.
    pub deadline: Option<Instant>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self::from_config(query, &SearchConfig::default())
    }

    pub fn from_config(query: impl Into<String>, config: &SearchConfig) -> Self {
        Self {
            query: query.into(),
            limit: config.limit,
            prefetch_limit: config.prefetch_limit,
            rrf_k: config.rrf_k,
            rerank_limit: config.rerank_limit,
            filter: None,
            deadline: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_prefetch_limit(mut self, prefetch_limit: usize) -> Self {
        self.prefetch_limit = prefetch_limit;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::InvalidQuery("query text is empty".into()));
        }
        if self.limit == 0 {
            return Err(Error::InvalidQuery("limit must be positive".into()));
        }
        if self.prefetch_limit == 0 {
            return Err(Error::InvalidQuery(
                "prefetch limit must be positive".into(),
            ));
        }
        if !self.rrf_k.is_finite() || self.rrf_k < 0.0 {
            return Err(Error::InvalidQuery(format!(
                "RRF k must be a non-negative number, got {}",
                self.rrf_k
            )));
        }
        Ok(())
    }

    fn check_deadline(&self, stage: &str) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(Error::RetrievalUnavailable(format!(
                    "deadline exceeded before {stage}"
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A final search result: MaxSim score plus the point's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPoint {
    pub id: u64,
    pub score: f32,
    pub payload: Payload,
}

/// Runs the three-stage hybrid query against one collection.
///
/// 1. Sparse and dense prefetch, concurrently
/// 2. Reciprocal Rank Fusion of the two lists
/// 3. MaxSim rerank over the late-interaction matrices
pub struct HybridSearcher<'a> {
    store: &'a dyn VectorStore,
    provider: &'a dyn EmbeddingProvider,
    collection: String,
    config: SearchConfig,
}

impl<'a> HybridSearcher<'a> {
    pub fn new(
        store: &'a dyn VectorStore,
        provider: &'a dyn EmbeddingProvider,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            collection: collection.into(),
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Query with this searcher's configured `rrf_k` and rerank cap.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        prefetch_limit: usize,
    ) -> Result<Vec<RankedPoint>> {
        let params = SearchParams::from_config(query, &self.config)
            .with_limit(limit)
            .with_prefetch_limit(prefetch_limit);
        self.search_with(&params)
    }

    pub fn search_with(&self, params: &SearchParams) -> Result<Vec<RankedPoint>> {
        params.validate()?;
        let schema = self.store.collection_info(&self.collection)?;

        let dense = self.provider.embed_dense(&params.query)?;
        let sparse = self.provider.embed_sparse(&params.query)?;
        params.check_deadline("prefetch")?;

        // Stage 1: sparse and dense prefetch
        let filter = params.filter.as_ref();
        let (sparse_hits, dense_hits) = rayon::join(
            || {
                self.prefetch(
                    &schema.sparse.name,
                    &QueryVector::Sparse(sparse),
                    params.prefetch_limit,
                    filter,
                )
            },
            || {
                self.prefetch(
                    DENSE_SPACE,
                    &QueryVector::Dense(dense),
                    params.prefetch_limit,
                    filter,
                )
            },
        );
        let (sparse_hits, dense_hits) = (sparse_hits?, dense_hits?);
        debug!(
            sparse = sparse_hits.len(),
            dense = dense_hits.len(),
            "prefetch complete"
        );
        params.check_deadline("fusion")?;

        // Stage 2: reciprocal rank fusion
        let mut fused =
            reciprocal_rank_fusion(&[sparse_hits, dense_hits], params.rrf_k);
        if let Some(cap) = params.rerank_limit {
            fused.truncate(cap.max(params.prefetch_limit));
        }
        debug!(candidates = fused.len(), k = params.rrf_k, "fused");
        if fused.is_empty() {
            return Ok(vec![]);
        }

        // Stage 3: MaxSim rerank
        let query_matrix = self.provider.embed_late_query(&params.query)?;
        params.check_deadline("rerank")?;
        let ids: Vec<u64> = fused.iter().map(|c| c.id).collect();
        let stored = self.store.retrieve(&self.collection, &ids, true)?;

        let mut payloads: HashMap<u64, Payload> =
            HashMap::with_capacity(stored.len());
        let mut candidates: Vec<(u64, MultiVector)> =
            Vec::with_capacity(stored.len());
        for point in stored {
            if let Some(late) = point.late {
                candidates.push((point.id, late));
                payloads.insert(point.id, point.payload);
            }
        }
        if candidates.len() < ids.len() {
            debug!(
                dropped = ids.len() - candidates.len(),
                "candidates without late vectors"
            );
        }

        let ranked = reranker::rerank(&query_matrix, &candidates)?;
        debug!(reranked = ranked.len(), limit = params.limit, "reranked");

        Ok(ranked
            .into_iter()
            .take(params.limit)
            .map(|r| RankedPoint {
                id: r.id,
                score: r.score,
                payload: payloads.remove(&r.id).unwrap_or_default(),
            })
            .collect())
    }

    fn prefetch(
        &self,
        space: &str,
        vector: &QueryVector,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        self.store
            .query(&self.collection, space, vector, limit, filter)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        config::SchemaConfig,
        embedding::{HashingProvider, embed_document},
        redb_store::RedbStore,
        schema::SchemaManager,
        store::Point,
        vectors::{DenseVector, SparseVector},
    };

    fn setup(texts: &[(&str, &str)]) -> (tempfile::TempDir, RedbStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&tmp.path().join("store.redb")).unwrap();
        let provider = HashingProvider::new(32, 16);
        SchemaManager::new(&store, SchemaConfig::default())
            .ensure_schema("docs", 32, 16)
            .unwrap();

        let points: Vec<Point> = texts
            .iter()
            .enumerate()
            .map(|(i, (text, user))| {
                let e = embed_document(&provider, text).unwrap();
                let payload = json!({"title": text, "user_id": user});
                Point {
                    id: i as u64,
                    dense: e.dense,
                    sparse: e.sparse,
                    late: e.late,
                    payload: payload.as_object().unwrap().clone(),
                }
            })
            .collect();
        store.upsert("docs", &points).unwrap();
        (tmp, store)
    }

    #[test]
    fn exact_match_ranks_first() {
        let (_tmp, store) = setup(&[
            ("blue jacket", "1"),
            ("red shoes", "1"),
            ("green hat", "2"),
        ]);
        let provider = HashingProvider::new(32, 16);
        let searcher = HybridSearcher::new(&store, &provider, "docs");

        let results = searcher.search("red shoes", 10, 20).unwrap();
        assert_eq!(results[0].id, 1);
        assert_eq!(results[0].payload["title"], "red shoes");
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn limit_truncates_results() {
        let (_tmp, store) =
            setup(&[("a b", "1"), ("a c", "1"), ("a d", "1"), ("a e", "1")]);
        let provider = HashingProvider::new(32, 16);
        let searcher = HybridSearcher::new(&store, &provider, "docs");
        assert_eq!(searcher.search("a", 2, 20).unwrap().len(), 2);
    }

    #[test]
    fn empty_query_is_rejected() {
        let (_tmp, store) = setup(&[("red shoes", "1")]);
        let provider = HashingProvider::new(32, 16);
        let searcher = HybridSearcher::new(&store, &provider, "docs");

        for q in ["", "   \t"] {
            let err = searcher.search(q, 10, 20).unwrap_err();
            assert!(matches!(err, Error::InvalidQuery(_)));
        }
    }

    #[test]
    fn invalid_limits_are_rejected() {
        let (_tmp, store) = setup(&[("red shoes", "1")]);
        let provider = HashingProvider::new(32, 16);
        let searcher = HybridSearcher::new(&store, &provider, "docs");

        assert!(matches!(
            searcher.search("red", 0, 20),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            searcher.search("red", 10, 0),
            Err(Error::InvalidQuery(_))
        ));
        let mut params = SearchParams::new("red");
        params.rrf_k = f32::NAN;
        assert!(matches!(
            searcher.search_with(&params),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn missing_collection_is_reported() {
        let (_tmp, store) = setup(&[("red shoes", "1")]);
        let provider = HashingProvider::new(32, 16);
        let searcher = HybridSearcher::new(&store, &provider, "ghost");
        let err = searcher.search("red", 10, 20).unwrap_err();
        assert!(matches!(err, Error::CollectionNotFound(_)));
    }

    #[test]
    fn filter_restricts_candidates() {
        let (_tmp, store) = setup(&[
            ("red shoes", "1"),
            ("red shoes", "2"),
            ("red hat", "2"),
        ]);
        let provider = HashingProvider::new(32, 16);
        let searcher = HybridSearcher::new(&store, &provider, "docs");

        let params =
            SearchParams::new("red shoes").with_filter(Filter::must_match(
                "user_id", "2",
            ));
        let results = searcher.search_with(&params).unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.payload["user_id"] == "2"));
        assert_eq!(results[0].id, 1);
    }

    #[test]
    fn expired_deadline_aborts() {
        let (_tmp, store) = setup(&[("red shoes", "1")]);
        let provider = HashingProvider::new(32, 16);
        let searcher = HybridSearcher::new(&store, &provider, "docs");

        let mut params = SearchParams::new("red");
        params.deadline = Some(Instant::now());
        let err = searcher.search_with(&params).unwrap_err();
        assert!(matches!(err, Error::RetrievalUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn rerank_cap_never_drops_below_prefetch() {
        let texts: Vec<(String, &str)> =
            (0..6).map(|i| (format!("red item{i}"), "1")).collect();
        let refs: Vec<(&str, &str)> =
            texts.iter().map(|(t, u)| (t.as_str(), *u)).collect();
        let (_tmp, store) = setup(&refs);
        let provider = HashingProvider::new(32, 16);
        let searcher =
            HybridSearcher::new(&store, &provider, "docs").with_config(
                SearchConfig {
                    rerank_limit: Some(1),
                    ..SearchConfig::default()
                },
            );

        // Cap 1 is raised to the prefetch limit of 3.
        let results = searcher.search("red", 10, 3).unwrap();
        assert!(results.len() >= 3);
    }

    /// Hashing embeddings, except the named query stage fails.
    struct BrokenStage {
        inner: HashingProvider,
        sparse_fails: bool,
    }

    impl EmbeddingProvider for BrokenStage {
        fn model_id(&self) -> &str {
            "broken"
        }

        fn embed_dense(&self, text: &str) -> Result<DenseVector> {
            self.inner.embed_dense(text)
        }

        fn embed_sparse(&self, text: &str) -> Result<SparseVector> {
            if self.sparse_fails {
                return Err(Error::ProviderError("sparse model offline".into()));
            }
            self.inner.embed_sparse(text)
        }

        fn embed_late(&self, text: &str) -> Result<MultiVector> {
            self.inner.embed_late(text)
        }

        fn embed_late_query(&self, _text: &str) -> Result<MultiVector> {
            Err(Error::ProviderError("late model offline".into()))
        }
    }

    #[test]
    fn query_embedding_failure_is_a_provider_error() {
        let (_tmp, store) = setup(&[("red shoes", "1"), ("blue jacket", "1")]);

        for sparse_fails in [true, false] {
            let provider = BrokenStage {
                inner: HashingProvider::new(32, 16),
                sparse_fails,
            };
            let searcher = HybridSearcher::new(&store, &provider, "docs");
            let err = searcher.search("red shoes", 10, 20).unwrap_err();
            let stage = if sparse_fails { "sparse" } else { "late" };
            assert!(
                matches!(err, Error::ProviderError(ref m) if m.contains(stage)),
                "unexpected error {err:?}"
            );
            assert!(!err.is_retryable());
        }
    }
}
