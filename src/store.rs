//! The vector store seam: what the search pipeline needs from storage.

use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    schema::CollectionSchema,
    vectors::{DenseVector, MultiVector, SparseVector},
};

/// Arbitrary per-point metadata.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One indexed document: its vectors in every space plus its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub id: u64,
    pub dense: DenseVector,
    pub sparse: SparseVector,
    pub late: MultiVector,
    pub payload: Payload,
}

/// A candidate returned by a single-space query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPoint {
    pub id: u64,
    pub score: f32,
}

/// A point read back by id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPoint {
    pub id: u64,
    pub late: Option<MultiVector>,
    pub payload: Payload,
}

/// The vector a nearest-neighbour query is issued with.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryVector {
    Dense(DenseVector),
    Sparse(SparseVector),
}

/// Requires a payload key to hold exactly this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub key: String,
    pub value: serde_json::Value,
}

/// Conjunction of payload conditions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Filter {
    pub must: Vec<FieldCondition>,
}

impl Filter {
    pub fn must_match(
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            must: vec![FieldCondition {
                key: key.into(),
                value: value.into(),
            }],
        }
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        self.must
            .iter()
            .all(|cond| payload.get(&cond.key) == Some(&cond.value))
    }
}

/// Persists points and answers per-space nearest-neighbour queries.
///
/// Query results are ordered by descending score; equal scores keep the
/// store's scan order (ascending id).
pub trait VectorStore: Send + Sync {
    fn collection_exists(&self, name: &str) -> Result<bool>;

    /// Create a collection. Fails if one already exists under `name`.
    fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<()>;

    /// The stored schema, or `CollectionNotFound`.
    fn collection_info(&self, name: &str) -> Result<CollectionSchema>;

    fn list_collections(&self) -> Result<Vec<String>>;

    fn set_indexing_threshold(&self, name: &str, threshold: u64) -> Result<()>;

    /// Insert or overwrite points by id.
    fn upsert(&self, name: &str, points: &[Point]) -> Result<()>;

    /// Top `limit` points of space `using` for `vector`.
    fn query(
        &self,
        name: &str,
        using: &str,
        vector: &QueryVector,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>>;

    /// Read points by id, preserving input order. Unknown ids are skipped.
    fn retrieve(
        &self,
        name: &str,
        ids: &[u64],
        with_late: bool,
    ) -> Result<Vec<StoredPoint>>;

    fn count(&self, name: &str) -> Result<u64>;
}
