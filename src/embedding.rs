//! Text → vector providers.
//!
//! The search pipeline only sees the [`EmbeddingProvider`] trait. The
//! bundled [`HashingProvider`] needs no model: it analyzes text into
//! stemmed, lowercased terms and derives every vector from blake3 hashes
//! of those terms, so identical input always yields identical vectors.

use std::collections::BTreeMap;

use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    TextAnalyzer,
    TokenStream,
};

use crate::{
    error::Result,
    vectors::{DenseVector, MultiVector, SparseVector},
};

pub const DEFAULT_DENSE_DIM: usize = 384;
pub const DEFAULT_LATE_DIM: usize = 128;
pub const HASHING_MODEL_ID: &str = "hashing-v1";

/// Maps text to its dense, sparse and late-interaction representations.
///
/// Implementations must be deterministic for a fixed model version.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the underlying model, for logs and status output.
    fn model_id(&self) -> &str;

    fn embed_dense(&self, text: &str) -> Result<DenseVector>;

    fn embed_sparse(&self, text: &str) -> Result<SparseVector>;

    /// Per-token matrix of a document text.
    fn embed_late(&self, text: &str) -> Result<MultiVector>;

    /// Per-token matrix of a query. Models that encode queries and
    /// documents differently override this.
    fn embed_late_query(&self, text: &str) -> Result<MultiVector> {
        self.embed_late(text)
    }
}

/// All three representations of one text.
#[derive(Debug, Clone, PartialEq)]
pub struct Embeddings {
    pub dense: DenseVector,
    pub sparse: SparseVector,
    pub late: MultiVector,
}

/// Embed a document text into every space.
pub fn embed_document(
    provider: &dyn EmbeddingProvider,
    text: &str,
) -> Result<Embeddings> {
    Ok(Embeddings {
        dense: provider.embed_dense(text)?,
        sparse: provider.embed_sparse(text)?,
        late: provider.embed_late(text)?,
    })
}

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(Language::English))
        .build()
}

/// Feature-hashing embeddings over analyzed terms.
///
/// - dense: signed hashing of each term into `dense_dim` buckets, then
///   normalized to unit length;
/// - sparse: term id = first 4 bytes of the term hash, weight =
///   `1 + ln(tf)`;
/// - late: one pseudo-random unit vector per term occurrence, seeded by the
///   term, so equal terms produce equal rows.
#[derive(Clone)]
pub struct HashingProvider {
    dense_dim: usize,
    late_dim: usize,
    analyzer: TextAnalyzer,
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DENSE_DIM, DEFAULT_LATE_DIM)
    }
}

impl HashingProvider {
    pub fn new(dense_dim: usize, late_dim: usize) -> Self {
        Self {
            dense_dim: dense_dim.max(1),
            late_dim: late_dim.max(1),
            analyzer: analyzer(),
        }
    }

    /// Split text into lowercased, stemmed terms.
    pub fn terms(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.analyzer.clone();
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        while stream.advance() {
            terms.push(stream.token().text.clone());
        }
        terms
    }

    fn term_hash(space: &str, term: &str) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(space.as_bytes());
        hasher.update(&[0]);
        hasher.update(term.as_bytes());
        hasher
    }

    fn term_row(&self, term: &str) -> Vec<f32> {
        let mut bytes = vec![0u8; self.late_dim * 4];
        Self::term_hash("late", term)
            .finalize_xof()
            .fill(&mut bytes);

        let row: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| {
                let x = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                (x as f32 / u32::MAX as f32) * 2.0 - 1.0
            })
            .collect();
        DenseVector(row).normalized().0
    }
}

impl EmbeddingProvider for HashingProvider {
    fn model_id(&self) -> &str {
        HASHING_MODEL_ID
    }

    fn embed_dense(&self, text: &str) -> Result<DenseVector> {
        let mut values = vec![0.0f32; self.dense_dim];
        for term in self.terms(text) {
            let hash = Self::term_hash("dense", &term).finalize();
            let bytes = hash.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
                bytes[6], bytes[7],
            ]) as usize
                % self.dense_dim;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            values[bucket] += sign;
        }
        Ok(DenseVector(values).normalized())
    }

    fn embed_sparse(&self, text: &str) -> Result<SparseVector> {
        let mut counts: BTreeMap<u32, f32> = BTreeMap::new();
        for term in self.terms(text) {
            let hash = Self::term_hash("sparse", &term).finalize();
            let b = hash.as_bytes();
            let id = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            *counts.entry(id).or_insert(0.0) += 1.0;
        }
        let (indices, values) = counts
            .into_iter()
            .map(|(id, tf)| (id, 1.0 + tf.ln()))
            .unzip();
        SparseVector::new(indices, values)
    }

    fn embed_late(&self, text: &str) -> Result<MultiVector> {
        let terms = self.terms(text);
        let mut data = Vec::with_capacity(terms.len() * self.late_dim);
        for term in &terms {
            data.extend(self.term_row(term));
        }
        MultiVector::new(terms.len() as u32, self.late_dim as u32, data)
    }
}

impl std::fmt::Debug for HashingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashingProvider")
            .field("dense_dim", &self.dense_dim)
            .field("late_dim", &self.late_dim)
            .finish_non_exhaustive()
    }
}
