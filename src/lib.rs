//! hybert - hybrid vector search over dense, sparse and late-interaction
//! representations.
//!
//! Every document is embedded three ways: a dense vector for semantic
//! similarity, a sparse vector for term overlap, and a per-token matrix
//! for late interaction. A query prefetches candidates from the sparse and
//! dense spaces, merges the two lists with Reciprocal Rank Fusion and
//! reranks the fused set by MaxSim over the token matrices.
//!
//! # Quick start
//!
//! ```no_run
//! use hybert::{DataDir, HashingProvider, HybridSearcher, Ingestor, RedbStore};
//! use hybert::ingestion::read_jsonl;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = RedbStore::open(&data_dir.store_db()).unwrap();
//! let provider = HashingProvider::default();
//!
//! let (docs, _stats) =
//!     read_jsonl("products.jsonl".as_ref(), "title", None).unwrap();
//! let ingestor = Ingestor::new(&store, &provider, "products");
//! ingestor.ingest(&docs).unwrap();
//! ingestor.schema().finalize("products").unwrap();
//!
//! let searcher = HybridSearcher::new(&store, &provider, "products");
//! for r in searcher.search("red shoes", 10, 20).unwrap() {
//!     println!("{} (score: {:.3})", r.id, r.score);
//! }
//! ```

#[cfg(feature = "colbert")]
pub mod colbert;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod format;
pub mod fusion;
pub mod ingestion;
pub mod mcp;
pub mod redb_store;
pub mod reranker;
pub mod schema;
pub mod search;
pub mod store;
pub mod vectors;

pub use data_dir::DataDir;
pub use embedding::{EmbeddingProvider, HashingProvider};
pub use error::{Error, Result};
pub use format::ResultFormatter;
pub use ingestion::{Document, Ingestor};
pub use redb_store::RedbStore;
pub use schema::{CollectionState, SchemaManager};
pub use search::{HybridSearcher, RankedPoint, SearchParams};
pub use store::VectorStore;
