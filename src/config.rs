//! Tunable knobs for schema creation, ingestion and search.
//!
//! Every struct deserializes with `#[serde(default)]`, so a partial JSON
//! object only overrides the fields it names.

use serde::{Deserialize, Serialize};

pub const DEFAULT_RRF_K: f32 = 60.0;
pub const DEFAULT_PREFETCH_LIMIT: usize = 20;
pub const DEFAULT_RESULT_LIMIT: usize = 10;
pub const DEFAULT_INDEXING_THRESHOLD: u64 = 20_000;
pub const DEFAULT_BATCH_SIZE: usize = 256;
pub const DEFAULT_TEXT_FIELD: &str = "title";
pub const SPARSE_SPACE: &str = "sparse";

/// Shape-independent settings applied when a collection is first created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Name of the sparse vector space.
    pub sparse_space: String,
    pub shard_number: u32,
    pub replication_factor: u32,
    pub default_segment_number: u32,
    /// Threshold set by `finalize`; must be positive.
    pub indexing_threshold: u64,
    /// Keep the binary-quantized dense vectors resident in memory.
    pub quantization_always_ram: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            sparse_space: SPARSE_SPACE.to_string(),
            shard_number: 3,
            replication_factor: 2,
            default_segment_number: 5,
            indexing_threshold: DEFAULT_INDEXING_THRESHOLD,
            quantization_always_ram: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Metadata key holding the text to embed.
    pub text_field: String,
    /// Points per upsert call.
    pub batch_size: usize,
    /// First id handed out; ids are `id_offset + position`.
    pub id_offset: u64,
    /// Keep the embedded text in the payload under `text_field`.
    pub store_text: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            text_field: DEFAULT_TEXT_FIELD.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            id_offset: 0,
            store_text: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub limit: usize,
    pub prefetch_limit: usize,
    pub rrf_k: f32,
    /// Cap on fused candidates sent to MaxSim. `None` reranks the whole
    /// union; a cap below `prefetch_limit` is raised to it.
    pub rerank_limit: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RESULT_LIMIT,
            prefetch_limit: DEFAULT_PREFETCH_LIMIT,
            rrf_k: DEFAULT_RRF_K,
            rerank_limit: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: SearchConfig =
            serde_json::from_str(r#"{"rrf_k": 10.0}"#).unwrap();
        assert_eq!(cfg.rrf_k, 10.0);
        assert_eq!(cfg.prefetch_limit, DEFAULT_PREFETCH_LIMIT);
        assert_eq!(cfg.limit, DEFAULT_RESULT_LIMIT);
        assert_eq!(cfg.rerank_limit, None);
    }

    #[test]
    fn schema_defaults_match_bulk_load_layout() {
        let cfg = SchemaConfig::default();
        assert_eq!(cfg.sparse_space, "sparse");
        assert_eq!((cfg.shard_number, cfg.replication_factor), (3, 2));
        assert!(cfg.indexing_threshold > 0);
    }
}
