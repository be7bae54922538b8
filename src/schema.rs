//! Collection schema declaration and the Provisioning → Indexed lifecycle.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    config::SchemaConfig,
    error::{Error, Result},
    store::VectorStore,
};

pub const DENSE_SPACE: &str = "dense";
pub const LATE_SPACE: &str = "late";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    Cosine,
}

/// How a multi-vector space compares two token matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiVectorComparator {
    MaxSim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorParams {
    pub size: usize,
    pub distance: Distance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multivector: Option<MultiVectorComparator>,
}

/// A sparse space has no fixed dimensionality; only its name is declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseVectorParams {
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    Binary { always_ram: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizersConfig {
    pub default_segment_number: u32,
    /// Zero disables background index maintenance (bulk load mode).
    pub indexing_threshold: u64,
}

/// The declared shape of a collection. Created once, never migrated; only
/// `optimizers.indexing_threshold` changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub dense: VectorParams,
    pub sparse: SparseVectorParams,
    pub late: VectorParams,
    pub quantization: Quantization,
    pub shard_number: u32,
    pub replication_factor: u32,
    pub optimizers: OptimizersConfig,
}

impl CollectionSchema {
    /// The schema a freshly provisioned collection gets.
    pub fn provisioning(
        dense_dim: usize,
        late_dim: usize,
        config: &SchemaConfig,
    ) -> Self {
        Self {
            dense: VectorParams {
                size: dense_dim,
                distance: Distance::Cosine,
                multivector: None,
            },
            sparse: SparseVectorParams {
                name: config.sparse_space.clone(),
            },
            late: VectorParams {
                size: late_dim,
                distance: Distance::Cosine,
                multivector: Some(MultiVectorComparator::MaxSim),
            },
            quantization: Quantization::Binary {
                always_ram: config.quantization_always_ram,
            },
            shard_number: config.shard_number,
            replication_factor: config.replication_factor,
            optimizers: OptimizersConfig {
                default_segment_number: config.default_segment_number,
                indexing_threshold: 0,
            },
        }
    }

    pub fn state(&self) -> CollectionState {
        if self.optimizers.indexing_threshold == 0 {
            CollectionState::Provisioning
        } else {
            CollectionState::Indexed
        }
    }

    /// Resolve a space name to the kind of vector it holds.
    pub fn space_kind(&self, space: &str) -> Option<SpaceKind> {
        if space == DENSE_SPACE {
            Some(SpaceKind::Dense)
        } else if space == self.sparse.name {
            Some(SpaceKind::Sparse)
        } else if space == LATE_SPACE {
            Some(SpaceKind::Late)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceKind {
    Dense,
    Sparse,
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    Absent,
    /// Indexing threshold is zero: writes skip incremental index upkeep.
    Provisioning,
    /// Indexing threshold is positive: the store keeps its indexes built.
    Indexed,
}

impl std::fmt::Display for CollectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CollectionState::Absent => "absent",
            CollectionState::Provisioning => "provisioning",
            CollectionState::Indexed => "indexed",
        };
        f.write_str(s)
    }
}

/// Declares collection shapes and drives the indexing toggle.
pub struct SchemaManager<'a> {
    store: &'a dyn VectorStore,
    config: SchemaConfig,
}

impl<'a> SchemaManager<'a> {
    pub fn new(store: &'a dyn VectorStore, config: SchemaConfig) -> Self {
        Self { store, config }
    }

    pub fn state(&self, name: &str) -> Result<CollectionState> {
        if !self.store.collection_exists(name)? {
            return Ok(CollectionState::Absent);
        }
        Ok(self.store.collection_info(name)?.state())
    }

    /// Create the collection in Provisioning state if it does not exist.
    ///
    /// An existing collection is left untouched; if its dense or late
    /// dimensions differ from the requested ones this is a
    /// [`Error::SchemaConflict`].
    pub fn ensure_schema(
        &self,
        name: &str,
        dense_dim: usize,
        late_dim: usize,
    ) -> Result<CollectionState> {
        if self.store.collection_exists(name)? {
            let existing = self.store.collection_info(name)?;
            check_compatible(
                name,
                &existing,
                dense_dim,
                late_dim,
                &self.config.sparse_space,
            )?;
            return Ok(existing.state());
        }

        let schema =
            CollectionSchema::provisioning(dense_dim, late_dim, &self.config);
        self.store.create_collection(name, &schema)?;
        info!(
            collection = name,
            dense_dim, late_dim, "created collection in provisioning state"
        );
        Ok(schema.state())
    }

    /// Raise the indexing threshold so the store resumes index builds.
    pub fn finalize(&self, name: &str) -> Result<CollectionState> {
        if !self.store.collection_exists(name)? {
            return Err(Error::CollectionNotFound(name.to_string()));
        }

        let schema = self.store.collection_info(name)?;
        if schema.state() == CollectionState::Indexed {
            return Ok(CollectionState::Indexed);
        }

        let threshold = self.config.indexing_threshold.max(1);
        self.store.set_indexing_threshold(name, threshold)?;
        info!(collection = name, threshold, "collection finalized");
        Ok(CollectionState::Indexed)
    }
}

fn check_compatible(
    name: &str,
    existing: &CollectionSchema,
    dense_dim: usize,
    late_dim: usize,
    sparse_space: &str,
) -> Result<()> {
    let conflict = |reason: String| Error::SchemaConflict {
        collection: name.to_string(),
        reason,
    };

    if existing.dense.size != dense_dim {
        return Err(conflict(format!(
            "dense space has dimension {}, requested {dense_dim}",
            existing.dense.size
        )));
    }
    if existing.late.size != late_dim {
        return Err(conflict(format!(
            "late space has dimension {}, requested {late_dim}",
            existing.late.size
        )));
    }
    if existing.sparse.name != sparse_space {
        return Err(conflict(format!(
            "sparse space is named '{}', requested '{sparse_space}'",
            existing.sparse.name
        )));
    }
    if existing.late.multivector != Some(MultiVectorComparator::MaxSim) {
        return Err(conflict("late space does not compare with MaxSim".into()));
    }
    Ok(())
}
