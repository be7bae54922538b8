use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use bytemuck::{Pod, Zeroable};
use rayon::prelude::*;
use redb::{
    Database,
    ReadTransaction,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    WriteTransaction,
};
use tracing::debug;

use crate::{
    error::{Error, Result},
    schema::{CollectionSchema, CollectionState, SpaceKind},
    store::{
        Filter,
        Payload,
        Point,
        QueryVector,
        ScoredPoint,
        StoredPoint,
        VectorStore,
    },
    vectors::{DenseVector, MultiVector, SparseVector},
};

const COLLECTIONS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("collections");

/// Header preceding a multi-vector's f32 data.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
struct MatrixHeader {
    num_tokens: u32,
    dimension: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<MatrixHeader>();

/// Names of the tables backing one collection.
struct SpaceTables {
    dense: String,
    sparse: String,
    late: String,
    payload: String,
    postings: String,
}

impl SpaceTables {
    fn for_collection(name: &str) -> Self {
        Self {
            dense: format!("{name}/dense"),
            sparse: format!("{name}/sparse"),
            late: format!("{name}/late"),
            payload: format!("{name}/payload"),
            postings: format!("{name}/postings"),
        }
    }

    fn dense(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.dense)
    }

    fn sparse(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.sparse)
    }

    fn late(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.late)
    }

    fn payload(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.payload)
    }

    fn postings(&self) -> TableDefinition<'_, u32, &'static [u8]> {
        TableDefinition::new(&self.postings)
    }
}

/// An embedded, exact-scan vector store on top of redb.
///
/// Per collection it keeps one table per vector space, a payload table and
/// a sparse inverted index (`postings`, term id → point ids). The inverted
/// index is only maintained while the collection is Indexed; during
/// Provisioning, sparse queries fall back to a full scan and the index is
/// built in one pass when the indexing threshold is raised.
///
/// Binary formats:
/// - dense: `D` f32 LE values
/// - sparse: u32 LE count `N`, `N` u32 LE indices, `N` f32 LE values
/// - late: u32 LE token count `T`, u32 LE dimension `D`, `T * D` f32 LE
/// - payload: JSON object
/// - postings: ascending u64 LE point ids
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create a store at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use hybert::{RedbStore, VectorStore};
    ///
    /// let store = RedbStore::open(&tmp.path().join("store.redb")).unwrap();
    /// assert!(store.list_collections().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(COLLECTIONS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    fn schema_in_read(
        &self,
        txn: &ReadTransaction,
        name: &str,
    ) -> Result<CollectionSchema> {
        let table = txn.open_table(COLLECTIONS)?;
        let Some(guard) = table.get(name)? else {
            return Err(Error::CollectionNotFound(name.to_string()));
        };
        Ok(serde_json::from_slice(guard.value())?)
    }

    fn query_dense(
        &self,
        txn: &ReadTransaction,
        tables: &SpaceTables,
        query: &DenseVector,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let table = txn.open_table(tables.dense())?;
        let mut rows = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            rows.push((k.value(), decode_dense(v.value())));
        }

        let scored: Vec<ScoredPoint> = rows
            .par_iter()
            .map(|(id, dense)| ScoredPoint {
                id: *id,
                score: query.cosine(dense),
            })
            .collect();

        self.apply_filter(txn, tables, scored, filter)
    }

    fn query_sparse(
        &self,
        txn: &ReadTransaction,
        tables: &SpaceTables,
        state: CollectionState,
        query: &SparseVector,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let table = txn.open_table(tables.sparse())?;
        let mut rows = Vec::new();

        if state == CollectionState::Indexed {
            let postings = txn.open_table(tables.postings())?;
            let mut candidates = BTreeSet::new();
            for &term in query.indices() {
                if let Some(guard) = postings.get(term)? {
                    candidates.extend(decode_ids(guard.value()));
                }
            }
            for id in candidates {
                if let Some(guard) = table.get(id)? {
                    rows.push((id, decode_sparse(guard.value())?));
                }
            }
        } else {
            for entry in table.iter()? {
                let (k, v) = entry?;
                rows.push((k.value(), decode_sparse(v.value())?));
            }
        }

        let scored: Vec<ScoredPoint> = rows
            .par_iter()
            .filter_map(|(id, sparse)| {
                let (score, shared) = query.overlap(sparse);
                shared.then_some(ScoredPoint { id: *id, score })
            })
            .collect();

        self.apply_filter(txn, tables, scored, filter)
    }

    fn apply_filter(
        &self,
        txn: &ReadTransaction,
        tables: &SpaceTables,
        scored: Vec<ScoredPoint>,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let Some(filter) = filter else {
            return Ok(scored);
        };
        let payloads = txn.open_table(tables.payload())?;
        let mut kept = Vec::with_capacity(scored.len());
        for point in scored {
            if let Some(guard) = payloads.get(point.id)? {
                let payload: Payload = serde_json::from_slice(guard.value())?;
                if filter.matches(&payload) {
                    kept.push(point);
                }
            }
        }
        Ok(kept)
    }
}

/// Rebuild the whole inverted index from the sparse table.
fn build_postings(txn: &WriteTransaction, tables: &SpaceTables) -> Result<()> {
    let mut postings: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
    {
        let sparse = txn.open_table(tables.sparse())?;
        for entry in sparse.iter()? {
            let (k, v) = entry?;
            let id = k.value();
            for &term in decode_sparse(v.value())?.indices() {
                postings.entry(term).or_default().push(id);
            }
        }
    }

    let mut table = txn.open_table(tables.postings())?;
    for (term, ids) in &postings {
        table.insert(*term, encode_ids(ids).as_slice())?;
    }
    debug!(terms = postings.len(), "built sparse postings");
    Ok(())
}

/// Bring the inverted index in line with freshly written points.
///
/// `previous` maps each overwritten id to the terms it was indexed under
/// before the write; terms a point no longer carries lose its id.
fn update_postings(
    txn: &WriteTransaction,
    tables: &SpaceTables,
    previous: &BTreeMap<u64, BTreeSet<u32>>,
    points: &[Point],
) -> Result<()> {
    // The last write of an id wins, as in the point tables.
    let current: BTreeMap<u64, &SparseVector> =
        points.iter().map(|p| (p.id, &p.sparse)).collect();

    let mut added: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
    for (&id, sparse) in &current {
        for &term in sparse.indices() {
            added.entry(term).or_default().push(id);
        }
    }

    let mut dropped: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
    for (&id, terms) in previous {
        let kept = current.get(&id).map(|s| s.indices()).unwrap_or_default();
        for &term in terms {
            if kept.binary_search(&term).is_err() {
                dropped.entry(term).or_default().push(id);
            }
        }
    }

    let terms: BTreeSet<u32> =
        added.keys().chain(dropped.keys()).copied().collect();
    let mut table = txn.open_table(tables.postings())?;
    for term in terms {
        let mut ids: Vec<u64> = match table.get(term)? {
            Some(guard) => decode_ids(guard.value()).collect(),
            None => Vec::new(),
        };
        if let Some(stale) = dropped.get(&term) {
            ids.retain(|id| !stale.contains(id));
        }
        if let Some(fresh) = added.get(&term) {
            ids.extend(fresh);
        }
        ids.sort_unstable();
        ids.dedup();

        if ids.is_empty() {
            table.remove(term)?;
        } else {
            table.insert(term, encode_ids(&ids).as_slice())?;
        }
    }
    debug!(
        added = added.len(),
        dropped = dropped.len(),
        "updated sparse postings"
    );
    Ok(())
}

fn validate_point(
    name: &str,
    schema: &CollectionSchema,
    point: &Point,
) -> Result<()> {
    if point.dense.dimension() != schema.dense.size {
        return Err(Error::InvalidVector(format!(
            "point {} in '{name}': dense dimension {} != {}",
            point.id,
            point.dense.dimension(),
            schema.dense.size
        )));
    }
    if !point.late.is_empty() && point.late.dimension as usize != schema.late.size
    {
        return Err(Error::InvalidVector(format!(
            "point {} in '{name}': late dimension {} != {}",
            point.id, point.late.dimension, schema.late.size
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::Config(format!(
            "invalid collection name '{name}': must be non-empty without '/'"
        )));
    }
    Ok(())
}

fn sort_by_score(points: &mut [ScoredPoint]) {
    // Stable: equal scores keep ascending-id scan order.
    points.sort_by(|a, b| b.score.total_cmp(&a.score));
}

impl VectorStore for RedbStore {
    fn collection_exists(&self, name: &str) -> Result<bool> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        Ok(table.get(name)?.is_some())
    }

    fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> Result<()> {
        validate_name(name)?;
        let tables = SpaceTables::for_collection(name);
        let encoded = serde_json::to_vec(schema)?;

        let txn = self.db.begin_write()?;
        {
            let mut collections = txn.open_table(COLLECTIONS)?;
            if collections.get(name)?.is_some() {
                return Err(Error::SchemaConflict {
                    collection: name.to_string(),
                    reason: "collection already exists".to_string(),
                });
            }
            collections.insert(name, encoded.as_slice())?;

            txn.open_table(tables.dense())?;
            txn.open_table(tables.sparse())?;
            txn.open_table(tables.late())?;
            txn.open_table(tables.payload())?;
            txn.open_table(tables.postings())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn collection_info(&self, name: &str) -> Result<CollectionSchema> {
        let txn = self.db.begin_read()?;
        self.schema_in_read(&txn, name)
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(COLLECTIONS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value().to_string());
        }
        Ok(result)
    }

    fn set_indexing_threshold(&self, name: &str, threshold: u64) -> Result<()> {
        let tables = SpaceTables::for_collection(name);

        let txn = self.db.begin_write()?;
        {
            let mut collections = txn.open_table(COLLECTIONS)?;
            let mut schema: CollectionSchema = match collections.get(name)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => return Err(Error::CollectionNotFound(name.to_string())),
            };

            let was = schema.state();
            schema.optimizers.indexing_threshold = threshold;
            let encoded = serde_json::to_vec(&schema)?;
            collections.insert(name, encoded.as_slice())?;

            if was == CollectionState::Provisioning
                && schema.state() == CollectionState::Indexed
            {
                build_postings(&txn, &tables)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn upsert(&self, name: &str, points: &[Point]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let tables = SpaceTables::for_collection(name);

        let txn = self.db.begin_write()?;
        {
            let schema: CollectionSchema = {
                let collections = txn.open_table(COLLECTIONS)?;
                match collections.get(name)? {
                    Some(guard) => serde_json::from_slice(guard.value())?,
                    None => {
                        return Err(Error::CollectionNotFound(name.to_string()));
                    }
                }
            };
            for point in points {
                validate_point(name, &schema, point)?;
            }

            let indexed = schema.state() == CollectionState::Indexed;
            let mut previous: BTreeMap<u64, BTreeSet<u32>> = BTreeMap::new();
            {
                let mut dense = txn.open_table(tables.dense())?;
                let mut sparse = txn.open_table(tables.sparse())?;
                let mut late = txn.open_table(tables.late())?;
                let mut payload = txn.open_table(tables.payload())?;

                for point in points {
                    dense.insert(
                        point.id,
                        bytemuck::cast_slice::<f32, u8>(point.dense.as_slice()),
                    )?;
                    let old = sparse.insert(
                        point.id,
                        encode_sparse(&point.sparse).as_slice(),
                    )?;
                    if indexed {
                        if let Some(old) = old {
                            let terms = decode_sparse(old.value())?;
                            previous
                                .entry(point.id)
                                .or_default()
                                .extend(terms.indices());
                        }
                    }
                    late.insert(point.id, encode_late(&point.late).as_slice())?;
                    payload.insert(
                        point.id,
                        serde_json::to_vec(&point.payload)?.as_slice(),
                    )?;
                }
            }

            if indexed {
                update_postings(&txn, &tables, &previous, points)?;
            }
        }
        txn.commit()?;
        debug!(collection = name, points = points.len(), "upserted points");
        Ok(())
    }

    fn query(
        &self,
        name: &str,
        using: &str,
        vector: &QueryVector,
        limit: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let txn = self.db.begin_read()?;
        let schema = self.schema_in_read(&txn, name)?;
        let tables = SpaceTables::for_collection(name);

        let mut scored = match (schema.space_kind(using), vector) {
            (Some(SpaceKind::Dense), QueryVector::Dense(query)) => {
                if query.dimension() != schema.dense.size {
                    return Err(Error::InvalidVector(format!(
                        "query dimension {} != dense space dimension {}",
                        query.dimension(),
                        schema.dense.size
                    )));
                }
                self.query_dense(&txn, &tables, query, filter)?
            }
            (Some(SpaceKind::Sparse), QueryVector::Sparse(query)) => self
                .query_sparse(&txn, &tables, schema.state(), query, filter)?,
            (Some(_), _) => {
                return Err(Error::InvalidQuery(format!(
                    "vector kind does not match space '{using}'"
                )));
            }
            (None, _) => {
                return Err(Error::InvalidQuery(format!(
                    "collection '{name}' has no vector space '{using}'"
                )));
            }
        };

        sort_by_score(&mut scored);
        scored.truncate(limit);
        Ok(scored)
    }

    fn retrieve(
        &self,
        name: &str,
        ids: &[u64],
        with_late: bool,
    ) -> Result<Vec<StoredPoint>> {
        let txn = self.db.begin_read()?;
        self.schema_in_read(&txn, name)?;
        let tables = SpaceTables::for_collection(name);

        let payloads = txn.open_table(tables.payload())?;
        let late_table = txn.open_table(tables.late())?;

        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            let Some(guard) = payloads.get(id)? else {
                continue;
            };
            let payload: Payload = serde_json::from_slice(guard.value())?;
            let late = if with_late {
                match late_table.get(id)? {
                    Some(guard) => Some(decode_late(guard.value())?),
                    None => None,
                }
            } else {
                None
            };
            results.push(StoredPoint { id, late, payload });
        }
        Ok(results)
    }

    fn count(&self, name: &str) -> Result<u64> {
        let txn = self.db.begin_read()?;
        self.schema_in_read(&txn, name)?;
        let tables = SpaceTables::for_collection(name);
        let table = txn.open_table(tables.payload())?;
        Ok(table.len()?)
    }
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

fn read_f32s(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect()
}

fn decode_dense(bytes: &[u8]) -> DenseVector {
    DenseVector(read_f32s(bytes))
}

fn encode_sparse(vector: &SparseVector) -> Vec<u8> {
    let n = vector.len();
    let mut out = Vec::with_capacity(4 + n * 8);
    out.extend_from_slice(&(n as u32).to_le_bytes());
    out.extend_from_slice(bytemuck::cast_slice(vector.indices()));
    out.extend_from_slice(bytemuck::cast_slice(vector.values()));
    out
}

fn decode_sparse(bytes: &[u8]) -> Result<SparseVector> {
    let corrupt = || {
        Error::RetrievalUnavailable("corrupt sparse vector record".into())
    };
    if bytes.len() < 4 {
        return Err(corrupt());
    }
    let n = bytemuck::pod_read_unaligned::<u32>(&bytes[0..4]) as usize;
    if bytes.len() != 4 + n * 8 {
        return Err(corrupt());
    }
    let indices: Vec<u32> = bytes[4..4 + n * 4]
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<u32>)
        .collect();
    let values = read_f32s(&bytes[4 + n * 4..]);
    SparseVector::new(indices, values)
}

fn encode_late(matrix: &MultiVector) -> Vec<u8> {
    let header = MatrixHeader {
        num_tokens: matrix.num_tokens,
        dimension: matrix.dimension,
    };
    let mut out =
        Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(&*matrix.data));
    out.extend_from_slice(bytemuck::bytes_of(&header));
    out.extend_from_slice(bytemuck::cast_slice(&matrix.data));
    out
}

fn decode_late(bytes: &[u8]) -> Result<MultiVector> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::RetrievalUnavailable(
            "corrupt late-interaction record".into(),
        ));
    }
    let header: MatrixHeader =
        bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
    MultiVector::new(
        header.num_tokens,
        header.dimension,
        read_f32s(&bytes[HEADER_SIZE..]),
    )
}

fn encode_ids(ids: &[u64]) -> Vec<u8> {
    bytemuck::cast_slice(ids).to_vec()
}

fn decode_ids(bytes: &[u8]) -> impl Iterator<Item = u64> + '_ {
    bytes.chunks_exact(8).map(bytemuck::pod_read_unaligned::<u64>)
}
