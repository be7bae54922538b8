use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::{IngestConfig, SchemaConfig},
    embedding::{EmbeddingProvider, embed_document},
    error::{Error, Result},
    schema::SchemaManager,
    store::{Payload, Point, VectorStore},
};

/// A text to embed plus the metadata stored alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    pub metadata: Payload,
}

impl Document {
    pub fn new(text: impl Into<String>, metadata: Payload) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// Split a JSON object into text and metadata by taking `text_field`
    /// out of it. Returns `None` when that field is absent, null, not a
    /// string, or blank.
    pub fn from_json(mut object: Payload, text_field: &str) -> Option<Self> {
        match object.remove(text_field) {
            Some(Value::String(text)) if !text.trim().is_empty() => {
                Some(Self::new(text, object))
            }
            _ => None,
        }
    }

    fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Counters from reading a JSON Lines source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Records kept.
    pub read: usize,
    /// Records without usable text.
    pub skipped: usize,
}

/// Parse JSON Lines into documents, stopping after `max` usable records.
///
/// Blank lines are ignored. A line that is not a JSON object fails the
/// whole read with [`Error::MalformedDocument`] (1-based line number).
pub fn parse_jsonl<R: BufRead>(
    reader: R,
    text_field: &str,
    max: Option<usize>,
) -> Result<(Vec<Document>, LoadStats)> {
    let mut docs = Vec::new();
    let mut stats = LoadStats::default();

    for (idx, line) in reader.lines().enumerate() {
        if max.is_some_and(|max| docs.len() >= max) {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let object: Payload = serde_json::from_str(&line).map_err(|source| {
            Error::MalformedDocument {
                line: idx + 1,
                source,
            }
        })?;
        match Document::from_json(object, text_field) {
            Some(doc) => {
                docs.push(doc);
                stats.read += 1;
            }
            None => stats.skipped += 1,
        }
    }

    Ok((docs, stats))
}

pub fn read_jsonl(
    path: &Path,
    text_field: &str,
    max: Option<usize>,
) -> Result<(Vec<Document>, LoadStats)> {
    let file = File::open(path)?;
    let (docs, stats) = parse_jsonl(BufReader::new(file), text_field, max)?;
    debug!(
        path = %path.display(),
        read = stats.read,
        skipped = stats.skipped,
        "parsed documents"
    );
    Ok((docs, stats))
}

/// Embeds documents and upserts them into a collection, creating the
/// collection on first use.
pub struct Ingestor<'a> {
    store: &'a dyn VectorStore,
    provider: &'a dyn EmbeddingProvider,
    schema: SchemaManager<'a>,
    collection: String,
    config: IngestConfig,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a dyn VectorStore,
        provider: &'a dyn EmbeddingProvider,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            provider,
            schema: SchemaManager::new(store, SchemaConfig::default()),
            collection: collection.into(),
            config: IngestConfig::default(),
        }
    }

    pub fn with_schema_config(mut self, config: SchemaConfig) -> Self {
        self.schema = SchemaManager::new(self.store, config);
        self
    }

    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(&self) -> &SchemaManager<'a> {
        &self.schema
    }

    /// Embed every document with text. Ids are `id_offset` plus the
    /// position among the documents kept.
    pub fn build_points(&self, documents: &[Document]) -> Result<Vec<Point>> {
        let kept: Vec<&Document> =
            documents.iter().filter(|d| d.has_text()).collect();

        kept.par_iter()
            .enumerate()
            .map(|(pos, doc)| {
                let embeddings = embed_document(self.provider, &doc.text)
                    .map_err(|e| match e {
                        Error::ProviderError(_) => e,
                        other => Error::ProviderError(other.to_string()),
                    })?;

                let mut payload = doc.metadata.clone();
                if self.config.store_text {
                    payload.insert(
                        self.config.text_field.clone(),
                        Value::String(doc.text.clone()),
                    );
                }

                Ok(Point {
                    id: self.config.id_offset + pos as u64,
                    dense: embeddings.dense,
                    sparse: embeddings.sparse,
                    late: embeddings.late,
                    payload,
                })
            })
            .collect()
    }

    /// Embed and upsert `documents`; returns the number of points written.
    pub fn ingest(&self, documents: &[Document]) -> Result<usize> {
        self.ingest_with_progress(documents, |_| {})
    }

    /// Like [`Ingestor::ingest`], calling `on_chunk` with the size of each
    /// committed chunk.
    pub fn ingest_with_progress(
        &self,
        documents: &[Document],
        mut on_chunk: impl FnMut(usize),
    ) -> Result<usize> {
        let points = self.build_points(documents)?;
        let Some(first) = points.first() else {
            debug!(collection = %self.collection, "nothing to ingest");
            return Ok(0);
        };

        self.schema.ensure_schema(
            &self.collection,
            first.dense.dimension(),
            first.late.dimension as usize,
        )?;

        for chunk in points.chunks(self.config.batch_size.max(1)) {
            self.store.upsert(&self.collection, chunk)?;
            on_chunk(chunk.len());
        }

        info!(
            collection = %self.collection,
            points = points.len(),
            model = self.provider.model_id(),
            "ingested documents"
        );
        Ok(points.len())
    }
}
