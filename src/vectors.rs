//! The three vector representations a point carries.

use crate::error::{Error, Result};

/// A fixed-length embedding of a whole text.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseVector(pub Vec<f32>);

impl DenseVector {
    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Scale to unit length. A zero vector is left untouched.
    pub fn normalized(mut self) -> Self {
        let norm = dot(&self.0, &self.0).sqrt();
        if norm > f32::EPSILON {
            self.0.iter_mut().for_each(|v| *v /= norm);
        }
        self
    }

    /// Cosine similarity; zero when either side has no magnitude.
    pub fn cosine(&self, other: &DenseVector) -> f32 {
        let denom =
            (dot(&self.0, &self.0) * dot(&other.0, &other.0)).sqrt();
        if denom <= f32::EPSILON {
            return 0.0;
        }
        dot(&self.0, &other.0) / denom
    }
}

/// A weighted bag of term ids.
///
/// Indices are unique and kept sorted ascending so that two vectors can be
/// intersected with a linear merge.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseVector {
    indices: Vec<u32>,
    values: Vec<f32>,
}

impl SparseVector {
    /// Build a sparse vector, rejecting mismatched lengths and duplicate
    /// term ids.
    pub fn new(indices: Vec<u32>, values: Vec<f32>) -> Result<Self> {
        if indices.len() != values.len() {
            return Err(Error::InvalidVector(format!(
                "sparse vector has {} indices but {} values",
                indices.len(),
                values.len()
            )));
        }

        let mut pairs: Vec<(u32, f32)> =
            indices.into_iter().zip(values).collect();
        pairs.sort_by_key(|(idx, _)| *idx);
        if let Some(w) = pairs.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(Error::InvalidVector(format!(
                "duplicate sparse index {}",
                w[0].0
            )));
        }

        let (indices, values) = pairs.into_iter().unzip();
        Ok(Self { indices, values })
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product over shared term ids, plus whether any id was shared.
    pub fn overlap(&self, other: &SparseVector) -> (f32, bool) {
        let (mut i, mut j) = (0, 0);
        let mut score = 0.0;
        let mut shared = false;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    score += self.values[i] * other.values[j];
                    shared = true;
                    i += 1;
                    j += 1;
                }
            }
        }
        (score, shared)
    }
}

/// A per-token embedding matrix for late interaction.
///
/// Stored flat in row-major order: `data[token * dimension + d]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVector {
    pub num_tokens: u32,
    pub dimension: u32,
    pub data: Vec<f32>,
}

impl MultiVector {
    pub fn new(num_tokens: u32, dimension: u32, data: Vec<f32>) -> Result<Self> {
        if data.len() != (num_tokens as usize) * (dimension as usize) {
            return Err(Error::InvalidVector(format!(
                "multivector of {num_tokens}x{dimension} given {} values",
                data.len()
            )));
        }
        Ok(Self {
            num_tokens,
            dimension,
            data,
        })
    }

    /// Build from rows, all of which must share one dimensionality.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let dimension = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * dimension);
        for row in rows {
            if row.len() != dimension {
                return Err(Error::InvalidVector(format!(
                    "token rows differ in dimension: {} vs {dimension}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(rows.len() as u32, dimension as u32, data)
    }

    pub fn is_empty(&self) -> bool {
        self.num_tokens == 0
    }

    /// Get the embedding vector for a specific token.
    pub fn token_embedding(&self, token_idx: u32) -> &[f32] {
        let start = (token_idx * self.dimension) as usize;
        let end = start + self.dimension as usize;
        &self.data[start..end]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.num_tokens).map(|i| self.token_embedding(i))
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
