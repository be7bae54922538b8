use candle_core::{Device, Tensor};
use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    vectors::MultiVector,
};

/// A reranked candidate with its MaxSim score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    pub id: u64,
    pub score: f32,
}

/// Rerank candidates by MaxSim against the query's token matrix.
///
/// Candidates are scored in parallel. The result is sorted by score
/// descending; equal scores keep the input order.
pub fn rerank(
    query: &MultiVector,
    candidates: &[(u64, MultiVector)],
) -> Result<Vec<RankedCandidate>> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .par_iter()
        .map(|(id, doc)| {
            maxsim(query, doc).map(|score| RankedCandidate { id: *id, score })
        })
        .collect::<Result<_>>()?;

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(ranked)
}

/// Compute the MaxSim score between a query matrix and a document matrix.
///
/// query: [Q, D] where Q = query tokens, D = embedding dimension
/// doc: [T, D] where T = document tokens
///
/// MaxSim = sum over query tokens of max(query_token . doc_token for all doc tokens)
///
/// An empty query or document scores 0.
pub fn maxsim(query: &MultiVector, doc: &MultiVector) -> Result<f32> {
    if query.is_empty() || doc.is_empty() {
        return Ok(0.0);
    }
    if query.dimension != doc.dimension {
        return Err(Error::InvalidVector(format!(
            "query token dimension {} != document token dimension {}",
            query.dimension, doc.dimension
        )));
    }

    let q = to_tensor(query)?;
    let d = to_tensor(doc)?;

    // Similarity matrix [Q, T] = q @ d^T
    let sim_matrix = q.matmul(&d.t()?)?;

    // Best document token per query token, summed.
    let score = sim_matrix.max(1)?.sum_all()?.to_scalar::<f32>()?;
    Ok(score)
}

fn to_tensor(matrix: &MultiVector) -> Result<Tensor> {
    Ok(Tensor::from_slice(
        &matrix.data,
        (matrix.num_tokens as usize, matrix.dimension as usize),
        &Device::Cpu,
    )?)
}
