//! ColBERT late-interaction embeddings via pylate-rs.
//!
//! [`ColbertProvider`] replaces the late space of another provider with a
//! real ColBERT model and delegates the dense and sparse spaces to it.

use std::sync::Mutex;

use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;
use tracing::info;

use crate::{
    embedding::EmbeddingProvider,
    error::{Error, Result},
    vectors::{DenseVector, MultiVector, SparseVector},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "HYBERT_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Resolve the model id: explicit, then `HYBERT_MODEL`, then the default.
pub fn resolve_model_id(explicit: Option<&str>) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| std::env::var(MODEL_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string())
}

/// Late-interaction embeddings from a lazily loaded ColBERT model.
pub struct ColbertProvider<P> {
    base: P,
    model_id: String,
    model: Mutex<Option<ColBERT>>,
}

impl<P: EmbeddingProvider> ColbertProvider<P> {
    /// The model is not loaded until the first late embedding is requested.
    pub fn new(base: P, model_id: impl Into<String>) -> Self {
        Self {
            base,
            model_id: model_id.into(),
            model: Mutex::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    fn encode(&self, text: &str, is_query: bool) -> Result<MultiVector> {
        let mut guard = self.model.lock().map_err(|_| {
            Error::ProviderError("ColBERT model lock poisoned".into())
        })?;

        if guard.is_none() {
            info!(model = %self.model_id, "loading ColBERT model");
            let colbert: ColBERT = ColBERT::from(&self.model_id)
                .with_device(default_device())
                .try_into()
                .map_err(|e| provider_error(&self.model_id, e))?;
            *guard = Some(colbert);
        }
        let model = guard.as_mut().ok_or_else(|| {
            Error::ProviderError(format!("{} failed to load", self.model_id))
        })?;

        let embeddings = model
            .encode(&[text.to_string()], is_query)
            .map_err(|e| provider_error(&self.model_id, e))?;
        // [1, T, D] -> [T, D]
        to_multivector(&embeddings.squeeze(0)?)
    }
}

fn provider_error(model_id: &str, e: impl std::fmt::Display) -> Error {
    Error::ProviderError(format!("{model_id}: {e}"))
}

fn to_multivector(matrix: &Tensor) -> Result<MultiVector> {
    let rows: Vec<Vec<f32>> = matrix.to_dtype(candle_core::DType::F32)?.to_vec2()?;
    if rows.is_empty() {
        let dim = matrix.dims().get(1).copied().unwrap_or(0);
        return MultiVector::new(0, dim as u32, vec![]);
    }
    MultiVector::from_rows(&rows)
}

impl<P: EmbeddingProvider> EmbeddingProvider for ColbertProvider<P> {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_dense(&self, text: &str) -> Result<DenseVector> {
        self.base.embed_dense(text)
    }

    fn embed_sparse(&self, text: &str) -> Result<SparseVector> {
        self.base.embed_sparse(text)
    }

    fn embed_late(&self, text: &str) -> Result<MultiVector> {
        self.encode(text, false)
    }

    fn embed_late_query(&self, text: &str) -> Result<MultiVector> {
        self.encode(text, true)
    }
}
