//! Rendering ranked points for people and machines.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::{
    config::DEFAULT_TEXT_FIELD,
    error::{Error, Result},
    search::RankedPoint,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedResult {
    pub rank: usize,
    pub id: u64,
    pub title: String,
    pub score: f32,
}

/// What to do with a point whose payload lacks the display field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MissingFieldPolicy {
    /// Drop the record and log a warning.
    #[default]
    Skip,
    /// Render the record with this text instead.
    Placeholder(String),
}

#[derive(Debug, Clone)]
pub struct ResultFormatter {
    field: String,
    policy: MissingFieldPolicy,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_TEXT_FIELD)
    }
}

impl ResultFormatter {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            policy: MissingFieldPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MissingFieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Format a single point. Strings render as-is and numbers in their
    /// JSON form; anything else (or no value) is a `MissingField`.
    pub fn format_one(
        &self,
        rank: usize,
        point: &RankedPoint,
    ) -> Result<FormattedResult> {
        let title = match point.payload.get(&self.field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(Error::MissingField {
                    id: point.id,
                    field: self.field.clone(),
                });
            }
        };
        Ok(FormattedResult {
            rank,
            id: point.id,
            title,
            score: point.score,
        })
    }

    /// Format every point; ranks are 1-based over the records kept.
    pub fn format(&self, points: &[RankedPoint]) -> Vec<FormattedResult> {
        let mut formatted = Vec::with_capacity(points.len());
        for point in points {
            let rank = formatted.len() + 1;
            match self.format_one(rank, point) {
                Ok(result) => formatted.push(result),
                Err(e) => match &self.policy {
                    MissingFieldPolicy::Skip => {
                        warn!(id = point.id, error = %e, "skipping result");
                    }
                    MissingFieldPolicy::Placeholder(text) => {
                        formatted.push(FormattedResult {
                            rank,
                            id: point.id,
                            title: text.clone(),
                            score: point.score,
                        });
                    }
                },
            }
        }
        formatted
    }
}

/// Numbered lines for terminal output.
pub fn render_human(results: &[FormattedResult]) -> String {
    if results.is_empty() {
        return "No results found.\n".to_string();
    }

    let mut out = String::new();
    for r in results {
        out.push_str(&format!(
            "{:>3}. [{:.3}] #{} {}\n",
            r.rank, r.score, r.id, r.title
        ));
    }
    out.push_str(&format!("\n{} result(s)\n", results.len()));
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [FormattedResult],
}

pub fn render_json(query: &str, results: &[FormattedResult]) -> Result<String> {
    Ok(serde_json::to_string(&JsonReport {
        query,
        result_count: results.len(),
        results,
    })?)
}
