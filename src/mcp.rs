use std::sync::Arc;

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::{DEFAULT_PREFETCH_LIMIT, DEFAULT_RESULT_LIMIT, DEFAULT_TEXT_FIELD},
    data_dir::DataDir,
    embedding::EmbeddingProvider,
    error::{self, Error},
    format::{FormattedResult, MissingFieldPolicy, ResultFormatter},
    redb_store::RedbStore,
    search::{HybridSearcher, SearchParams},
};

struct HybertState {
    store: RedbStore,
    provider: Box<dyn EmbeddingProvider>,
}

#[derive(Clone)]
pub struct HybertMcpServer {
    state: Arc<HybertState>,
    tool_router: ToolRouter<Self>,
}

impl HybertMcpServer {
    fn new(state: HybertState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl HybertMcpServer {
    /// Hybrid dense + sparse search with RRF fusion and MaxSim reranking.
    #[tool(
        name = "hybrid_search",
        description = "Search a collection with sparse and dense prefetch, reciprocal rank fusion and late-interaction reranking."
    )]
    pub async fn hybrid_search(
        &self,
        params: Parameters<HybridSearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let query = params.query.clone();

        let mut search = SearchParams::new(params.query)
            .with_limit(params.limit.unwrap_or(DEFAULT_RESULT_LIMIT))
            .with_prefetch_limit(
                params.prefetch_limit.unwrap_or(DEFAULT_PREFETCH_LIMIT),
            );
        if let Some(k) = params.rrf_k {
            search.rrf_k = k;
        }

        let searcher = HybridSearcher::new(
            &self.state.store,
            self.state.provider.as_ref(),
            &params.collection,
        );
        let ranked = searcher.search_with(&search).map_err(to_mcp_error)?;

        let field = params
            .display_field
            .unwrap_or_else(|| DEFAULT_TEXT_FIELD.to_string());
        let results = ResultFormatter::new(field)
            .with_policy(MissingFieldPolicy::Placeholder(String::new()))
            .format(&ranked);

        let summary = format_search_summary(&results, &query);
        let structured = serde_json::to_value(SearchResponse {
            query,
            collection: params.collection,
            result_count: results.len(),
            results,
        })
        .map_err(|e| mcp_error("failed to serialize search results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for HybertMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("hybert", env!("CARGO_PKG_VERSION")).with_title("hybert MCP"),
            )
            .with_instructions(
                "Use hybrid_search to find points in a loaded collection. Results are ranked by MaxSim score.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HybridSearchParams {
    /// Collection to search.
    pub collection: String,
    /// Search query string.
    pub query: String,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
    /// Candidates per prefetch list (default: 20).
    pub prefetch_limit: Option<usize>,
    /// RRF smoothing constant (default: 60).
    pub rrf_k: Option<f32>,
    /// Payload field rendered as the result title (default: title).
    pub display_field: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    query: String,
    collection: String,
    result_count: usize,
    results: Vec<FormattedResult>,
}

fn format_search_summary(results: &[FormattedResult], query: &str) -> String {
    if results.is_empty() {
        return format!("No results found for \"{query}\"");
    }

    let mut lines = Vec::with_capacity(results.len() + 1);
    let suffix = if results.len() == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{} for \"{query}\":",
        results.len(),
        suffix
    ));

    for r in results {
        lines.push(format!("#{} {:.3} {}", r.id, r.score, r.title));
    }

    lines.join("\n")
}

fn to_mcp_error(e: Error) -> rmcp::ErrorData {
    match e {
        Error::InvalidQuery(_) | Error::CollectionNotFound(_) => {
            rmcp::ErrorData::invalid_params(e.to_string(), None)
        }
        other => mcp_error("search failed", other),
    }
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(
    data_dir: DataDir,
    provider: Box<dyn EmbeddingProvider>,
) -> error::Result<()> {
    let store = RedbStore::open(&data_dir.store_db())?;
    let server = HybertMcpServer::new(HybertState { store, provider });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            Error::Config(format!("MCP server initialization failed: {e}"))
        })?;
        running
            .waiting()
            .await
            .map_err(|e| Error::Config(format!("MCP server error: {e}")))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::{
        embedding::HashingProvider,
        ingestion::{Document, Ingestor},
        store::Payload,
    };

    fn server_with(texts: &[&str]) -> (tempfile::TempDir, HybertMcpServer) {
        let tmp = tempfile::tempdir().unwrap();
        let store = RedbStore::open(&tmp.path().join("store.redb")).unwrap();
        let provider = HashingProvider::new(32, 16);

        let docs: Vec<Document> = texts
            .iter()
            .map(|t| {
                let mut meta = Payload::new();
                meta.insert("title".into(), Value::String(t.to_string()));
                Document::new(*t, meta)
            })
            .collect();
        Ingestor::new(&store, &provider, "products")
            .ingest(&docs)
            .unwrap();

        let server = HybertMcpServer::new(HybertState {
            store,
            provider: Box::new(provider),
        });
        (tmp, server)
    }

    fn params(collection: &str, query: &str) -> HybridSearchParams {
        HybridSearchParams {
            collection: collection.to_string(),
            query: query.to_string(),
            limit: Some(5),
            prefetch_limit: None,
            rrf_k: None,
            display_field: None,
        }
    }

    #[tokio::test]
    async fn search_tool_returns_structured_results() {
        let (_tmp, server) =
            server_with(&["blue jacket", "red shoes", "green hat"]);

        let result = server
            .hybrid_search(Parameters(params("products", "red shoes")))
            .await
            .unwrap();

        let structured = result.structured_content.expect("structured");
        let results = structured
            .get("results")
            .and_then(|v| v.as_array())
            .expect("results array");
        assert!(!results.is_empty());

        let first = &results[0];
        assert_eq!(first.get("id").and_then(|v| v.as_u64()), Some(1));
        assert_eq!(
            first.get("title").and_then(|v| v.as_str()),
            Some("red shoes")
        );
        assert_eq!(first.get("rank").and_then(|v| v.as_u64()), Some(1));

        let summary = result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default();
        assert!(summary.contains("for \"red shoes\""));
    }

    #[tokio::test]
    async fn empty_query_is_invalid_params() {
        let (_tmp, server) = server_with(&["red shoes"]);
        let err = server
            .hybrid_search(Parameters(params("products", "  ")))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_collection_is_invalid_params() {
        let (_tmp, server) = server_with(&["red shoes"]);
        let err = server
            .hybrid_search(Parameters(params("ghost", "red")))
            .await
            .unwrap_err();
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);
    }
}
