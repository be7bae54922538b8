use std::path::{Path, PathBuf};

use hybert::{Document, HashingProvider, Ingestor, RedbStore, store::Payload};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::{Value, json};

fn setup_fixture(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = RedbStore::open(&data_dir.join("store.redb"))?;
    let provider = HashingProvider::default();

    let docs: Vec<Document> = ["red shoes", "blue jacket", "red jacket"]
        .iter()
        .map(|title| {
            let mut meta = Payload::new();
            meta.insert("title".into(), Value::String(title.to_string()));
            Document::new(*title, meta)
        })
        .collect();

    let ingestor = Ingestor::new(&store, &provider, "products");
    ingestor.ingest(&docs)?;
    ingestor.schema().finalize("products")?;
    Ok(())
}

#[tokio::test]
async fn mcp_stdio_search_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = hybert_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .env("HYBERT_DATA_DIR", tempdir.path())
                .env("HYBERT_LOG", "warn");
        }),
    )?;

    let client = ().serve(transport).await?;

    let tools = client.peer().list_all_tools().await?;
    assert!(tools.iter().any(|t| t.name == "hybrid_search"));

    let args = json!({
        "collection": "products",
        "query": "red",
        "limit": 2,
        "prefetchLimit": 20
    });

    let result = client
        .peer()
        .call_tool(
            CallToolRequestParams::new("hybrid_search")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;

    let structured = result.structured_content.expect("structured content");
    let results = structured
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results array");

    assert_eq!(results.len(), 2);
    for r in results {
        let title = r.get("title").and_then(|v| v.as_str()).unwrap_or("");
        assert!(title.starts_with("red"), "unexpected result {title}");
    }

    client.cancel().await?;
    Ok(())
}

fn hybert_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_hybert") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("hybert");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
