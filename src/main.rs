use std::time::Duration;

use clap::Parser;
use hybert::{
    DataDir,
    EmbeddingProvider,
    HashingProvider,
    HybridSearcher,
    Ingestor,
    RedbStore,
    ResultFormatter,
    SchemaManager,
    VectorStore,
    config::{IngestConfig, SchemaConfig, SearchConfig},
    error::{self, Error},
    format,
    ingestion,
    search::SearchParams,
    store::{FieldCondition, Filter},
};
use kdam::{BarExt, tqdm};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, CollectionAction, Command, LoadArgs, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("HYBERT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[cfg(feature = "colbert")]
fn make_provider(model: Option<&str>) -> Box<dyn EmbeddingProvider> {
    use hybert::colbert::{ColbertProvider, resolve_model_id};

    Box::new(ColbertProvider::new(
        HashingProvider::default(),
        resolve_model_id(model),
    ))
}

#[cfg(not(feature = "colbert"))]
fn make_provider(model: Option<&str>) -> Box<dyn EmbeddingProvider> {
    if let Some(model) = model {
        warn!(model, "built without the colbert feature; using hashing embeddings");
    }
    Box::new(HashingProvider::default())
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let provider = make_provider(cli.model.as_deref());

    match cli.command {
        Command::Load(args) => {
            let store = RedbStore::open(&data_dir.store_db())?;
            cmd_load(&store, provider.as_ref(), &args)?;
        }
        Command::Search(args) => {
            let store = RedbStore::open(&data_dir.store_db())?;
            cmd_search(&store, provider.as_ref(), &args)?;
        }
        Command::Collection { action } => {
            let store = RedbStore::open(&data_dir.store_db())?;
            match action {
                CollectionAction::List { json } => {
                    collection_list(&store, json)?;
                }
                CollectionAction::Status { name, json } => {
                    collection_status(&store, &name, json)?;
                }
                CollectionAction::Finalize { name } => {
                    let manager =
                        SchemaManager::new(&store, SchemaConfig::default());
                    let state = manager.finalize(&name)?;
                    println!("Collection '{name}' is {state}");
                }
            }
        }
        Command::Mcp => {
            hybert::mcp::run_mcp(data_dir, provider)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_load(
    store: &RedbStore,
    provider: &dyn EmbeddingProvider,
    args: &LoadArgs,
) -> error::Result<()> {
    let (docs, stats) =
        ingestion::read_jsonl(&args.file, &args.text_field, args.max)?;
    if stats.skipped > 0 {
        warn!(
            skipped = stats.skipped,
            field = %args.text_field,
            "records without text were skipped"
        );
    }

    let config = IngestConfig {
        text_field: args.text_field.clone(),
        batch_size: args.batch_size,
        store_text: args.store_text,
        ..IngestConfig::default()
    };
    let ingestor =
        Ingestor::new(store, provider, &args.collection).with_config(config);

    let mut pb = tqdm!(
        total = docs.len(),
        desc = format!("Loading {}", args.collection),
        unit = " docs"
    );
    let mut bar_ok = true;
    let count = ingestor.ingest_with_progress(&docs, |n| {
        if bar_ok {
            bar_ok = progress_drawn(pb.update(n));
        }
    })?;
    eprintln!();

    if args.no_finalize {
        info!(collection = %args.collection, "left in provisioning state");
    } else if count > 0 {
        ingestor.schema().finalize(&args.collection)?;
    }

    eprintln!("Loaded {count} document(s) into '{}'", args.collection);
    Ok(())
}

/// Whether the progress bar could be redrawn. A failure is logged once and
/// the bar is left alone afterwards; the load itself carries on.
fn progress_drawn(update: std::io::Result<bool>) -> bool {
    match update {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "progress bar stopped updating");
            false
        }
    }
}

fn parse_filters(raw: &[String]) -> error::Result<Option<Filter>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let must = raw
        .iter()
        .map(|f| {
            let (key, value) = f.split_once('=').ok_or_else(|| {
                Error::InvalidQuery(format!(
                    "filter '{f}' is not of the form KEY=VALUE"
                ))
            })?;
            Ok(FieldCondition {
                key: key.to_string(),
                value: serde_json::Value::String(value.to_string()),
            })
        })
        .collect::<error::Result<Vec<_>>>()?;
    Ok(Some(Filter { must }))
}

fn cmd_search(
    store: &RedbStore,
    provider: &dyn EmbeddingProvider,
    args: &SearchArgs,
) -> error::Result<()> {
    let config = SearchConfig {
        limit: args.count,
        prefetch_limit: args.prefetch_limit,
        rrf_k: args.rrf_k,
        rerank_limit: args.rerank_limit,
    };
    let mut params = SearchParams::from_config(&args.query, &config);
    params.filter = parse_filters(&args.filters)?;
    if let Some(ms) = args.timeout_ms {
        params = params.with_timeout(Duration::from_millis(ms));
    }

    let searcher = HybridSearcher::new(store, provider, &args.collection)
        .with_config(config);
    let ranked = searcher.search_with(&params)?;
    let results = ResultFormatter::new(&args.display_field).format(&ranked);

    if args.json {
        println!("{}", format::render_json(&args.query, &results)?);
    } else {
        print!("{}", format::render_human(&results));
    }
    Ok(())
}

fn collection_list(store: &RedbStore, json: bool) -> error::Result<()> {
    let names = store.list_collections()?;

    if json {
        println!("{}", serde_json::to_string(&names)?);
    } else if names.is_empty() {
        println!("No collections.");
    } else {
        for name in names {
            let info = store.collection_info(&name)?;
            println!("{name}\t{}", info.state());
        }
    }
    Ok(())
}

fn collection_status(
    store: &RedbStore,
    name: &str,
    json: bool,
) -> error::Result<()> {
    let schema = store.collection_info(name)?;
    let count = store.count(name)?;

    if json {
        let status = serde_json::json!({
            "name": name,
            "state": schema.state(),
            "points": count,
            "schema": schema,
        });
        println!("{status}");
    } else {
        println!("Collection: {name}");
        println!("State: {}", schema.state());
        println!("Points: {count}");
        println!(
            "Dense: {} dims ({:?})",
            schema.dense.size, schema.dense.distance
        );
        println!("Sparse: '{}'", schema.sparse.name);
        println!("Late: {} dims (MaxSim)", schema.late.size);
        println!(
            "Indexing threshold: {}",
            schema.optimizers.indexing_threshold
        );
    }
    Ok(())
}
