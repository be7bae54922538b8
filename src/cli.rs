use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use hybert::config::{
    DEFAULT_BATCH_SIZE,
    DEFAULT_PREFETCH_LIMIT,
    DEFAULT_RESULT_LIMIT,
    DEFAULT_RRF_K,
    DEFAULT_TEXT_FIELD,
};

#[derive(Debug, Parser)]
#[command(
    name = "hybert",
    about = "Hybrid dense + sparse search with RRF fusion and MaxSim reranking"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// ColBERT model ID or local model path for the late-interaction space
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Embed a JSON Lines file into a collection
    Load(LoadArgs),
    /// Hybrid search over a collection
    Search(SearchArgs),
    /// Inspect and manage collections
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Load --

#[derive(Debug, Parser)]
pub struct LoadArgs {
    /// JSON Lines file, one object per line
    pub file: PathBuf,

    /// Target collection
    #[arg(short = 'c', long)]
    pub collection: String,

    /// Field holding the text to embed
    #[arg(long, default_value = DEFAULT_TEXT_FIELD)]
    pub text_field: String,

    /// Load at most this many documents
    #[arg(long)]
    pub max: Option<usize>,

    /// Points per upsert
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Keep the embedded text in each point's payload
    #[arg(long)]
    pub store_text: bool,

    /// Leave the collection in provisioning state after loading
    #[arg(long)]
    pub no_finalize: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Collection to search
    #[arg(short = 'c', long)]
    pub collection: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_RESULT_LIMIT)]
    pub count: usize,

    /// Candidates fetched from each of the sparse and dense spaces
    #[arg(long, default_value_t = DEFAULT_PREFETCH_LIMIT)]
    pub prefetch_limit: usize,

    /// RRF smoothing constant
    #[arg(long, default_value_t = DEFAULT_RRF_K)]
    pub rrf_k: f32,

    /// Rerank at most this many fused candidates
    #[arg(long)]
    pub rerank_limit: Option<usize>,

    /// Payload filter, KEY=VALUE (repeatable; all must match)
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Payload field shown for each result
    #[arg(long, default_value = DEFAULT_TEXT_FIELD)]
    pub display_field: String,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,

    /// Give up after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

// -- Collection subcommands --

#[derive(Debug, Subcommand)]
pub enum CollectionAction {
    /// List all collections
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a collection's state, schema and point count
    Status {
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Switch a collection from provisioning to indexed
    Finalize { name: String },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "hybert",
            &mut std::io::stdout(),
        );
    }
}
