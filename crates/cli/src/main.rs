use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docrag_corpus::Corpus;
use docrag_graph::{EntityExtractor, GraphBuilder, IngestStats, KnowledgeGraph};
use docrag_search::{EngineConfig, QueryExpander, QueryRouter, RetrievalEngine};
use docrag_vector_store::{load_first_available, IndexSource, LoadFailure, VectorIndex};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Environment variable consulted for a vector index after `--vectors`
const VECTOR_INDEX_ENV: &str = "DOCRAG_VECTOR_INDEX";

#[derive(Parser)]
#[command(name = "docrag")]
#[command(about = "Hybrid graph + vector retrieval over documentation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve graph and passage context for a question
    Query(QueryArgs),

    /// Explain how a question would be routed
    Route(RouteArgs),

    /// Show the expanded form of a question
    Expand(ExpandArgs),

    /// Print entity and relationship counts of a graph file
    #[command(name = "graph-stats")]
    GraphStats(GraphStatsArgs),

    /// Extract a knowledge graph from a corpus
    #[command(name = "build-graph")]
    BuildGraph(BuildGraphArgs),
}

#[derive(Args)]
struct QueryArgs {
    /// Question text
    query: String,

    /// Corpus JSON file
    #[arg(long)]
    corpus: PathBuf,

    /// Knowledge graph JSON file
    #[arg(long)]
    graph: Option<PathBuf>,

    /// Vector index JSON file (falls back to $DOCRAG_VECTOR_INDEX)
    #[arg(long)]
    vectors: Option<PathBuf>,

    /// Engine configuration TOML
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of passages (defaults to orchestrator.default_k)
    #[arg(short = 'k', long)]
    k: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Prompt,
}

#[derive(Args)]
struct RouteArgs {
    /// Question text
    query: String,

    /// Engine configuration TOML
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ExpandArgs {
    /// Question text
    query: String,

    /// Maximum number of added terms
    #[arg(long)]
    max_terms: Option<usize>,

    /// Engine configuration TOML
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct GraphStatsArgs {
    /// Knowledge graph JSON file
    #[arg(long)]
    graph: PathBuf,
}

#[derive(Args)]
struct BuildGraphArgs {
    /// Corpus JSON file
    #[arg(long)]
    corpus: PathBuf,

    /// Output graph JSON file
    #[arg(long)]
    out: PathBuf,

    /// Existing graph to extend instead of starting empty
    #[arg(long)]
    base: Option<PathBuf>,
}

#[derive(Serialize)]
struct BuildGraphOutput {
    chunks: usize,
    entities_seen: usize,
    entities_added: usize,
    relationships_added: usize,
    total_entities: usize,
    total_relationships: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match cli.command {
        Commands::Query(args) => run_query(args).await,
        Commands::Route(args) => run_route(args).await,
        Commands::Expand(args) => run_expand(args).await,
        Commands::GraphStats(args) => run_graph_stats(args).await,
        Commands::BuildGraph(args) => run_build_graph(args).await,
    }
}

async fn run_query(args: QueryArgs) -> Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let corpus = Corpus::load(&args.corpus)
        .await
        .with_context(|| format!("Failed to load corpus {}", args.corpus.display()))?;

    let mut builder = RetrievalEngine::builder(Arc::new(corpus)).config(config);
    if let Some(path) = &args.graph {
        let graph = KnowledgeGraph::load(path)
            .await
            .with_context(|| format!("Failed to load graph {}", path.display()))?;
        builder = builder.graph(Arc::new(graph));
    }
    if let Some(index) = load_vectors(args.vectors).await {
        builder = builder.vector_index(Arc::new(index));
    }
    let engine = builder.build().context("Failed to build retrieval engine")?;

    let k = args.k.unwrap_or(engine.config().orchestrator.default_k);
    let bundle = engine.retrieve(&args.query, k).await;

    match args.format {
        OutputFormat::Json => print_json(&bundle),
        OutputFormat::Prompt => print_stdout(&engine.render_context(&bundle)),
    }
}

async fn run_route(args: RouteArgs) -> Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let router = QueryRouter::builtin()
        .context("Failed to load builtin routing rules")?
        .with_strategy_gap(config.router.strategy_gap);
    print_json(&router.explain(&args.query))
}

async fn run_expand(args: ExpandArgs) -> Result<()> {
    let config = load_config(args.config.as_deref()).await?;
    let max_terms = args.max_terms.unwrap_or(config.expansion.max_terms);
    let expander = QueryExpander::builtin()
        .context("Failed to load builtin taxonomy")?
        .with_config(config.expansion);
    print_json(&expander.expand_with_limit(&args.query, max_terms))
}

async fn run_graph_stats(args: GraphStatsArgs) -> Result<()> {
    let graph = KnowledgeGraph::load(&args.graph)
        .await
        .with_context(|| format!("Failed to load graph {}", args.graph.display()))?;
    print_json(&graph.stats())
}

async fn run_build_graph(args: BuildGraphArgs) -> Result<()> {
    let corpus = Corpus::load(&args.corpus)
        .await
        .with_context(|| format!("Failed to load corpus {}", args.corpus.display()))?;
    let mut graph = match &args.base {
        Some(path) => KnowledgeGraph::load(path)
            .await
            .with_context(|| format!("Failed to load base graph {}", path.display()))?,
        None => KnowledgeGraph::new(),
    };

    let builder = GraphBuilder::new(
        EntityExtractor::builtin().context("Failed to load builtin extraction patterns")?,
    );
    let mut totals = IngestStats::default();
    for chunk in corpus.chunks() {
        let stats = builder.ingest(&mut graph, &chunk.text, chunk.url());
        totals.entities_seen += stats.entities_seen;
        totals.entities_added += stats.entities_added;
        totals.relationships_added += stats.relationships_added;
    }

    graph
        .save(&args.out)
        .await
        .with_context(|| format!("Failed to write graph {}", args.out.display()))?;
    log::info!(
        "Graph written to {}: {} entities, {} relationships",
        args.out.display(),
        graph.entity_count(),
        graph.relationship_count()
    );

    print_json(&BuildGraphOutput {
        chunks: corpus.len(),
        entities_seen: totals.entities_seen,
        entities_added: totals.entities_added,
        relationships_added: totals.relationships_added,
        total_entities: graph.entity_count(),
        total_relationships: graph.relationship_count(),
    })
}

async fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// First loadable index among `--vectors` and `$DOCRAG_VECTOR_INDEX`.
///
/// A missing or unreadable index is not fatal: the engine ranks lexically.
async fn load_vectors(explicit: Option<PathBuf>) -> Option<VectorIndex> {
    let mut sources = Vec::new();
    if let Some(path) = explicit {
        sources.push(IndexSource::LocalFile(path));
    }
    sources.push(IndexSource::Env(VECTOR_INDEX_ENV.to_string()));

    match load_first_available(&sources).await {
        Ok((index, _)) => Some(index),
        Err(failures) => {
            for failure in &failures {
                match failure {
                    LoadFailure::Missing { .. } => {
                        log::debug!("Vector index unavailable: {failure}");
                    }
                    _ => log::warn!("Vector index unavailable: {failure}"),
                }
            }
            log::info!("No vector index loaded; ranking passages lexically");
            None
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    print_stdout(&text)
}

fn print_stdout(text: &str) -> Result<()> {
    use std::io::Write;

    let mut stdout = io::stdout().lock();
    if let Err(err) = stdout
        .write_all(text.as_bytes())
        .and_then(|_| stdout.write_all(b"\n"))
        .and_then(|_| stdout.flush())
    {
        if err.kind() == io::ErrorKind::BrokenPipe {
            return Ok(());
        }
        return Err(err.into());
    }
    Ok(())
}
