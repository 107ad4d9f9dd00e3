use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engine::build::{build_collection, build_vocabulary};
use engine::persist::IndexPaths;
use engine::store::DocumentStore;
use engine::EngineConfig;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

mod corpus;

use corpus::{read_corpus, Format};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build TF-IDF, BM25 and dense indexes for document collections", long_about = None)]
struct Cli {
    /// Output index directory
    #[arg(long, global = true, default_value = "./index")]
    output: PathBuf,
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a corpus into the document store and build its indexes
    Build {
        /// Collection name, e.g. antique or quora
        #[arg(long)]
        collection: String,
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        /// Corpus format; inferred from file extensions when omitted
        #[arg(long)]
        format: Option<Format>,
        /// Skip the dense index
        #[arg(long, default_value_t = false)]
        no_dense: bool,
    },
    /// Build the global vocabulary embeddings used for query expansion
    Vocabulary {
        /// Collections to draw terms from; defaults to every stored collection
        #[arg(long, value_delimiter = ',')]
        collections: Vec<String>,
    },
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::from_json_file(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let paths = IndexPaths::new(&cli.output);
    std::fs::create_dir_all(&paths.root)?;
    let store = DocumentStore::open(paths.docstore())?;

    match cli.command {
        Commands::Build { collection, input, format, no_dense } => {
            let corpus = read_corpus(&input, format)?;
            tracing::info!(
                collection = %collection,
                documents = corpus.documents.len(),
                skipped = corpus.skipped,
                "corpus read"
            );
            let embedder = if no_dense { None } else { Some(config.embedder.build()?) };
            let report = build_collection(
                &paths,
                &store,
                &collection,
                corpus.documents,
                embedder.as_deref(),
                config.batch_size,
            )
            .await?;
            tracing::info!(?report, output = %paths.root.display(), "index build complete");
        }
        Commands::Vocabulary { collections } => {
            let collections = if collections.is_empty() { store.collections() } else { collections };
            let embedder = config.embedder.build()?;
            let report =
                build_vocabulary(&paths, &store, &collections, embedder.as_ref(), config.batch_size).await?;
            tracing::info!(?report, collections = ?collections, "vocabulary build complete");
        }
    }
    store.flush()?;
    Ok(())
}
