//! AHER application binary - composition root.
//!
//! 1. Parse the command line and load configuration from TOML
//! 2. Initialize logging
//! 3. Open storage and the configured embedding provider, checking that its
//!    dimension matches the persisted store
//! 4. Run the requested command: serve the API, index tiles, or embed a query

mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use aher_api::state::AppState;
use aher_chat::{ChatAssistant, ChatBackend, Retrieval};
use aher_core::config::AherConfig;
use aher_geo::{ArcGisCatalog, GeometryResolver};
use aher_storage::Database;
use aher_vector::{
    EmbeddingBackend, EmbeddingProvider, HnswParams, IndexOptions, SimilarityStore, TileIndexer,
};

use cli::{expand_home, CliArgs, Command};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

fn open_database(config: &AherConfig) -> AppResult<Arc<Database>> {
    let path = expand_home(&config.store.database_path);
    let db = Database::new(&path)?;
    tracing::info!(path = %path.display(), "SQLite database opened");
    Ok(Arc::new(db))
}

/// The configured embedding provider, rejected if its vectors cannot be
/// compared with the persisted store.
fn checked_embedder(config: &AherConfig) -> AppResult<Arc<EmbeddingBackend>> {
    let embedder = EmbeddingBackend::from_config(config)?;
    if let Err(e) = config.check_embedding_dimension(embedder.dimension()) {
        tracing::error!(
            provider = embedder.name(),
            error = %e,
            "Embedding provider does not match the store dimension"
        );
        return Err(e.into());
    }
    Ok(Arc::new(embedder))
}

fn open_store(config: &AherConfig, db: Arc<Database>) -> AppResult<Arc<SimilarityStore>> {
    let store = SimilarityStore::open(
        db,
        config.store.dimension,
        HnswParams::from_config(&config.store),
    )?;
    Ok(Arc::new(store))
}

async fn serve(config: AherConfig) -> AppResult<()> {
    let db = open_database(&config)?;
    let embedder = checked_embedder(&config)?;
    let store = open_store(&config, db)?;

    let catalog = Arc::new(ArcGisCatalog::from_config(&config.geocoding)?);
    let resolver = Arc::new(GeometryResolver::from_config(catalog, &config.geocoding));
    let chat = Arc::new(ChatBackend::from_config(&config)?);
    let assistant = ChatAssistant::standard(
        &config.chat,
        chat,
        resolver.clone(),
        Some(Retrieval {
            embedder,
            store: store.clone(),
        }),
    )?;

    let state = AppState::new(config.clone(), Arc::new(assistant), resolver, store);
    aher_api::start_server(&config, state).await?;
    Ok(())
}

async fn index_tiles(config: AherConfig, options: IndexOptions) -> AppResult<()> {
    let db = open_database(&config)?;
    let embedder = checked_embedder(&config)?;
    let store = open_store(&config, db.clone())?;

    let indexer = TileIndexer::new(db, store, embedder, &config.indexing);
    let report = indexer.run(&options).await?;

    if options.truncate {
        println!("Truncated {} tile embeddings", report.truncated);
    }
    println!("Created {} tile embeddings", report.created);
    println!("Updated {} tile embeddings", report.updated);
    if report.skipped > 0 {
        println!("Skipped {} tiles with no displayable data", report.skipped);
    }
    Ok(())
}

async fn embed_query(config: AherConfig, query: &str) -> AppResult<()> {
    let embedder = EmbeddingBackend::from_config(&config)?;
    let embedding = embedder.embed_text(query).await?;
    tracing::info!(
        provider = embedder.name(),
        dimension = embedding.len(),
        "Query embedded"
    );
    println!("{}", serde_json::to_string(&embedding)?);
    Ok(())
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = AherConfig::load_or_default(&config_file);
    let command = args.command();
    if let Command::Serve { host, port } = &command {
        if let Some(host) = host {
            config.general.host = host.clone();
        }
        if let Some(port) = port {
            config.general.port = *port;
        }
    }

    // RUST_LOG wins over the configured level.
    let level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .init();

    tracing::info!("Starting AHER v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    match command {
        Command::Serve { .. } => serve(config).await,
        Command::IndexTiles { truncate, resource } => {
            index_tiles(config, IndexOptions { truncate, resource }).await
        }
        Command::EmbedQuery { query } => embed_query(config, &query).await,
    }
}
