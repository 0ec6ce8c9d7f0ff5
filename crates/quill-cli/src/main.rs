//! quill CLI - resilient document store and chunker

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quill_core::bootstrap::seed_default_user;
use quill_core::chunker::Chunk;
use quill_core::ingest::{IngestRequest, ingest_document};
use quill_core::store::StoreHealth;
use quill_core::{Chunker, Config, Database, ResilientStore};

#[derive(Debug, Parser)]
#[command(
    name = "quill",
    author,
    version,
    about = "Resilient document store and adaptive chunker",
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "QUILL_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Split a text file into chunks
    Chunk {
        /// File to chunk
        file: PathBuf,

        /// Print chunks as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chunk a text file and store it as a document
    Ingest {
        /// File to ingest
        file: PathBuf,

        /// Owner username (defaults to the bootstrap user)
        #[arg(long)]
        user: Option<String>,

        /// Document title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,

        /// Model recorded on the document
        #[arg(long, default_value = "")]
        model: String,
    },

    /// Check the durable backend
    Health,

    /// Show database statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(Config::default_config_path);
    let config = Config::ensure_at(&config_path)?;

    match cli.command {
        Command::Chunk { file, json } => cmd_chunk(&config, &file, json),
        Command::Ingest {
            file,
            user,
            title,
            model,
        } => cmd_ingest(&config, &file, user, title, model).await,
        Command::Health => cmd_health(&config).await,
        Command::Stats => cmd_stats(&config).await,
    }
}

fn read_text(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

async fn open_store(config: &Config) -> Result<(Arc<Database>, ResilientStore)> {
    let db = Arc::new(Database::open(&config.database).await?);
    let store = ResilientStore::new(db.clone(), config.fallback);
    Ok((db, store))
}

fn cmd_chunk(config: &Config, file: &Path, json: bool) -> Result<()> {
    let text = read_text(file)?;
    let chunker = Chunker::new(config.chunking)?;
    let name = file.file_name().map(|n| n.to_string_lossy().into_owned());
    let chunks = chunker.chunk(&text, name.as_deref());

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    if chunks.is_empty() {
        println!("No text to chunk.");
        return Ok(());
    }
    print_chunks(&chunks);
    Ok(())
}

async fn cmd_ingest(
    config: &Config,
    file: &Path,
    user: Option<String>,
    title: Option<String>,
    model: String,
) -> Result<()> {
    let content = read_text(file)?;
    let (_db, store) = open_store(config).await?;
    seed_default_user(&store, &config.bootstrap).await?;

    let username = user.unwrap_or_else(|| config.bootstrap.username.clone());
    let owner = store
        .get_user_by_username(&username)
        .await
        .ok_or_else(|| anyhow::anyhow!("User not found: {username}"))?;

    let title = title.unwrap_or_else(|| {
        file.file_stem()
            .map_or_else(|| "Untitled".to_string(), |s| s.to_string_lossy().into_owned())
    });
    let chunker = Chunker::new(config.chunking)?;
    let ingested = ingest_document(
        &store,
        IngestRequest {
            user_id: owner.id,
            title,
            content,
            model,
            metadata: None,
        },
        &chunker,
    )
    .await?;

    println!(
        "Stored document {} ({} chunks)",
        ingested.document.id,
        ingested.chunks.len()
    );
    print_chunks(&ingested.chunks);

    let health = store.health();
    if health.diverged {
        println!();
        println!(
            "Warning: durable backend unavailable, document kept in memory only ({})",
            health.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Ping the configured database. One that cannot be opened is reported as
/// degraded instead of failing the command.
async fn probe_health(config: &Config) -> StoreHealth {
    match open_store(config).await {
        Ok((_db, store)) => store.check_durable().await,
        Err(err) => {
            tracing::warn!(
                path = %config.database.display(),
                error = %err,
                "failed to open durable backend"
            );
            StoreHealth::unreachable(&format!("{err:#}"))
        }
    }
}

async fn cmd_health(config: &Config) -> Result<()> {
    let health = probe_health(config).await;

    println!("Backend Health");
    println!("--------------");
    println!("Mode:          {}", health.mode);
    println!("Failures:      {}", health.total_failures);
    if let Some(err) = &health.last_error {
        println!("Last error:    {err}");
    }
    Ok(())
}

async fn cmd_stats(config: &Config) -> Result<()> {
    let db = Database::open(&config.database).await?;
    let counts = db.table_counts().await?;

    println!("Database Statistics");
    println!("-------------------");
    println!("Users:         {}", counts.users);
    println!("Documents:     {}", counts.documents);
    println!("Conversations: {}", counts.conversations);
    println!("Messages:      {}", counts.messages);
    println!("Rewrites:      {}", counts.rewrites);
    println!("Profiles:      {}", counts.profiles);

    db.close().await;
    Ok(())
}

fn print_chunks(chunks: &[Chunk]) {
    for (i, chunk) in chunks.iter().enumerate() {
        let summary = chunk.summary();
        println!(
            "{:>3}. {} [{} words, bytes {}..{}]",
            i + 1,
            summary.title,
            summary.word_count,
            summary.start_position,
            summary.end_position
        );
        println!("     {}", truncate(&summary.excerpt, 72));
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    let s = s.replace('\n', " ");
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use quill_core::store::BackendMode;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn ingest_arguments_parse() {
        let cli = Cli::try_parse_from([
            "quill", "ingest", "notes.md", "--user", "ada", "--model", "gpt-4o",
        ])
        .expect("parse");
        let Command::Ingest {
            file, user, model, ..
        } = cli.command
        else {
            unreachable!("expected the ingest command");
        };
        assert_eq!(file, PathBuf::from("notes.md"));
        assert_eq!(user.as_deref(), Some("ada"));
        assert_eq!(model, "gpt-4o");
    }

    #[tokio::test]
    async fn health_reports_unopenable_database_as_degraded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").expect("write");
        let config = Config {
            database: blocker.join("quill.db"),
            ..Config::default()
        };

        let health = probe_health(&config).await;
        assert_eq!(health.mode, BackendMode::Degraded);
        assert!(
            health
                .last_error
                .as_deref()
                .is_some_and(|err| err.starts_with("open: "))
        );
    }

    #[tokio::test]
    async fn health_reports_reachable_database_as_healthy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            database: dir.path().join("quill.db"),
            ..Config::default()
        };

        let health = probe_health(&config).await;
        assert_eq!(health.mode, BackendMode::Healthy);
        assert_eq!(health.total_failures, 0);
    }

    #[test]
    fn truncate_flattens_newlines() {
        assert_eq!(truncate("one\ntwo", 20), "one two");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
