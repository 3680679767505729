use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use recall_core::config::{Config, StorageMode};
use recall_core::rag::{NewDocument, RetrievalEngine, SearchPath};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "recall_core=info";

#[derive(Parser)]
#[command(name = "recall")]
#[command(about = "Semantic search over a partitioned knowledge base", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Configuration commands")]
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    #[command(about = "Embed and store a document")]
    Upsert {
        #[arg(help = "Document text")]
        content: String,

        #[arg(long, help = "Document id (default: doc_<unix-millis>_<seq>)")]
        id: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long = "type", value_name = "TYPE")]
        doc_type: Option<String>,

        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,

        #[arg(short, long, help = "Project partition (default: global)")]
        project: Option<String>,
    },

    #[command(about = "Search documents similar to a query")]
    Search {
        query: String,

        #[arg(short, long)]
        project: Option<String>,

        #[arg(long, help = "Exclusive minimum similarity")]
        threshold: Option<f32>,

        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        #[arg(long, help = "Print results as JSON")]
        json: bool,
    },

    #[command(about = "Delete a document")]
    Delete {
        id: String,

        #[arg(short, long)]
        project: Option<String>,
    },

    #[command(about = "List documents, newest first")]
    List {
        #[arg(short, long)]
        project: Option<String>,
    },

    #[command(about = "Answer a question grounded in the knowledge base")]
    Research {
        query: String,

        #[arg(short, long)]
        project: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Write a default configuration file")]
    Init {
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => show_config(&cli.config),
            ConfigCommands::Init { force } => init_config(&cli.config, force),
        },
        Commands::Upsert {
            content,
            id,
            title,
            doc_type,
            tags,
            project,
        } => {
            let document = NewDocument {
                id,
                content,
                title,
                doc_type,
                tags,
                extra: Default::default(),
            };
            upsert(&cli.config, document, project.as_deref()).await
        }
        Commands::Search {
            query,
            project,
            threshold,
            top_k,
            json,
        } => search(&cli.config, &query, project.as_deref(), threshold, top_k, json).await,
        Commands::Delete { id, project } => delete(&cli.config, &id, project.as_deref()).await,
        Commands::List { project } => list(&cli.config, project.as_deref()).await,
        Commands::Research { query, project } => {
            research(&cli.config, &query, project.as_deref()).await
        }
    }
}

fn load_config(config_path: &Path) -> Result<Config> {
    let config = if config_path.exists() {
        Config::load(config_path).context("Failed to load config")?
    } else {
        debug!(path = %config_path.display(), "No config file, using defaults");
        Config::default()
    };
    Ok(config.apply_env())
}

fn engine(config_path: &Path) -> Result<RetrievalEngine> {
    let config = load_config(config_path)?;
    RetrievalEngine::from_config(&config).context("Failed to initialize retrieval engine")
}

fn show_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("{}", "Current Configuration:".bold().green());
    println!();
    println!("{}", "Provider:".bold());
    println!("  Base URL:        {}", config.provider.base_url);
    println!("  Embedding Model: {}", config.provider.embedding_model.cyan());
    println!("  Dimensions:      {}", config.provider.dimensions);
    println!("  Chat Model:      {}", config.provider.chat_model.cyan());
    println!("  API Key:         {}", mask(config.provider.api_key.as_deref()));
    println!("  Timeout:         {}s", config.provider.timeout_secs);
    println!();
    println!("{}", "Storage:".bold());
    match &config.storage.backend {
        StorageMode::Supabase { url, key } => {
            println!("  Backend:         supabase");
            println!("  URL:             {}", if url.is_empty() { "(unset)" } else { url.as_str() });
            println!("  Key:             {}", mask(Some(key.as_str())));
        }
        StorageMode::Memory => println!("  Backend:         memory"),
    }
    println!("  Table:           {}", config.storage.table);
    println!("  Match Function:  {}", config.storage.match_function);
    println!();
    println!("{}", "Search:".bold());
    println!("  Threshold:       {}", config.search.threshold);
    println!("  Top K:           {}", config.search.top_k);
    println!("  Default Project: {}", config.search.default_project);
    println!();
    println!("{}", "Cache:".bold());
    for (name, limits) in [
        ("general", &config.cache.general),
        ("embeddings", &config.cache.embeddings),
        ("search", &config.cache.search),
        ("user", &config.cache.user),
    ] {
        println!(
            "  {:<16} {} entries, {} MiB, ttl {}s",
            format!("{name}:"),
            limits.max_entries,
            limits.memory_limit_bytes / (1024 * 1024),
            limits.ttl_secs
        );
    }
    println!("  Sweep Interval:  {}s", config.cache.sweep_interval_secs);

    Ok(())
}

fn init_config(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let content =
        serde_yaml::to_string(&Config::default()).context("Failed to serialize config")?;
    std::fs::write(config_path, content).context("Failed to write config file")?;

    println!(
        "{} Wrote default config to {}",
        "✓".green().bold(),
        config_path.display().to_string().cyan()
    );
    Ok(())
}

async fn upsert(config_path: &Path, document: NewDocument, project: Option<&str>) -> Result<()> {
    let engine = engine(config_path)?;
    let id = engine
        .upsert(document, project)
        .await
        .context("Failed to store document")?;

    println!("{} Stored document {}", "✓".green().bold(), id.cyan());
    Ok(())
}

async fn search(
    config_path: &Path,
    query: &str,
    project: Option<&str>,
    threshold: Option<f32>,
    top_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = RetrievalEngine::from_config(&config)
        .context("Failed to initialize retrieval engine")?;

    let outcome = engine
        .search_text_with(
            query,
            project,
            threshold.unwrap_or(config.search.threshold),
            top_k.unwrap_or(config.search.top_k),
        )
        .await
        .context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.results)?);
        return Ok(());
    }

    if outcome.path == SearchPath::Fallback {
        println!(
            "{}",
            "Server-side search unavailable; results ranked locally".yellow()
        );
    }

    if outcome.is_empty() {
        println!("{}", "No matching documents.".yellow());
        return Ok(());
    }

    println!("{}", "Results:".bold().green());
    println!();
    for result in &outcome.results {
        let title = result.metadata.title.as_deref().unwrap_or(&result.id);
        println!(
            "  {} {} ({:.3})",
            "•".cyan(),
            title.bold(),
            result.similarity
        );
        println!("    {}", preview(&result.content, 120));
    }

    Ok(())
}

async fn delete(config_path: &Path, id: &str, project: Option<&str>) -> Result<()> {
    let engine = engine(config_path)?;
    engine
        .delete(id, project)
        .await
        .context("Failed to delete document")?;

    println!("{} Deleted {}", "✓".green().bold(), id.cyan());
    Ok(())
}

async fn list(config_path: &Path, project: Option<&str>) -> Result<()> {
    let engine = engine(config_path)?;
    let documents = engine
        .list(project)
        .await
        .context("Failed to list documents")?;

    if documents.is_empty() {
        println!("{}", "No documents found.".yellow());
        return Ok(());
    }

    println!("{}", "Documents:".bold().green());
    println!();
    for doc in documents {
        let created = doc
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let marker = if doc.has_embedding { "•".cyan() } else { "○".yellow() };
        println!(
            "  {} {} {} [{}] {}",
            marker,
            doc.id.bold(),
            doc.title,
            doc.doc_type,
            created.dimmed()
        );
    }

    Ok(())
}

async fn research(config_path: &Path, query: &str, project: Option<&str>) -> Result<()> {
    let engine = engine(config_path)?;

    println!("{} Researching...", "→".blue());
    let report = engine
        .research(query, project)
        .await
        .context("Research failed")?;

    println!();
    println!("{}", report.analysis);
    println!();
    println!("{}", "Sources:".bold());
    for source in &report.sources {
        println!("  {} {} ({:.2})", "•".cyan(), source.title, source.similarity);
    }

    Ok(())
}

fn mask(secret: Option<&str>) -> String {
    match secret {
        Some(s) if s.len() > 8 => format!("{}…", s.chars().take(4).collect::<String>()),
        Some(s) if !s.is_empty() => "****".to_string(),
        _ => "(unset)".to_string(),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_hides_secrets() {
        assert_eq!(mask(None), "(unset)");
        assert_eq!(mask(Some("")), "(unset)");
        assert_eq!(mask(Some("short")), "****");
        assert_eq!(mask(Some("sk-1234567890")), "sk-1…");
    }

    #[test]
    fn test_preview_flattens_and_truncates() {
        assert_eq!(preview("a\n  b", 10), "a b");
        assert_eq!(preview("abcdef", 3), "abc…");
    }

    #[test]
    fn test_default_log_filter_parses() {
        assert!(DEFAULT_LOG_FILTER.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn test_cli_parses_search_flags() {
        let cli = Cli::parse_from(["recall", "search", "refunds", "-p", "shop", "-k", "3"]);
        match cli.command {
            Commands::Search { query, project, top_k, threshold, json } => {
                assert_eq!(query, "refunds");
                assert_eq!(project.as_deref(), Some("shop"));
                assert_eq!(top_k, Some(3));
                assert!(threshold.is_none());
                assert!(!json);
            }
            _ => panic!("parsed the wrong command"),
        }
    }
}
