//! file-search-rag - command-line RAG over the Gemini file search API
//!
//! Documents are uploaded to the remote service and grouped locally into
//! named stores. Queries attach a store's files to a generation request;
//! retrieval and grounding happen server-side.

mod cache;
mod config;
mod documents;
mod gemini;
mod interactive;
mod ipc;
mod query;
mod store;
#[cfg(test)]
mod testing;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cache::HandleCache;
use config::Settings;
use documents::{DocumentProcessor, UploadOptions};
use gemini::GeminiClient;
use ipc::{IpcServer, ServeContext};
use query::{format_citations_only, format_response, QueryOrchestrator, SearchOptions, SearchResponse};
use store::{organize, CustomMetadata, StoreRegistry};

type Orchestrator = QueryOrchestrator<GeminiClient, GeminiClient>;

#[derive(Parser, Debug)]
#[command(
    name = "file-search-rag",
    version,
    about = "Ask questions about your documents using the Gemini file search API"
)]
struct Cli {
    /// Generation model (defaults to DEFAULT_MODEL)
    #[arg(long, global = true, value_name = "MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty store
    CreateStore { name: String },
    /// List stores with file counts and sizes
    ListStores,
    /// Delete a store and (unless --keep-remote) its uploaded files
    DeleteStore {
        name: String,
        #[arg(long)]
        keep_remote: bool,
    },
    /// List the files tracked in a store
    ListFiles { store: Option<String> },
    /// Upload one document
    Upload {
        file: PathBuf,
        #[arg(short, long)]
        store: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        /// Document type metadata (manual, report, article, ...)
        #[arg(long = "type", value_name = "TYPE")]
        document_type: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Extra metadata; numeric values are stored as numbers
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },
    /// Upload every supported document in a directory
    UploadDir {
        dir: PathBuf,
        #[arg(short, long)]
        store: Option<String>,
        /// Only the top level of the directory
        #[arg(long)]
        no_recursive: bool,
        #[arg(long = "type", value_name = "TYPE")]
        document_type: Option<String>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Search a store and generate an answer
    Search {
        query: String,
        #[arg(short, long)]
        store: Option<String>,
        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        #[arg(long)]
        max_files: Option<usize>,
    },
    /// Search several stores at once
    SearchMulti {
        query: String,
        #[arg(short, long = "store", required = true)]
        stores: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
    },
    /// Ask a direct question
    Ask {
        question: String,
        #[arg(short, long)]
        store: Option<String>,
        /// Additional context for the question
        #[arg(long)]
        context: Option<String>,
    },
    /// Summarize the documents in a store
    Summarize {
        #[arg(short, long)]
        store: Option<String>,
        #[arg(long)]
        topic: Option<String>,
    },
    /// Run one query per line of a file
    Batch {
        file: PathBuf,
        #[arg(short, long)]
        store: Option<String>,
        /// Seconds to wait between queries
        #[arg(long, default_value_t = 1.0)]
        delay: f64,
    },
    /// Interactive question session
    Interactive {
        #[arg(short, long)]
        store: Option<String>,
    },
    /// Split a store into per-language stores
    Organize {
        store: String,
        /// Create the stores instead of only reporting
        #[arg(long)]
        apply: bool,
    },
    /// Show details of the current model
    ModelInfo,
    /// Answer queries over a Unix socket
    Serve {
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
        /// Store used when a request does not name one
        #[arg(short, long)]
        store: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Markdown,
    Plain,
    Json,
}

/// Wired-up services shared by every command
struct App {
    settings: Settings,
    client: Arc<GeminiClient>,
    registry: Arc<StoreRegistry>,
    orchestrator: Arc<Orchestrator>,
}

impl App {
    async fn build(settings: Settings, model: Option<&str>) -> Result<Self> {
        let client = Arc::new(
            GeminiClient::new(&settings.api_key, &settings.api_base)
                .context("Failed to create Gemini client")?,
        );

        let registry = Arc::new(
            StoreRegistry::load(&settings.stores_file).context("Failed to load store registry")?,
        );
        debug!(path = %registry.path().display(), "Store registry ready");

        let cache = Arc::new(HandleCache::with_ttl_secs(
            client.clone(),
            settings.cache_ttl_secs,
        ));
        info!(ttl_secs = cache.ttl().as_secs(), "File handle cache enabled");

        let orchestrator = Arc::new(QueryOrchestrator::new(
            registry.clone(),
            cache,
            client.clone(),
            &settings.default_model,
        ));

        if let Some(model) = model {
            orchestrator.set_model(model).await?;
        }

        Ok(Self {
            settings,
            client,
            registry,
            orchestrator,
        })
    }

    fn store(&self, store: Option<String>) -> String {
        store.unwrap_or_else(|| self.settings.default_store_name.clone())
    }

    fn processor(&self) -> DocumentProcessor<GeminiClient> {
        DocumentProcessor::new(
            self.client.clone(),
            self.registry.clone(),
            self.settings.max_file_size_mb,
        )
    }
}

/// Parse `KEY=VALUE` into string or numeric metadata
fn parse_meta(raw: &str) -> Result<CustomMetadata> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("Metadata must look like KEY=VALUE, got '{}'", raw);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Metadata key must not be empty in '{}'", raw);
    }
    Ok(match value.trim().parse::<f64>() {
        Ok(number) => CustomMetadata::numeric(key, number),
        Err(_) => CustomMetadata::string(key, value.trim()),
    })
}

fn print_response(response: &SearchResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Markdown => {
            println!("{}", "=".repeat(50));
            println!("{}", format_response(response, true));
        }
        OutputFormat::Plain => {
            println!("Answer: {}", response.answer);
            if !response.citations.is_empty() {
                println!("\n{}", format_citations_only(&response.citations));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?);
        }
    }
    if response.files_skipped > 0 {
        warn!(
            skipped = response.files_skipped,
            "Some files could not be accessed and were left out"
        );
    }
    Ok(())
}

async fn stream_answer(app: &App, query: &str, store: &str, options: &SearchOptions) -> Result<()> {
    let mut stream = app
        .orchestrator
        .search_stream(query, store, options)
        .await?;
    info!(files = stream.files_used, skipped = stream.files_skipped, "Streaming answer");

    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.chunks.recv().await {
        let text = chunk.context("Streaming generation failed")?;
        write!(stdout, "{}", text)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

async fn serve(app: &App, socket: Option<PathBuf>, store: Option<String>) -> Result<()> {
    let socket = socket.unwrap_or_else(|| app.settings.socket_path.clone());
    let context = ServeContext {
        orchestrator: app.orchestrator.clone(),
        default_store: app.store(store),
    };

    let mut server = IpcServer::new(context, socket);
    server.start().await?;
    let server = Arc::new(server);

    info!(socket = %server.socket_path().display(), "Ready. Waiting for queries...");

    let runner = Arc::clone(&server);
    let handle = tokio::spawn(async move {
        if let Err(e) = runner.run().await {
            error!(error = %e, "IPC server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    handle.abort();
    server.stop()?;
    app.orchestrator.log_metrics();
    info!("Shutdown complete.");
    Ok(())
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let app = App::build(settings, cli.model.as_deref()).await?;

    match cli.command {
        Commands::CreateStore { name } => {
            if app.registry.create_store(&name)? {
                println!("Created store '{}'", name.trim());
            } else {
                println!("Store '{}' already exists", name.trim());
            }
        }

        Commands::ListStores => {
            println!("{}", interactive::render_stores(&app.registry.list_stores()));
        }

        Commands::DeleteStore { name, keep_remote } => {
            let files = app.registry.delete_store(&name)?;
            let mut deleted = 0;
            if !keep_remote {
                for file in &files {
                    match app.client.delete_file(&file.name).await {
                        Ok(()) => deleted += 1,
                        Err(e) => warn!(handle = %file.name, error = %e, "Failed to delete remote file"),
                    }
                }
            }
            println!(
                "Deleted store '{}' ({} files, {} removed remotely)",
                name,
                files.len(),
                deleted
            );
        }

        Commands::ListFiles { store } => {
            let store = app.store(store);
            let files = app.registry.list_files(&store)?;
            println!("{}", interactive::render_files(&store, &files));
        }

        Commands::Upload {
            file,
            store,
            display_name,
            document_type,
            category,
            tags,
            meta,
        } => {
            let store = app.store(store);
            let options = UploadOptions {
                display_name,
                document_type,
                category,
                tags,
                custom: meta.iter().map(|m| parse_meta(m)).collect::<Result<_>>()?,
            };
            let record = app.processor().upload_document(&file, &store, &options).await?;
            println!(
                "Uploaded '{}' to store '{}' as {}",
                record.display_name, store, record.name
            );
        }

        Commands::UploadDir {
            dir,
            store,
            no_recursive,
            document_type,
            category,
        } => {
            let store = app.store(store);
            let options = UploadOptions {
                document_type,
                category,
                ..Default::default()
            };
            let summary = app
                .processor()
                .upload_directory(&dir, &store, !no_recursive, &options)
                .await?;

            for (path, e) in &summary.invalid {
                println!("  skipped {}: {}", path.display(), e);
            }
            for (path, e) in &summary.failed {
                println!("  failed  {}: {}", path.display(), e);
            }
            println!(
                "Uploaded {} files from '{}' to store '{}'",
                summary.uploaded.len(),
                dir.display(),
                store
            );
        }

        Commands::Search {
            query,
            store,
            stream,
            format,
            max_files,
        } => {
            let store = app.store(store);
            let mut options = SearchOptions::default();
            if max_files.is_some() {
                options.max_files = max_files;
            }

            if stream {
                stream_answer(&app, &query, &store, &options).await?;
            } else {
                let response = app
                    .orchestrator
                    .search_and_generate(&query, &store, &options)
                    .await?;
                print_response(&response, format)?;
            }
        }

        Commands::SearchMulti {
            query,
            stores,
            format,
        } => {
            let response = app
                .orchestrator
                .search_multiple_stores(&query, &stores, &SearchOptions::default())
                .await?;
            print_response(&response, format)?;
        }

        Commands::Ask {
            question,
            store,
            context,
        } => {
            let store = app.store(store);
            let response = app
                .orchestrator
                .ask_question(&question, &store, context.as_deref())
                .await?;
            println!("{}", "=".repeat(50));
            println!("Question: {}", question);
            println!("Answer: {}", response.answer);
            if !response.citations.is_empty() {
                println!("\n{}", format_citations_only(&response.citations));
            }
        }

        Commands::Summarize { store, topic } => {
            let store = app.store(store);
            let response = app
                .orchestrator
                .summarize_documents(&store, topic.as_deref())
                .await?;
            println!("{}", "=".repeat(50));
            println!("DOCUMENT SUMMARY");
            if let Some(topic) = &topic {
                println!("Focus: {}", topic);
            }
            println!("{}", "=".repeat(50));
            println!("{}", response.answer);
            if !response.citations.is_empty() {
                println!("\nBased on {} sources:", response.citations.len());
                for citation in &response.citations {
                    println!("  - {}", citation.file_name);
                }
            }
        }

        Commands::Batch { file, store, delay } => {
            let store = app.store(store);
            if !delay.is_finite() || delay < 0.0 {
                bail!("--delay must be a non-negative number of seconds");
            }
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read queries from {}", file.display()))?;
            let queries: Vec<String> = raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
            if queries.is_empty() {
                bail!("No queries found in {}", file.display());
            }

            let results = app
                .orchestrator
                .batch_search(&queries, &store, Duration::from_secs_f64(delay))
                .await;
            for (i, response) in results.iter().enumerate() {
                println!("\n[{}/{}] {}", i + 1, results.len(), response.query);
                println!("{}", format_response(response, true));
            }
        }

        Commands::Interactive { store } => {
            let store = app.store(store);
            interactive::run(app.orchestrator.as_ref(), &store).await?;
        }

        Commands::Organize { store, apply } => {
            let report = organize::analyze(&app.registry, &store)?;
            println!("Store '{}': {} files, {:.2} MB", report.store, report.total_files, report.total_bytes as f64 / (1024.0 * 1024.0));
            for group in &report.groups {
                println!(
                    "  {:<10} {} files, {:.1} MB ({:.1}%) -> {}",
                    group.language.to_string(),
                    group.files.len(),
                    group.total_bytes as f64 / (1024.0 * 1024.0),
                    group.percentage,
                    report.target_store(group.language)
                );
            }
            if let Some(reduction) = report.potential_reduction() {
                println!("Querying one language skips {:.1}% of the data", reduction);
            }

            if apply {
                for (target, added) in organize::apply(&app.registry, &report)? {
                    println!("  {}: {} files added", target, added);
                }
            } else {
                println!("Dry run; pass --apply to create these stores");
            }
        }

        Commands::ModelInfo => {
            let info = app.orchestrator.model_info().await?;
            println!("Model: {}", info.name);
            println!("Display name: {}", info.display_name);
            if !info.description.is_empty() {
                println!("Description: {}", info.description);
            }
            println!("Input token limit: {}", info.input_token_limit);
            println!("Output token limit: {}", info.output_token_limit);
            println!(
                "Generation methods: {}",
                info.supported_generation_methods.join(", ")
            );
        }

        Commands::Serve { socket, store } => {
            serve(&app, socket, store).await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so answers on stdout stay pipeable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "Ignoring unreadable .env file");
        }
    }
    let settings = Settings::from_env()?;

    if let Err(e) = run(cli, settings).await {
        error!(error = %format!("{:#}", e), "Command failed");
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_search() {
        let cli = Cli::try_parse_from([
            "file-search-rag",
            "--model",
            "gemini-2.5-pro",
            "search",
            "what is covered?",
            "--store",
            "hr",
            "--format",
            "json",
            "--max-files",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.model.as_deref(), Some("gemini-2.5-pro"));
        match cli.command {
            Commands::Search {
                query,
                store,
                stream,
                format,
                max_files,
            } => {
                assert_eq!(query, "what is covered?");
                assert_eq!(store.as_deref(), Some("hr"));
                assert!(!stream);
                assert_eq!(format, OutputFormat::Json);
                assert_eq!(max_files, Some(2));
            }
            other => panic!("Expected Search, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_multi_store_and_upload() {
        let cli = Cli::try_parse_from([
            "file-search-rag",
            "search-multi",
            "q",
            "-s",
            "a",
            "--store",
            "b",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::SearchMulti { stores, .. } if stores == ["a", "b"]));

        let cli = Cli::try_parse_from([
            "file-search-rag",
            "upload",
            "doc.pdf",
            "--type",
            "manual",
            "--tags",
            "hr,policy",
            "--meta",
            "version=2",
        ])
        .unwrap();
        match cli.command {
            Commands::Upload {
                document_type,
                tags,
                meta,
                ..
            } => {
                assert_eq!(document_type.as_deref(), Some("manual"));
                assert_eq!(tags, vec!["hr", "policy"]);
                assert_eq!(meta, vec!["version=2"]);
            }
            other => panic!("Expected Upload, got {:?}", other),
        }

        assert!(Cli::try_parse_from(["file-search-rag", "search-multi", "q"]).is_err());
    }

    #[test]
    fn test_parse_meta() {
        assert_eq!(parse_meta("version=2").unwrap(), CustomMetadata::numeric("version", 2.0));
        assert_eq!(
            parse_meta("owner = legal ").unwrap(),
            CustomMetadata::string("owner", "legal")
        );
        assert!(parse_meta("novalue").is_err());
        assert!(parse_meta("=x").is_err());
    }
}
