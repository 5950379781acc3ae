//! IPC Server - Unix socket server for serve mode
//!
//! Accepts connections and answers queries against one shared orchestrator,
//! so every client benefits from the same handle cache.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::gemini::{ContentGenerator, FileResolver, RemoteFile};
use crate::ipc::protocol::{
    parse_command, serialize_response, CacheInfo, Command, Response, PROTOCOL_VERSION,
};
use crate::query::{QueryOrchestrator, SearchOptions, SearchResponse};

/// Shared state handed to each connection
pub struct ServeContext<R, G>
where
    R: FileResolver<Resolved = RemoteFile>,
    G: ContentGenerator,
{
    pub orchestrator: Arc<QueryOrchestrator<R, G>>,
    pub default_store: String,
}

/// IPC Server that listens for commands on a Unix socket
pub struct IpcServer<R, G>
where
    R: FileResolver<Resolved = RemoteFile>,
    G: ContentGenerator,
{
    context: Arc<ServeContext<R, G>>,
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    /// Active connections counter
    connection_count: Arc<RwLock<u32>>,
}

impl<R, G> IpcServer<R, G>
where
    R: FileResolver<Resolved = RemoteFile> + 'static,
    G: ContentGenerator + 'static,
{
    pub fn new(context: ServeContext<R, G>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            context: Arc::new(context),
            socket_path: socket_path.into(),
            listener: None,
            connection_count: Arc::new(RwLock::new(0)),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale socket file
    pub async fn start(&mut self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener = UnixListener::bind(&self.socket_path).with_context(|| {
            format!("Failed to bind Unix socket {}", self.socket_path.display())
        })?;

        info!(socket_path = %self.socket_path.display(), "IPC server started");

        self.listener = Some(listener);
        Ok(())
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("Server not started")?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let context = Arc::clone(&self.context);
                    let connection_count = Arc::clone(&self.connection_count);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, context, connection_count).await {
                            error!(error = %e, "Connection handler error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Remove the socket file
    pub fn stop(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).context("Failed to remove socket file")?;
        }
        info!("IPC server stopped");
        Ok(())
    }
}

/// Handle a single client connection
async fn handle_connection<R, G>(
    stream: UnixStream,
    context: Arc<ServeContext<R, G>>,
    connection_count: Arc<RwLock<u32>>,
) -> Result<()>
where
    R: FileResolver<Resolved = RemoteFile>,
    G: ContentGenerator,
{
    {
        let mut count = connection_count.write().await;
        *count += 1;
        debug!(count = *count, "New connection");
    }

    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Connection closed by client");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                debug!(command = %trimmed, "Received command");

                let response = match parse_command(trimmed.as_bytes()) {
                    Ok(command) => process_command(command, &context).await,
                    Err(e) => {
                        warn!(error = %e, command = %trimmed, "Failed to parse command");
                        Response::Error {
                            error: format!("Invalid command: {}", e),
                        }
                    }
                };

                match serialize_response(&response) {
                    Ok(json) => {
                        if let Err(e) = writer.write_all(&json).await {
                            error!(error = %e, "Failed to write response");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to serialize response");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to read from socket");
                break;
            }
        }
    }

    {
        let mut count = connection_count.write().await;
        *count = count.saturating_sub(1);
        debug!(count = *count, "Connection ended");
    }

    Ok(())
}

fn answer(result: Result<SearchResponse>) -> Response {
    match result {
        Ok(response) => Response::Answer { response },
        Err(e) => Response::Error {
            error: format!("{:#}", e),
        },
    }
}

/// Process a command and return a response
pub async fn process_command<R, G>(command: Command, context: &ServeContext<R, G>) -> Response
where
    R: FileResolver<Resolved = RemoteFile>,
    G: ContentGenerator,
{
    let orchestrator = &context.orchestrator;
    let store_or_default = |store: Option<String>| store.unwrap_or_else(|| context.default_store.clone());

    match command {
        Command::Search {
            query,
            store,
            max_files,
        } => {
            let store = store_or_default(store);
            info!(store = %store, "Processing search command");
            let mut options = SearchOptions::default();
            if max_files.is_some() {
                options.max_files = max_files;
            }
            answer(orchestrator.search_and_generate(&query, &store, &options).await)
        }

        Command::Ask {
            question,
            store,
            context: extra,
        } => {
            let store = store_or_default(store);
            info!(store = %store, "Processing ask command");
            answer(
                orchestrator
                    .ask_question(&question, &store, extra.as_deref())
                    .await,
            )
        }

        Command::Summarize { store, topic } => {
            let store = store_or_default(store);
            info!(store = %store, "Processing summarize command");
            answer(
                orchestrator
                    .summarize_documents(&store, topic.as_deref())
                    .await,
            )
        }

        Command::ListStores => Response::Stores {
            stores: orchestrator.registry().list_stores(),
        },

        Command::ClearCache => {
            orchestrator.clear_cache();
            Response::Success {
                message: Some("File cache cleared".to_string()),
            }
        }

        Command::GetStatus => {
            debug!("Processing getStatus command");
            let stats = orchestrator.cache_stats();
            let remote_health = orchestrator.remote_health();

            Response::Status {
                version: PROTOCOL_VERSION,
                healthy: remote_health == "healthy",
                remote_health: remote_health.to_string(),
                model: orchestrator.current_model(),
                default_store: context.default_store.clone(),
                cache: CacheInfo {
                    entries: stats.entries,
                    hits: stats.hits,
                    misses: stats.misses,
                    ttl_secs: orchestrator.cache_ttl().as_secs(),
                },
                recent_errors: orchestrator.recent_errors(),
            }
        }
    }
}
