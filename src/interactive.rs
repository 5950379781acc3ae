//! Interactive query session
//!
//! Reads one line at a time from stdin. Anything that is not a session
//! command is searched against the current store.

use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use crate::gemini::{ContentGenerator, FileResolver, RemoteFile};
use crate::query::{format_response, QueryOrchestrator, SearchOptions};
use crate::store::{StoreSummary, StoredFile};

const HELP: &str = "\
Available commands:
  <question>          Answer from the current store, with citations
  summarize [topic]   Summarize the store, optionally focused on a topic
  files               List files in the current store
  stores              List all stores
  switch <store>      Change the current store
  clear-cache         Forget cached file handles
  stats               Show handle cache statistics
  help                Show this help
  quit | exit | q     Leave interactive mode";

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Quit,
    Help,
    Files,
    Stores,
    /// `None` when no store name was given
    Switch(Option<String>),
    Summarize(Option<String>),
    ClearCache,
    Stats,
    Query(String),
}

/// Interpret one input line; blank lines yield nothing
pub fn parse_line(line: &str) -> Option<SessionCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let command = match (head.to_lowercase().as_str(), arg.is_some()) {
        ("quit" | "exit" | "q", false) => SessionCommand::Quit,
        ("help", false) => SessionCommand::Help,
        ("files", false) => SessionCommand::Files,
        ("stores", false) => SessionCommand::Stores,
        ("clear-cache", false) => SessionCommand::ClearCache,
        ("stats", false) => SessionCommand::Stats,
        ("switch", _) => SessionCommand::Switch(arg),
        ("summarize", _) => SessionCommand::Summarize(arg),
        _ => SessionCommand::Query(line.to_string()),
    };
    Some(command)
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

pub fn render_stores(stores: &[StoreSummary]) -> String {
    if stores.is_empty() {
        return "No stores found.".to_string();
    }
    let mut out = format!("Stores ({}):", stores.len());
    for store in stores {
        out.push_str(&format!(
            "\n  - {} ({} files, {:.1} MB)",
            store.name,
            store.file_count,
            megabytes(store.total_bytes)
        ));
    }
    out
}

pub fn render_files(store: &str, files: &[StoredFile]) -> String {
    let mut out = format!("Files in '{}' ({}):", store, files.len());
    for file in files {
        out.push_str(&format!(
            "\n  - {} ({:.1} MB) [{}]",
            file.display_name,
            megabytes(file.size_bytes),
            file.name
        ));
    }
    out
}

fn prompt() {
    print!("\nQuery: ");
    let _ = std::io::stdout().flush();
}

/// Run the session until `quit` or end of input
pub async fn run<R, G>(orchestrator: &QueryOrchestrator<R, G>, store: &str) -> Result<()>
where
    R: FileResolver<Resolved = RemoteFile>,
    G: ContentGenerator,
{
    let mut store = store.to_string();
    println!("Interactive mode with store: {}", store);
    println!("Type 'quit' to exit, 'help' for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt();
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let Some(command) = parse_line(&line) else {
            continue;
        };

        match command {
            SessionCommand::Quit => break,
            SessionCommand::Help => println!("{}", HELP),
            SessionCommand::Files => match orchestrator.registry().list_files(&store) {
                Ok(files) => println!("{}", render_files(&store, &files)),
                Err(e) => println!("Error: {}", e),
            },
            SessionCommand::Stores => println!("{}", render_stores(&orchestrator.registry().list_stores())),
            SessionCommand::Switch(None) => println!("Usage: switch <store>"),
            SessionCommand::Switch(Some(next)) => {
                if !orchestrator.registry().contains(&next) {
                    warn!(store = %next, "Switching to a store that has no registry entry");
                }
                store = next;
                println!("Switched to store: {}", store);
            }
            SessionCommand::Summarize(topic) => {
                match orchestrator.summarize_documents(&store, topic.as_deref()).await {
                    Ok(response) => println!("{}", format_response(&response, true)),
                    Err(e) => println!("Error: {:#}", e),
                }
            }
            SessionCommand::ClearCache => {
                orchestrator.clear_cache();
                println!("File cache cleared");
            }
            SessionCommand::Stats => {
                let stats = orchestrator.cache_stats();
                println!(
                    "Cache: {} entries, {} hits, {} misses ({:.1}% hit rate)",
                    stats.entries,
                    stats.hits,
                    stats.misses,
                    stats.hit_rate()
                );
            }
            SessionCommand::Query(query) => {
                match orchestrator
                    .search_and_generate(&query, &store, &SearchOptions::default())
                    .await
                {
                    Ok(response) => println!("{}", format_response(&response, true)),
                    Err(e) => println!("Error: {:#}", e),
                }
            }
        }
    }

    orchestrator.log_metrics();
    println!("Goodbye!");
    Ok(())
}
