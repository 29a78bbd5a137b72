//! # RAG Context Engine CLI (`ragctx`)
//!
//! ## Usage
//!
//! ```bash
//! ragctx --config ./config/ragctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragctx chunk <file>` | Print the chunks a document would be split into |
//! | `ragctx ask "<question>" --user <id>` | Answer a question with citations |
//! | `ragctx serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Inspect chunking (works without a config file)
//! ragctx chunk ./docs/policy.md --target-tokens 400
//!
//! # Answer from a directory of notes plus the web
//! ragctx ask "What did the last policy statement say?" --user alice --docs ./docs
//!
//! # Web only, last week, streamed
//! ragctx ask "Latest inflation figures?" --user alice --no-docs --time-range week --stream
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rag_context_engine::config::{self, Config};
use rag_context_engine::core::chunk::chunk_text;
use rag_context_engine::engine::{AnswerRequest, AnswerResponse};
use rag_context_engine::logging;
use rag_context_engine::server::run_server;
use rag_context_engine::services::Services;
use rag_context_engine::stream::StreamEvent;
use rag_context_engine::web::TimeRange;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// RAG context engine: cited answers from your documents and the web.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragctx.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "ragctx", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a text file into chunks and print them.
    Chunk {
        file: PathBuf,

        /// Target chunk size in tokens. Defaults to `[chunking]` config.
        #[arg(long)]
        target_tokens: Option<usize>,

        /// Overlap between consecutive chunks in tokens.
        #[arg(long)]
        overlap_tokens: Option<usize>,
    },

    /// Answer a question from documents and the web.
    Ask {
        question: String,

        /// User whose documents are searched.
        #[arg(long)]
        user: String,

        /// Topic id from `[[topics]]`.
        #[arg(long)]
        topic: Option<String>,

        /// Ingest `*.md` / `*.txt` files under this directory before asking.
        #[arg(long)]
        docs: Option<PathBuf>,

        /// Restrict document search to these document ids (repeatable).
        #[arg(long = "document-id")]
        document_ids: Vec<String>,

        /// Skip document search.
        #[arg(long)]
        no_docs: bool,

        /// Skip web search.
        #[arg(long)]
        no_web: bool,

        /// Web recency window: day, week, month or year.
        #[arg(long)]
        time_range: Option<TimeRange>,

        /// Earliest publication date for web results (YYYY-MM-DD).
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Latest publication date for web results (YYYY-MM-DD).
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Country hint for web search.
        #[arg(long)]
        country: Option<String>,

        #[arg(long)]
        min_score: Option<f64>,

        #[arg(long)]
        max_web_results: Option<usize>,

        #[arg(long)]
        max_document_chunks: Option<usize>,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chunk {
            file,
            target_tokens,
            overlap_tokens,
        } => {
            // Chunking needs no providers, so a missing config file is fine.
            let cfg = if cli.config.exists() {
                config::load_config(&cli.config)?
            } else {
                Config::default()
            };
            run_chunk(
                &file,
                target_tokens.unwrap_or(cfg.chunking.target_tokens),
                overlap_tokens.unwrap_or(cfg.chunking.overlap_tokens),
            )?;
        }
        Commands::Ask {
            question,
            user,
            topic,
            docs,
            document_ids,
            no_docs,
            no_web,
            time_range,
            start_date,
            end_date,
            country,
            min_score,
            max_web_results,
            max_document_chunks,
            stream,
        } => {
            let (_, services, cancel) = bootstrap(&cli.config)?;

            if let Some(dir) = &docs {
                let summary = services
                    .ingestor
                    .ingest_directory(&user, topic.as_deref(), dir)
                    .await?;
                eprintln!(
                    "Ingested {} documents ({} chunks) from {}",
                    summary.documents,
                    summary.chunks,
                    dir.display()
                );
            }

            let req = AnswerRequest {
                topic_id: topic,
                document_ids: (!document_ids.is_empty()).then_some(document_ids),
                time_range,
                start_date,
                end_date,
                country,
                enable_document_search: !no_docs,
                enable_web_search: !no_web,
                max_document_chunks,
                min_score,
                max_web_results,
                ..AnswerRequest::new(question, user)
            };

            if stream {
                run_ask_stream(&services, req, cancel).await?;
            } else {
                let response = services.engine.answer(req, cancel).await?;
                println!("{}", response.answer);
                print_metadata(&response);
            }
        }
        Commands::Serve => {
            let (cfg, services, cancel) = bootstrap(&cli.config)?;
            run_server(&cfg, services, cancel).await?;
        }
    }

    Ok(())
}

/// Load config, start logging, build services and arm Ctrl-C to cancel.
fn bootstrap(path: &Path) -> Result<(Config, Services, CancellationToken)> {
    let cfg = config::load_config(path)?;
    logging::init(&cfg.logging);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling");
            on_ctrl_c.cancel();
        }
    });

    let services = Services::from_config(&cfg)?;
    Ok((cfg, services, cancel))
}

fn run_chunk(file: &Path, target_tokens: usize, overlap_tokens: usize) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let document_id = file.to_string_lossy();
    let chunks = chunk_text(&document_id, &text, target_tokens, overlap_tokens)?;

    for chunk in &chunks {
        println!(
            "--- chunk {} [{}..{}] ~{} tokens ---",
            chunk.chunk_index, chunk.start_offset, chunk.end_offset, chunk.estimated_token_count
        );
        println!("{}", chunk.text.trim_end());
    }
    println!("\n{} chunks", chunks.len());
    Ok(())
}

async fn run_ask_stream(services: &Services, req: AnswerRequest, cancel: CancellationToken) -> Result<()> {
    let mut rx = services.engine.answer_stream(req, cancel.clone());
    let mut stdout = std::io::stdout();

    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::TextDelta(text) => {
                write!(stdout, "{}", text)?;
                stdout.flush()?;
            }
            StreamEvent::Metadata(metadata) => {
                println!();
                print_metadata(&metadata);
            }
            StreamEvent::Done => return Ok(()),
            StreamEvent::Error(message) => bail!("{}", message),
        }
    }

    if cancel.is_cancelled() {
        bail!("cancelled");
    }
    Ok(())
}

fn print_metadata(response: &AnswerResponse) {
    if !response.sources.is_empty() {
        println!("\nSources:");
        for (i, source) in response.sources.iter().enumerate() {
            let location = source.url.as_deref().or(source.document_id.as_deref()).unwrap_or("");
            println!(
                "  {}. [{}] {} ({}) score={:.2}",
                i + 1,
                source.source_type.as_str(),
                source.title,
                location,
                source.score
            );
        }
    }
    if response.truncated {
        println!("\n(context truncated to fit the token budget)");
    }
    if !response.follow_up_questions.is_empty() {
        println!("\nFollow-up questions:");
        for question in &response.follow_up_questions {
            println!("  - {}", question);
        }
    }
}
