//! # wright
//!
//! Command-line front end: replays scripted model responses through the agent,
//! inspects parser output, lists tools and compacts stored conversations.
//! Events go to stdout as NDJSON, logs to stderr.

#![deny(unsafe_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;
use wright_core::stream::StreamEvent;
use wright_engine::memory::MESSAGES_KEY;
use wright_engine::services::{DirectoryBackup, GitSnapshotter, LoggingRunner, SearchReplaceMerger};
use wright_engine::{AgentConfig, Collaborators, MessageParser, Orchestrator};
use wright_llm::{chunk_text, ReplayProvider};
use wright_store::{CharEstimator, CompactingListStore, FileListStore, ListStore, MemoryListStore};
use wright_telemetry::{LogFormat, TelemetryConfig};

/// Autonomous coding-agent runtime.
#[derive(Parser, Debug)]
#[command(name = "wright", about = "Autonomous coding-agent runtime")]
struct Cli {
    /// Human-readable logs instead of JSON.
    #[arg(long, global = true)]
    compact_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a task against a project, replaying model responses from a script.
    Run {
        /// Project directory the agent works in.
        #[arg(long)]
        cwd: PathBuf,

        /// JSON array of recorded model responses, one per step.
        #[arg(long)]
        script: PathBuf,

        /// Agent config file (JSON).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Persist conversation memory to this file.
        #[arg(long)]
        store: Option<PathBuf>,

        /// Characters per replayed stream chunk.
        #[arg(long, default_value = "16")]
        chunk: usize,

        /// The task for the agent.
        prompt: String,
    },

    /// Print the events the parser produces for a model response file.
    Parse {
        file: PathBuf,

        /// Feed the parser in chunks of this many characters.
        #[arg(long, default_value = "16")]
        chunk: usize,
    },

    /// List the tools available to the model.
    Tools,

    /// Compact a stored conversation and print the result.
    Compact {
        #[arg(long)]
        store: PathBuf,

        #[arg(long, default_value = MESSAGES_KEY)]
        key: String,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _telemetry = wright_telemetry::init_telemetry(TelemetryConfig {
        format: if cli.compact_logs {
            LogFormat::Compact
        } else {
            LogFormat::Json
        },
        ..Default::default()
    })?;

    match cli.command {
        Command::Run {
            cwd,
            script,
            config,
            store,
            chunk,
            prompt,
        } => run(&cwd, &script, config.as_deref(), store, chunk, &prompt).await,
        Command::Parse { file, chunk } => parse(&file, chunk),
        Command::Tools => tools(),
        Command::Compact { store, key, config } => compact(store, &key, config.as_deref()),
    }
}

async fn run(
    cwd: &Path,
    script: &Path,
    config: Option<&Path>,
    store: Option<PathBuf>,
    chunk: usize,
    prompt: &str,
) -> Result<()> {
    let config = AgentConfig::load(config).context("Failed to load agent config")?;
    let provider = ReplayProvider::from_file(script, chunk)
        .with_context(|| format!("Failed to load script: {}", script.display()))?;
    let store: Arc<dyn ListStore> = match store {
        Some(path) => Arc::new(FileListStore::open(path)),
        None => Arc::new(MemoryListStore::new()),
    };
    let backup_root = std::env::temp_dir().join("wright-backups");

    let orchestrator = Orchestrator::new(
        cwd,
        config,
        Collaborators {
            provider: Arc::new(provider),
            runner: Arc::new(LoggingRunner),
            snapshotter: Arc::new(GitSnapshotter),
            backup: Arc::new(DirectoryBackup::new(backup_root)),
            merger: Arc::new(SearchReplaceMerger),
            store,
        },
    );

    let (sink, mut events) = mpsc::unbounded_channel::<StreamEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                let _ = writeln!(std::io::stdout().lock(), "{line}");
            }
        }
    });

    let task_id = orchestrator.run(prompt, &sink).await;
    drop(sink);
    printer.await.context("event printer panicked")?;

    let snapshot = orchestrator.state_snapshot();
    info!(task_id = %task_id, status = ?snapshot.status, "task finished");
    Ok(())
}

fn parse(file: &Path, chunk: usize) -> Result<()> {
    let text = std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let mut parser = MessageParser::new();
    let mut stdout = std::io::stdout().lock();
    for piece in chunk_text(&text, chunk.max(1)) {
        for event in parser.feed(&piece) {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        }
    }
    for event in parser.finish() {
        writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
    }
    Ok(())
}

fn tools() -> Result<()> {
    let orchestrator = Orchestrator::new(
        std::env::current_dir()?,
        AgentConfig::default(),
        Collaborators {
            provider: Arc::new(ReplayProvider::from_json("[]", 1)?),
            runner: Arc::new(LoggingRunner),
            snapshotter: Arc::new(GitSnapshotter),
            backup: Arc::new(DirectoryBackup::new(std::env::temp_dir())),
            merger: Arc::new(SearchReplaceMerger),
            store: Arc::new(MemoryListStore::new()),
        },
    );
    let mut stdout = std::io::stdout().lock();
    for (name, description) in orchestrator.tool_catalog() {
        writeln!(stdout, "{name}\n    {description}")?;
    }
    Ok(())
}

fn compact(store: PathBuf, key: &str, config: Option<&Path>) -> Result<()> {
    let config = AgentConfig::load(config).context("Failed to load agent config")?;
    let store = CompactingListStore::new(
        Arc::new(FileListStore::open(store)),
        Arc::new(CharEstimator),
        config.store_config(),
    );
    let stats = store.perform_compaction(key)?;
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}
