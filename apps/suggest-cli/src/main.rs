mod input;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use suggest_analysis::StrategyRegistry;
use suggest_core::config::Config;
use suggest_core::Record;
use suggest_engine::{ElevateWord, FileTranslog, PopularWordsRequest, QueryLog, SuggestRequest, Suggester};
use suggest_store::TantivyBackend;

#[derive(Parser)]
#[command(name = "suggest", about = "Build and query an autocomplete suggestion set", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the first index generation and its aliases if none exist
    Init,

    /// Index documents (or query logs with --queries) from a JSON/JSONL file or directory
    Ingest {
        path: PathBuf,

        /// Treat records as `{ "q": ..., "fq": ... }` query logs
        #[arg(long)]
        queries: bool,
    },

    /// Replay translog files through the ingestion pipeline
    Replay {
        #[arg(required = true)]
        logs: Vec<PathBuf>,
    },

    /// Suggest completions for what the user has typed so far
    Query {
        text: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        size: usize,

        #[arg(long)]
        tag: Vec<String>,

        #[arg(long)]
        role: Vec<String>,
    },

    /// Most searched phrases
    Popular {
        #[arg(short = 'n', long, default_value_t = 10)]
        size: usize,

        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Rebuild into a fresh generation from `path`, then switch searches to it
    Rollover {
        path: PathBuf,

        #[arg(long)]
        queries: bool,
    },

    /// Manage words that must never be suggested
    BadWord {
        #[command(subcommand)]
        action: BadWordAction,
    },

    /// Manage administrator-pinned phrases
    Elevate {
        #[command(subcommand)]
        action: ElevateAction,
    },

    /// Delete non-pinned items last touched before a timestamp
    Purge {
        /// Epoch milliseconds
        #[arg(long)]
        before: i64,
    },

    /// Item counts of the searchable generation
    Stats,
}

#[derive(Subcommand)]
enum BadWordAction {
    Add {
        word: String,

        /// Also delete existing items containing the word
        #[arg(long)]
        apply: bool,
    },
    Delete {
        word: String,
    },
}

#[derive(Subcommand)]
enum ElevateAction {
    Add {
        word: String,

        #[arg(long, default_value_t = 1.0)]
        boost: f32,

        #[arg(long)]
        reading: Vec<String>,

        #[arg(long)]
        tag: Vec<String>,

        #[arg(long)]
        role: Vec<String>,
    },
    Delete {
        word: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?.suggest()?;
    let analyzer = StrategyRegistry::with_defaults().build_analyzer(&config.analysis)?;
    let backend = TantivyBackend::from_config(&config.storage)?;
    let suggester = Suggester::new(config, Arc::new(backend), Arc::new(analyzer))?;
    if suggester.create_if_nothing().await? {
        info!(id = %suggester.config().id, "created suggestion set");
    }

    let outcome = run(&suggester, cli.command).await;
    suggester.shutdown();
    outcome
}

async fn run(suggester: &Suggester, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Init => {
            println!("generations: {:?}", suggester.lifecycle().indices().await?);
        }
        Commands::Ingest { path, queries } => {
            let (inputs, words) = ingest(suggester, &path, queries).await?;
            suggester.refresh().await?;
            println!("✅ Indexed {inputs} records into {words} suggest words");
        }
        Commands::Replay { logs } => replay(suggester, &logs).await?,
        Commands::Query { text, size, tag, role } => {
            let request = SuggestRequest::from_config(text, &suggester.config().ranking)
                .with_size(size)
                .with_tags(tag)
                .with_roles(role);
            let response = suggester.suggest(&request).await?;
            println!("🔍 {} of {} matches ({:?})", response.num, response.total, response.took);
            for (i, item) in response.items.iter().enumerate() {
                println!("  {}. {}  score={:.3} docFreq={} queryFreq={}", i + 1, item.text(), item.score(), item.doc_freq(), item.query_freq());
            }
        }
        Commands::Popular { size, exclude } => {
            let request = PopularWordsRequest { size, excludes: exclude, ..PopularWordsRequest::default() };
            let response = suggester.popular_words(&request).await?;
            for (i, item) in response.items.iter().enumerate() {
                println!("  {}. {}  queryFreq={}", i + 1, item.text(), item.query_freq());
            }
        }
        Commands::Rollover { path, queries } => {
            let next = suggester.create_next_index().await?;
            println!("Created generation {next}");
            let (inputs, words) = ingest(suggester, &path, queries).await?;
            suggester.refresh().await?;
            suggester.restore_elevate_words().await?;
            suggester.refresh().await?;
            println!("Indexed {inputs} records into {words} suggest words");
            if suggester.switch_index().await? {
                println!("Searches now read {next}");
            }
            for removed in suggester.remove_disabled_index().await? {
                println!("Removed {removed}");
            }
        }
        Commands::BadWord { action } => match action {
            BadWordAction::Add { word, apply } => {
                suggester.add_bad_word(&word, apply).await?;
                println!("Added bad word {word}");
            }
            BadWordAction::Delete { word } => {
                suggester.delete_bad_word(&word).await?;
                println!("Removed bad word {word}");
            }
        },
        Commands::Elevate { action } => match action {
            ElevateAction::Add { word, boost, reading, tag, role } => {
                let elevate = ElevateWord { readings: reading, tags: tag, roles: role, ..ElevateWord::new(word, boost) };
                let response = suggester.add_elevate_word(&elevate, true).await?;
                suggester.refresh().await?;
                if response.has_error() {
                    anyhow::bail!("elevate word failed: {:?}", response.errors);
                }
                println!("Elevated {}", elevate.word);
            }
            ElevateAction::Delete { word } => {
                suggester.delete_elevate_word(&word, true).await?;
                suggester.refresh().await?;
                println!("Removed elevate word {word}");
            }
        },
        Commands::Purge { before } => {
            let deleted = suggester.delete_older_than(before).await?;
            suggester.refresh().await?;
            println!("Purged {deleted} items");
        }
        Commands::Stats => {
            println!("all words:      {}", suggester.all_words_num().await?);
            println!("document words: {}", suggester.document_words_num().await?);
            println!("query words:    {}", suggester.query_words_num().await?);
        }
    }
    Ok(())
}

/// Index every record under `path`; returns (records read, suggest words written).
async fn ingest(suggester: &Suggester, path: &Path, queries: bool) -> anyhow::Result<(usize, usize)> {
    let files = input::input_files(path)?;
    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );

    let (mut inputs, mut words) = (0, 0);
    for file in files {
        let values = input::read_values(&file)?;
        let response = if queries {
            let logs = values
                .into_iter()
                .map(serde_json::from_value::<QueryLog>)
                .collect::<Result<Vec<_>, _>>()?;
            suggester.index_from_query_logs(&logs).await?
        } else {
            let docs: Vec<Record> = values
                .into_iter()
                .filter_map(|v| match v {
                    Value::Object(record) => Some(record),
                    other => {
                        tracing::warn!(file = %file.display(), value = %other, "skipping non-object record");
                        None
                    }
                })
                .collect();
            suggester.index_from_documents(&docs).await?
        };
        for error in &response.errors {
            tracing::warn!(id = %error.id, reason = %error.reason, "suggest item not written");
        }
        inputs += response.num_input_docs;
        words += response.num_suggest_words;
        pb.inc(1);
        pb.set_message(format!("{words} words"));
    }
    pb.finish_and_clear();
    Ok((inputs, words))
}

async fn replay(suggester: &Suggester, logs: &[PathBuf]) -> anyhow::Result<()> {
    let replicator = suggester.start_replicator();
    let pipeline = suggester.start_pipeline();
    for path in logs {
        replicator.enqueue(FileTranslog::open(path)?)?;
    }
    loop {
        let stats = replicator.stats();
        if stats.logs == logs.len() as u64 && pipeline.queued() == 0 && pipeline.processed() >= stats.entries {
            break;
        }
        if !pipeline.is_alive() {
            anyhow::bail!("ingestion pipeline stopped during replay");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    suggester.refresh().await?;
    let stats = replicator.stats();
    println!("✅ Replayed {} entries from {} logs ({} skipped)", stats.entries, stats.logs, stats.anomalies);
    Ok(())
}
