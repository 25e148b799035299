//! # Socratic Harness CLI (`soc`)
//!
//! ## Usage
//!
//! ```bash
//! soc --config ./config/soc.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `soc init` | Create the SQLite database and run schema migrations |
//! | `soc document add --title <t> <files…>` | Create a document and index its files |
//! | `soc document show <id>` | Show a document and what was derived from it |
//! | `soc summarize <doc>` | Generate the document summary |
//! | `soc rubrics generate <doc>` | Extract concepts and generate rubrics |
//! | `soc rubrics list <doc>` | List a document's rubrics |
//! | `soc misconception add <doc> …` | Register a known misconception |
//! | `soc conversation start <doc>` | Start a conversation, printing its id |
//! | `soc say <conversation> "<text>"` | Send a learner message and print the reply |
//! | `soc evaluate <conversation> [--force]` | Grade a conversation against the rubrics |
//! | `soc retrieve <doc> "<query>"` | Show the context retrieved for a query |
//!
//! Logs go to stderr and are controlled with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use socratic_harness::{commands, config, migrate};

/// Socratic Harness: retrieval-grounded Socratic dialogue and rubric-based
/// assessment over course material.
#[derive(Parser)]
#[command(
    name = "soc",
    about = "Socratic Harness: Socratic dialogue and rubric-based assessment over course material",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/soc.toml")]
    config: PathBuf,

    /// Print results as pretty JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Manage documents.
    Document {
        #[command(subcommand)]
        action: DocumentAction,
    },

    /// Generate the summary of a processed document.
    Summarize { document: String },

    /// Manage rubrics.
    Rubrics {
        #[command(subcommand)]
        action: RubricsAction,
    },

    /// Manage misconception patterns.
    Misconception {
        #[command(subcommand)]
        action: MisconceptionAction,
    },

    /// Manage conversations.
    Conversation {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Send a learner message and print the evaluator's reply.
    Say { conversation: String, text: String },

    /// Grade a conversation against its document's rubrics.
    Evaluate {
        conversation: String,

        /// Clear a marker left by an evaluation that never finished.
        #[arg(long)]
        force: bool,
    },

    /// Show the chunks and rubrics retrieved for a query.
    Retrieve { document: String, query: String },
}

#[derive(Subcommand)]
enum DocumentAction {
    /// Create a document from one or more files (PDF, DOCX, text, markdown).
    Add {
        #[arg(long)]
        title: String,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    Show {
        id: String,
    },
}

#[derive(Subcommand)]
enum RubricsAction {
    Generate { document: String },
    List { document: String },
}

#[derive(Subcommand)]
enum MisconceptionAction {
    Add {
        document: String,

        #[arg(long)]
        concept: String,

        #[arg(long)]
        name: String,

        /// Phrase that signals the misconception (repeatable).
        #[arg(long = "signal", required = true)]
        signals: Vec<String>,

        /// Follow-up question to ask when detected (repeatable).
        #[arg(long = "followup")]
        followups: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConversationAction {
    Start { document: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let json = cli.json;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Document { action } => match action {
            DocumentAction::Add { title, files } => {
                commands::run_document_add(&cfg, &title, &files, json).await?;
            }
            DocumentAction::Show { id } => {
                commands::run_document_show(&cfg, &id, json).await?;
            }
        },
        Commands::Summarize { document } => {
            commands::run_summarize(&cfg, &document, json).await?;
        }
        Commands::Rubrics { action } => match action {
            RubricsAction::Generate { document } => {
                commands::run_rubrics_generate(&cfg, &document, json).await?;
            }
            RubricsAction::List { document } => {
                commands::run_rubrics_list(&cfg, &document, json).await?;
            }
        },
        Commands::Misconception { action } => match action {
            MisconceptionAction::Add {
                document,
                concept,
                name,
                signals,
                followups,
            } => {
                commands::run_misconception_add(&cfg, &document, &concept, &name, signals, followups)
                    .await?;
            }
        },
        Commands::Conversation { action } => match action {
            ConversationAction::Start { document } => {
                commands::run_conversation_start(&cfg, &document).await?;
            }
        },
        Commands::Say { conversation, text } => {
            commands::run_say(&cfg, &conversation, &text, json).await?;
        }
        Commands::Evaluate {
            conversation,
            force,
        } => {
            commands::run_evaluate(&cfg, &conversation, force, json).await?;
        }
        Commands::Retrieve { document, query } => {
            commands::run_retrieve(&cfg, &document, &query, json).await?;
        }
    }

    Ok(())
}
