//! # Alcove CLI
//!
//! The `alcove` binary is the command-line surface over the knowledge-base
//! engine. Every command reads a TOML config (`--config`) and acts on
//! behalf of one user (`--user`).
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `alcove init` | Create the user's data directory, database, and index |
//! | `alcove space create/list/show/update/delete` | Manage spaces |
//! | `alcove save message <space> <text>` | Save a text message (synchronous ingestion) |
//! | `alcove save file <space> <path>` | Upload a file: extract, embed, index |
//! | `alcove items <space>` | List a space's items |
//! | `alcove delete <space> <item>` | Delete one item |
//! | `alcove ask <space> "<question>"` | Ask a question grounded in the space |
//! | `alcove history <space>` | List answered queries |
//! | `alcove search <space> "<text>"` | Semantic search within a space |
//! | `alcove search-all "<text>"` | Semantic search across all spaces |
//! | `alcove admin compact` | Rebuild the index without tombstones |
//! | `alcove admin reindex` | Re-embed everything (model migration) |

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use alcove::config;
use alcove::content;
use alcove::context::UserContext;
use alcove::deadline::Deadline;
use alcove::models::{Item, ItemStatus, Query, SearchHit, Space};
use alcove::{admin, query, search, spaces};

/// Alcove, a local-first personal knowledge base with grounded answers.
#[derive(Parser)]
#[command(
    name = "alcove",
    about = "A local-first personal knowledge base: spaces, embedded content, and grounded answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/alcove.toml")]
    config: PathBuf,

    /// User whose data directory the command operates on.
    #[arg(long, global = true, default_value = "default")]
    user: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the user's data directory, database schema, and index.
    ///
    /// Idempotent: running it again against an existing directory is safe.
    Init,

    /// Manage spaces.
    Space {
        #[command(subcommand)]
        action: SpaceAction,
    },

    /// Save content into a space (ingestion completes before returning).
    Save {
        #[command(subcommand)]
        what: SaveWhat,
    },

    /// List a space's items, newest first.
    Items {
        space_id: String,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Delete one item from a space (vector, file bytes, and metadata).
    Delete { space_id: String, item_id: String },

    /// Ask a question answered from the space's content, with sources.
    Ask {
        space_id: String,
        question: String,
        /// Number of items to retrieve (1–20).
        #[arg(long)]
        k: Option<usize>,
    },

    /// List answered queries for a space, newest first.
    History {
        space_id: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },

    /// Semantic search within one space.
    Search {
        space_id: String,
        text: String,
        #[arg(long)]
        k: Option<usize>,
    },

    /// Semantic search across all of the user's spaces.
    SearchAll {
        text: String,
        #[arg(long)]
        k: Option<usize>,
    },

    /// Maintenance operations on the vector index.
    Admin {
        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum SpaceAction {
    /// Create a space (name 1–50 chars, description up to 500).
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List the user's spaces with live item counts.
    List,
    /// Show one space.
    Show { space_id: String },
    /// Update a space's name and/or description.
    Update {
        space_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a space and everything in it.
    Delete { space_id: String },
}

#[derive(Subcommand)]
enum SaveWhat {
    /// Save a text message.
    Message {
        space_id: String,
        text: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Upload a file (pdf, docx, txt/md, png/jpg; 10 MiB limit).
    File {
        space_id: String,
        path: PathBuf,
        /// Declared MIME type; inferred from the extension when omitted.
        #[arg(long)]
        mime: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Rebuild the ANN payload from live entries, dropping tombstones.
    Compact,
    /// Re-embed every ready item and replace the index. Run after changing
    /// the embedding model or dimension.
    Reindex,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let ctx = UserContext::open(&cfg, &cli.user)
        .await
        .with_context(|| format!("open user context for '{}'", cli.user))?;
    let deadline = Deadline::after(Duration::from_secs(cfg.limits.query_deadline_secs));

    match cli.command {
        Commands::Init => {
            // Opening the context created everything already.
            println!("Initialized data directory for user '{}'.", cli.user);
        }

        Commands::Space { action } => match action {
            SpaceAction::Create { name, description } => {
                let space = spaces::create_space(&ctx, &name, description.as_deref()).await?;
                print_space(&space);
            }
            SpaceAction::List => {
                let all = spaces::list_spaces(&ctx).await?;
                if all.is_empty() {
                    println!("No spaces.");
                }
                for space in all {
                    print_space(&space);
                }
            }
            SpaceAction::Show { space_id } => {
                let space = spaces::get_space(&ctx, &space_id).await?;
                print_space(&space);
            }
            SpaceAction::Update {
                space_id,
                name,
                description,
            } => {
                let space =
                    spaces::update_space(&ctx, &space_id, name.as_deref(), description.as_deref())
                        .await?;
                print_space(&space);
            }
            SpaceAction::Delete { space_id } => {
                spaces::delete_space(&ctx, &space_id).await?;
                println!("Deleted space {}.", space_id);
            }
        },

        Commands::Save { what } => match what {
            SaveWhat::Message {
                space_id,
                text,
                notes,
            } => {
                let item =
                    content::save_message(&ctx, &space_id, &text, notes.as_deref(), &deadline)
                        .await?;
                print_item(&item);
            }
            SaveWhat::File {
                space_id,
                path,
                mime,
                notes,
            } => {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("read file {}", path.display()))?;
                let original_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let declared_mime = mime.unwrap_or_else(|| "application/octet-stream".to_string());

                let item = content::save_file(
                    &ctx,
                    &space_id,
                    &bytes,
                    &declared_mime,
                    &original_name,
                    notes.as_deref(),
                    &deadline,
                )
                .await?;
                print_item(&item);
            }
        },

        Commands::Items {
            space_id,
            limit,
            offset,
        } => {
            let items = content::list_items(&ctx, &space_id, limit, offset).await?;
            if items.is_empty() {
                println!("No items.");
            }
            for item in items {
                print_item(&item);
            }
        }

        Commands::Delete { space_id, item_id } => {
            content::delete_item(&ctx, &space_id, &item_id).await?;
            println!("Deleted item {}.", item_id);
        }

        Commands::Ask {
            space_id,
            question,
            k,
        } => {
            let answer = query::ask(&ctx, &space_id, &question, k, &deadline).await?;
            print_query(&answer);
        }

        Commands::History {
            space_id,
            limit,
            offset,
        } => {
            let queries = query::list_queries(&ctx, &space_id, limit, offset).await?;
            if queries.is_empty() {
                println!("No queries.");
            }
            for q in queries {
                print_query(&q);
                println!();
            }
        }

        Commands::Search { space_id, text, k } => {
            let hits = search::search_in_space(&ctx, &space_id, &text, k, &deadline).await?;
            print_hits(&hits);
        }

        Commands::SearchAll { text, k } => {
            let hits = search::global_search(&ctx, &text, k, &deadline).await?;
            print_hits(&hits);
        }

        Commands::Admin { action } => match action {
            AdminAction::Compact => {
                let report = admin::compact(&ctx)?;
                println!("admin compact");
                println!("  live entries: {}", report.items);
                println!("  tombstones dropped: {}", report.tombstones_before);
            }
            AdminAction::Reindex => {
                let report = admin::reindex(&ctx, &Deadline::none()).await?;
                println!("admin reindex");
                println!("  items re-embedded: {}", report.items);
                println!("  model: {}", ctx.embedder.model_name());
            }
        },
    }

    Ok(())
}

fn print_space(space: &Space) {
    println!(
        "{}  {}  ({} items)",
        space.id, space.name, space.item_count
    );
    if let Some(desc) = &space.description {
        println!("    {}", desc);
    }
}

fn print_item(item: &Item) {
    let status = match item.status {
        ItemStatus::Ready => "ready",
        ItemStatus::Pending => "pending",
        ItemStatus::Failed => "failed",
    };
    let preview: String = item.body_text().chars().take(60).collect();
    println!("{}  [{}] [{}] {}", item.id, item.kind.as_str(), status, preview);
    if let Some(reason) = &item.failure_reason {
        println!("    failure: {}", reason);
    }
}

fn print_query(q: &Query) {
    println!("question: {}", q.question);
    println!("answer: {}", q.answer);
    for (i, source) in q.sources.iter().enumerate() {
        println!(
            "  source {}: [{:.3}] [{}] {}  {}",
            i + 1,
            source.score,
            source.kind.as_str(),
            source.item_id,
            source.snippet.replace('\n', " ")
        );
    }
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("No results.");
    }
    for (i, hit) in hits.iter().enumerate() {
        let preview: String = hit.item.body_text().chars().take(60).collect();
        println!(
            "{}. [{:.3}] [{}] {}  {}",
            i + 1,
            hit.score,
            hit.item.space_id,
            hit.item.id,
            preview
        );
    }
}
