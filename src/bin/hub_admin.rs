use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tunerguy_hub::config;
use tunerguy_hub::db;
use tunerguy_hub::embed::FetchOptions;
use tunerguy_hub::hub;
use tunerguy_hub::model::{NewPost, PageKind, PostEdit};
use tunerguy_hub::reddit::RedditClient;
use tunerguy_hub::snippets::{self, SnippetError};
use tunerguy_hub::tracker::{self, TrackerError};

#[derive(Debug, Parser)]
#[command(author, version, about = "Editor tools for pages, posts and Reddit snippets")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manage Reddit embed snippets
    #[command(subcommand)]
    Snippet(SnippetCommand),
    /// Create pages in the tree
    #[command(subcommand)]
    Page(PageCommand),
    /// Publish and edit posts
    #[command(subcommand)]
    Post(PostCommand),
    /// Print the hub or category read model as JSON
    Overview { page_id: i64 },
}

#[derive(Debug, Subcommand)]
enum SnippetCommand {
    /// Validate the subreddit, fetch its top posts and store a new snippet
    Add { title: String, subreddit: String },
    /// List every snippet
    List,
    /// Show one snippet and its cached cards
    Show { id: i64 },
    /// Re-fetch one snippet now
    Refresh { id: i64 },
    /// Point a hub or category at a snippet; omit the snippet id to detach
    Attach { page_id: i64, snippet_id: Option<i64> },
    /// Delete a snippet; pages pointing at it are detached
    Delete { id: i64 },
    /// Store a snippet from a legacy `|`-joined cache string without fetching
    ImportLegacy {
        title: String,
        subreddit: String,
        encoded: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Home,
    Hub,
    Category,
}

impl From<KindArg> for PageKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Home => PageKind::Home,
            KindArg::Hub => PageKind::Hub,
            KindArg::Category => PageKind::Category,
        }
    }
}

#[derive(Debug, Subcommand)]
enum PageCommand {
    Add {
        #[arg(long)]
        parent: Option<i64>,
        #[arg(long, value_enum)]
        kind: KindArg,
        title: String,
    },
}

#[derive(Debug, Subcommand)]
enum PostCommand {
    Add {
        /// Category the post is published under
        #[arg(long)]
        parent: i64,
        /// Publish date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "")]
        snippet: String,
        title: String,
    },
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        snippet: Option<String>,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_invalid(message: String) -> ! {
    eprintln!("{message}");
    std::process::exit(2);
}

/// Validation problems go to stderr as `field: message`; everything else propagates.
fn report_snippet_error(err: SnippetError) -> Result<()> {
    match err {
        SnippetError::Validation(v) => exit_invalid(v.form_message()),
        other if other.is_user_facing() => exit_invalid(other.to_string()),
        other => Err(other.into()),
    }
}

fn report_tracker_error(err: TrackerError) -> Result<()> {
    match err {
        TrackerError::Validation(v) => exit_invalid(v.form_message()),
        other if other.is_user_facing() => exit_invalid(other.to_string()),
        other => Err(other.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let opts = FetchOptions::from(cfg.embeds);

    match args.command {
        Command::Snippet(cmd) => {
            let result = match cmd {
                SnippetCommand::Add { title, subreddit } => {
                    let reddit = RedditClient::from_config(&cfg).context("failed to build Reddit client")?;
                    snippets::create_snippet(&pool, &reddit, opts, &title, &subreddit)
                        .await
                        .and_then(|s| print_json(&s).map_err(SnippetError::from))
                }
                SnippetCommand::List => {
                    let all = db::list_reddit_embeds(&pool).await?;
                    for s in all {
                        println!(
                            "{}\t{}\tr/{}\t{} cached",
                            s.id,
                            s.title,
                            s.subreddit,
                            s.cached_posts.len()
                        );
                    }
                    Ok(())
                }
                SnippetCommand::Show { id } => snippets::load(&pool, id)
                    .await
                    .and_then(|s| print_json(&s).map_err(SnippetError::from)),
                SnippetCommand::Refresh { id } => {
                    let reddit = RedditClient::from_config(&cfg).context("failed to build Reddit client")?;
                    snippets::refresh_snippet(&pool, &reddit, opts, id)
                        .await
                        .and_then(|s| print_json(&s).map_err(SnippetError::from))
                }
                SnippetCommand::Attach { page_id, snippet_id } => {
                    snippets::attach_snippet(&pool, page_id, snippet_id).await
                }
                SnippetCommand::Delete { id } => snippets::delete_snippet(&pool, id).await,
                SnippetCommand::ImportLegacy {
                    title,
                    subreddit,
                    encoded,
                } => snippets::import_legacy_snippet(&pool, &title, &subreddit, &encoded)
                    .await
                    .and_then(|s| print_json(&s).map_err(SnippetError::from)),
            };
            if let Err(err) = result {
                report_snippet_error(err)?;
            }
        }
        Command::Page(PageCommand::Add { parent, kind, title }) => {
            let id = db::create_page(&pool, parent, kind.into(), &title).await?;
            println!("{id}");
        }
        Command::Post(PostCommand::Add {
            parent,
            date,
            snippet,
            title,
        }) => {
            match tracker::record_post(
                &pool,
                NewPost {
                    parent_id: parent,
                    title,
                    snippet,
                    date,
                },
            )
            .await
            {
                Ok(post) => print_json(&post)?,
                Err(err) => report_tracker_error(err)?,
            }
        }
        Command::Post(PostCommand::Edit {
            id,
            title,
            date,
            snippet,
        }) => {
            match tracker::update_post(&pool, id, PostEdit { title, snippet, date }).await {
                Ok(post) => print_json(&post)?,
                Err(err) => report_tracker_error(err)?,
            }
        }
        Command::Overview { page_id } => {
            let page = db::get_page(&pool, page_id)
                .await?
                .with_context(|| format!("page {page_id} not found"))?;
            if page.kind == PageKind::Category {
                print_json(&hub::category_overview(&pool, page_id).await?)?;
            } else {
                print_json(&hub::hub_overview(&pool, page_id).await?)?;
            }
        }
    }

    pool.close().await;
    Ok(())
}
