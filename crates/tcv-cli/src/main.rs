//! # tcv — TinCan Viewer on the command line
//!
//! - `tcv search [filters]` — Merged statement feed across every configured LRS.
//! - `tcv query-url [filters]` — The statements URL each LRS would be sent.
//! - `tcv sources` — Configured record stores.

use std::path::PathBuf;

use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use tabled::{Table, Tabled};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tcv_core::render::{relative_age, render_line};
use tcv_core::{SearchForm, ViewerConfig};
use tcv_merge::{Feed, Viewer};

/// Browse statements from several learning record stores as one feed.
#[derive(Parser, Debug)]
#[command(name = "tcv", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true, default_value = "tcv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search all selected stores and print the merged feed.
    Search {
        #[command(flatten)]
        filters: Filters,

        /// Pages to fetch before stopping (at least 1).
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
        pages: u64,

        /// One JSON statement per line.
        #[arg(long)]
        json: bool,

        /// Print each statement's raw JSON under its summary.
        #[arg(long)]
        raw: bool,
    },

    /// Print the query URL for each selected store.
    QueryUrl {
        #[command(flatten)]
        filters: Filters,
    },

    /// List configured stores.
    Sources,
}

/// Search filters, as on the viewer's search form.
#[derive(Args, Debug)]
struct Filters {
    /// Actor as raw JSON (overrides --actor-email/--actor-account).
    #[arg(long)]
    actor_json: Option<String>,
    #[arg(long)]
    actor_email: Option<String>,
    /// `homePage::accountName`
    #[arg(long)]
    actor_account: Option<String>,
    #[arg(long)]
    verb: Option<String>,
    /// Object as raw JSON (overrides --activity-id).
    #[arg(long)]
    object_json: Option<String>,
    #[arg(long)]
    activity_id: Option<String>,
    #[arg(long)]
    registration: Option<String>,
    /// Also match statements that reference the object through context.
    #[arg(long)]
    context: bool,
    #[arg(long)]
    since: Option<String>,
    #[arg(long)]
    until: Option<String>,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    authoritative: bool,
    #[arg(long)]
    sparse: bool,
    #[arg(long)]
    instructor_json: Option<String>,
    /// Only query stores speaking this version (0.9, 0.95, 1.0.0 or all).
    #[arg(long = "lrs-version")]
    lrs_version: Option<String>,
}

impl Filters {
    fn to_form(&self) -> SearchForm {
        SearchForm {
            actor_json: self.actor_json.clone(),
            actor_email: self.actor_email.clone(),
            actor_account: self.actor_account.clone(),
            verb: self.verb.clone(),
            object_json: self.object_json.clone(),
            activity_id: self.activity_id.clone(),
            registration: self.registration.clone(),
            context: self.context,
            since: self.since.clone(),
            until: self.until.clone(),
            authoritative: self.authoritative,
            sparse: self.sparse,
            instructor_json: self.instructor_json.clone(),
            version: self.lrs_version.clone(),
        }
    }
}

#[derive(Tabled)]
struct SourceRow {
    name: String,
    version: String,
    endpoint: String,
    id: String,
}

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    if let Err(e) = rt.block_on(run(cli)) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> tcv_core::Result<()> {
    let config = ViewerConfig::load(&cli.config)?;
    config.validate()?;
    tracing::debug!(
        "Loaded {} sources from {}",
        config.sources.len(),
        cli.config.display()
    );

    match cli.command {
        Commands::Sources => {
            if config.sources.is_empty() {
                eprintln!("No [[lrs]] entries in {}", cli.config.display());
                return Ok(());
            }
            let rows: Vec<SourceRow> = config
                .sources
                .iter()
                .map(|lrs| SourceRow {
                    name: lrs.display_name(),
                    version: lrs.version.to_string(),
                    endpoint: lrs.endpoint_url(),
                    id: lrs.source_id().to_string(),
                })
                .collect();
            println!("{}", Table::new(rows));
        }

        Commands::QueryUrl { filters } => {
            let viewer = Viewer::from_config(&config)?;
            for (source, url) in viewer.query_urls(&filters.to_form())? {
                println!("{}\t{}", source, url);
            }
        }

        Commands::Search {
            filters,
            pages,
            json,
            raw,
        } => {
            let mut viewer = Viewer::from_config(&config)?;
            let raw = raw && config.viewer.include_raw_data;

            let mut feed = viewer.search(&filters.to_form()).await?;
            let mut fetched = 1;
            loop {
                print_feed(&feed, json, raw)?;
                if fetched >= pages || !feed.more_available {
                    break;
                }
                feed = viewer.more().await;
                fetched += 1;
            }

            if feed.exhausted {
                eprintln!("-- end of statements --");
            } else {
                eprintln!("-- more available (use --pages) --");
            }
        }
    }

    Ok(())
}

fn print_feed(feed: &Feed, json: bool, raw: bool) -> tcv_core::Result<()> {
    let now = Utc::now();
    for stmt in &feed.statements {
        if json {
            println!("{}", serde_json::to_string(stmt)?);
            continue;
        }

        let age = relative_age(&stmt.stored, now).unwrap_or_else(|| stmt.stored.clone());
        println!("{}  ({})", render_line(stmt), age);
        if raw {
            println!("{}", serde_json::to_string_pretty(stmt)?);
        }
    }
    Ok(())
}
