use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use secrecy::SecretString;
use std::path::{Path, PathBuf};

use jobfeeder::api::{JobsApi, RequestContext};
use jobfeeder::config::Config;
use jobfeeder::retention::cleanup_old_jobs;
use jobfeeder::scheduler::Scheduler;
use jobfeeder::settings::{ImportSettings, DEFAULT_STATUS_KEY, PUBLISHER_ID_KEY};
use jobfeeder::storage::{
    Database, DatabaseError, Feed, FeedStatus, FeedStore, Frequency, NewFeed, PostStatus,
    SettingsStore,
};
use jobfeeder::util::validate_base_url;

/// Get the config directory path (~/.config/jobfeeder/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("jobfeeder"))
}

#[derive(Parser, Debug)]
#[command(
    name = "jobfeeder",
    version,
    about = "Import WhatJobs listings into a local content store"
)]
struct Cli {
    /// Config file (default: ~/.config/jobfeeder/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import every active feed whose next run is due
    RunDue,

    /// Import one feed now, whatever its schedule
    RunFeed { id: i64 },

    /// Check the API credential with a one-result query
    TestConnection,

    /// Delete imported jobs older than the retention window
    Cleanup {
        /// Retention in days (default: retention_days from config)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Manage feeds
    #[command(subcommand)]
    Feed(FeedCommand),

    /// Manage stored settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand, Debug)]
enum FeedCommand {
    /// Create a feed
    Add(FeedArgs),

    /// Change a feed; omitted options keep their current values
    Edit {
        id: i64,
        #[command(flatten)]
        args: FeedArgs,
    },

    /// List feeds
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    Delete { id: i64 },

    /// Stop scheduling a feed
    Pause { id: i64 },

    /// Resume scheduling a feed
    Activate { id: i64 },
}

#[derive(Args, Debug)]
struct FeedArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    keyword: Option<String>,
    #[arg(long)]
    location: Option<String>,
    /// Results per request (1-100)
    #[arg(long)]
    limit: Option<u32>,
    #[arg(long)]
    page: Option<u32>,
    /// Owner of imported records
    #[arg(long)]
    author: Option<i64>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    job_type: Option<String>,
    /// 1h, 6h, 12h or 24h
    #[arg(long)]
    frequency: Option<Frequency>,
    /// active or inactive
    #[arg(long)]
    status: Option<FeedStatus>,
}

impl FeedArgs {
    /// Overlay the given options on `base`.
    fn apply(self, mut base: NewFeed) -> NewFeed {
        if self.name.is_some() {
            base.name = self.name;
        }
        if let Some(keyword) = self.keyword {
            base.keyword = keyword;
        }
        if let Some(location) = self.location {
            base.location = location;
        }
        if let Some(limit) = self.limit {
            base.limit = limit;
        }
        if let Some(page) = self.page {
            base.page = page;
        }
        if let Some(author) = self.author {
            base.author_id = author;
        }
        if let Some(category) = self.category {
            base.category = category;
        }
        if let Some(job_type) = self.job_type {
            base.job_type = job_type;
        }
        if let Some(frequency) = self.frequency {
            base.frequency = frequency;
        }
        if let Some(status) = self.status {
            base.status = status;
        }
        base
    }
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Show effective settings (the credential is masked)
    Show,

    /// Store the WhatJobs publisher credential
    SetPublisher { value: String },

    /// Status for new imports: publish, draft or pending
    SetDefaultStatus { status: PostStatus },
}

async fn open_database(path: &Path) -> Result<Database> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The database is locked by another jobfeeder process. Try again later.");
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

fn build_api(config: &Config, publisher_id: Option<SecretString>) -> Result<JobsApi> {
    let base_url = validate_base_url(&config.api_base_url)
        .with_context(|| format!("Invalid api_base_url '{}'", config.api_base_url))?;
    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    Ok(JobsApi::new(
        client,
        base_url,
        publisher_id,
        RequestContext::from_config(config),
    ))
}

fn print_feeds(feeds: &[Feed]) {
    if feeds.is_empty() {
        println!("No feeds configured.");
        return;
    }
    println!(
        "{:>4}  {:<28} {:<8} {:>5}  {:<4} {:<20} {:<20}",
        "ID", "NAME", "STATUS", "LIMIT", "FREQ", "LAST RUN", "NEXT RUN"
    );
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string())
    };
    for feed in feeds {
        println!(
            "{:>4}  {:<28} {:<8} {:>5}  {:<4} {:<20} {:<20}",
            feed.id,
            feed.name,
            feed.status.as_str(),
            feed.limit,
            feed.frequency.as_str(),
            fmt_time(feed.last_run),
            fmt_time(feed.next_run)
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; RUST_LOG controls verbosity
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = get_config_dir()?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?
        .with_env_overrides();

    // Relative database paths live next to the config file
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config_dir.clone());
    if !base_dir.as_os_str().is_empty() && !base_dir.exists() {
        std::fs::create_dir_all(&base_dir).context("Failed to create config directory")?;
    }
    let db_path = config.database_path_in(&base_dir);
    let db = open_database(&db_path).await?;

    match cli.command {
        Command::RunDue => {
            let settings = ImportSettings::load(&db, &config).await?;
            let api = build_api(&config, settings.publisher_id)?;
            let scheduler = Scheduler::new(&db, &api, settings.default_status);
            let report = scheduler.run_due_feeds().await?;
            if report.skipped_locked {
                println!("Another run is in progress; nothing to do.");
            } else {
                println!(
                    "Processed {} feeds: {} succeeded, {} failed, {} jobs imported",
                    report.processed, report.succeeded, report.failed, report.imported
                );
            }
        }

        Command::RunFeed { id } => {
            let settings = ImportSettings::load(&db, &config).await?;
            let api = build_api(&config, settings.publisher_id)?;
            let scheduler = Scheduler::new(&db, &api, settings.default_status);
            let summary = scheduler
                .run_feed(id)
                .await
                .with_context(|| format!("Feed {} failed", id))?;
            println!(
                "Imported {} of {} jobs ({} duplicates, {} errors)",
                summary.imported, summary.total, summary.duplicates, summary.errors
            );
        }

        Command::TestConnection => {
            let settings = ImportSettings::load(&db, &config).await?;
            let api = build_api(&config, settings.publisher_id)?;
            match api.test_connection().await {
                Ok(()) => println!("Connection OK."),
                Err(e) => {
                    eprintln!("Connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.retention_days);
            let deleted = cleanup_old_jobs(&db, days)
                .await
                .context("Retention sweep failed")?;
            println!("Deleted {} jobs older than {} days.", deleted, days);
        }

        Command::Feed(FeedCommand::Add(args)) => {
            let feed = args.apply(NewFeed::default());
            let id = db.insert_feed(&feed).await?;
            println!("Created feed {} ({}).", id, feed.display_name());
        }

        Command::Feed(FeedCommand::Edit { id, args }) => {
            let current = db
                .get_feed(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Feed {} not found", id))?;
            let feed = args.apply(NewFeed::from_feed(&current));
            db.update_feed(id, &feed).await?;
            println!("Updated feed {}.", id);
        }

        Command::Feed(FeedCommand::List { json }) => {
            let feeds = db.list_feeds().await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&feeds).context("Failed to encode feeds")?
                );
            } else {
                print_feeds(&feeds);
            }
        }

        Command::Feed(FeedCommand::Delete { id }) => {
            if !db.delete_feed(id).await? {
                anyhow::bail!("Feed {} not found", id);
            }
            println!("Deleted feed {}.", id);
        }

        Command::Feed(FeedCommand::Pause { id }) => {
            if !db.set_feed_status(id, FeedStatus::Inactive).await? {
                anyhow::bail!("Feed {} not found", id);
            }
            println!("Paused feed {}.", id);
        }

        Command::Feed(FeedCommand::Activate { id }) => {
            if !db.set_feed_status(id, FeedStatus::Active).await? {
                anyhow::bail!("Feed {} not found", id);
            }
            println!("Activated feed {}.", id);
        }

        Command::Settings(SettingsCommand::Show) => {
            let settings = ImportSettings::load(&db, &config).await?;
            println!("config file:     {}", config_path.display());
            println!("database:        {}", db_path.display());
            println!("api endpoint:    {}", config.api_base_url);
            println!(
                "publisher id:    {}",
                if settings.publisher_id.is_some() {
                    "[set]"
                } else {
                    "[not set]"
                }
            );
            println!("default status:  {}", settings.default_status);
            println!("retention days:  {}", config.retention_days);
        }

        Command::Settings(SettingsCommand::SetPublisher { value }) => {
            let value = value.trim();
            if value.is_empty() {
                anyhow::bail!("Publisher ID must not be empty");
            }
            db.set_setting(PUBLISHER_ID_KEY, value).await?;
            println!("Publisher ID saved.");
        }

        Command::Settings(SettingsCommand::SetDefaultStatus { status }) => {
            db.set_setting(DEFAULT_STATUS_KEY, status.as_str()).await?;
            println!("Default status set to {}.", status);
        }
    }

    Ok(())
}
