use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use housetrain::bus::create_change_bus;
use housetrain::cache::SqliteCache;
use housetrain::config;
use housetrain::gateway::RestGateway;
use housetrain::model::{ActivityDraft, FeedingDraft, Location, WalkDraft};
use housetrain::service::{RecordError, Tracker};
use housetrain::stats::StatsSummary;

#[derive(Debug, Parser)]
#[command(author, version, about = "Log puppy walks, accidents and meals; show progress")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Quick log of a pee and/or poop
    Walk {
        /// Where the pee happened (inside|outside)
        #[arg(long)]
        pee: Option<Location>,
        /// Where the poop happened (inside|outside)
        #[arg(long)]
        poop: Option<Location>,
        /// RFC 3339 time, defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Full walk/activity log
    Activity {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        location: Option<String>,
        /// Minutes, 0-480
        #[arg(long)]
        duration: Option<String>,
        #[arg(long)]
        pee: bool,
        #[arg(long)]
        pee_incident: bool,
        #[arg(long)]
        poop: bool,
        #[arg(long)]
        poop_incident: bool,
        #[arg(long)]
        treat: bool,
        /// The dog asked to go out
        #[arg(long)]
        asked: bool,
        #[arg(long)]
        at: Option<String>,
    },
    /// Log a meal
    Feed {
        /// Food type; repeat for several
        #[arg(long = "type")]
        food_types: Vec<String>,
        #[arg(long)]
        amount: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        at: Option<String>,
    },
    /// Show success statistics
    Stats {
        /// Only count records since local midnight
        #[arg(long)]
        today: bool,
    },
}

fn start_of_today() -> DateTime<Utc> {
    Local::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() - Duration::hours(24))
}

fn print_summary(summary: &StatsSummary) {
    println!("Outside: {}", summary.outside);
    println!("Inside:  {}", summary.inside);
    println!("Total:   {}", summary.total);
    println!("Success: {}%", summary.percentage);
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

    let gateway = Arc::new(RestGateway::from_config(&cfg)?);
    let cache = Arc::new(SqliteCache::open(&cfg.cache_database_url()).await?);
    let bus = create_change_bus();
    let _changes = bus.subscribe(|event| {
        info!(kind = %event.kind, "data changed");
        Ok(())
    });

    let tracker = Tracker::new(gateway)
        .with_policy(cfg.retry.policy(), cfg.retry.batch_concurrency)
        .with_cache(cache)
        .with_cache_ttl(cfg.app.cache_ttl())
        .with_bus(bus.clone());

    let now = Utc::now().to_rfc3339();
    let result = match args.command {
        Command::Walk { pee, poop, at } => {
            let draft = WalkDraft {
                pee: pee.is_some(),
                pee_location: pee,
                poop: poop.is_some(),
                poop_location: poop,
                timestamp: at.unwrap_or(now),
            };
            tracker.log_walk(&draft).await.map(|record| {
                let describe = |need: &str, loc: Option<Location>| {
                    loc.map(|l| format!(" {} {}", need, l.as_str()))
                        .unwrap_or_default()
                };
                println!(
                    "Walk saved ({}):{}{}",
                    record.id,
                    describe("pee", record.pee_location),
                    describe("poop", record.poop_location)
                );
            })
        }
        Command::Activity {
            title,
            description,
            location,
            duration,
            pee,
            pee_incident,
            poop,
            poop_incident,
            treat,
            asked,
            at,
        } => {
            let draft = ActivityDraft {
                title,
                description,
                location,
                duration_minutes: duration,
                timestamp: at.unwrap_or(now),
                pee,
                pee_incident,
                poop,
                poop_incident,
                treat,
                dog_asked_for_walk: asked,
            };
            tracker
                .log_activity(&draft)
                .await
                .map(|record| println!("Activity saved ({})", record.id))
        }
        Command::Feed {
            food_types,
            amount,
            notes,
            at,
        } => {
            let draft = FeedingDraft {
                food_types,
                amount,
                notes,
                timestamp: at.unwrap_or(now),
            };
            tracker
                .log_feeding(&draft)
                .await
                .map(|record| println!("Feeding saved ({}): {}", record.id, record.food_types.join(", ")))
        }
        Command::Stats { today } => {
            let summary = if today {
                tracker.load_stats_since(start_of_today()).await
            } else {
                tracker.load_stats().await
            };
            summary
                .map(|s| print_summary(&s))
                .map_err(RecordError::from)
        }
    };

    bus.clear();
    if let Err(err) = result {
        bail!("{}", err.user_message());
    }
    Ok(())
}
