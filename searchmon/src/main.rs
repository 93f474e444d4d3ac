//! searchmon - site-search behavior metrics from visitor-log exports
//!
//! Reads visits from a JSON-lines export, caches daily aggregates in the
//! local SQLite database and prints period series.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use searchmon_core::analytics::{MetricAggregator, MetricQuery};
use searchmon_core::{
    CacheScope, Config, DailyAggregateCache, Database, DateRange, DateRangeDecomposer,
    SeriesPoint, StaticVisitFeed,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "searchmon")]
#[command(about = "Site-search behavior metrics from visitor logs")]
#[command(version)]
struct Cli {
    /// Visitor-log export, one JSON visit per line
    #[arg(long, global = true)]
    visits: Option<PathBuf>,

    /// Cache database path (defaults to the XDG data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format: text (default) or json
    #[arg(short, long, global = true, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone)]
struct QueryArgs {
    /// Site ID
    #[arg(long, default_value_t = 1)]
    site: i64,

    /// day, week, month or range
    #[arg(short, long, default_value = "day")]
    period: String,

    /// A day or a start,end pair (YYYY-MM-DD, today, yesterday)
    #[arg(short, long)]
    date: String,

    /// Visitor segment definition
    #[arg(long)]
    segment: Option<String>,
}

impl QueryArgs {
    fn query(&self) -> MetricQuery {
        MetricQuery {
            site_id: self.site,
            period: self.period.clone(),
            date: self.date.clone(),
            segment: self.segment.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Average seconds on a clicked search result
    Tendency(QueryArgs),
    /// Repeat search groups and all search groups
    RepeatCount(QueryArgs),
    /// Percentage of repeated search groups
    RepeatRate(QueryArgs),
    /// Bounced searches and all searches
    BounceCount(QueryArgs),
    /// Percentage of bounced searches
    BounceRate(QueryArgs),
    /// Pace-time distribution table for one period
    Distribution(QueryArgs),
    /// Pace-time distribution per bucket
    DistributionSeries(QueryArgs),
    /// Visits per bucket
    Visits(QueryArgs),
    /// Search results clicked for a keyword
    Related {
        #[command(flatten)]
        query: QueryArgs,

        /// Keyword whose click-throughs to list
        #[arg(short, long)]
        keyword: String,
    },
    /// Keywords searched in a period
    Keywords(QueryArgs),
    /// Compute and cache every day of a range
    Warm {
        /// Site ID
        #[arg(long, default_value_t = 1)]
        site: i64,

        /// First day (YYYY-MM-DD, today, yesterday)
        #[arg(long)]
        start: String,

        /// Last day (YYYY-MM-DD, today, yesterday)
        #[arg(long)]
        end: String,

        /// Visitor segment definition
        #[arg(long)]
        segment: Option<String>,

        /// Recompute days that are already cached
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        searchmon_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let json = match cli.format.as_str() {
        "text" => false,
        "json" => true,
        other => anyhow::bail!("unknown output format '{}' (expected text or json)", other),
    };

    let visits_path = cli
        .visits
        .as_ref()
        .context("--visits <FILE> is required")?;
    let feed = StaticVisitFeed::from_jsonl(visits_path)
        .with_context(|| format!("failed to load visits from {}", visits_path.display()))?;

    // Open database
    let db_path = cli.db.clone().unwrap_or_else(Config::database_path);
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let decomposer = DateRangeDecomposer::for_today();
    let aggregator = MetricAggregator::new(
        DailyAggregateCache::new(&feed, &db, &config.analysis),
        decomposer,
        &config.analysis,
    );

    match &cli.command {
        Command::Tendency(args) => {
            let series = aggregator.pace_time_tendency(&args.query())?;
            print_series(json, &series, |v| format!("{:.2}s", v))?;
        }
        Command::RepeatCount(args) => {
            let series = aggregator.repeating_search_counts(&args.query())?;
            print_series(json, &series, |v| {
                format!("{} of {}", v.repeat_count, v.repeat_total)
            })?;
        }
        Command::RepeatRate(args) => {
            let series = aggregator.repeating_search_rate(&args.query())?;
            print_series(json, &series, |v| format!("{:.2}%", v))?;
        }
        Command::BounceCount(args) => {
            let series = aggregator.bounce_search_counts(&args.query())?;
            print_series(json, &series, |v| {
                format!("{} of {}", v.bounce_count, v.bounce_total)
            })?;
        }
        Command::BounceRate(args) => {
            let series = aggregator.bounce_search_rate(&args.query())?;
            print_series(json, &series, |v| format!("{:.2}%", v))?;
        }
        Command::Distribution(args) => {
            let rows = aggregator.pace_time_distribution(&args.query())?;
            if json {
                print_json(&rows)?;
            } else {
                for row in rows {
                    println!("{:<10} {}", row.label, row.count);
                }
            }
        }
        Command::DistributionSeries(args) => {
            let series = aggregator.pace_time_distribution_series(&args.query())?;
            print_series(json, &series, |v| {
                v.counts
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            })?;
        }
        Command::Visits(args) => {
            let series = aggregator.visit_counts(&args.query())?;
            print_series(json, &series, |v| v.to_string())?;
        }
        Command::Related { query, keyword } => {
            let rows = aggregator.related_content(&query.query(), keyword)?;
            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No related content for '{}'.", keyword);
            } else {
                for row in rows {
                    println!("{:<8} {}", row.kind.as_str(), row.url);
                }
            }
        }
        Command::Keywords(args) => {
            let keywords = aggregator.search_keywords(&args.query(), &feed)?;
            if json {
                print_json(&keywords)?;
            } else {
                for keyword in keywords {
                    println!("{:>6}  {}", keyword.searches, keyword.keyword);
                }
            }
        }
        Command::Warm {
            site,
            start,
            end,
            segment,
            force,
        } => {
            let start = decomposer
                .resolve_date(start)
                .with_context(|| format!("invalid start date '{}'", start))?;
            let end = decomposer
                .resolve_date(end)
                .with_context(|| format!("invalid end date '{}'", end))?;
            if start > end {
                anyhow::bail!("start date {} is after end date {}", start, end);
            }

            let scope = CacheScope::new(*site, segment.as_deref());
            let stats = aggregator
                .cache()
                .backfill(&scope, DateRange::new(start, end), *force)
                .context("failed to warm the aggregate cache")?;

            tracing::info!(
                site_id = *site,
                computed = stats.computed,
                cached = stats.cached,
                "Warm complete"
            );
            println!("Warm complete:");
            println!("  Days computed: {}", stats.computed);
            println!("  Days already cached: {}", stats.cached);
            println!("  Database: {}", db_path.display());
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_series<T: Serialize>(
    json: bool,
    series: &[SeriesPoint<T>],
    render: impl Fn(&T) -> String,
) -> Result<()> {
    if json {
        return print_json(series);
    }
    if series.is_empty() {
        println!("No buckets (series need a start,end date range).");
        return Ok(());
    }
    let width = series.iter().map(|p| p.label.len()).max().unwrap_or(0);
    for point in series {
        println!("{:<width$}  {}", point.label, render(&point.value));
    }
    Ok(())
}
