//! # searchmon-core
//!
//! Core library for searchmon - site-search behavior metrics.
//!
//! This library provides:
//! - Domain types for visits, actions and metric aggregates
//! - Action-sequence analysis (repeat groups, bounces, pace time)
//! - A daily aggregate cache with SQLite storage
//! - Period composition into tendency, rate, count and distribution series
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Visit feed:** paginated visitor-log traces (external, read-only)
//! - **Daily aggregates:** one cached row per site, segment and day
//! - **Series:** period buckets summed from daily aggregates on demand
//!
//! ## Example
//!
//! ```rust,no_run
//! use searchmon_core::{Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! ```

// Re-export commonly used items at the crate root
pub use analytics::{ActionSequenceAnalyzer, MetricAggregator, MetricQuery};
pub use cache::{AggregateStore, DailyAggregateCache};
pub use config::Config;
pub use dates::{DateRange, DateRangeDecomposer};
pub use db::Database;
pub use error::{Error, Result};
pub use feed::{KeywordSource, StaticVisitFeed, VisitFeed};
pub use types::*;

// Public modules
pub mod analytics;
pub mod cache;
pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;
pub mod types;
