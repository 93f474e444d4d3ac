//! Analytics module for searchmon
//!
//! Provides the search-behavior metrics:
//! - Per-visit folds over ordered action traces
//! - The action-sequence analyzer combining the aggregate folds
//! - Period-level composition of daily aggregates
//!
//! ## Fold Framework
//!
//! Each metric is a [`SequenceFold`] that walks one visit at a time and adds
//! to an accumulator:
//! - Consumes visits from the feed, one page at a time
//! - Produces per-day aggregates stored in `daily_aggregates`
//! - Never carries state from one visit into the next
//!
//! See [`folds`] for the individual metrics and [`aggregator`] for series.

pub mod aggregator;
pub mod analyzer;
pub mod folds;

pub use aggregator::{MetricAggregator, MetricQuery};
pub use analyzer::ActionSequenceAnalyzer;
pub use folds::{
    classify_url, BounceFold, PaceTimeFold, RelatedContentFold, RepeatGroupFold, SequenceFold,
};
