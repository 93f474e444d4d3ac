//! Period-level metrics
//!
//! [`MetricAggregator`] answers every query family by decomposing the
//! requested period into buckets, summing the cached daily aggregates of each
//! bucket and deriving the requested value from the sum.
//!
//! Days before the configured cutoff hold no data: a bucket that ends before
//! the cutoff is zero without any feed or store access, and a bucket that
//! straddles it only reads the days from the cutoff on. Days after today are
//! never read or cached.

use super::folds::{RelatedContentFold, SequenceFold};
use crate::cache::{AggregateStore, DailyAggregateCache};
use crate::config::AnalysisConfig;
use crate::dates::{DateRange, DateRangeDecomposer};
use crate::error::Result;
use crate::feed::{drain_pages, KeywordSource, VisitFeed};
use crate::types::{
    BounceStats, CacheScope, DistributionRow, KeywordCount, MetricFamily, MetricGroup,
    RelatedContent, RepeatStats, SeriesPoint, TimeDistribution,
};
use chrono::NaiveDate;

/// Parameters shared by every query family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub site_id: i64,
    /// `day`, `week`, `month` or `range`
    pub period: String,
    /// A day or a `start,end` pair
    pub date: String,
    pub segment: Option<String>,
}

impl MetricQuery {
    pub fn new(site_id: i64, period: &str, date: &str) -> Self {
        Self {
            site_id,
            period: period.to_string(),
            date: date.to_string(),
            segment: None,
        }
    }

    pub fn with_segment(mut self, segment: &str) -> Self {
        self.segment = Some(segment.to_string());
        self
    }

    fn scope(&self) -> CacheScope {
        CacheScope::new(self.site_id, self.segment.as_deref())
    }
}

/// Composes daily aggregates into period series.
pub struct MetricAggregator<F, S> {
    cache: DailyAggregateCache<F, S>,
    decomposer: DateRangeDecomposer,
    cutoff: NaiveDate,
    refresh_today: bool,
}

impl<F: VisitFeed, S: AggregateStore> MetricAggregator<F, S> {
    pub fn new(
        cache: DailyAggregateCache<F, S>,
        decomposer: DateRangeDecomposer,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            cache,
            decomposer,
            cutoff: config.cutoff_date,
            refresh_today: config.refresh_today,
        }
    }

    pub fn cache(&self) -> &DailyAggregateCache<F, S> {
        &self.cache
    }

    pub fn decomposer(&self) -> &DateRangeDecomposer {
        &self.decomposer
    }

    /// Average seconds spent on a clicked search result, per bucket.
    pub fn pace_time_tendency(&self, query: &MetricQuery) -> Result<Vec<SeriesPoint<f64>>> {
        self.derived_series(query, MetricFamily::Pace, |group| {
            group.as_pace().unwrap_or_default().average()
        })
    }

    pub fn repeating_search_counts(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<SeriesPoint<RepeatStats>>> {
        self.derived_series(query, MetricFamily::Repeat, |group| {
            group.as_repeat().unwrap_or_default()
        })
    }

    /// Percentage of repeat groups among all search groups, per bucket.
    pub fn repeating_search_rate(&self, query: &MetricQuery) -> Result<Vec<SeriesPoint<f64>>> {
        self.derived_series(query, MetricFamily::Repeat, |group| {
            group.as_repeat().unwrap_or_default().rate()
        })
    }

    pub fn bounce_search_counts(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<SeriesPoint<BounceStats>>> {
        self.derived_series(query, MetricFamily::Bounce, |group| {
            group.as_bounce().unwrap_or_default()
        })
    }

    /// Percentage of bounced searches, per bucket.
    pub fn bounce_search_rate(&self, query: &MetricQuery) -> Result<Vec<SeriesPoint<f64>>> {
        self.derived_series(query, MetricFamily::Bounce, |group| {
            group.as_bounce().unwrap_or_default().rate()
        })
    }

    pub fn pace_time_distribution_series(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<SeriesPoint<TimeDistribution>>> {
        self.derived_series(query, MetricFamily::Distribution, |group| {
            group.as_distribution().unwrap_or_default()
        })
    }

    /// The labeled distribution table for one period.
    ///
    /// Unlike the series queries this accepts a single date, which covers its
    /// day, week or month. A malformed query gives an empty table.
    pub fn pace_time_distribution(&self, query: &MetricQuery) -> Result<Vec<DistributionRow>> {
        let Some(span) = self.decomposer.span(&query.period, &query.date) else {
            return Ok(Vec::new());
        };
        let group = self.bucket_group(&query.scope(), MetricFamily::Distribution, span)?;
        Ok(group.as_distribution().unwrap_or_default().rows())
    }

    /// Visits per bucket, read straight from the feed.
    pub fn visit_counts(&self, query: &MetricQuery) -> Result<Vec<SeriesPoint<i64>>> {
        let scope = query.scope();
        let mut series = Vec::new();
        for bucket in self.decomposer.buckets(&query.period, &query.date) {
            let mut visits = 0i64;
            if let Some(range) = self.readable(bucket.range) {
                for day in range.days() {
                    let drained = drain_pages(
                        self.cache.feed(),
                        scope.site_id,
                        day,
                        scope.segment.as_deref(),
                        self.cache.page_size(),
                        |_| {},
                    )?;
                    visits += drained.visits as i64;
                }
            }
            series.push(SeriesPoint {
                key: bucket.key,
                label: bucket.label,
                value: visits,
            });
        }
        Ok(series)
    }

    /// Search results clicked for `keyword` over the query's span.
    pub fn related_content(
        &self,
        query: &MetricQuery,
        keyword: &str,
    ) -> Result<Vec<RelatedContent>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        let Some(range) = self
            .decomposer
            .span(&query.period, &query.date)
            .and_then(|span| self.readable(span))
        else {
            return Ok(Vec::new());
        };

        let scope = query.scope();
        let mut fold = RelatedContentFold::new(keyword);
        for day in range.days() {
            drain_pages(
                self.cache.feed(),
                scope.site_id,
                day,
                scope.segment.as_deref(),
                self.cache.page_size(),
                |page| {
                    for visit in page {
                        fold.fold_visit(&visit.actions);
                    }
                },
            )?;
        }
        Ok(fold.into_rows())
    }

    /// Keywords searched over the query's span, from an external listing.
    pub fn search_keywords(
        &self,
        query: &MetricQuery,
        source: &dyn KeywordSource,
    ) -> Result<Vec<KeywordCount>> {
        let Some(range) = self
            .decomposer
            .span(&query.period, &query.date)
            .and_then(|span| self.readable(span))
        else {
            return Ok(Vec::new());
        };
        source.search_keywords(
            query.site_id,
            range.start,
            range.end,
            query.segment.as_deref(),
        )
    }

    fn derived_series<T>(
        &self,
        query: &MetricQuery,
        family: MetricFamily,
        derive: impl Fn(&MetricGroup) -> T,
    ) -> Result<Vec<SeriesPoint<T>>> {
        let scope = query.scope();
        let buckets = self.decomposer.buckets(&query.period, &query.date);
        let mut series = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let group = self.bucket_group(&scope, family, bucket.range)?;
            series.push(SeriesPoint {
                key: bucket.key,
                label: bucket.label,
                value: derive(&group),
            });
        }
        Ok(series)
    }

    /// The part of `range` that can hold data: from the cutoff to today.
    fn readable(&self, range: DateRange) -> Option<DateRange> {
        if range.end < self.cutoff {
            return None;
        }
        range.clamp(self.cutoff, self.decomposer.today())
    }

    fn bucket_group(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<MetricGroup> {
        let Some(readable) = self.readable(range) else {
            tracing::debug!(
                start = %range.start,
                end = %range.end,
                cutoff = %self.cutoff,
                "Bucket outside data window, zero"
            );
            return Ok(MetricGroup::zero(family));
        };

        let today = self.decomposer.today();
        if self.refresh_today && readable.end == today {
            self.cache.resolve_day(scope, family, today, true)?;
        }
        self.cache.fill_range(scope, family, readable)
    }
}
