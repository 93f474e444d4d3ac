//! Daily aggregate cache
//!
//! Each calendar day is analyzed once: the first request for a day drains the
//! visit feed, folds every page through the [`ActionSequenceAnalyzer`] and
//! stores all four metric families. Longer periods are answered by summing
//! stored days, backfilling the days that are missing first.
//!
//! Storage sits behind [`AggregateStore`]; the SQLite [`Database`] is the
//! production implementation.
//!
//! [`Database`]: crate::db::Database

use crate::analytics::ActionSequenceAnalyzer;
use crate::config::AnalysisConfig;
use crate::dates::DateRange;
use crate::error::{Error, Result};
use crate::feed::{drain_pages, VisitFeed};
use crate::types::{CacheScope, DailyAggregate, MetricFamily, MetricGroup};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Keyed persistence for daily aggregates, one row per (scope, day).
pub trait AggregateStore {
    /// The stored group of `family` for `day`, if it was ever computed.
    fn get_row(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        day: NaiveDate,
    ) -> Result<Option<MetricGroup>>;

    /// Insert or replace one family's values for `day`.
    fn put_row(&self, scope: &CacheScope, day: NaiveDate, group: &MetricGroup) -> Result<()>;

    /// Store every present group of an aggregate.
    fn put_aggregate(&self, scope: &CacheScope, aggregate: &DailyAggregate) -> Result<()> {
        for group in aggregate.groups() {
            self.put_row(scope, aggregate.day, &group)?;
        }
        Ok(())
    }

    /// Element-wise sum of `family` over `range`.
    ///
    /// Returns `None` when any day in the range lacks the group.
    fn sum_rows(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<Option<MetricGroup>>;

    /// Days of `range` with no stored group of `family`.
    fn missing_days(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<Vec<NaiveDate>> {
        let mut missing = Vec::new();
        for day in range.days() {
            if self.get_row(scope, family, day)?.is_none() {
                missing.push(day);
            }
        }
        Ok(missing)
    }
}

impl<T: AggregateStore + ?Sized> AggregateStore for &T {
    fn get_row(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        day: NaiveDate,
    ) -> Result<Option<MetricGroup>> {
        (**self).get_row(scope, family, day)
    }

    fn put_row(&self, scope: &CacheScope, day: NaiveDate, group: &MetricGroup) -> Result<()> {
        (**self).put_row(scope, day, group)
    }

    fn put_aggregate(&self, scope: &CacheScope, aggregate: &DailyAggregate) -> Result<()> {
        (**self).put_aggregate(scope, aggregate)
    }

    fn sum_rows(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<Option<MetricGroup>> {
        (**self).sum_rows(scope, family, range)
    }

    fn missing_days(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<Vec<NaiveDate>> {
        (**self).missing_days(scope, family, range)
    }
}

/// Outcome of [`DailyAggregateCache::backfill`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillStats {
    /// Days analyzed from the feed
    pub computed: usize,
    /// Days already complete in the store
    pub cached: usize,
}

type FlightKey = (CacheScope, NaiveDate);
type FlightMap = HashMap<FlightKey, Arc<Mutex<()>>>;

/// Membership in the single-flight group of one (scope, day).
///
/// The last member to leave removes the entry.
struct Flight<'c> {
    map: &'c Mutex<FlightMap>,
    key: FlightKey,
    slot: Arc<Mutex<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut map = relock(self.map);
        let last = map
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
            && Arc::strong_count(&self.slot) == 2;
        if last {
            map.remove(&self.key);
        }
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        tracing::warn!("Recovering poisoned aggregate cache lock");
        poisoned.into_inner()
    })
}

/// Resolves daily aggregates from a store, computing them from a feed on a miss.
pub struct DailyAggregateCache<F, S> {
    feed: F,
    store: S,
    page_size: usize,
    repeat_window_secs: i64,
    in_flight: Mutex<FlightMap>,
}

impl<F: VisitFeed, S: AggregateStore> DailyAggregateCache<F, S> {
    pub fn new(feed: F, store: S, config: &AnalysisConfig) -> Self {
        Self {
            feed,
            store,
            page_size: config.page_size,
            repeat_window_secs: config.repeat_window_secs,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// One family's values for `day`, from the store unless missing or forced.
    ///
    /// A miss analyzes the whole day and stores every family, so later
    /// requests for the other families are hits. Concurrent misses for the
    /// same scope and day scan the feed once.
    pub fn resolve_day(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        day: NaiveDate,
        force: bool,
    ) -> Result<MetricGroup> {
        if !force {
            if let Some(group) = self.store.get_row(scope, family, day)? {
                tracing::debug!(
                    site_id = scope.site_id,
                    %day,
                    %family,
                    "Using cached daily aggregate"
                );
                return Ok(group);
            }
        }

        let flight = self.join_flight(scope, day);
        let _turn = relock(&flight.slot);

        if !force {
            if let Some(group) = self.store.get_row(scope, family, day)? {
                tracing::debug!(
                    site_id = scope.site_id,
                    %day,
                    %family,
                    "Daily aggregate stored by a concurrent caller"
                );
                return Ok(group);
            }
        }

        let aggregate = self.compute_and_store(scope, day)?;
        aggregate.group(family).ok_or_else(|| {
            Error::Cache(format!("analysis of {day} produced no {family} values"))
        })
    }

    /// Sum of `family` over `range` as currently stored, `None` if incomplete.
    pub fn read_range(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<Option<MetricGroup>> {
        self.store.sum_rows(scope, family, range)
    }

    /// Sum of `family` over `range`, resolving every missing day first.
    pub fn fill_range(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<MetricGroup> {
        if let Some(sum) = self.read_range(scope, family, range)? {
            return Ok(sum);
        }

        let missing = self.store.missing_days(scope, family, range)?;
        tracing::info!(
            site_id = scope.site_id,
            %family,
            start = %range.start,
            end = %range.end,
            missing = missing.len(),
            "Backfilling daily aggregates"
        );
        for day in missing {
            self.resolve_day(scope, family, day, false)?;
        }

        self.read_range(scope, family, range)?.ok_or_else(|| {
            Error::Cache(format!(
                "{family} aggregates for {} to {} still incomplete after backfill",
                range.start, range.end
            ))
        })
    }

    /// Make every day of `range` complete in the store.
    ///
    /// With `force`, days are re-analyzed even when already stored.
    pub fn backfill(
        &self,
        scope: &CacheScope,
        range: DateRange,
        force: bool,
    ) -> Result<BackfillStats> {
        let mut stats = BackfillStats::default();
        for day in range.days() {
            let flight = self.join_flight(scope, day);
            let _turn = relock(&flight.slot);

            if !force && self.is_complete(scope, day)? {
                stats.cached += 1;
                continue;
            }
            self.compute_and_store(scope, day)?;
            stats.computed += 1;
        }

        tracing::info!(
            site_id = scope.site_id,
            start = %range.start,
            end = %range.end,
            computed = stats.computed,
            cached = stats.cached,
            "Backfill complete"
        );
        Ok(stats)
    }

    /// Analyze one day straight from the feed, without touching the store.
    pub fn compute_day(&self, scope: &CacheScope, day: NaiveDate) -> Result<DailyAggregate> {
        let mut analyzer = ActionSequenceAnalyzer::new(self.repeat_window_secs);
        let drained = drain_pages(
            &self.feed,
            scope.site_id,
            day,
            scope.segment.as_deref(),
            self.page_size,
            |page| analyzer.fold_page(page),
        )?;

        tracing::info!(
            site_id = scope.site_id,
            segment = scope.segment_key(),
            %day,
            pages = drained.pages,
            visits = drained.visits,
            "Computed daily aggregate"
        );
        Ok(analyzer.into_aggregate(day))
    }

    fn compute_and_store(&self, scope: &CacheScope, day: NaiveDate) -> Result<DailyAggregate> {
        let aggregate = self.compute_day(scope, day)?;
        self.store.put_aggregate(scope, &aggregate)?;
        Ok(aggregate)
    }

    fn is_complete(&self, scope: &CacheScope, day: NaiveDate) -> Result<bool> {
        for family in MetricFamily::ALL {
            if self.store.get_row(scope, family, day)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn join_flight(&self, scope: &CacheScope, day: NaiveDate) -> Flight<'_> {
        let key = (scope.clone(), day);
        let slot = relock(&self.in_flight)
            .entry(key.clone())
            .or_default()
            .clone();
        Flight {
            map: &self.in_flight,
            key,
            slot,
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        relock(&self.in_flight).len()
    }
}
