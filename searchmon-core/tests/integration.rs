//! Integration tests for the searchmon analysis and caching pipeline
//!
//! These tests load `tests/fixtures/visits.jsonl` (a visitor-log export) and
//! verify the path from feed pages through the daily cache to period series.

use chrono::NaiveDate;
use searchmon_core::analytics::{ActionSequenceAnalyzer, MetricAggregator, MetricQuery};
use searchmon_core::cache::{AggregateStore, DailyAggregateCache};
use searchmon_core::config::AnalysisConfig;
use searchmon_core::dates::{DateRange, DateRangeDecomposer};
use searchmon_core::db::Database;
use searchmon_core::feed::{PageRequest, StaticVisitFeed, VisitFeed};
use searchmon_core::types::*;
use searchmon_core::Result;
use std::cell::Cell;
use std::path::PathBuf;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn fixture_feed() -> StaticVisitFeed {
    StaticVisitFeed::from_jsonl(&fixture_path("visits.jsonl")).expect("fixture should load")
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn test_db() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.migrate().unwrap();
    db
}

fn config() -> AnalysisConfig {
    AnalysisConfig {
        cutoff_date: date("2024-01-01"),
        ..AnalysisConfig::default()
    }
}

/// Feed wrapper that counts page fetches.
struct CountingFeed<F> {
    inner: F,
    fetches: Cell<usize>,
}

impl<F: VisitFeed> CountingFeed<F> {
    fn new(inner: F) -> Self {
        Self {
            inner,
            fetches: Cell::new(0),
        }
    }
}

impl<F: VisitFeed> VisitFeed for CountingFeed<F> {
    fn fetch_visits(&self, request: &PageRequest<'_>) -> Result<Vec<Visit>> {
        self.fetches.set(self.fetches.get() + 1);
        self.inner.fetch_visits(request)
    }
}

/// Store wrapper that counts every call.
struct CountingStore<S> {
    inner: S,
    calls: Cell<usize>,
}

impl<S: AggregateStore> CountingStore<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Cell::new(0),
        }
    }

    fn hit(&self) {
        self.calls.set(self.calls.get() + 1);
    }
}

impl<S: AggregateStore> AggregateStore for CountingStore<S> {
    fn get_row(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        day: NaiveDate,
    ) -> Result<Option<MetricGroup>> {
        self.hit();
        self.inner.get_row(scope, family, day)
    }

    fn put_row(&self, scope: &CacheScope, day: NaiveDate, group: &MetricGroup) -> Result<()> {
        self.hit();
        self.inner.put_row(scope, day, group)
    }

    fn sum_rows(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<Option<MetricGroup>> {
        self.hit();
        self.inner.sum_rows(scope, family, range)
    }
}

// ============================================
// Fixture loading
// ============================================

#[test]
fn test_fixture_loads_visitor_log_fields() {
    searchmon_core::logging::init_test();
    let feed = fixture_feed();
    assert_eq!(feed.visit_count(), 6);

    let page = feed
        .fetch_visits(&PageRequest {
            site_id: 1,
            day: date("2024-03-01"),
            segment: None,
            offset: 0,
            limit: 100,
        })
        .unwrap();
    assert_eq!(page.len(), 3);
    assert_eq!(page[0].id.as_deref(), Some("101"));
    assert_eq!(page[2].id.as_deref(), Some("103"));
    assert_eq!(
        page[0].actions[2],
        Action::page("https://intranet.example.com/kb/vpn-setup", 12.0)
    );
    assert_eq!(page[2].actions[0], Action::search("vpn", 1709282000));
    assert_eq!(page[2].actions[3], Action::Other);
}

#[test]
fn test_malformed_export_line_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.jsonl");
    std::fs::write(
        &path,
        "{\"idSite\": 1, \"day\": \"2024-03-01\", \"actionDetails\": []}\n{not json}\n",
    )
    .unwrap();

    let err = StaticVisitFeed::from_jsonl(&path).unwrap_err();
    assert!(matches!(err, searchmon_core::Error::Feed(_)));
    assert!(err.to_string().contains("broken.jsonl:2"));
}

#[test]
fn test_malformed_actions_only_lose_their_own_contribution() {
    searchmon_core::logging::init_test();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.jsonl");
    std::fs::write(
        &path,
        concat!(
            r#"{"idSite": 1, "day": "2024-03-01", "actionDetails": ["#,
            r#"{"type": "search", "siteSearchKeyword": "vpn", "timestamp": 0}, "#,
            r#"{"url": "https://x.org/untyped"}, null, {"type": 5}, "#,
            r#"{"type": "event", "eventCategory": "searchResult", "#,
            r#""eventAction": "vpn", "eventName": "https://x.org/a"}, "#,
            r#"{"type": "action", "url": "https://x.org/a", "timeSpent": 12}]}"#,
            "\n"
        ),
    )
    .unwrap();

    let feed = StaticVisitFeed::from_jsonl(&path).unwrap();
    let db = test_db();
    let cache = DailyAggregateCache::new(&feed, &db, &config());
    let aggregate = cache
        .compute_day(&CacheScope::new(1, None), date("2024-03-01"))
        .unwrap();

    assert_eq!(
        aggregate.bounce,
        Some(BounceStats {
            bounce_count: 0,
            bounce_total: 1
        })
    );
    assert_eq!(
        aggregate.pace,
        Some(PaceStats {
            sum_pace_time: 12.0,
            sum_visits: 1
        })
    );
}

// ============================================
// Daily aggregates
// ============================================

#[test]
fn test_daily_aggregates_from_fixture() {
    let feed = fixture_feed();
    let db = test_db();
    let cache = DailyAggregateCache::new(&feed, &db, &config());
    let scope = CacheScope::new(1, None);

    let first = cache.compute_day(&scope, date("2024-03-01")).unwrap();
    assert_eq!(
        first.repeat,
        Some(RepeatStats {
            repeat_count: 1,
            repeat_total: 3
        })
    );
    assert_eq!(
        first.bounce,
        Some(BounceStats {
            bounce_count: 2,
            bounce_total: 4
        })
    );
    assert_eq!(
        first.pace,
        Some(PaceStats {
            sum_pace_time: 87.0,
            sum_visits: 2
        })
    );
    assert_eq!(
        first.distribution,
        Some(TimeDistribution {
            counts: [0, 0, 1, 0, 1]
        })
    );

    let second = cache.compute_day(&scope, date("2024-03-02")).unwrap();
    assert_eq!(
        second.bounce,
        Some(BounceStats {
            bounce_count: 0,
            bounce_total: 2
        })
    );
    assert_eq!(
        second.pace,
        Some(PaceStats {
            sum_pace_time: 7.0,
            sum_visits: 1
        })
    );
}

#[test]
fn test_small_pages_give_same_aggregate() {
    let feed = CountingFeed::new(fixture_feed());
    let db = test_db();
    let scope = CacheScope::new(1, None);

    let paged = DailyAggregateCache::new(
        &feed,
        &db,
        &AnalysisConfig {
            page_size: 2,
            ..config()
        },
    )
    .compute_day(&scope, date("2024-03-01"))
    .unwrap();
    // 3 visits at 2 per page: a full page, then a short one
    assert_eq!(feed.fetches.get(), 2);

    let whole = DailyAggregateCache::new(&feed, &db, &config())
        .compute_day(&scope, date("2024-03-01"))
        .unwrap();
    assert_eq!(paged, whole);
}

#[test]
fn test_resolve_is_idempotent() {
    let feed = fixture_feed();
    let db = test_db();
    let cache = DailyAggregateCache::new(&feed, &db, &config());
    let scope = CacheScope::new(1, None);
    let day = date("2024-03-01");

    cache
        .resolve_day(&scope, MetricFamily::Pace, day, false)
        .unwrap();
    let stored = db.get_aggregate(&scope, day).unwrap().unwrap();

    for family in MetricFamily::ALL {
        cache.resolve_day(&scope, family, day, true).unwrap();
    }
    let recomputed = db.get_aggregate(&scope, day).unwrap().unwrap();
    assert_eq!(stored, recomputed);
}

#[test]
fn test_sum_law() {
    let feed = fixture_feed();
    let db = test_db();
    let cache = DailyAggregateCache::new(&feed, &db, &config());
    let scope = CacheScope::new(1, None);
    let range = DateRange::new(date("2024-02-28"), date("2024-03-03"));

    for family in MetricFamily::ALL {
        let summed = cache.fill_range(&scope, family, range).unwrap();

        let mut expected = MetricGroup::zero(family);
        for day in range.days() {
            expected.accumulate(&cache.resolve_day(&scope, family, day, false).unwrap());
        }
        assert_eq!(summed, expected, "{family}");
    }

    assert_eq!(
        cache
            .read_range(&scope, MetricFamily::Repeat, range)
            .unwrap(),
        Some(MetricGroup::Repeat(RepeatStats {
            repeat_count: 1,
            repeat_total: 5
        }))
    );
}

#[test]
fn test_distribution_sums_to_matched_click_throughs() {
    let feed = fixture_feed();
    let db = test_db();
    let cache = DailyAggregateCache::new(&feed, &db, &config());
    let scope = CacheScope::new(1, None);

    for day in ["2024-03-01", "2024-03-02", "2024-03-03"] {
        let aggregate = cache.compute_day(&scope, date(day)).unwrap();
        assert_eq!(
            aggregate.distribution.unwrap().total(),
            aggregate.pace.unwrap().sum_visits,
            "{day}"
        );
    }
}

// ============================================
// Period queries
// ============================================

#[test]
fn test_cutoff_law_touches_nothing() {
    let feed = CountingFeed::new(fixture_feed());
    let db = test_db();
    let store = CountingStore::new(&db);
    let config = AnalysisConfig {
        cutoff_date: date("2024-06-01"),
        ..AnalysisConfig::default()
    };
    let aggregator = MetricAggregator::new(
        DailyAggregateCache::new(&feed, &store, &config),
        DateRangeDecomposer::new(date("2024-07-01")),
        &config,
    );

    for period in ["day", "week", "month"] {
        let query = MetricQuery::new(1, period, "2024-03-01,2024-03-02");
        let rates = aggregator.bounce_search_rate(&query).unwrap();
        assert!(!rates.is_empty());
        assert!(rates.iter().all(|p| p.value == 0.0));
        assert!(aggregator
            .pace_time_tendency(&query)
            .unwrap()
            .iter()
            .all(|p| p.value == 0.0));
        assert!(aggregator
            .repeating_search_counts(&query)
            .unwrap()
            .iter()
            .all(|p| p.value == RepeatStats::default()));
    }
    let table = aggregator
        .pace_time_distribution(&MetricQuery::new(1, "month", "2024-03-01"))
        .unwrap();
    assert!(table.iter().all(|row| row.count == 0));

    assert_eq!(feed.fetches.get(), 0);
    assert_eq!(store.calls.get(), 0);
}

#[test]
fn test_week_series_over_fixture() {
    let feed = fixture_feed();
    let db = test_db();
    let config = config();
    let aggregator = MetricAggregator::new(
        DailyAggregateCache::new(&feed, &db, &config),
        DateRangeDecomposer::new(date("2024-03-20")),
        &config,
    );

    let series = aggregator
        .bounce_search_counts(&MetricQuery::new(1, "week", "2024-03-01,2024-03-06"))
        .unwrap();
    // 70 days back from 2024-03-06 is 2023-12-27, before the cutoff
    assert_eq!(series.len(), 11);
    assert_eq!(series[0].label, "2023/12/27 - 2024/01/02");

    let totals: i64 = series.iter().map(|p| p.value.bounce_total).sum();
    let bounces: i64 = series.iter().map(|p| p.value.bounce_count).sum();
    assert_eq!((bounces, totals), (2, 6));
    let fixture_week = series
        .iter()
        .find(|p| {
            p.key <= date("2024-03-01") && date("2024-03-02") <= p.key + chrono::Duration::days(6)
        })
        .expect("one week holds both fixture days");
    assert_eq!(fixture_week.value.bounce_total, 6);
}

#[test]
fn test_segments_are_cached_separately() {
    let feed = CountingFeed::new(fixture_feed());
    let db = test_db();
    let config = config();
    let aggregator = MetricAggregator::new(
        DailyAggregateCache::new(&feed, &db, &config),
        DateRangeDecomposer::new(date("2024-03-20")),
        &config,
    );
    let plain = MetricQuery::new(1, "day", "2024-03-01,2024-03-01");
    let segmented = plain.clone().with_segment("deviceType==desktop");

    aggregator.repeating_search_rate(&plain).unwrap();
    aggregator.repeating_search_rate(&plain).unwrap();
    assert_eq!(feed.fetches.get(), 1);

    aggregator.repeating_search_rate(&segmented).unwrap();
    assert_eq!(feed.fetches.get(), 2);
    assert_eq!(db.count_days(&CacheScope::new(1, Some("deviceType==desktop"))).unwrap(), 1);
}

// ============================================
// Analyzer scenarios
// ============================================

#[test]
fn test_repeat_scenario_histogram() {
    let mut analyzer = ActionSequenceAnalyzer::new(180);
    analyzer.fold_visit(&Visit::new(vec![
        Action::search("k", 0),
        Action::search("k", 100),
        Action::search("k", 400),
    ]));
    assert_eq!(
        analyzer.repeat_stats(),
        RepeatStats {
            repeat_count: 1,
            repeat_total: 2
        }
    );
}

#[test]
fn test_click_through_scenario() {
    let mut analyzer = ActionSequenceAnalyzer::new(180);
    analyzer.fold_visit(&Visit::new(vec![
        Action::search("k", 0),
        Action::click_through("k", "A"),
        Action::page("A", 12.0),
    ]));
    assert_eq!(analyzer.bounce_stats().bounce_count, 0);
    assert_eq!(
        analyzer.pace_stats(),
        PaceStats {
            sum_pace_time: 12.0,
            sum_visits: 1
        }
    );
    assert_eq!(analyzer.distribution().counts[2], 1);
}

#[test]
fn test_trailing_search_scenario() {
    let mut analyzer = ActionSequenceAnalyzer::new(180);
    analyzer.fold_visit(&Visit::new(vec![
        Action::page("https://x.org/", 2.0),
        Action::search("k", 0),
    ]));
    assert_eq!(
        analyzer.bounce_stats(),
        BounceStats {
            bounce_count: 1,
            bounce_total: 1
        }
    );
}

#[test]
fn test_bounce_total_counts_every_search() {
    let feed = fixture_feed();
    let mut analyzer = ActionSequenceAnalyzer::new(180);
    let mut searches = 0;
    for day in ["2024-03-01", "2024-03-02"] {
        let page = feed
            .fetch_visits(&PageRequest {
                site_id: 1,
                day: date(day),
                segment: None,
                offset: 0,
                limit: 100,
            })
            .unwrap();
        searches += page
            .iter()
            .flat_map(|visit| &visit.actions)
            .filter(|action| action.is_search())
            .count() as i64;
        analyzer.fold_page(&page);
    }
    assert_eq!(analyzer.bounce_stats().bounce_total, searches);
}

#[test]
fn test_guarded_division() {
    let stats = RepeatStats {
        repeat_count: 3,
        repeat_total: 0,
    };
    assert_eq!(stats.rate(), 0.0);
    assert_eq!(PaceStats::default().average(), 0.0);
    assert_eq!(percentage(5, 0), 0.0);
}
