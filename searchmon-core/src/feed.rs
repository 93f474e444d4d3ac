//! Visit feed boundary
//!
//! The visitor log lives outside this crate. It is consumed one fixed-size
//! page at a time through [`VisitFeed`]; [`drain_pages`] is the only place
//! that knows how to walk the pages of a day.

use crate::error::{Error, Result};
use crate::types::{Action, KeywordCount, Visit};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;
use std::path::Path;

/// One page request against the visitor log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest<'a> {
    pub site_id: i64,
    pub day: NaiveDate,
    pub segment: Option<&'a str>,
    pub offset: usize,
    pub limit: usize,
}

/// Source of visits with chronologically ordered actions.
///
/// Implementations return at most `limit` visits; fewer than `limit` means
/// there is nothing after this page.
pub trait VisitFeed {
    fn fetch_visits(&self, request: &PageRequest<'_>) -> Result<Vec<Visit>>;
}

impl<T: VisitFeed + ?Sized> VisitFeed for &T {
    fn fetch_visits(&self, request: &PageRequest<'_>) -> Result<Vec<Visit>> {
        (**self).fetch_visits(request)
    }
}

/// Totals reported by [`drain_pages`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub pages: usize,
    pub visits: usize,
}

/// Fetch every page of one day and hand each to `fold`, in order.
///
/// Pagination stops after the first page holding fewer than `page_size`
/// visits. Feed errors abort the drain and are returned unchanged.
pub fn drain_pages<F, G>(
    feed: &F,
    site_id: i64,
    day: NaiveDate,
    segment: Option<&str>,
    page_size: usize,
    mut fold: G,
) -> Result<DrainStats>
where
    F: VisitFeed + ?Sized,
    G: FnMut(&[Visit]),
{
    if page_size == 0 {
        return Err(Error::Config("page size must be at least 1".to_string()));
    }

    let mut stats = DrainStats::default();
    loop {
        let request = PageRequest {
            site_id,
            day,
            segment,
            offset: stats.visits,
            limit: page_size,
        };
        let page = feed.fetch_visits(&request)?;
        stats.pages += 1;
        stats.visits += page.len();
        fold(&page);

        if page.len() < page_size {
            break;
        }
    }

    tracing::debug!(
        site_id,
        %day,
        pages = stats.pages,
        visits = stats.visits,
        "Drained visit feed"
    );
    Ok(stats)
}

/// External listing of the keywords searched in a period.
pub trait KeywordSource {
    fn search_keywords(
        &self,
        site_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        segment: Option<&str>,
    ) -> Result<Vec<KeywordCount>>;
}

/// One line of a JSON-lines visit export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    #[serde(alias = "idSite")]
    pub site_id: i64,
    pub day: NaiveDate,
    #[serde(flatten)]
    pub visit: Visit,
}

/// An in-memory visitor log keyed by site and day.
///
/// Segments are not modelled: every segment sees the same visits.
#[derive(Debug, Default, Clone)]
pub struct StaticVisitFeed {
    visits: BTreeMap<(i64, NaiveDate), Vec<Visit>>,
}

impl StaticVisitFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, site_id: i64, day: NaiveDate, visit: Visit) {
        self.visits.entry((site_id, day)).or_default().push(visit);
    }

    pub fn with_visits(mut self, site_id: i64, day: NaiveDate, visits: Vec<Visit>) -> Self {
        for visit in visits {
            self.push(site_id, day, visit);
        }
        self
    }

    /// Load a JSON-lines export of [`VisitRecord`]s. Blank lines are skipped.
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut feed = Self::new();
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: VisitRecord = serde_json::from_str(&line).map_err(|e| {
                Error::Feed(format!("{}:{}: {}", path.display(), line_no + 1, e))
            })?;
            feed.push(record.site_id, record.day, record.visit);
        }
        tracing::info!(
            path = %path.display(),
            days = feed.visits.len(),
            "Loaded visit export"
        );
        Ok(feed)
    }

    pub fn visit_count(&self) -> usize {
        self.visits.values().map(Vec::len).sum()
    }
}

impl VisitFeed for StaticVisitFeed {
    fn fetch_visits(&self, request: &PageRequest<'_>) -> Result<Vec<Visit>> {
        Ok(self
            .visits
            .get(&(request.site_id, request.day))
            .map(|visits| {
                visits
                    .iter()
                    .skip(request.offset)
                    .take(request.limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl KeywordSource for StaticVisitFeed {
    fn search_keywords(
        &self,
        site_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        _segment: Option<&str>,
    ) -> Result<Vec<KeywordCount>> {
        if start > end {
            return Ok(Vec::new());
        }

        let mut counts: HashMap<&str, i64> = HashMap::new();
        for visits in self
            .visits
            .range((site_id, start)..=(site_id, end))
            .map(|(_, visits)| visits)
        {
            for action in visits.iter().flat_map(|v| &v.actions) {
                if let Action::Search {
                    keyword: Some(keyword),
                    ..
                } = action
                {
                    *counts.entry(keyword.as_str()).or_default() += 1;
                }
            }
        }

        let mut keywords: Vec<KeywordCount> = counts
            .into_iter()
            .map(|(keyword, searches)| KeywordCount {
                keyword: keyword.to_string(),
                searches,
            })
            .collect();
        keywords.sort_by(|a, b| b.searches.cmp(&a.searches).then(a.keyword.cmp(&b.keyword)));
        Ok(keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Write;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn visits(n: usize) -> Vec<Visit> {
        (0..n)
            .map(|i| Visit {
                id: Some(i.to_string()),
                actions: vec![Action::search("k", i as i64)],
            })
            .collect()
    }

    struct RecordingFeed {
        inner: StaticVisitFeed,
        offsets: RefCell<Vec<usize>>,
    }

    impl VisitFeed for RecordingFeed {
        fn fetch_visits(&self, request: &PageRequest<'_>) -> Result<Vec<Visit>> {
            self.offsets.borrow_mut().push(request.offset);
            self.inner.fetch_visits(request)
        }
    }

    #[test]
    fn test_drain_stops_after_short_page() {
        let feed = RecordingFeed {
            inner: StaticVisitFeed::new().with_visits(1, day(), visits(250)),
            offsets: RefCell::new(Vec::new()),
        };

        let mut seen = 0;
        let stats = drain_pages(&feed, 1, day(), None, 100, |page| seen += page.len()).unwrap();

        assert_eq!(seen, 250);
        assert_eq!(
            stats,
            DrainStats {
                pages: 3,
                visits: 250
            }
        );
        assert_eq!(*feed.offsets.borrow(), vec![0, 100, 200]);
    }

    #[test]
    fn test_drain_exact_multiple_fetches_trailing_empty_page() {
        let feed = RecordingFeed {
            inner: StaticVisitFeed::new().with_visits(1, day(), visits(200)),
            offsets: RefCell::new(Vec::new()),
        };

        let stats = drain_pages(&feed, 1, day(), None, 100, |_| {}).unwrap();
        assert_eq!(
            stats,
            DrainStats {
                pages: 3,
                visits: 200
            }
        );
        assert_eq!(*feed.offsets.borrow(), vec![0, 100, 200]);
    }

    #[test]
    fn test_drain_propagates_feed_errors() {
        struct FailingFeed;
        impl VisitFeed for FailingFeed {
            fn fetch_visits(&self, _request: &PageRequest<'_>) -> Result<Vec<Visit>> {
                Err(Error::Feed("connection reset".to_string()))
            }
        }

        let err = drain_pages(&FailingFeed, 1, day(), None, 100, |_| {}).unwrap_err();
        assert!(matches!(err, Error::Feed(_)));
    }

    #[test]
    fn test_drain_rejects_zero_page_size() {
        let feed = StaticVisitFeed::new();
        assert!(drain_pages(&feed, 1, day(), None, 0, |_| {}).is_err());
    }

    #[test]
    fn test_from_jsonl_and_keywords() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"idSite": 1, "day": "2024-03-01", "actionDetails": [{{"type": "search", "siteSearchKeyword": "wiki", "timestamp": 10}}]}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"site_id": 1, "day": "2024-03-02", "actions": [{{"type": "search", "siteSearchKeyword": "wiki", "timestamp": 20}}, {{"type": "search", "siteSearchKeyword": "mail", "timestamp": 30}}]}}"#
        )
        .unwrap();

        let feed = StaticVisitFeed::from_jsonl(file.path()).unwrap();
        assert_eq!(feed.visit_count(), 2);

        let keywords = feed
            .search_keywords(1, day(), day().succ_opt().unwrap(), None)
            .unwrap();
        assert_eq!(
            keywords,
            vec![
                KeywordCount {
                    keyword: "wiki".to_string(),
                    searches: 2
                },
                KeywordCount {
                    keyword: "mail".to_string(),
                    searches: 1
                },
            ]
        );

        let only_first = feed.search_keywords(1, day(), day(), None).unwrap();
        assert_eq!(only_first.len(), 1);
    }

    #[test]
    fn test_from_jsonl_keeps_visits_with_malformed_actions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"idSite": 1, "day": "2024-03-01", "actionDetails": [{{"type": "search", "siteSearchKeyword": "wiki", "timestamp": 10}}, {{"url": "https://x.org/a", "timeSpent": 3}}, null]}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"idSite": 1, "day": "2024-03-01", "actionDetails": [{{"type": 5}}]}}"#
        )
        .unwrap();

        let feed = StaticVisitFeed::from_jsonl(file.path()).unwrap();
        assert_eq!(feed.visit_count(), 2);

        let request = PageRequest {
            site_id: 1,
            day: day(),
            segment: None,
            offset: 0,
            limit: 100,
        };
        let visits = feed.fetch_visits(&request).unwrap();
        assert_eq!(
            visits[0].actions,
            vec![Action::search("wiki", 10), Action::Other, Action::Other]
        );
        assert_eq!(visits[1].actions, vec![Action::Other]);
    }

    #[test]
    fn test_from_jsonl_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();

        let err = StaticVisitFeed::from_jsonl(file.path()).unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }
}
