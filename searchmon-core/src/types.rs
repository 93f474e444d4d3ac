//! Core domain types for searchmon
//!
//! These types model the visitor log as it is consumed (visits and their
//! ordered actions) and the per-day aggregates derived from it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Visit** | One visitor session: an ordered, chronological list of actions |
//! | **Action** | A single recorded step: page view, interaction event, or site search |
//! | **Click-through** | An event with category `searchResult`: the visitor opened a search hit |
//! | **Repeat group** | A run of searches in one visit spaced no more than the repeat window apart |
//! | **Bounce** | A search with no detected click-through |
//! | **Pace time** | Time spent on the page reached through a click-through |
//! | **Metric family** | One of the four independent groups stored per day (repeat, bounce, pace, distribution) |

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Event category that marks a search-result click-through.
pub const SEARCH_RESULT_CATEGORY: &str = "searchResult";

// ============================================
// Visits and actions
// ============================================

/// One timestamped step inside a visit.
///
/// The JSON shape follows the visitor-log export: a `type` discriminator of
/// `action`, `event` or `search` and camelCase field names. Fields that are
/// missing or of an unexpected type deserialize as `None` so a single broken
/// record only loses its own contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// A page view
    #[serde(rename = "action")]
    PageAction {
        #[serde(default, deserialize_with = "lenient::string_opt")]
        url: Option<String>,
        /// Seconds spent on the page
        #[serde(
            rename = "timeSpent",
            default,
            deserialize_with = "lenient::f64_opt"
        )]
        time_spent: Option<f64>,
    },

    /// An interaction event (click-throughs are events too)
    #[serde(rename = "event")]
    Event {
        #[serde(
            rename = "eventCategory",
            default,
            deserialize_with = "lenient::string_opt"
        )]
        category: Option<String>,
        /// For click-throughs: the keyword that produced the result
        #[serde(
            rename = "eventAction",
            default,
            deserialize_with = "lenient::string_opt"
        )]
        action: Option<String>,
        /// For click-throughs: the URL of the clicked result
        #[serde(
            rename = "eventName",
            default,
            deserialize_with = "lenient::string_opt"
        )]
        name: Option<String>,
    },

    /// A site-search submission
    #[serde(rename = "search")]
    Search {
        #[serde(
            rename = "siteSearchKeyword",
            default,
            deserialize_with = "lenient::string_opt"
        )]
        keyword: Option<String>,
        /// Epoch seconds
        #[serde(default, deserialize_with = "lenient::i64_opt")]
        timestamp: Option<i64>,
    },

    /// Any other action type (goals, downloads, outlinks, ...)
    #[serde(other)]
    Other,
}

impl Action {
    pub fn page(url: &str, time_spent: f64) -> Self {
        Action::PageAction {
            url: Some(url.to_string()),
            time_spent: Some(time_spent),
        }
    }

    pub fn search(keyword: &str, timestamp: i64) -> Self {
        Action::Search {
            keyword: Some(keyword.to_string()),
            timestamp: Some(timestamp),
        }
    }

    /// A search-result click-through for `keyword` landing on `url`.
    pub fn click_through(keyword: &str, url: &str) -> Self {
        Action::Event {
            category: Some(SEARCH_RESULT_CATEGORY.to_string()),
            action: Some(keyword.to_string()),
            name: Some(url.to_string()),
        }
    }

    pub fn is_search(&self) -> bool {
        matches!(self, Action::Search { .. })
    }

    /// Returns `(keyword, target)` when this action is a search-result click-through.
    pub fn as_click_through(&self) -> Option<(Option<&str>, Option<&str>)> {
        match self {
            Action::Event {
                category: Some(category),
                action,
                name,
            } if category == SEARCH_RESULT_CATEGORY => Some((action.as_deref(), name.as_deref())),
            _ => None,
        }
    }

    /// True when this is a click-through whose keyword equals `keyword`.
    pub fn is_click_through_for(&self, keyword: &str) -> bool {
        matches!(self.as_click_through(), Some((Some(k), _)) if k == keyword)
    }
}

/// One visitor session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    #[serde(
        default,
        alias = "idVisit",
        deserialize_with = "lenient::string_opt"
    )]
    pub id: Option<String>,
    /// Chronologically ordered actions
    #[serde(
        default,
        alias = "actionDetails",
        deserialize_with = "lenient::actions"
    )]
    pub actions: Vec<Action>,
}

impl Visit {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { id: None, actions }
    }
}

// ============================================
// Periods and metric families
// ============================================

/// Calendar granularity of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Range,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Range => "range",
        }
    }
}

impl std::str::FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "day" => Ok(Period::Day),
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            "range" => Ok(Period::Range),
            _ => Err(format!("unknown period: {}", s)),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four independently cached metric groups of a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricFamily {
    Repeat,
    Bounce,
    Pace,
    Distribution,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 4] = [
        MetricFamily::Repeat,
        MetricFamily::Bounce,
        MetricFamily::Pace,
        MetricFamily::Distribution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFamily::Repeat => "repeat",
            MetricFamily::Bounce => "bounce",
            MetricFamily::Pace => "pace",
            MetricFamily::Distribution => "distribution",
        }
    }
}

impl std::fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================
// Metric groups
// ============================================

/// Repeat-search totals: groups of more than one search vs. all groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatStats {
    pub repeat_count: i64,
    pub repeat_total: i64,
}

impl RepeatStats {
    /// Percentage of repeat groups, 0 when there were no searches.
    pub fn rate(&self) -> f64 {
        percentage(self.repeat_count, self.repeat_total)
    }
}

impl AddAssign for RepeatStats {
    fn add_assign(&mut self, rhs: Self) {
        self.repeat_count += rhs.repeat_count;
        self.repeat_total += rhs.repeat_total;
    }
}

/// Bounced searches vs. all searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BounceStats {
    pub bounce_count: i64,
    pub bounce_total: i64,
}

impl BounceStats {
    /// Percentage of bounced searches, 0 when there were no searches.
    pub fn rate(&self) -> f64 {
        percentage(self.bounce_count, self.bounce_total)
    }
}

impl AddAssign for BounceStats {
    fn add_assign(&mut self, rhs: Self) {
        self.bounce_count += rhs.bounce_count;
        self.bounce_total += rhs.bounce_total;
    }
}

/// Time-to-destination totals over matched click-throughs.
///
/// `sum_visits` counts matched click-throughs, not browser visits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PaceStats {
    pub sum_pace_time: f64,
    pub sum_visits: i64,
}

impl PaceStats {
    /// Average seconds on a result page, 0 when nothing matched.
    pub fn average(&self) -> f64 {
        if self.sum_visits == 0 {
            0.0
        } else {
            self.sum_pace_time / self.sum_visits as f64
        }
    }
}

impl AddAssign for PaceStats {
    fn add_assign(&mut self, rhs: Self) {
        self.sum_pace_time += rhs.sum_pace_time;
        self.sum_visits += rhs.sum_visits;
    }
}

/// Click-through pace times bucketed into `[0,5) [5,10) [10,30) [30,60) [60,∞)` seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeDistribution {
    pub counts: [i64; 5],
}

impl TimeDistribution {
    pub const LABELS: [&'static str; 5] = ["0-5s", "5-10s", "10-30s", "30-60s", "60s above"];
    const LOWER_BOUNDS: [f64; 5] = [0.0, 5.0, 10.0, 30.0, 60.0];

    /// Bucket index for a duration; negative or NaN durations have none.
    pub fn bucket_index(seconds: f64) -> Option<usize> {
        if seconds.is_nan() || seconds < 0.0 {
            return None;
        }
        Self::LOWER_BOUNDS
            .iter()
            .rposition(|&lower| seconds >= lower)
    }

    /// Count one duration. Returns false when it fits no bucket.
    pub fn record(&mut self, seconds: f64) -> bool {
        match Self::bucket_index(seconds) {
            Some(idx) => {
                self.counts[idx] += 1;
                true
            }
            None => false,
        }
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// The counters as a labeled table, in bucket order.
    pub fn rows(&self) -> Vec<DistributionRow> {
        Self::LABELS
            .iter()
            .zip(self.counts.iter())
            .map(|(label, &count)| DistributionRow {
                label: (*label).to_string(),
                count,
            })
            .collect()
    }
}

impl AddAssign for TimeDistribution {
    fn add_assign(&mut self, rhs: Self) {
        for (lhs, rhs) in self.counts.iter_mut().zip(rhs.counts) {
            *lhs += rhs;
        }
    }
}

/// One row of a labeled distribution table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRow {
    pub label: String,
    pub count: i64,
}

/// A single metric family's values for some span of days.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub enum MetricGroup {
    Repeat(RepeatStats),
    Bounce(BounceStats),
    Pace(PaceStats),
    Distribution(TimeDistribution),
}

impl MetricGroup {
    /// The all-zero value of a family.
    pub fn zero(family: MetricFamily) -> Self {
        match family {
            MetricFamily::Repeat => MetricGroup::Repeat(RepeatStats::default()),
            MetricFamily::Bounce => MetricGroup::Bounce(BounceStats::default()),
            MetricFamily::Pace => MetricGroup::Pace(PaceStats::default()),
            MetricFamily::Distribution => MetricGroup::Distribution(TimeDistribution::default()),
        }
    }

    pub fn family(&self) -> MetricFamily {
        match self {
            MetricGroup::Repeat(_) => MetricFamily::Repeat,
            MetricGroup::Bounce(_) => MetricFamily::Bounce,
            MetricGroup::Pace(_) => MetricFamily::Pace,
            MetricGroup::Distribution(_) => MetricFamily::Distribution,
        }
    }

    /// Element-wise sum. Groups of different families are left untouched.
    pub fn accumulate(&mut self, other: &MetricGroup) {
        match (self, other) {
            (MetricGroup::Repeat(a), MetricGroup::Repeat(b)) => *a += *b,
            (MetricGroup::Bounce(a), MetricGroup::Bounce(b)) => *a += *b,
            (MetricGroup::Pace(a), MetricGroup::Pace(b)) => *a += *b,
            (MetricGroup::Distribution(a), MetricGroup::Distribution(b)) => *a += *b,
            (this, other) => tracing::warn!(
                lhs = %this.family(),
                rhs = %other.family(),
                "Ignoring sum of mismatched metric families"
            ),
        }
    }

    pub fn as_repeat(&self) -> Option<RepeatStats> {
        match self {
            MetricGroup::Repeat(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_bounce(&self) -> Option<BounceStats> {
        match self {
            MetricGroup::Bounce(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_pace(&self) -> Option<PaceStats> {
        match self {
            MetricGroup::Pace(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_distribution(&self) -> Option<TimeDistribution> {
        match self {
            MetricGroup::Distribution(s) => Some(*s),
            _ => None,
        }
    }
}

/// The materialized summary of one calendar day.
///
/// Each group is either absent (never computed) or complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub day: NaiveDate,
    pub repeat: Option<RepeatStats>,
    pub bounce: Option<BounceStats>,
    pub pace: Option<PaceStats>,
    pub distribution: Option<TimeDistribution>,
}

impl DailyAggregate {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            repeat: None,
            bounce: None,
            pace: None,
            distribution: None,
        }
    }

    pub fn group(&self, family: MetricFamily) -> Option<MetricGroup> {
        match family {
            MetricFamily::Repeat => self.repeat.map(MetricGroup::Repeat),
            MetricFamily::Bounce => self.bounce.map(MetricGroup::Bounce),
            MetricFamily::Pace => self.pace.map(MetricGroup::Pace),
            MetricFamily::Distribution => self.distribution.map(MetricGroup::Distribution),
        }
    }

    pub fn set(&mut self, group: MetricGroup) {
        match group {
            MetricGroup::Repeat(s) => self.repeat = Some(s),
            MetricGroup::Bounce(s) => self.bounce = Some(s),
            MetricGroup::Pace(s) => self.pace = Some(s),
            MetricGroup::Distribution(s) => self.distribution = Some(s),
        }
    }

    /// All present groups, in family order.
    pub fn groups(&self) -> Vec<MetricGroup> {
        MetricFamily::ALL
            .iter()
            .filter_map(|family| self.group(*family))
            .collect()
    }
}

// ============================================
// Cache scope and query outputs
// ============================================

/// Which site and visitor segment a cached aggregate belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheScope {
    pub site_id: i64,
    pub segment: Option<String>,
}

impl CacheScope {
    pub fn new(site_id: i64, segment: Option<&str>) -> Self {
        Self {
            site_id,
            segment: segment.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    /// Storage key for the segment; the unsegmented scope is the empty string.
    pub fn segment_key(&self) -> &str {
        self.segment.as_deref().unwrap_or("")
    }
}

/// One bucket of a series: the bucket's first day, its display label and a value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint<T> {
    pub key: NaiveDate,
    pub label: String,
    pub value: T,
}

/// Shape of a related-content target URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Group,
    People,
    Content,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Group => "group",
            ContentKind::People => "people",
            ContentKind::Content => "content",
        }
    }
}

/// A search-result target clicked for a requested keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedContent {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ContentKind,
}

/// How often a keyword was searched in a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCount {
    pub keyword: String,
    pub searches: i64,
}

/// `count * 100 / total`, defined as 0 for an empty total.
pub fn percentage(count: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (count as f64 * 100.0) / total as f64
    }
}

/// Tolerant field decoders for visitor-log JSON.
mod lenient {
    use super::Action;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn i64_opt<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// Whole floats like `1700000000.0` are accepted; fractional or
    /// out-of-range values are absent rather than truncated.
    fn integral(f: f64) -> Option<i64> {
        let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
        (f.fract() == 0.0 && in_range).then_some(f as i64)
    }

    /// Decodes each action on its own; a record that is not a valid action
    /// (no `type`, a non-string `type`, `null`) becomes `Action::Other`.
    pub fn actions<'de, D>(deserializer: D) -> Result<Vec<Action>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = match Option::<Value>::deserialize(deserializer)? {
            Some(Value::Array(items)) => items,
            Some(other) => {
                tracing::warn!(value = %other, "Action list is not an array, ignoring");
                return Ok(Vec::new());
            }
            None => return Ok(Vec::new()),
        };

        Ok(raw
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                Action::deserialize(value).unwrap_or_else(|e| {
                    tracing::warn!(index, error = %e, "Skipping malformed action");
                    Action::Other
                })
            })
            .collect())
    }
}
