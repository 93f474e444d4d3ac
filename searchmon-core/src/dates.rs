//! Date range decomposition
//!
//! Translates a period kind and a date expression into the calendar buckets a
//! series covers. Date expressions are either one day or a `start,end` pair;
//! each side is `YYYY-MM-DD`, `today` or `yesterday`.
//!
//! Series are only produced for explicit ranges. For `week` and `month` the
//! start of the range is replaced by a fixed lookback from its end
//! ([`WEEK_LOOKBACK_DAYS`], [`MONTH_LOOKBACK_DAYS`]) so trend charts always
//! show a comparable evolution window.

use crate::error::{Error, Result};
use crate::types::Period;
use chrono::{Datelike, Duration, Months, NaiveDate, Utc};

/// Week-granularity series look back this many days from the range end.
pub const WEEK_LOOKBACK_DAYS: i64 = 70;

/// Month-granularity series start at the month containing `end - 180 days`.
pub const MONTH_LOOKBACK_DAYS: i64 = 180;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// An inclusive span of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self::new(day, day)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Every day of the span, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }

    pub fn num_days(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start).num_days() + 1
        }
    }

    /// Intersection with `[lower, upper]`, or `None` when they do not overlap.
    pub fn clamp(&self, lower: NaiveDate, upper: NaiveDate) -> Option<DateRange> {
        let clamped = DateRange::new(self.start.max(lower), self.end.min(upper));
        (!clamped.is_empty()).then_some(clamped)
    }
}

/// One display bucket of a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Canonical first day of the bucket
    pub key: NaiveDate,
    /// Human label
    pub label: String,
    /// Days aggregated into this bucket
    pub range: DateRange,
}

/// Resolves period/date expressions relative to a fixed "today".
#[derive(Debug, Clone, Copy)]
pub struct DateRangeDecomposer {
    today: NaiveDate,
}

impl DateRangeDecomposer {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// A decomposer anchored on the current UTC day.
    pub fn for_today() -> Self {
        Self::new(Utc::now().date_naive())
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Resolve one side of a date expression.
    pub fn resolve_date(&self, token: &str) -> Option<NaiveDate> {
        match token.trim() {
            "today" => Some(self.today),
            "yesterday" => self.today.pred_opt(),
            other => NaiveDate::parse_from_str(other, DAY_FORMAT).ok(),
        }
    }

    /// Parse a `start,end` expression. Single dates are not ranges.
    pub fn parse_range(&self, expr: &str) -> Option<DateRange> {
        let (start, end) = expr.split_once(',')?;
        Some(DateRange::new(
            self.resolve_date(start)?,
            self.resolve_date(end)?,
        ))
    }

    /// The window a series actually covers, after the week/month lookback.
    pub fn evolution_window(&self, period: Period, expr: &str) -> Option<DateRange> {
        let requested = self.parse_range(expr)?;
        let start = match period {
            Period::Day | Period::Range => requested.start,
            Period::Week => days_before(requested.end, WEEK_LOOKBACK_DAYS)?,
            Period::Month => first_of_month(days_before(requested.end, MONTH_LOOKBACK_DAYS)?),
        };
        Some(DateRange::new(start, requested.end))
    }

    /// Ordered buckets for a series. Unknown periods, malformed dates and
    /// single-date expressions all yield an empty list.
    pub fn buckets(&self, period: &str, expr: &str) -> Vec<Bucket> {
        self.try_buckets(period, expr).unwrap_or_else(|e| {
            tracing::debug!(period, date = expr, error = %e, "Empty series");
            Vec::new()
        })
    }

    /// Like [`buckets`](Self::buckets) but reports why a query has no series.
    pub fn try_buckets(&self, period: &str, expr: &str) -> Result<Vec<Bucket>> {
        let period = parse_period(period)?;
        let window = self
            .evolution_window(period, expr)
            .ok_or_else(|| Error::InvalidQuery(format!("'{}' is not a date range", expr)))?;

        let mut buckets = Vec::new();
        let mut cursor = Some(window.start);
        while let Some(key) = cursor.filter(|key| *key <= window.end) {
            let (bucket, next) = match period {
                Period::Day | Period::Range => (
                    Bucket {
                        key,
                        label: key.format(DAY_FORMAT).to_string(),
                        range: DateRange::single(key),
                    },
                    key.succ_opt(),
                ),
                Period::Week => {
                    let last = days_after(key, 6).ok_or_else(|| out_of_range(key))?;
                    let label = format!(
                        "{} - {}",
                        key.format("%Y/%m/%d"),
                        last.format("%Y/%m/%d")
                    );
                    (
                        Bucket {
                            key,
                            label,
                            range: DateRange::new(key, last),
                        },
                        days_after(key, 7),
                    )
                }
                Period::Month => (
                    Bucket {
                        key,
                        label: key.format("%b %Y").to_string(),
                        range: DateRange::new(key, last_of_month(key)),
                    },
                    key.checked_add_months(Months::new(1)),
                ),
            };
            buckets.push(bucket);
            cursor = next;
        }
        if buckets.is_empty() {
            return Err(Error::InvalidQuery(format!("'{}' starts after it ends", expr)));
        }
        Ok(buckets)
    }

    /// The days a single snapshot query covers: a range covers itself, a
    /// single date covers its day, ISO week or calendar month.
    pub fn span(&self, period: &str, expr: &str) -> Option<DateRange> {
        self.try_span(period, expr).ok()
    }

    /// Like [`span`](Self::span) but reports why a query covers no days.
    pub fn try_span(&self, period: &str, expr: &str) -> Result<DateRange> {
        let period = parse_period(period)?;
        if expr.contains(',') {
            return self
                .parse_range(expr)
                .filter(|range| !range.is_empty())
                .ok_or_else(|| Error::InvalidQuery(format!("'{}' is not a date range", expr)));
        }
        let day = self
            .resolve_date(expr)
            .ok_or_else(|| Error::InvalidQuery(format!("'{}' is not a date", expr)))?;
        match period {
            Period::Day | Period::Range => Ok(DateRange::single(day)),
            Period::Week => {
                let offset = i64::from(day.weekday().num_days_from_monday());
                let monday = days_before(day, offset).ok_or_else(|| out_of_range(day))?;
                let sunday = days_after(monday, 6).ok_or_else(|| out_of_range(day))?;
                Ok(DateRange::new(monday, sunday))
            }
            Period::Month => {
                let first = first_of_month(day);
                Ok(DateRange::new(first, last_of_month(first)))
            }
        }
    }
}

fn parse_period(period: &str) -> Result<Period> {
    period.parse::<Period>().map_err(Error::InvalidQuery)
}

fn out_of_range(day: NaiveDate) -> Error {
    Error::InvalidQuery(format!("{} is outside the supported calendar", day))
}

fn days_after(day: NaiveDate, days: i64) -> Option<NaiveDate> {
    day.checked_add_signed(Duration::days(days))
}

fn days_before(day: NaiveDate, days: i64) -> Option<NaiveDate> {
    day.checked_sub_signed(Duration::days(days))
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn last_of_month(day: NaiveDate) -> NaiveDate {
    first_of_month(day)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(day)
}
