//! Database repository layer
//!
//! Reads and writes daily aggregate rows. Every metric family maps to a fixed
//! column group of `daily_aggregates`; a family is written by a single UPSERT
//! so its columns are never partially set.

use crate::cache::AggregateStore;
use crate::dates::DateRange;
use crate::error::{Error, Result};
use crate::types::*;
use chrono::{NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const DAY_FORMAT: &str = "%Y-%m-%d";

const REPEAT_COLUMNS: &[&str] = &["repeat_count", "repeat_total"];
const BOUNCE_COLUMNS: &[&str] = &["bounce_count", "bounce_total"];
const PACE_COLUMNS: &[&str] = &["sum_pace_time", "sum_visits"];
const DISTRIBUTION_COLUMNS: &[&str] = &[
    "dist_0_5",
    "dist_5_10",
    "dist_10_30",
    "dist_30_60",
    "dist_60_plus",
];

/// Columns holding one family's values, in decode order.
fn family_columns(family: MetricFamily) -> &'static [&'static str] {
    match family {
        MetricFamily::Repeat => REPEAT_COLUMNS,
        MetricFamily::Bounce => BOUNCE_COLUMNS,
        MetricFamily::Pace => PACE_COLUMNS,
        MetricFamily::Distribution => DISTRIBUTION_COLUMNS,
    }
}

fn group_values(group: &MetricGroup) -> Vec<Value> {
    match group {
        MetricGroup::Repeat(s) => vec![
            Value::Integer(s.repeat_count),
            Value::Integer(s.repeat_total),
        ],
        MetricGroup::Bounce(s) => vec![
            Value::Integer(s.bounce_count),
            Value::Integer(s.bounce_total),
        ],
        MetricGroup::Pace(s) => vec![Value::Real(s.sum_pace_time), Value::Integer(s.sum_visits)],
        MetricGroup::Distribution(d) => d.counts.iter().map(|&c| Value::Integer(c)).collect(),
    }
}

/// Decode one family starting at column `first`; any NULL means absent.
fn decode_group(
    family: MetricFamily,
    row: &Row<'_>,
    first: usize,
) -> rusqlite::Result<Option<MetricGroup>> {
    let int = |offset: usize| row.get::<_, Option<i64>>(first + offset);

    let group = match family {
        MetricFamily::Repeat => int(0)?.zip(int(1)?).map(|(repeat_count, repeat_total)| {
            MetricGroup::Repeat(RepeatStats {
                repeat_count,
                repeat_total,
            })
        }),
        MetricFamily::Bounce => int(0)?.zip(int(1)?).map(|(bounce_count, bounce_total)| {
            MetricGroup::Bounce(BounceStats {
                bounce_count,
                bounce_total,
            })
        }),
        MetricFamily::Pace => row
            .get::<_, Option<f64>>(first)?
            .zip(int(1)?)
            .map(|(sum_pace_time, sum_visits)| {
                MetricGroup::Pace(PaceStats {
                    sum_pace_time,
                    sum_visits,
                })
            }),
        MetricFamily::Distribution => {
            let mut counts = [0i64; 5];
            for (offset, count) in counts.iter_mut().enumerate() {
                match int(offset)? {
                    Some(value) => *count = value,
                    None => return Ok(None),
                }
            }
            Some(MetricGroup::Distribution(TimeDistribution { counts }))
        }
    };
    Ok(group)
}

fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

fn upsert_group(
    conn: &Connection,
    scope: &CacheScope,
    day: NaiveDate,
    group: &MetricGroup,
    computed_at: &str,
) -> Result<()> {
    let columns = family_columns(group.family());
    let placeholders: Vec<String> = (0..columns.len()).map(|i| format!("?{}", i + 4)).collect();
    let updates: Vec<String> = columns
        .iter()
        .map(|column| format!("{column} = excluded.{column}"))
        .collect();
    let sql = format!(
        r#"
        INSERT INTO daily_aggregates (site_id, segment, day, {columns}, computed_at)
        VALUES (?1, ?2, ?3, {placeholders}, ?{computed_at_idx})
        ON CONFLICT(site_id, segment, day) DO UPDATE SET
            {updates},
            computed_at = excluded.computed_at
        "#,
        columns = columns.join(", "),
        placeholders = placeholders.join(", "),
        computed_at_idx = columns.len() + 4,
        updates = updates.join(",\n            "),
    );

    let mut values = vec![
        Value::Integer(scope.site_id),
        Value::Text(scope.segment_key().to_string()),
        Value::Text(day_key(day)),
    ];
    values.extend(group_values(group));
    values.push(Value::Text(computed_at.to_string()));

    conn.execute(&sql, params_from_iter(values))?;
    Ok(())
}

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL mode so readers are not blocked by a backfill in progress
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;  -- 16MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection()?;
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Cache("database connection lock poisoned".to_string()))
    }

    // ============================================
    // Daily aggregate operations
    // ============================================

    /// Every stored family of one day, or `None` if the day has no row.
    pub fn get_aggregate(
        &self,
        scope: &CacheScope,
        day: NaiveDate,
    ) -> Result<Option<DailyAggregate>> {
        let conn = self.connection()?;
        let columns: Vec<&str> = MetricFamily::ALL
            .iter()
            .flat_map(|family| family_columns(*family).iter().copied())
            .collect();
        let sql = format!(
            "SELECT {} FROM daily_aggregates WHERE site_id = ?1 AND segment = ?2 AND day = ?3",
            columns.join(", ")
        );

        let aggregate = conn
            .query_row(
                &sql,
                params![scope.site_id, scope.segment_key(), day_key(day)],
                |row| {
                    let mut aggregate = DailyAggregate::empty(day);
                    let mut first = 0;
                    for family in MetricFamily::ALL {
                        if let Some(group) = decode_group(family, row, first)? {
                            aggregate.set(group);
                        }
                        first += family_columns(family).len();
                    }
                    Ok(aggregate)
                },
            )
            .optional()?;
        Ok(aggregate)
    }

    /// Number of stored day rows for a scope.
    pub fn count_days(&self, scope: &CacheScope) -> Result<i64> {
        let conn = self.connection()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM daily_aggregates WHERE site_id = ?1 AND segment = ?2",
            params![scope.site_id, scope.segment_key()],
            |r| r.get(0),
        )?;
        Ok(count)
    }
}

impl AggregateStore for Database {
    fn get_row(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        day: NaiveDate,
    ) -> Result<Option<MetricGroup>> {
        let conn = self.connection()?;
        let sql = format!(
            "SELECT {} FROM daily_aggregates WHERE site_id = ?1 AND segment = ?2 AND day = ?3",
            family_columns(family).join(", ")
        );
        let group = conn
            .query_row(
                &sql,
                params![scope.site_id, scope.segment_key(), day_key(day)],
                |row| decode_group(family, row, 0),
            )
            .optional()?;
        Ok(group.flatten())
    }

    fn put_row(&self, scope: &CacheScope, day: NaiveDate, group: &MetricGroup) -> Result<()> {
        let conn = self.connection()?;
        upsert_group(&conn, scope, day, group, &Utc::now().to_rfc3339())
    }

    /// All groups of a day are written in one transaction.
    fn put_aggregate(&self, scope: &CacheScope, aggregate: &DailyAggregate) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let computed_at = Utc::now().to_rfc3339();
        for group in aggregate.groups() {
            upsert_group(&tx, scope, aggregate.day, &group, &computed_at)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn sum_rows(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<Option<MetricGroup>> {
        if range.is_empty() {
            return Ok(Some(MetricGroup::zero(family)));
        }

        let columns = family_columns(family);
        let sums: Vec<String> = columns
            .iter()
            .map(|column| format!("SUM({column})"))
            .collect();
        let sql = format!(
            r#"
            SELECT COUNT({first}), {sums}
            FROM daily_aggregates
            WHERE site_id = ?1 AND segment = ?2 AND day BETWEEN ?3 AND ?4
            "#,
            first = columns[0],
            sums = sums.join(", "),
        );

        let conn = self.connection()?;
        let (covered, sum) = conn.query_row(
            &sql,
            params![
                scope.site_id,
                scope.segment_key(),
                day_key(range.start),
                day_key(range.end)
            ],
            |row| Ok((row.get::<_, i64>(0)?, decode_group(family, row, 1)?)),
        )?;

        if covered < range.num_days() {
            return Ok(None);
        }
        Ok(sum)
    }

    fn missing_days(
        &self,
        scope: &CacheScope,
        family: MetricFamily,
        range: DateRange,
    ) -> Result<Vec<NaiveDate>> {
        let conn = self.connection()?;
        let sql = format!(
            r#"
            SELECT day FROM daily_aggregates
            WHERE site_id = ?1 AND segment = ?2 AND day BETWEEN ?3 AND ?4
              AND {} IS NOT NULL
            "#,
            family_columns(family)[0]
        );

        let mut stmt = conn.prepare(&sql)?;
        let stored: HashSet<String> = stmt
            .query_map(
                params![
                    scope.site_id,
                    scope.segment_key(),
                    day_key(range.start),
                    day_key(range.end)
                ],
                |row| row.get(0),
            )?
            .collect::<rusqlite::Result<_>>()?;

        Ok(range
            .days()
            .filter(|day| !stored.contains(&day_key(*day)))
            .collect())
    }
}
