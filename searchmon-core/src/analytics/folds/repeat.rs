//! Repeat-search grouping
//!
//! Within one visit, consecutive searches whose timestamps are at most the
//! repeat window apart (default 180 seconds) form a group. Every closed group
//! increments `histogram[group_size]`.
//!
//! ## Metrics Produced
//!
//! | Metric | Description |
//! |--------|-------------|
//! | `repeat_count` | Number of groups with more than one search |
//! | `repeat_total` | Number of single-search groups plus `repeat_count` |
//!
//! `repeat_count` counts groups, not the submissions inside them: a visitor
//! who searched five times in a row contributes 1, not 4.
//!
//! ## Example
//!
//! Searches at t=0, t=100 and t=400 give a group of two (gap 100) and a group
//! of one (gap 300), so the histogram is `{1: 1, 2: 1}`.

use super::SequenceFold;
use crate::types::{Action, RepeatStats};
use std::collections::BTreeMap;

/// Builds the repeat-group histogram over any number of visits.
#[derive(Debug, Clone)]
pub struct RepeatGroupFold {
    window_secs: i64,
    histogram: BTreeMap<u32, i64>,
}

impl RepeatGroupFold {
    pub fn new(window_secs: i64) -> Self {
        Self {
            window_secs,
            histogram: BTreeMap::new(),
        }
    }

    /// Group size → number of groups of that size.
    pub fn histogram(&self) -> &BTreeMap<u32, i64> {
        &self.histogram
    }

    pub fn stats(&self) -> RepeatStats {
        let single = self.histogram.get(&1).copied().unwrap_or(0);
        let repeating: i64 = self
            .histogram
            .range(2..)
            .map(|(_, groups)| *groups)
            .sum();
        RepeatStats {
            repeat_count: repeating,
            repeat_total: single + repeating,
        }
    }

    fn close_group(&mut self, size: u32) {
        *self.histogram.entry(size).or_insert(0) += 1;
    }
}

impl SequenceFold for RepeatGroupFold {
    fn name(&self) -> &'static str {
        "repeat"
    }

    fn fold_visit(&mut self, actions: &[Action]) {
        // (size, timestamp of the latest search)
        let mut open: Option<(u32, i64)> = None;

        for action in actions {
            let Action::Search { timestamp, .. } = action else {
                continue;
            };
            let Some(ts) = *timestamp else {
                tracing::warn!("Search action without timestamp, skipped for repeat grouping");
                continue;
            };

            open = Some(match open {
                None => (1, ts),
                Some((size, last)) if (0..=self.window_secs).contains(&(ts - last)) => {
                    (size + 1, ts)
                }
                Some((size, _)) => {
                    self.close_group(size);
                    (1, ts)
                }
            });
        }

        if let Some((size, _)) = open {
            self.close_group(size);
        }
    }
}
