//! Action-sequence analyzer
//!
//! Runs the aggregate folds (repeat, bounce, pace) over pages of visits and
//! turns the result into a [`DailyAggregate`] with every family present.

use super::folds::{BounceFold, PaceTimeFold, RepeatGroupFold, SequenceFold};
use crate::types::{
    BounceStats, DailyAggregate, PaceStats, RepeatStats, TimeDistribution, Visit,
};
use chrono::NaiveDate;

/// Accumulates all four metric families over any number of visits.
#[derive(Debug, Clone)]
pub struct ActionSequenceAnalyzer {
    repeat: RepeatGroupFold,
    bounce: BounceFold,
    pace: PaceTimeFold,
    visits: usize,
}

impl ActionSequenceAnalyzer {
    pub fn new(repeat_window_secs: i64) -> Self {
        Self {
            repeat: RepeatGroupFold::new(repeat_window_secs),
            bounce: BounceFold::new(),
            pace: PaceTimeFold::new(),
            visits: 0,
        }
    }

    pub fn fold_visit(&mut self, visit: &Visit) {
        let folds: [&mut dyn SequenceFold; 3] =
            [&mut self.repeat, &mut self.bounce, &mut self.pace];
        for fold in folds {
            tracing::trace!(fold = fold.name(), visit = ?visit.id, "Folding visit");
            fold.fold_visit(&visit.actions);
        }
        self.visits += 1;
    }

    pub fn fold_page(&mut self, page: &[Visit]) {
        for visit in page {
            self.fold_visit(visit);
        }
    }

    /// Number of visits folded so far.
    pub fn visits(&self) -> usize {
        self.visits
    }

    pub fn repeat_stats(&self) -> RepeatStats {
        self.repeat.stats()
    }

    pub fn bounce_stats(&self) -> BounceStats {
        self.bounce.stats()
    }

    pub fn pace_stats(&self) -> PaceStats {
        self.pace.stats()
    }

    pub fn distribution(&self) -> TimeDistribution {
        self.pace.distribution()
    }

    /// The complete aggregate for `day`.
    pub fn into_aggregate(self, day: NaiveDate) -> DailyAggregate {
        DailyAggregate {
            day,
            repeat: Some(self.repeat.stats()),
            bounce: Some(self.bounce.stats()),
            pace: Some(self.pace.stats()),
            distribution: Some(self.pace.distribution()),
        }
    }
}
