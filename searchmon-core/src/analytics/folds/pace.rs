//! Time-to-destination of search-result click-throughs
//!
//! A click-through event records the URL it points to. The next page view of
//! that URL in the same visit is the destination; its time spent is one pace
//! sample. Each click matches at most one page view.
//!
//! Samples feed both the running sum/count (for the average) and the 5-bucket
//! distribution, so the distribution total always equals `sum_visits`.

use super::SequenceFold;
use crate::types::{Action, PaceStats, TimeDistribution};

/// Accumulates pace samples and their distribution.
#[derive(Debug, Clone, Default)]
pub struct PaceTimeFold {
    stats: PaceStats,
    distribution: TimeDistribution,
}

impl PaceTimeFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PaceStats {
        self.stats
    }

    pub fn distribution(&self) -> TimeDistribution {
        self.distribution
    }
}

impl SequenceFold for PaceTimeFold {
    fn name(&self) -> &'static str {
        "pace"
    }

    fn fold_visit(&mut self, actions: &[Action]) {
        let mut pending: Vec<&str> = Vec::new();

        for action in actions {
            match action {
                Action::Event { .. } => {
                    if let Some((_, Some(target))) = action.as_click_through() {
                        pending.push(target);
                    }
                }
                Action::PageAction {
                    url: Some(url),
                    time_spent,
                } => {
                    let Some(pos) = pending.iter().position(|target| *target == url.as_str()) else {
                        continue;
                    };
                    pending.remove(pos);

                    match *time_spent {
                        Some(seconds) if TimeDistribution::bucket_index(seconds).is_some() => {
                            self.distribution.record(seconds);
                            self.stats.sum_pace_time += seconds;
                            self.stats.sum_visits += 1;
                        }
                        other => {
                            tracing::warn!(
                                url = %url,
                                time_spent = ?other,
                                "Unusable time spent on click-through destination, skipped"
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
