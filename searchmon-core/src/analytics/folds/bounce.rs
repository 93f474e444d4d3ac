//! Search bounce detection
//!
//! A search for keyword `k` succeeds when a click-through for `k` sits right
//! before it, or when scanning forward the first click-through-for-`k` comes
//! before the next search. A search that is the last action of its visit is
//! always a bounce.
//!
//! The forward scan stops at the next search even if a matching
//! click-through follows later; that truncation is part of the metric.

use super::SequenceFold;
use crate::types::{Action, BounceStats};

/// Counts searches and bounced searches.
#[derive(Debug, Clone, Default)]
pub struct BounceFold {
    stats: BounceStats,
}

impl BounceFold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> BounceStats {
        self.stats
    }
}

/// Whether the search at `index` found a result.
pub fn search_succeeded(actions: &[Action], index: usize) -> bool {
    if index + 1 >= actions.len() {
        return false;
    }
    let Some(Action::Search {
        keyword: Some(keyword),
        ..
    }) = actions.get(index)
    else {
        return false;
    };

    let preceded = index
        .checked_sub(1)
        .and_then(|prev| actions.get(prev))
        .is_some_and(|prev| prev.is_click_through_for(keyword));

    preceded || clicked_before_next_search(&actions[index + 1..], keyword)
}

fn clicked_before_next_search(rest: &[Action], keyword: &str) -> bool {
    for action in rest {
        if action.is_click_through_for(keyword) {
            return true;
        }
        if action.is_search() {
            return false;
        }
    }
    false
}

impl SequenceFold for BounceFold {
    fn name(&self) -> &'static str {
        "bounce"
    }

    fn fold_visit(&mut self, actions: &[Action]) {
        for (index, action) in actions.iter().enumerate() {
            if !action.is_search() {
                continue;
            }
            self.stats.bounce_total += 1;
            if !search_succeeded(actions, index) {
                self.stats.bounce_count += 1;
            }
        }
    }
}
