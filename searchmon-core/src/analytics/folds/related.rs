//! Related content for a keyword
//!
//! Lists the targets of every click-through whose keyword equals the
//! requested one, classified by URL shape.

use super::SequenceFold;
use crate::types::{Action, ContentKind, RelatedContent};
use once_cell::sync::Lazy;
use regex::Regex;

/// Trackers record a click with no target as the literal string "null".
const NULL_TARGET: &str = "null";

static GROUP_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^/]+//[^/]+/groups/[^/]+$").expect("group URL pattern"));

static PEOPLE_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^/]+//[^/]+/people/[^/]+$").expect("people URL pattern"));

/// Classify a result URL: `scheme://host/groups/<id>` is a group,
/// `scheme://host/people/<id>` a person, anything else content.
pub fn classify_url(url: &str) -> ContentKind {
    if GROUP_URL.is_match(url) {
        ContentKind::Group
    } else if PEOPLE_URL.is_match(url) {
        ContentKind::People
    } else {
        ContentKind::Content
    }
}

/// Collects related-content rows for one keyword.
#[derive(Debug, Clone)]
pub struct RelatedContentFold {
    keyword: String,
    rows: Vec<RelatedContent>,
}

impl RelatedContentFold {
    pub fn new(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            rows: Vec::new(),
        }
    }

    pub fn into_rows(self) -> Vec<RelatedContent> {
        self.rows
    }
}

impl SequenceFold for RelatedContentFold {
    fn name(&self) -> &'static str {
        "related"
    }

    fn fold_visit(&mut self, actions: &[Action]) {
        for action in actions {
            let Some((Some(keyword), Some(target))) = action.as_click_through() else {
                continue;
            };
            if keyword != self.keyword || target == NULL_TARGET {
                continue;
            }
            self.rows.push(RelatedContent {
                url: target.to_string(),
                kind: classify_url(target),
            });
        }
    }
}
