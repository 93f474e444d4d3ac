//! Per-visit folds over action sequences
//!
//! Each fold walks one visit's actions and adds its contribution to an
//! accumulator that outlives the visit. Folds keep no state between visits
//! beyond that accumulator.
//!
//! ## Built-in Folds
//!
//! - [`repeat`]: repeat-search grouping histogram
//! - [`bounce`]: bounced vs. total searches
//! - [`pace`]: click-through pace time and its distribution
//! - [`related`]: click-through targets for one keyword

pub mod bounce;
pub mod pace;
pub mod related;
pub mod repeat;

pub use bounce::BounceFold;
pub use pace::PaceTimeFold;
pub use related::{classify_url, RelatedContentFold};
pub use repeat::RepeatGroupFold;

use crate::types::Action;

/// A stateless-per-visit analysis of ordered actions.
pub trait SequenceFold {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Fold one visit's chronologically ordered actions.
    fn fold_visit(&mut self, actions: &[Action]);
}
