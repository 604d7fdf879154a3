//! Run configuration: analysis policy and domain label tables.

pub mod analysis;
pub mod labels;

pub use analysis::{AnalysisPolicy, NetworkType, PolicyError, MAX_TIER_COUNT};
pub use labels::{DomainLabels, ClassBin};
