//! Analysis policy: the parameters of one engine run.
//!
//! ## Float Normalization for Deterministic Hashing
//!
//! Floats are quantized to integers before hashing so the same policy yields
//! the same `params_hash` regardless of float formatting. Every output of a
//! run carries this hash.

use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_hash_hex, quantize};
use crate::types::BarrierKind;
use crate::DEFAULT_POLICY_VERSION;

/// Which barriers cut the network in an analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Waterfalls and dams.
    Dams,
    /// Waterfalls, dams and assessed small barriers.
    SmallBarriers,
    /// Every barrier, including unassessed road crossings.
    RoadCrossings,
}

impl NetworkType {
    /// Whether barriers of this kind cut the network in this pass.
    ///
    /// Other kinds are transparent: counted, but flowed through.
    pub fn breaks_at(&self, kind: BarrierKind) -> bool {
        match self {
            Self::Dams => matches!(kind, BarrierKind::Waterfall | BarrierKind::Dam),
            Self::SmallBarriers => !matches!(kind, BarrierKind::RoadCrossing),
            Self::RoadCrossings => true,
        }
    }

    /// Parse network type from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dams" => Some(Self::Dams),
            "small_barriers" | "combined_barriers" => Some(Self::SmallBarriers),
            "road_crossings" | "largefish_barriers" => Some(Self::RoadCrossings),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dams => write!(f, "dams"),
            Self::SmallBarriers => write!(f, "small_barriers"),
            Self::RoadCrossings => write!(f, "road_crossings"),
        }
    }
}

/// Largest tier count a `Tier` can carry.
pub const MAX_TIER_COUNT: u8 = i8::MAX as u8;

/// Error type for policy loading.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The document is not a valid policy.
    #[error("Invalid policy JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Tier count outside `1..=MAX_TIER_COUNT`.
    #[error("Tier count {0} out of range 1..={MAX_TIER_COUNT}")]
    TierCount(u8),
}

/// Quantized policy parameters for deterministic hashing.
#[derive(Debug, Clone, Serialize)]
struct QuantizedPolicyParams<'a> {
    version: &'a str,
    repair_tolerance: i64,
    repair_search_radius: i64,
    miles_per_length_unit: i64,
    network_types: &'a [NetworkType],
    tier_count: u8,
}

/// Parameters of one engine run.
///
/// ## Parameters
///
/// - `repair_tolerance`: max distance (m) at which a false terminal is reconnected
/// - `repair_search_radius`: distance (m) within which near misses are reported
/// - `miles_per_length_unit`: conversion from input length units to miles
/// - `network_types`: analysis passes to cut, in order
/// - `tier_count`: number of equal-population tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPolicy {
    /// Policy version identifier.
    pub version: String,
    /// Maximum end-to-start distance for terminal repair.
    pub repair_tolerance: f64,
    /// Radius within which unrepaired near misses are reported.
    pub repair_search_radius: f64,
    /// Miles per input length unit (1.0 when lengths are already miles).
    pub miles_per_length_unit: f64,
    /// Analysis passes.
    pub network_types: Vec<NetworkType>,
    /// Number of tiers.
    pub tier_count: u8,
}

impl AnalysisPolicy {
    /// Miles per metre, for inputs measured in metres.
    pub const MILES_PER_METRE: f64 = 1.0 / 1609.344;

    /// Get the policy ID.
    pub fn policy_id(&self) -> &str {
        &self.version
    }

    /// Compute a hash of the policy parameters.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(&QuantizedPolicyParams {
            version: &self.version,
            repair_tolerance: quantize(self.repair_tolerance),
            repair_search_radius: quantize(self.repair_search_radius),
            miles_per_length_unit: quantize(self.miles_per_length_unit),
            network_types: &self.network_types,
            tier_count: self.tier_count,
        })
    }

    /// Load a policy from a JSON document; missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.tier_count == 0 || self.tier_count > MAX_TIER_COUNT {
            return Err(PolicyError::TierCount(self.tier_count));
        }
        Ok(())
    }

    /// Convert a length in input units to miles.
    pub fn to_miles(&self, length: f64) -> f64 {
        length * self.miles_per_length_unit
    }
}

impl Default for AnalysisPolicy {
    fn default() -> Self {
        Self {
            version: DEFAULT_POLICY_VERSION.to_string(),
            repair_tolerance: 100.0,
            repair_search_radius: 500.0,
            miles_per_length_unit: 1.0,
            network_types: vec![NetworkType::Dams, NetworkType::SmallBarriers],
            tier_count: 20,
        }
    }
}
