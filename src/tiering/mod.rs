//! Tiering engine: rank-based percentile tiers per scenario and scope.
//!
//! ## Binning
//!
//! Barriers with an available score are sorted by score descending, then
//! barrier id ascending. With `N` ranked barriers and `T` tiers, the barrier
//! at 0-based rank `r` gets tier `floor(r * T / N) + 1`, which gives
//! equal-population bins differing by at most one barrier. Tied scores take
//! the tier of the first rank of their tie group. Barriers without a score
//! get `Tier::NOT_PRIORITIZED`.
//!
//! Scopes are independent: a barrier's per-state tier has nothing to do with
//! its tier in any other subset, and scopes are computed in parallel.

pub mod scoring;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::canonical::fingerprint;
use crate::maybe_rayon::*;
use crate::policy::MAX_TIER_COUNT;
use crate::types::{Assessed, BarrierId};

pub use scoring::{relative_rank, scenario_scores, Scenario, TieringInput};

/// Priority bucket; 1 is the highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tier(i8);

impl Tier {
    /// Reserved tier for barriers excluded from ranking.
    pub const NOT_PRIORITIZED: Tier = Tier(-1);

    /// Create a tier from its number.
    pub fn new(value: i8) -> Self {
        Self(value)
    }

    /// Tier number (`-1` when not prioritized).
    pub fn value(&self) -> i8 {
        self.0
    }

    /// Whether the barrier was ranked.
    pub fn is_prioritized(&self) -> bool {
        self.0 > 0
    }
}

/// Partitioning of barriers into independently ranked groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierScope {
    /// All supplied barriers form one scope.
    Global,
    /// One scope per state.
    ByState,
}

impl TierScope {
    fn key<'a>(&self, input: &'a TieringInput) -> &'a str {
        match self {
            Self::Global => "",
            Self::ByState => &input.state,
        }
    }
}

/// Assign tiers to one scenario's scores within one scope.
///
/// `tier_count` is clamped to `1..=MAX_TIER_COUNT`.
pub fn assign_tiers(scores: &[(BarrierId, Assessed<f64>)], tier_count: u8) -> BTreeMap<BarrierId, Tier> {
    let mut tiers: BTreeMap<BarrierId, Tier> = scores
        .iter()
        .map(|(id, _)| (*id, Tier::NOT_PRIORITIZED))
        .collect();

    let mut ranked: Vec<(BarrierId, f64)> = scores
        .iter()
        .filter_map(|(id, s)| s.value().filter(|v| v.is_finite()).map(|v| (*id, *v)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let n = ranked.len();
    let t = tier_count.clamp(1, MAX_TIER_COUNT) as usize;
    let mut group_start = 0;
    for rank in 0..n {
        if rank > 0 && ranked[rank].1 != ranked[rank - 1].1 {
            group_start = rank;
        }
        let tier = group_start * t / n + 1;
        tiers.insert(ranked[rank].0, Tier(tier as i8));
    }
    tiers
}

/// Tiers and scores of one barrier in its scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRecord {
    /// Barrier identifier.
    pub barrier_id: BarrierId,
    /// Scope key (state, or empty for the global scope).
    pub scope_key: String,
    /// Scenario scores.
    pub scores: BTreeMap<Scenario, Assessed<f64>>,
    /// Scenario tiers.
    pub tiers: BTreeMap<Scenario, Tier>,
}

impl TierRecord {
    /// Tier of one scenario.
    pub fn tier(&self, scenario: Scenario) -> Tier {
        self.tiers.get(&scenario).copied().unwrap_or(Tier::NOT_PRIORITIZED)
    }
}

/// Tier records of one scope kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierTable {
    /// Scope the table was computed for.
    pub scope: TierScope,
    /// Number of tiers.
    pub tier_count: u8,
    /// Records ordered by (scope key, barrier id).
    pub records: Vec<TierRecord>,
    /// Canonical fingerprint of the table.
    pub fingerprint: String,
}

impl TierTable {
    /// Record of one barrier.
    pub fn record(&self, barrier_id: BarrierId) -> Option<&TierRecord> {
        self.records.iter().find(|r| r.barrier_id == barrier_id)
    }

    /// Number of barriers per tier for a scenario within a scope key.
    pub fn histogram(&self, scenario: Scenario, scope_key: &str) -> BTreeMap<Tier, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records.iter().filter(|r| r.scope_key == scope_key) {
            *counts.entry(record.tier(scenario)).or_insert(0) += 1;
        }
        counts
    }
}

/// Computes tier tables.
#[derive(Debug, Clone, Copy)]
pub struct TieringEngine {
    tier_count: u8,
    scope: TierScope,
}

impl TieringEngine {
    /// Create an engine. `tier_count` is clamped to `1..=MAX_TIER_COUNT`.
    pub fn new(tier_count: u8, scope: TierScope) -> Self {
        Self {
            tier_count: tier_count.clamp(1, MAX_TIER_COUNT),
            scope,
        }
    }

    /// Score and tier every barrier, each scope independently.
    pub fn run(&self, inputs: &[TieringInput]) -> TierTable {
        let mut partitions: BTreeMap<&str, Vec<&TieringInput>> = BTreeMap::new();
        for input in inputs {
            partitions.entry(self.scope.key(input)).or_default().push(input);
        }

        let tier_count = self.tier_count;
        let per_scope: Vec<Vec<TierRecord>> = partitions
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(key, members)| tier_scope(key, &members, tier_count))
            .collect();

        let records: Vec<TierRecord> = per_scope.into_iter().flatten().collect();
        let fingerprint = fingerprint("tier_table", &(self.scope, tier_count, &records));
        tracing::info!(
            scope = ?self.scope,
            barriers = records.len(),
            fingerprint = %fingerprint,
            "tiers computed"
        );

        TierTable {
            scope: self.scope,
            tier_count,
            records,
            fingerprint,
        }
    }
}

fn tier_scope(key: &str, members: &[&TieringInput], tier_count: u8) -> Vec<TierRecord> {
    let scores = scenario_scores(members);
    let tiers: BTreeMap<Scenario, BTreeMap<BarrierId, Tier>> = scores
        .iter()
        .map(|(scenario, column)| {
            let column: Vec<(BarrierId, Assessed<f64>)> = column.iter().map(|(id, s)| (*id, *s)).collect();
            (*scenario, assign_tiers(&column, tier_count))
        })
        .collect();

    let mut ids: Vec<BarrierId> = members.iter().map(|m| m.barrier_id).collect();
    ids.sort();
    ids.dedup();

    ids.into_iter()
        .map(|barrier_id| TierRecord {
            barrier_id,
            scope_key: key.to_string(),
            scores: scores
                .iter()
                .map(|(scenario, column)| (*scenario, column.get(&barrier_id).copied().unwrap_or_default()))
                .collect(),
            tiers: tiers
                .iter()
                .map(|(scenario, column)| {
                    (*scenario, column.get(&barrier_id).copied().unwrap_or(Tier::NOT_PRIORITIZED))
                })
                .collect(),
        })
        .collect()
}
