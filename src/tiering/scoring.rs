//! Scenario scores.
//!
//! Each raw metric is turned into a relative rank within the scope: the
//! dense rank of the value among the scope's distinct values divided by the
//! number of distinct values, so the largest value scores 1.0. Combined
//! scenarios average the connectivity and watershed-condition ranks.
//! Perennial watershed condition is a separate supplied score, ranked on
//! its own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{Assessed, BarrierId};

/// Scoring dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scenario {
    /// Network connectivity (gain miles).
    #[serde(rename = "NC")]
    Nc,
    /// Perennial network connectivity (perennial gain miles).
    #[serde(rename = "PNC")]
    Pnc,
    /// Watershed condition.
    #[serde(rename = "WC")]
    Wc,
    /// Perennial watershed condition.
    #[serde(rename = "PWC")]
    Pwc,
    /// Network connectivity and watershed condition.
    #[serde(rename = "NCWC")]
    Ncwc,
    /// Perennial network connectivity and watershed condition.
    #[serde(rename = "PNCWC")]
    Pncwc,
}

impl Scenario {
    /// All scenarios in output order.
    pub const ALL: [Scenario; 6] = [Self::Nc, Self::Pnc, Self::Wc, Self::Pwc, Self::Ncwc, Self::Pncwc];

    /// Parse a scenario code.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NC" => Some(Self::Nc),
            "PNC" => Some(Self::Pnc),
            "WC" => Some(Self::Wc),
            "PWC" => Some(Self::Pwc),
            "NCWC" => Some(Self::Ncwc),
            "PNCWC" => Some(Self::Pncwc),
            _ => None,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nc => write!(f, "NC"),
            Self::Pnc => write!(f, "PNC"),
            Self::Wc => write!(f, "WC"),
            Self::Pwc => write!(f, "PWC"),
            Self::Ncwc => write!(f, "NCWC"),
            Self::Pncwc => write!(f, "PNCWC"),
        }
    }
}

/// Raw metrics of one barrier entering tiering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieringInput {
    /// Barrier identifier.
    pub barrier_id: BarrierId,
    /// State used by the per-state scope.
    #[serde(default)]
    pub state: String,
    /// Gain miles of the pass being ranked.
    pub gain_miles: Assessed<f64>,
    /// Perennial gain miles of the pass being ranked.
    pub perennial_gain_miles: Assessed<f64>,
    /// Externally supplied watershed-condition score (higher is better).
    #[serde(default)]
    pub watershed_condition: Assessed<f64>,
    /// Externally supplied perennial watershed-condition score.
    #[serde(default)]
    pub perennial_watershed_condition: Assessed<f64>,
}

/// Relative rank of each available value, in `(0, 1]`.
pub fn relative_rank(values: &[(BarrierId, Assessed<f64>)]) -> BTreeMap<BarrierId, Assessed<f64>> {
    let mut distinct: Vec<f64> = values
        .iter()
        .filter_map(|(_, v)| v.value().copied())
        .filter(|v| v.is_finite())
        .collect();
    distinct.sort_by(f64::total_cmp);
    distinct.dedup();
    let count = distinct.len() as f64;

    values
        .iter()
        .map(|(id, v)| {
            let score = match v {
                Assessed::Value(x) if x.is_finite() => {
                    let rank = distinct.partition_point(|d| d < x) + 1;
                    Assessed::Value(rank as f64 / count)
                }
                Assessed::Value(_) => Assessed::Unknown,
                other => other.map(|_| 0.0),
            };
            (*id, score)
        })
        .collect()
}

fn mean(a: &Assessed<f64>, b: &Assessed<f64>) -> Assessed<f64> {
    match (a, b) {
        (Assessed::Value(a), Assessed::Value(b)) => Assessed::Value((a + b) / 2.0),
        (Assessed::Value(_), other) | (other, _) => other.map(|_| 0.0),
    }
}

/// Scores of every scenario for the barriers of one scope.
pub fn scenario_scores(inputs: &[&TieringInput]) -> BTreeMap<Scenario, BTreeMap<BarrierId, Assessed<f64>>> {
    let column = |f: fn(&TieringInput) -> Assessed<f64>| -> Vec<(BarrierId, Assessed<f64>)> {
        inputs.iter().map(|i| (i.barrier_id, f(i))).collect()
    };
    let nc = relative_rank(&column(|i: &TieringInput| i.gain_miles));
    let pnc = relative_rank(&column(|i: &TieringInput| i.perennial_gain_miles));
    let wc = relative_rank(&column(|i: &TieringInput| i.watershed_condition));
    let pwc = relative_rank(&column(|i: &TieringInput| i.perennial_watershed_condition));

    let combine = |left: &BTreeMap<BarrierId, Assessed<f64>>| -> BTreeMap<BarrierId, Assessed<f64>> {
        left.iter()
            .map(|(id, l)| {
                let r = wc.get(id).copied().unwrap_or(Assessed::NotAssessed);
                (*id, mean(l, &r))
            })
            .collect()
    };
    let ncwc = combine(&nc);
    let pncwc = combine(&pnc);

    let mut scores = BTreeMap::new();
    scores.insert(Scenario::Nc, nc);
    scores.insert(Scenario::Pnc, pnc);
    scores.insert(Scenario::Wc, wc);
    scores.insert(Scenario::Pwc, pwc);
    scores.insert(Scenario::Ncwc, ncwc);
    scores.insert(Scenario::Pncwc, pncwc);
    scores
}
