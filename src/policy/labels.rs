//! Domain code → label tables.
//!
//! Loaded once at startup and passed explicitly to the export formatter;
//! nothing in the engine reads labels from global state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Assessed, BarrierKind};

/// Lower bound (inclusive) and label of one value class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassBin {
    /// Inclusive lower bound.
    pub lower: f64,
    /// Display label.
    pub label: String,
}

impl ClassBin {
    fn new(lower: f64, label: &str) -> Self {
        Self { lower, label: label.to_string() }
    }
}

/// Immutable label configuration for formatting and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainLabels {
    /// Gain miles classes, ascending by lower bound.
    pub gain_miles_classes: Vec<ClassBin>,
    /// Label per barrier kind.
    pub barrier_kinds: BTreeMap<BarrierKind, String>,
    /// Name per habitat layer bit.
    pub habitat_layers: BTreeMap<u8, String>,
    /// Label for values that do not apply (no network).
    pub not_applicable: String,
    /// Label for barriers excluded from tiering.
    pub not_prioritized: String,
}

impl DomainLabels {
    /// Load labels from a JSON document; missing tables take defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Class code for a gain miles value; `-1` when no network.
    pub fn gain_miles_class(&self, miles: &Assessed<f64>) -> i8 {
        match miles.value() {
            Some(v) => self
                .gain_miles_classes
                .iter()
                .rposition(|bin| *v >= bin.lower)
                .map(|ix| ix as i8)
                .unwrap_or(0),
            None => -1,
        }
    }

    /// Label of a gain miles class code.
    pub fn gain_miles_label(&self, code: i8) -> &str {
        usize::try_from(code)
            .ok()
            .and_then(|ix| self.gain_miles_classes.get(ix))
            .map(|bin| bin.label.as_str())
            .unwrap_or(self.not_applicable.as_str())
    }

    /// Label of a barrier kind.
    pub fn barrier_kind_label(&self, kind: BarrierKind) -> String {
        self.barrier_kinds
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| kind.to_string())
    }

    /// Name of a habitat layer.
    pub fn habitat_label(&self, layer: u8) -> String {
        self.habitat_layers
            .get(&layer)
            .cloned()
            .unwrap_or_else(|| format!("habitat_{layer}"))
    }
}

impl Default for DomainLabels {
    fn default() -> Self {
        let barrier_kinds = [
            (BarrierKind::Waterfall, "Waterfall"),
            (BarrierKind::Dam, "Dam"),
            (BarrierKind::SmallBarrier, "Assessed road-related barrier"),
            (BarrierKind::RoadCrossing, "Unassessed road/stream crossing"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();

        Self {
            gain_miles_classes: vec![
                ClassBin::new(0.0, "< 1"),
                ClassBin::new(1.0, "1 - 5"),
                ClassBin::new(5.0, "5 - 10"),
                ClassBin::new(10.0, "10 - 25"),
                ClassBin::new(25.0, "25 - 100"),
                ClassBin::new(100.0, ">= 100"),
            ],
            barrier_kinds,
            habitat_layers: BTreeMap::new(),
            not_applicable: "no network".to_string(),
            not_prioritized: "not prioritized".to_string(),
        }
    }
}
