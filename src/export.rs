//! Flat export rows for tabular consumers.
//!
//! Every `Assessed` value becomes a number: the value itself, or `-1`
//! (not applicable), `-2` (unknown), `-3` (not assessed). Tiers use `-1` for
//! barriers that were not prioritized. Labels come from `DomainLabels`,
//! passed in by the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::cutter::PathEnd;
use crate::metrics::{BarrierMetrics, NetworkMetrics, OutletPath};
use crate::pipeline::UnitOutput;
use crate::policy::{DomainLabels, NetworkType};
use crate::tiering::{Scenario, TierTable};
use crate::types::{Assessed, BarrierCounts};

/// One barrier in one pass, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierExportRow {
    /// Processing unit identifier.
    pub unit_id: String,
    /// Barrier identifier.
    pub barrier_id: u64,
    /// Barrier kind label.
    pub kind: String,
    /// Analysis pass.
    pub network_type: NetworkType,
    /// Upstream miles.
    pub total_upstream_miles: f64,
    /// Perennial upstream miles.
    pub perennial_upstream_miles: f64,
    /// Intermittent upstream miles.
    pub intermittent_upstream_miles: f64,
    /// Altered upstream miles.
    pub altered_upstream_miles: f64,
    /// Unaltered upstream miles.
    pub unaltered_upstream_miles: f64,
    /// Perennial unaltered upstream miles.
    pub perennial_unaltered_upstream_miles: f64,
    /// Percent of upstream miles unaltered.
    pub percent_unaltered: f64,
    /// Percent of perennial upstream miles unaltered.
    pub percent_perennial_unaltered: f64,
    /// Drainage area at the barrier.
    pub upstream_drainage_area: f64,
    /// Headwaters upstream.
    pub headwaters: f64,
    /// Total downstream path miles.
    pub total_downstream_miles: f64,
    /// Free downstream path miles.
    pub free_downstream_miles: f64,
    /// Free perennial downstream path miles.
    pub free_perennial_downstream_miles: f64,
    /// How the downstream path ends.
    pub downstream_end: String,
    /// Gain miles.
    pub gain_miles: f64,
    /// Perennial gain miles.
    pub perennial_gain_miles: f64,
    /// Gain miles class code.
    pub gain_miles_class: i8,
    /// Gain miles class label.
    pub gain_miles_class_label: String,
    /// Upstream plus free downstream miles.
    pub total_network_miles: f64,
    /// Miles to the network terminal.
    pub miles_to_outlet: f64,
    /// Waterfalls downstream.
    pub waterfalls_downstream: f64,
    /// Dams downstream.
    pub dams_downstream: f64,
    /// Small barriers downstream.
    pub small_barriers_downstream: f64,
    /// Road crossings downstream.
    pub road_crossings_downstream: f64,
    /// `1` flows to ocean, `0` does not.
    pub flows_to_ocean: i8,
    /// `1` flows to a Great Lake, `0` does not.
    pub flows_to_great_lakes: i8,
    /// `1` main route leaves the unit, `0` does not.
    pub exits_region: i8,
    /// `1` barrier sits on a loop and is off-network, `0` otherwise.
    pub on_loop: i8,
    /// Tier per scenario.
    pub tiers: BTreeMap<Scenario, i8>,
    /// Upstream miles per habitat layer name.
    pub habitat_upstream_miles: BTreeMap<String, f64>,
}

fn network_value(network: &Assessed<NetworkMetrics>, f: impl FnOnce(&NetworkMetrics) -> f64) -> f64 {
    network.as_ref().map(f).to_sentinel()
}

fn outlet_value(outlet: &Assessed<OutletPath>, f: impl FnOnce(&OutletPath) -> f64) -> f64 {
    outlet.as_ref().map(f).to_sentinel()
}

fn outlet_flag(outlet: &Assessed<OutletPath>, f: impl FnOnce(&OutletPath) -> bool) -> i8 {
    outlet_value(outlet, |o| if f(o) { 1.0 } else { 0.0 }) as i8
}

fn downstream_count(outlet: &Assessed<OutletPath>, f: impl FnOnce(&BarrierCounts) -> u32) -> f64 {
    outlet_value(outlet, |o| f(&o.downstream_barriers) as f64)
}

fn end_label(network: &Assessed<NetworkMetrics>, labels: &DomainLabels) -> String {
    match network.value().map(|m| m.downstream_end) {
        Some(PathEnd::Barrier(_)) => "barrier".to_string(),
        Some(PathEnd::Terminal(kind)) => kind.to_string(),
        Some(PathEnd::Cycle(_)) => "cycle".to_string(),
        None => labels.not_applicable.clone(),
    }
}

/// Flatten one barrier record.
pub fn export_row(
    unit_id: &str,
    record: &BarrierMetrics,
    tiers: Option<&TierTable>,
    labels: &DomainLabels,
) -> BarrierExportRow {
    let network = &record.network;
    let outlet = &record.outlet;
    let gain = record.gain_miles();
    let gain_miles_class = labels.gain_miles_class(&gain);

    let tier_record = tiers.and_then(|t| t.record(record.barrier_id));
    let tiers = Scenario::ALL
        .iter()
        .map(|s| (*s, tier_record.map(|r| r.tier(*s).value()).unwrap_or(-1)))
        .collect();

    let habitat_upstream_miles = network
        .value()
        .map(|m| {
            m.upstream
                .habitat
                .iter()
                .map(|(layer, miles)| (labels.habitat_label(*layer), *miles))
                .collect()
        })
        .unwrap_or_default();

    BarrierExportRow {
        unit_id: unit_id.to_string(),
        barrier_id: record.barrier_id.as_u64(),
        kind: labels.barrier_kind_label(record.kind),
        network_type: record.network_type,
        total_upstream_miles: network_value(network, |m| m.upstream.total),
        perennial_upstream_miles: network_value(network, |m| m.upstream.perennial),
        intermittent_upstream_miles: network_value(network, |m| m.upstream.intermittent),
        altered_upstream_miles: network_value(network, |m| m.upstream.altered),
        unaltered_upstream_miles: network_value(network, |m| m.upstream.unaltered),
        perennial_unaltered_upstream_miles: network_value(network, |m| m.upstream.perennial_unaltered),
        percent_unaltered: network_value(network, |m| m.percent_unaltered),
        percent_perennial_unaltered: network_value(network, |m| m.percent_perennial_unaltered),
        upstream_drainage_area: network_value(network, |m| m.upstream_drainage_area),
        headwaters: network_value(network, |m| m.headwaters as f64),
        total_downstream_miles: network_value(network, |m| m.total_downstream_miles),
        free_downstream_miles: network_value(network, |m| m.free_downstream_miles),
        free_perennial_downstream_miles: network_value(network, |m| m.free_perennial_downstream_miles),
        downstream_end: end_label(network, labels),
        gain_miles: gain.to_sentinel(),
        perennial_gain_miles: record.perennial_gain_miles().to_sentinel(),
        gain_miles_class,
        gain_miles_class_label: labels.gain_miles_label(gain_miles_class).to_string(),
        total_network_miles: network_value(network, |m| m.total_network_miles),
        miles_to_outlet: outlet_value(outlet, |o| o.miles_to_outlet),
        waterfalls_downstream: downstream_count(outlet, |c| c.waterfalls),
        dams_downstream: downstream_count(outlet, |c| c.dams),
        small_barriers_downstream: downstream_count(outlet, |c| c.small_barriers),
        road_crossings_downstream: downstream_count(outlet, |c| c.road_crossings),
        flows_to_ocean: outlet_flag(outlet, |o| o.flows_to_ocean),
        flows_to_great_lakes: outlet_flag(outlet, |o| o.flows_to_great_lakes),
        exits_region: outlet_flag(outlet, |o| o.exits_region),
        on_loop: i8::from(record.on_loop),
        tiers,
        habitat_upstream_miles,
    }
}

/// Flatten every barrier of one pass of a unit, ordered by barrier id.
pub fn export_unit(
    output: &UnitOutput,
    network_type: NetworkType,
    tiers: Option<&TierTable>,
    labels: &DomainLabels,
) -> Vec<BarrierExportRow> {
    output
        .pass(network_type)
        .map(|pass| {
            pass.barriers
                .values()
                .map(|record| export_row(&output.unit_id, record, tiers, labels))
                .collect()
        })
        .unwrap_or_default()
}
