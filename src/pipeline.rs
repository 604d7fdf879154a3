//! Unit pipeline and batch runner.
//!
//! A processing unit runs build → resolve → attach → cut → aggregate once per
//! analysis pass. Units share nothing mutable, so the batch runner processes
//! them in parallel and isolates failures: a `TopologyError` aborts its unit
//! only, and the run report records it next to the other units' events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attach::attach_barriers;
use crate::canonical::fingerprint;
use crate::cutter::{DownstreamRoutes, NetworkCutter};
use crate::graph::{GraphBuilder, GraphSnapshot, RepairSettings, TopologyError};
use crate::maybe_rayon::*;
use crate::metrics::{aggregate, OutletPaths, PassMetrics};
use crate::policy::{AnalysisPolicy, NetworkType};
use crate::resolve::{resolve, MarineInput};
use crate::tiering::TieringInput;
use crate::types::{
    Assessed, BarrierAttachment, BarrierId, DataQualityEvent, DiagnosticLog, RawJoin, RawSegment,
    RunReport, UnitFailure,
};

/// Per-barrier attributes used by tiering but not by the network engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierContext {
    /// Barrier identifier.
    pub barrier_id: BarrierId,
    /// State the barrier lies in.
    #[serde(default)]
    pub state: String,
    /// Watershed-condition score.
    #[serde(default)]
    pub watershed_condition: Assessed<f64>,
    /// Perennial watershed-condition score.
    #[serde(default)]
    pub perennial_watershed_condition: Assessed<f64>,
    /// Excluded from ranking, e.g. a barrier that blocks invasive species.
    #[serde(default)]
    pub unranked: bool,
}

impl BarrierContext {
    /// Context with a state and no scores.
    pub fn new(barrier_id: u64, state: impl Into<String>) -> Self {
        Self {
            barrier_id: BarrierId::new(barrier_id),
            state: state.into(),
            watershed_condition: Assessed::NotAssessed,
            perennial_watershed_condition: Assessed::NotAssessed,
            unranked: false,
        }
    }

    /// Set the watershed-condition score.
    pub fn with_watershed_condition(mut self, score: f64) -> Self {
        self.watershed_condition = Assessed::Value(score);
        self
    }

    /// Set the perennial watershed-condition score.
    pub fn with_perennial_watershed_condition(mut self, score: f64) -> Self {
        self.perennial_watershed_condition = Assessed::Value(score);
        self
    }

    /// Exclude the barrier from ranking.
    pub fn unranked(mut self) -> Self {
        self.unranked = true;
        self
    }
}

/// Input tables of one processing unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitInput {
    /// Processing unit identifier (e.g. a HUC2 code).
    pub unit_id: String,
    /// Normalized segment table.
    pub segments: Vec<RawSegment>,
    /// Join table.
    pub joins: Vec<RawJoin>,
    /// Barrier attachment table.
    #[serde(default)]
    pub attachments: Vec<BarrierAttachment>,
    /// Marine areas and the segments draining into them.
    #[serde(default)]
    pub marine: MarineInput,
    /// Barrier attributes for tiering.
    #[serde(default)]
    pub barrier_context: Vec<BarrierContext>,
}

/// Fatal error of one unit.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    /// The join table is inconsistent with the segment table.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// The unit has no segments.
    #[error("unit {0} has no segments")]
    EmptyUnit(String),
}

/// Everything a unit produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitOutput {
    /// Processing unit identifier.
    pub unit_id: String,
    /// Snapshot of the resolved graph the passes were computed on.
    pub snapshot: GraphSnapshot,
    /// Hash of the analysis policy parameters.
    pub policy_params_hash: String,
    /// Segments on undirected loops.
    pub loop_count: usize,
    /// Directed cycles found.
    pub cycle_count: usize,
    /// One metrics table per analysis pass, in policy order.
    pub passes: Vec<PassMetrics>,
    /// Barrier attributes carried through for tiering.
    pub barrier_context: Vec<BarrierContext>,
    /// Non-fatal events of the unit.
    #[serde(skip)]
    pub events: Vec<DataQualityEvent>,
    /// Fingerprint over snapshot, policy and pass fingerprints.
    pub fingerprint: String,
}

impl UnitOutput {
    /// Metrics of one pass.
    pub fn pass(&self, network_type: NetworkType) -> Option<&PassMetrics> {
        self.passes.iter().find(|p| p.network_type == network_type)
    }
}

/// Run the full pipeline over one unit.
pub fn process_unit(input: UnitInput, policy: &AnalysisPolicy) -> Result<UnitOutput, UnitError> {
    let span = tracing::info_span!("unit", unit = %input.unit_id);
    let _guard = span.enter();

    if input.segments.is_empty() {
        return Err(UnitError::EmptyUnit(input.unit_id));
    }

    let mut log = DiagnosticLog::new(input.unit_id.clone());
    let builder = GraphBuilder::new(RepairSettings::from_policy(policy));
    let graph = builder.build(input.segments, input.joins, &mut log)?;
    let graph = resolve(graph, &input.marine, &mut log);
    let snapshot = GraphSnapshot::compute(graph.graph());

    let index = attach_barriers(&graph, &input.attachments, &mut log);
    let routes = DownstreamRoutes::compute(&graph, &mut log);
    let outlets = OutletPaths::compute(&graph, &routes, &index, policy.miles_per_length_unit);

    let mut passes = Vec::with_capacity(policy.network_types.len());
    for &network_type in &policy.network_types {
        let cut = NetworkCutter::new(&graph, &index, &routes, network_type).cut();
        tracing::debug!(
            network_type = %network_type,
            networks = cut.networks.len(),
            unassigned = cut.unassigned.len(),
            "pass cut"
        );
        passes.push(aggregate(&graph, &index, &routes, &outlets, &cut, policy));
    }

    let policy_params_hash = policy.params_hash();
    let pass_fingerprints: Vec<&str> = passes.iter().map(|p| p.fingerprint.as_str()).collect();
    let fingerprint = fingerprint(
        "unit_output",
        &(&snapshot.snapshot_id, &policy_params_hash, pass_fingerprints),
    );

    tracing::info!(
        segments = graph.len(),
        barriers = index.len(),
        loops = graph.loop_count(),
        cycles = graph.cycles().len(),
        events = log.events().len(),
        snapshot_id = %snapshot.snapshot_id,
        "unit processed"
    );

    Ok(UnitOutput {
        unit_id: input.unit_id,
        snapshot,
        policy_params_hash,
        loop_count: graph.loop_count(),
        cycle_count: graph.cycles().len(),
        passes,
        barrier_context: input.barrier_context,
        events: log.into_events(),
        fingerprint,
    })
}

/// Outputs of a batch run.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Completed units, in input order.
    pub outputs: Vec<UnitOutput>,
    /// Run report with failures and non-fatal events.
    pub report: RunReport,
}

impl BatchResult {
    /// Tiering inputs of one pass across every completed unit.
    pub fn tiering_inputs(&self, network_type: NetworkType) -> Vec<TieringInput> {
        tiering_inputs(&self.outputs, network_type)
    }
}

/// Processes many units in parallel under one policy.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    policy: AnalysisPolicy,
}

impl BatchRunner {
    /// Create a runner.
    pub fn new(policy: AnalysisPolicy) -> Self {
        Self { policy }
    }

    /// Get the policy being used.
    pub fn policy(&self) -> &AnalysisPolicy {
        &self.policy
    }

    /// Process every unit; failed units are reported, not propagated.
    pub fn run(&self, units: Vec<UnitInput>) -> BatchResult {
        self.run_with_failures(units, Vec::new())
    }

    /// Process the units that loaded; the ones that did not are reported
    /// as failed next to the units that fail while processing.
    pub fn run_loaded(&self, loaded: Vec<Result<UnitInput, UnitFailure>>) -> BatchResult {
        let mut units = Vec::with_capacity(loaded.len());
        let mut failures = Vec::new();
        for item in loaded {
            match item {
                Ok(unit) => units.push(unit),
                Err(failure) => failures.push(failure),
            }
        }
        self.run_with_failures(units, failures)
    }

    fn run_with_failures(&self, units: Vec<UnitInput>, load_failures: Vec<UnitFailure>) -> BatchResult {
        let mut report = RunReport::start(self.policy.params_hash());
        tracing::info!(
            run_id = %report.run_id,
            units = units.len(),
            unreadable = load_failures.len(),
            policy_params_hash = %report.policy_params_hash,
            "batch started"
        );
        for failure in load_failures {
            report.add_failure(failure);
        }

        let policy = &self.policy;
        let results: Vec<(String, Result<UnitOutput, UnitError>)> = units
            .into_par_iter()
            .map(|unit| {
                let unit_id = unit.unit_id.clone();
                (unit_id, process_unit(unit, policy))
            })
            .collect();

        let mut outputs = Vec::with_capacity(results.len());
        for (unit_id, result) in results {
            match result {
                Ok(output) => {
                    report.add_unit(unit_id, output.events.clone());
                    outputs.push(output);
                }
                Err(e) => report.add_failure(UnitFailure {
                    unit_id,
                    error: e.to_string(),
                }),
            }
        }
        report.finish();

        tracing::info!(
            completed = report.completed_units.len(),
            failed = report.failed_units.len(),
            "batch finished"
        );

        BatchResult { outputs, report }
    }
}

/// Tiering inputs of one pass across units.
///
/// Barriers without context get an empty state and unassessed watershed
/// conditions. Barriers on loops or marked unranked carry no score at all,
/// so every scenario leaves them unprioritized.
pub fn tiering_inputs(outputs: &[UnitOutput], network_type: NetworkType) -> Vec<TieringInput> {
    let mut inputs = Vec::new();
    for output in outputs {
        let Some(pass) = output.pass(network_type) else {
            continue;
        };
        let context: BTreeMap<BarrierId, &BarrierContext> =
            output.barrier_context.iter().map(|c| (c.barrier_id, c)).collect();

        for record in pass.barriers.values() {
            let ctx = context.get(&record.barrier_id);
            let excluded = record.on_loop || ctx.is_some_and(|c| c.unranked);
            let score = |value: Assessed<f64>| if excluded { Assessed::NotApplicable } else { value };
            inputs.push(TieringInput {
                barrier_id: record.barrier_id,
                state: ctx.map(|c| c.state.clone()).unwrap_or_default(),
                gain_miles: score(record.gain_miles()),
                perennial_gain_miles: score(record.perennial_gain_miles()),
                watershed_condition: score(ctx.map(|c| c.watershed_condition).unwrap_or_default()),
                perennial_watershed_condition: score(
                    ctx.map(|c| c.perennial_watershed_condition).unwrap_or_default(),
                ),
            });
        }
    }
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BarrierKind;

    fn chain_unit(unit_id: &str) -> UnitInput {
        let mut joins: Vec<RawJoin> = (1..5).map(|i| RawJoin::internal(i, i + 1)).collect();
        joins.push(RawJoin::terminal(5));
        UnitInput {
            unit_id: unit_id.to_string(),
            segments: (1..=5).map(|i| RawSegment::new(i, i as f64, i as f64)).collect(),
            joins,
            attachments: vec![BarrierAttachment::new(1, 3, BarrierKind::Dam)],
            marine: MarineInput::default(),
            barrier_context: vec![BarrierContext::new(1, "GA").with_watershed_condition(0.4)],
        }
    }

    #[test]
    fn test_process_unit_runs_every_pass() {
        let output = process_unit(chain_unit("01"), &AnalysisPolicy::default()).unwrap();

        assert_eq!(output.passes.len(), 2);
        let dams = output.pass(NetworkType::Dams).unwrap();
        assert_eq!(dams.barrier(BarrierId::new(1)).unwrap().gain_miles(), Assessed::Value(6.0));
    }

    #[test]
    fn test_unit_output_is_deterministic() {
        let policy = AnalysisPolicy::default();
        let a = process_unit(chain_unit("01"), &policy).unwrap();
        let b = process_unit(chain_unit("01"), &policy).unwrap();

        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.snapshot, b.snapshot);
    }

    #[test]
    fn test_failed_unit_is_isolated() {
        let mut broken = chain_unit("02");
        broken.joins.push(RawJoin::internal(5, 99));

        let result = BatchRunner::new(AnalysisPolicy::default()).run(vec![chain_unit("01"), broken]);

        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.report.completed_units, vec!["01".to_string()]);
        assert_eq!(result.report.failed_units.len(), 1);
        assert_eq!(result.report.failed_units[0].unit_id, "02");
        assert!(!result.report.is_clean());
    }

    #[test]
    fn test_unloadable_unit_reaches_report() {
        let loaded = vec![
            Ok(chain_unit("01")),
            Err(UnitFailure {
                unit_id: "02".to_string(),
                error: "JSON error in units/02.json: EOF while parsing".to_string(),
            }),
        ];
        let result = BatchRunner::new(AnalysisPolicy::default()).run_loaded(loaded);

        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.report.completed_units, vec!["01".to_string()]);
        assert_eq!(result.report.failed_units.len(), 1);
        assert_eq!(result.report.failed_units[0].unit_id, "02");
        assert!(!result.report.is_clean());
    }

    #[test]
    fn test_empty_unit_is_error() {
        let mut unit = chain_unit("03");
        unit.segments.clear();
        assert!(matches!(
            process_unit(unit, &AnalysisPolicy::default()),
            Err(UnitError::EmptyUnit(_))
        ));
    }

    #[test]
    fn test_tiering_inputs_carry_context() {
        let result = BatchRunner::new(AnalysisPolicy::default()).run(vec![chain_unit("01")]);
        let inputs = result.tiering_inputs(NetworkType::Dams);

        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].state, "GA");
        assert_eq!(inputs[0].gain_miles, Assessed::Value(6.0));
        assert_eq!(inputs[0].watershed_condition, Assessed::Value(0.4));
    }

    #[test]
    fn test_unranked_barrier_has_no_scores() {
        let mut unit = chain_unit("01");
        unit.attachments.push(BarrierAttachment::new(2, 5, BarrierKind::Dam));
        unit.barrier_context[0] = BarrierContext::new(1, "GA").with_watershed_condition(0.4).unranked();
        let result = BatchRunner::new(AnalysisPolicy::default()).run(vec![unit]);
        let inputs = result.tiering_inputs(NetworkType::Dams);

        let excluded = inputs.iter().find(|i| i.barrier_id == BarrierId::new(1)).unwrap();
        assert_eq!(excluded.gain_miles, Assessed::NotApplicable);
        assert_eq!(excluded.watershed_condition, Assessed::NotApplicable);
        let ranked = inputs.iter().find(|i| i.barrier_id == BarrierId::new(2)).unwrap();
        assert!(ranked.gain_miles.is_available());
    }

    #[test]
    fn test_loop_barrier_is_off_network() {
        // 1 splits into 2 and 3, which rejoin at 4; 2 is the minor channel.
        let mut minor = RawSegment::new(2, 1.0, 2.0);
        minor.stream_calc = Some(0);
        let unit = UnitInput {
            unit_id: "loop".to_string(),
            segments: vec![
                RawSegment::new(1, 1.0, 1.0),
                minor,
                RawSegment::new(3, 1.0, 3.0),
                RawSegment::new(4, 1.0, 4.0),
            ],
            joins: vec![
                RawJoin::internal(1, 2),
                RawJoin::internal(1, 3),
                RawJoin::internal(2, 4),
                RawJoin::internal(3, 4),
                RawJoin::terminal(4),
            ],
            attachments: vec![BarrierAttachment::new(1, 2, BarrierKind::Dam)],
            marine: MarineInput::default(),
            barrier_context: vec![BarrierContext::new(1, "GA").with_watershed_condition(0.9)],
        };
        let output = process_unit(unit, &AnalysisPolicy::default()).unwrap();
        let record = output.pass(NetworkType::Dams).unwrap().barrier(BarrierId::new(1)).unwrap();

        assert!(record.on_loop);
        assert_eq!(record.gain_miles(), Assessed::NotApplicable);
        let inputs = tiering_inputs(std::slice::from_ref(&output), NetworkType::Dams);
        assert_eq!(inputs[0].watershed_condition, Assessed::NotApplicable);
    }
}
