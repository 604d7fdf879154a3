//! Golden tests for the connectivity engine.
//!
//! These tests verify determinism, length conservation and the reference
//! scenarios of the network cutter and metrics aggregator.

use barrier_connectivity::{
    attach_barriers, process_unit, resolve, AnalysisPolicy, AreaKind, Assessed, BarrierAttachment,
    BarrierContext, BarrierId, BarrierKind, BatchRunner, DiagnosticLog, DownstreamRoutes,
    DrainsInto, GraphBuilder, MarineArea, MarineInput, NetworkCutter, NetworkType, PathEnd, Point,
    RawJoin, RawSegment, RepairSettings, ResolvedGraph, SegmentId, TerminalKind, UnitInput,
};
use proptest::prelude::*;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Chain 1 → 2 → 3 → 4 → 5 → terminal, lengths 1..=5.
fn chain_segments() -> Vec<RawSegment> {
    (1..=5).map(|i| RawSegment::new(i, i as f64, i as f64)).collect()
}

fn chain_joins() -> Vec<RawJoin> {
    let mut joins: Vec<RawJoin> = (1..5).map(|i| RawJoin::internal(i, i + 1)).collect();
    joins.push(RawJoin::terminal(5));
    joins
}

fn unit(
    unit_id: &str,
    segments: Vec<RawSegment>,
    joins: Vec<RawJoin>,
    attachments: Vec<BarrierAttachment>,
    marine: MarineInput,
) -> UnitInput {
    UnitInput {
        unit_id: unit_id.to_string(),
        segments,
        joins,
        attachments,
        marine,
        barrier_context: Vec::new(),
    }
}

fn ocean_at(segment_id: u64) -> MarineInput {
    MarineInput {
        areas: vec![MarineArea { id: 1, kind: AreaKind::SeaOcean }],
        adjacency: vec![],
        drains_into: vec![DrainsInto {
            segment_id: SegmentId::new(segment_id),
            area_id: 1,
        }],
    }
}

fn resolved(segments: Vec<RawSegment>, joins: Vec<RawJoin>) -> ResolvedGraph {
    let mut log = DiagnosticLog::new("golden");
    let graph = GraphBuilder::default()
        .build(segments, joins, &mut log)
        .expect("valid topology");
    resolve(graph, &MarineInput::default(), &mut log)
}

fn network_length(
    graph: &ResolvedGraph,
    attachments: &[BarrierAttachment],
    barrier_id: u64,
) -> f64 {
    let mut log = DiagnosticLog::new("golden");
    let index = attach_barriers(graph, attachments, &mut log);
    let routes = DownstreamRoutes::compute(graph, &mut log);
    let cut = NetworkCutter::new(graph, &index, &routes, NetworkType::Dams).cut();
    cut.upstream_network(BarrierId::new(barrier_id))
        .map(|n| n.length())
        .unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_chain_barrier_on_middle_segment() {
    let input = unit(
        "chain",
        chain_segments(),
        chain_joins(),
        vec![BarrierAttachment::new(1, 3, BarrierKind::Dam)],
        MarineInput::default(),
    );
    let output = process_unit(input, &AnalysisPolicy::default()).expect("unit should process");
    let record = output.pass(NetworkType::Dams).unwrap().barrier(BarrierId::new(1)).unwrap();
    let m = record.network.value().unwrap();

    assert_eq!(m.upstream.total, 6.0);
    assert_eq!(m.free_downstream_miles, 9.0);
    assert_eq!(m.gain_miles, 6.0);
    assert_eq!(m.downstream_end, PathEnd::Terminal(TerminalKind::Outlet));
}

#[test]
fn test_chain_to_ocean_uses_open_water_exception() {
    let input = unit(
        "coast",
        chain_segments(),
        chain_joins(),
        vec![BarrierAttachment::new(1, 3, BarrierKind::Dam)],
        ocean_at(5),
    );
    let output = process_unit(input, &AnalysisPolicy::default()).expect("unit should process");
    let record = output.pass(NetworkType::Dams).unwrap().barrier(BarrierId::new(1)).unwrap();
    let m = record.network.value().unwrap();

    assert_eq!(m.downstream_end, PathEnd::Terminal(TerminalKind::Marine));
    assert_eq!(m.free_downstream_miles, 9.0);
    assert_eq!(m.gain_miles, 6.0);
    assert!(record.outlet.value().unwrap().flows_to_ocean);
}

#[test]
fn test_ocean_exception_ignores_short_free_reach() {
    let mut segments = chain_segments();
    segments[3].waterbody = true;
    segments[4].waterbody = true;
    let input = unit(
        "reservoir",
        segments,
        chain_joins(),
        vec![BarrierAttachment::new(1, 3, BarrierKind::Dam)],
        ocean_at(5),
    );
    let output = process_unit(input, &AnalysisPolicy::default()).expect("unit should process");
    let m = output
        .pass(NetworkType::Dams)
        .and_then(|p| p.barrier(BarrierId::new(1)))
        .and_then(|r| r.network.value().cloned())
        .unwrap();

    assert_eq!(m.free_downstream_miles, 0.0);
    assert_eq!(m.gain_miles, 6.0);
}

#[test]
fn test_chain_to_great_lake_through_bay_uses_open_water_exception() {
    let mut segments = chain_segments();
    segments[3].waterbody = true;
    segments[4].waterbody = true;
    // Segment 5 ends in a bay that touches a Great Lake.
    let marine = MarineInput {
        areas: vec![
            MarineArea { id: 1, kind: AreaKind::BayInlet },
            MarineArea { id: 2, kind: AreaKind::GreatLake },
        ],
        adjacency: vec![(1, 2)],
        drains_into: vec![DrainsInto {
            segment_id: SegmentId::new(5),
            area_id: 1,
        }],
    };
    let input = unit(
        "lakes",
        segments,
        chain_joins(),
        vec![BarrierAttachment::new(1, 3, BarrierKind::Dam)],
        marine,
    );
    let output = process_unit(input, &AnalysisPolicy::default()).expect("unit should process");
    let record = output.pass(NetworkType::Dams).unwrap().barrier(BarrierId::new(1)).unwrap();
    let m = record.network.value().unwrap();
    let outlet = record.outlet.value().unwrap();

    assert_eq!(m.downstream_end, PathEnd::Terminal(TerminalKind::GreatLakes));
    assert_eq!(m.free_downstream_miles, 0.0);
    assert_eq!(m.gain_miles, 6.0);
    assert!(outlet.flows_to_great_lakes);
    assert!(!outlet.flows_to_ocean);
    assert_eq!(outlet.terminal, Some(TerminalKind::GreatLakes));
}

#[test]
fn test_region_exit_keeps_smaller_side_rule() {
    let mut joins = chain_joins();
    joins.pop();
    joins.push(RawJoin::huc_out(5));
    let input = unit(
        "exit",
        chain_segments(),
        joins,
        vec![BarrierAttachment::new(1, 4, BarrierKind::Dam)],
        MarineInput::default(),
    );
    let output = process_unit(input, &AnalysisPolicy::default()).expect("unit should process");
    let record = output.pass(NetworkType::Dams).unwrap().barrier(BarrierId::new(1)).unwrap();
    let m = record.network.value().unwrap();
    let outlet = record.outlet.value().unwrap();

    assert_eq!(m.downstream_end, PathEnd::Terminal(TerminalKind::RegionExit));
    assert_eq!(m.upstream.total, 10.0);
    assert_eq!(m.free_downstream_miles, 5.0);
    assert_eq!(m.gain_miles, 5.0);
    assert_eq!(m.total_network_miles, 15.0);
    assert!(outlet.exits_region);
    assert_eq!(outlet.miles_to_outlet, 5.0);
}

fn repair_unit(gap: f64) -> (Vec<RawSegment>, Vec<RawJoin>) {
    let segments = vec![
        RawSegment::new(1, 1.0, 1.0).with_endpoints(Point::new(0.0, 1000.0), Point::new(0.0, 0.0)),
        RawSegment::new(2, 1.0, 2.0).with_endpoints(Point::new(gap, 0.0), Point::new(gap, -1000.0)),
        RawSegment::new(3, 1.0, 3.0)
            .with_endpoints(Point::new(gap, -1000.0), Point::new(gap, -2000.0)),
    ];
    let joins = vec![RawJoin::terminal(1), RawJoin::internal(2, 3), RawJoin::terminal(3)];
    (segments, joins)
}

#[test]
fn test_terminal_repaired_at_50m() {
    let (segments, joins) = repair_unit(50.0);
    let mut log = DiagnosticLog::new("repair");
    let graph = GraphBuilder::new(RepairSettings::default())
        .build(segments, joins, &mut log)
        .unwrap();

    let one = graph.segment_ix(SegmentId::new(1)).unwrap();
    assert!(!graph.is_terminal(one));
    assert_eq!(log.count("terminal_repaired"), 1);
}

#[test]
fn test_terminal_not_repaired_at_150m() {
    let (segments, joins) = repair_unit(150.0);
    let mut log = DiagnosticLog::new("repair");
    let graph = GraphBuilder::new(RepairSettings::default())
        .build(segments, joins, &mut log)
        .unwrap();

    let one = graph.segment_ix(SegmentId::new(1)).unwrap();
    assert!(graph.is_terminal(one));
    assert_eq!(log.count("terminal_not_repaired"), 1);
}

#[test]
fn test_removing_leaf_barrier_merges_into_next_downstream() {
    let graph = resolved(chain_segments(), chain_joins());
    let both = [
        BarrierAttachment::new(1, 2, BarrierKind::Dam),
        BarrierAttachment::new(2, 4, BarrierKind::Dam),
    ];
    let lower_only = [BarrierAttachment::new(2, 4, BarrierKind::Dam)];

    let leaf = network_length(&graph, &both, 1);
    let lower_before = network_length(&graph, &both, 2);
    let lower_after = network_length(&graph, &lower_only, 2);

    assert_eq!(leaf, 3.0);
    assert_eq!(lower_before, 7.0);
    assert_eq!(lower_after, lower_before + leaf);
}

#[test]
fn test_inactive_barrier_counts_as_transparent() {
    let input = unit(
        "passes",
        chain_segments(),
        chain_joins(),
        vec![
            BarrierAttachment::new(1, 4, BarrierKind::Dam),
            BarrierAttachment::new(2, 2, BarrierKind::SmallBarrier),
        ],
        MarineInput::default(),
    );
    let output = process_unit(input, &AnalysisPolicy::default()).unwrap();

    let dams = output.pass(NetworkType::Dams).unwrap();
    let dam = dams.barrier(BarrierId::new(1)).unwrap().network.value().unwrap();
    assert_eq!(dam.upstream.total, 10.0);
    assert_eq!(dam.transparent_barriers.small_barriers, 1);
    assert_eq!(dams.barrier(BarrierId::new(2)).unwrap().gain_miles(), Assessed::NotApplicable);

    let small = output.pass(NetworkType::SmallBarriers).unwrap();
    let dam = small.barrier(BarrierId::new(1)).unwrap().network.value().unwrap();
    assert_eq!(dam.upstream.total, 7.0);
    assert_eq!(dam.upstream_barriers.small_barriers, 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Data Quality
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_ambiguous_split_is_logged_and_resolved() {
    let input = unit(
        "split",
        vec![
            RawSegment::new(1, 1.0, 1.0),
            RawSegment::new(2, 2.0, 2.0),
            RawSegment::new(3, 5.0, 3.0),
        ],
        vec![
            RawJoin::internal(1, 2),
            RawJoin::internal(1, 3),
            RawJoin::terminal(2),
            RawJoin::terminal(3),
        ],
        vec![BarrierAttachment::new(1, 1, BarrierKind::Dam)],
        MarineInput::default(),
    );
    let output = process_unit(input, &AnalysisPolicy::default()).unwrap();
    let m = output
        .pass(NetworkType::Dams)
        .and_then(|p| p.barrier(BarrierId::new(1)))
        .and_then(|r| r.network.value().cloned())
        .unwrap();

    assert_eq!(m.total_downstream_miles, 5.0);
    assert!(output.events.iter().any(|e| e.kind_name() == "ambiguous_downstream_branch"));
}

#[test]
fn test_cycle_does_not_abort_unit() {
    let input = unit(
        "cycle",
        (1..=3).map(|i| RawSegment::new(i, 1.0, 1.0)).collect(),
        vec![RawJoin::internal(1, 2), RawJoin::internal(2, 3), RawJoin::internal(3, 2)],
        vec![BarrierAttachment::new(1, 1, BarrierKind::Dam)],
        MarineInput::default(),
    );
    let output = process_unit(input, &AnalysisPolicy::default()).unwrap();
    let m = output
        .pass(NetworkType::Dams)
        .and_then(|p| p.barrier(BarrierId::new(1)))
        .and_then(|r| r.network.value().cloned())
        .unwrap();

    assert!(matches!(m.downstream_end, PathEnd::Cycle(_)));
    assert_eq!(m.gain_miles, 1.0);
    assert!(output.events.iter().any(|e| e.kind_name() == "cycle_detected"));
}

#[test]
fn test_unattached_barrier_reported_not_fatal() {
    let input = unit(
        "orphan",
        chain_segments(),
        chain_joins(),
        vec![
            BarrierAttachment::new(1, 3, BarrierKind::Dam),
            BarrierAttachment::new(2, 77, BarrierKind::Dam),
        ],
        MarineInput::default(),
    );
    let result = BatchRunner::new(AnalysisPolicy::default()).run(vec![input]);

    assert!(result.report.is_clean());
    assert_eq!(result.report.totals().get("unattached_barrier"), Some(&1));
    let dams = result.outputs[0].pass(NetworkType::Dams).unwrap();
    assert_eq!(dams.barrier(BarrierId::new(2)).unwrap().gain_miles().to_sentinel(), -1.0);
}

#[test]
fn test_topology_error_isolated_to_unit() {
    let good = unit("good", chain_segments(), chain_joins(), vec![], MarineInput::default());
    let mut joins = chain_joins();
    joins.push(RawJoin::internal(3, 404));
    let bad = unit("bad", chain_segments(), joins, vec![], MarineInput::default());

    let result = BatchRunner::new(AnalysisPolicy::default()).run(vec![bad, good]);

    assert_eq!(result.outputs.len(), 1);
    assert_eq!(result.outputs[0].unit_id, "good");
    assert_eq!(result.report.failed_units[0].unit_id, "bad");
    assert!(result.report.failed_units[0].error.contains("404"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Determinism
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_recut_is_idempotent() {
    let attachments = vec![
        BarrierAttachment::new(10, 2, BarrierKind::Dam).at(1.0),
        BarrierAttachment::new(11, 4, BarrierKind::SmallBarrier),
    ];
    let policy = AnalysisPolicy::default();
    let a = process_unit(
        unit("idem", chain_segments(), chain_joins(), attachments.clone(), MarineInput::default()),
        &policy,
    )
    .unwrap();
    let b = process_unit(
        unit("idem", chain_segments(), chain_joins(), attachments, MarineInput::default()),
        &policy,
    )
    .unwrap();

    assert_eq!(a.snapshot.snapshot_id, b.snapshot.snapshot_id);
    for (pa, pb) in a.passes.iter().zip(&b.passes) {
        assert_eq!(pa.cut_fingerprint, pb.cut_fingerprint);
        assert_eq!(pa.fingerprint, pb.fingerprint);
    }
    assert_eq!(a.fingerprint, b.fingerprint);
}

#[test]
fn test_input_order_does_not_change_output() {
    let attachments = vec![
        BarrierAttachment::new(10, 2, BarrierKind::Dam),
        BarrierAttachment::new(11, 4, BarrierKind::Dam),
    ];
    let policy = AnalysisPolicy::default();
    let forward = process_unit(
        unit("order", chain_segments(), chain_joins(), attachments.clone(), MarineInput::default()),
        &policy,
    )
    .unwrap();

    let mut segments = chain_segments();
    segments.reverse();
    let mut joins = chain_joins();
    joins.reverse();
    let mut reversed_attachments = attachments;
    reversed_attachments.reverse();
    let reversed = process_unit(
        unit("order", segments, joins, reversed_attachments, MarineInput::default()),
        &policy,
    )
    .unwrap();

    assert_eq!(forward.fingerprint, reversed.fingerprint);
}

#[test]
fn test_policy_hash_changes_unit_fingerprint() {
    let mut other = AnalysisPolicy::default();
    other.miles_per_length_unit = AnalysisPolicy::MILES_PER_METRE;

    let a = process_unit(
        unit("policy", chain_segments(), chain_joins(), vec![], MarineInput::default()),
        &AnalysisPolicy::default(),
    )
    .unwrap();
    let b = process_unit(
        unit("policy", chain_segments(), chain_joins(), vec![], MarineInput::default()),
        &other,
    )
    .unwrap();

    assert_eq!(a.snapshot, b.snapshot);
    assert_ne!(a.policy_params_hash, b.policy_params_hash);
    assert_ne!(a.fingerprint, b.fingerprint);
}

#[test]
fn test_barrier_context_flows_to_tiering_inputs() {
    let mut input = unit(
        "context",
        chain_segments(),
        chain_joins(),
        vec![BarrierAttachment::new(1, 3, BarrierKind::Dam)],
        MarineInput::default(),
    );
    input
        .barrier_context
        .push(BarrierContext::new(1, "SC").with_watershed_condition(0.7));
    let result = BatchRunner::new(AnalysisPolicy::default()).run(vec![input]);
    let inputs = result.tiering_inputs(NetworkType::Dams);

    assert_eq!(inputs[0].state, "SC");
    assert_eq!(inputs[0].gain_miles, Assessed::Value(6.0));
}

// ─────────────────────────────────────────────────────────────────────────────
// Conservation (property-based)
// ─────────────────────────────────────────────────────────────────────────────

/// Random dendritic network: segment `i > 1` drains into a segment with a
/// smaller id, segment 1 is the only terminal.
fn arb_network() -> impl Strategy<Value = (Vec<RawSegment>, Vec<RawJoin>, Vec<BarrierAttachment>)> {
    (2usize..40)
        .prop_flat_map(|n| {
            (
                Just(n),
                prop::collection::vec(0.1f64..10.0, n),
                prop::collection::vec(any::<prop::sample::Index>(), n),
                prop::collection::vec((any::<prop::sample::Index>(), 0.0f64..1.0, 0u8..4), 0..20),
            )
        })
        .prop_map(|(n, lengths, parents, barriers)| {
            let segments: Vec<RawSegment> = (1..=n)
                .map(|i| RawSegment::new(i as u64, lengths[i - 1], (n - i + 1) as f64))
                .collect();
            let mut joins = vec![RawJoin::terminal(1)];
            for i in 2..=n {
                let parent = parents[i - 1].index(i - 1) + 1;
                joins.push(RawJoin::internal(i as u64, parent as u64));
            }
            let kinds = [
                BarrierKind::Waterfall,
                BarrierKind::Dam,
                BarrierKind::SmallBarrier,
                BarrierKind::RoadCrossing,
            ];
            let attachments = barriers
                .into_iter()
                .enumerate()
                .map(|(b, (segment, fraction, kind))| {
                    let segment = segment.index(n) + 1;
                    BarrierAttachment::new(b as u64 + 1, segment as u64, kinds[kind as usize])
                        .at(fraction * lengths[segment - 1])
                })
                .collect();
            (segments, joins, attachments)
        })
}

proptest! {
    #[test]
    fn prop_network_lengths_conserve_unit_length((segments, joins, attachments) in arb_network()) {
        let graph = resolved(segments, joins);
        let total = graph.total_length();
        let mut log = DiagnosticLog::new("prop");
        let index = attach_barriers(&graph, &attachments, &mut log);
        let routes = DownstreamRoutes::compute(&graph, &mut log);

        for network_type in [NetworkType::Dams, NetworkType::SmallBarriers, NetworkType::RoadCrossings] {
            let cut = NetworkCutter::new(&graph, &index, &routes, network_type).cut();
            let assigned = cut.assigned_length();
            prop_assert!((assigned + cut.unassigned_length() - total).abs() < 1e-6);
            // Dendritic network with a terminal: nothing is left over.
            prop_assert!(cut.unassigned_length().abs() < 1e-9);
        }
    }

    #[test]
    fn prop_gain_bounded_by_network_total((segments, joins, attachments) in arb_network()) {
        let input = UnitInput {
            unit_id: "prop".to_string(),
            segments,
            joins,
            attachments,
            marine: MarineInput::default(),
            barrier_context: Vec::new(),
        };
        let output = process_unit(input, &AnalysisPolicy::default()).unwrap();
        for pass in &output.passes {
            for record in pass.barriers.values() {
                if let Some(m) = record.network.value() {
                    prop_assert!(m.gain_miles <= m.upstream.total + m.free_downstream_miles + 1e-9);
                    if !m.downstream_end.is_open_water() {
                        prop_assert_eq!(m.gain_miles, m.upstream.total.min(m.free_downstream_miles));
                    }
                }
            }
        }
    }
}
