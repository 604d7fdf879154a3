//! Graph builder: raw segment and join tables → `FlowGraph`.
//!
//! ## Stages
//!
//! 1. Validate the tables (duplicate ids, dangling joins)
//! 2. Repair joins wrongly marked terminal (bounded spatial tolerance)
//! 3. Drop coastlines, underground conduits and zero-drainage segments,
//!    rewriting the joins that touched them
//! 4. Index the surviving segments densely and build both adjacency lists
//!
//! A dangling join is a source-data defect and aborts the unit; everything
//! else is repaired or recorded in the unit's `DiagnosticLog`.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::spatial::PointGrid;
use super::FlowGraph;
use crate::policy::AnalysisPolicy;
use crate::types::{
    DataQualityEvent, DiagnosticLog, FlowlineType, JoinKind, RawJoin, RawSegment, Segment,
    SegmentId, SegmentIx, TerminalKind,
};

/// Distances closer than this are treated as equal during repair.
const DISTANCE_EPSILON: f64 = 1e-9;

/// Error type for graph construction. Fatal to the unit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TopologyError {
    /// A join references a segment missing from the segment table.
    #[error("Dangling join {upstream:?} -> {downstream:?}: segment {missing} not in segment table")]
    DanglingJoin {
        /// Upstream side of the join.
        upstream: Option<SegmentId>,
        /// Downstream side of the join.
        downstream: Option<SegmentId>,
        /// The id that could not be resolved.
        missing: SegmentId,
    },
    /// The same segment id appears twice in the segment table.
    #[error("Duplicate segment id: {0}")]
    DuplicateSegment(SegmentId),
    /// A segment carries an unusable attribute value.
    #[error("Invalid segment {segment_id}: {reason}")]
    InvalidSegment {
        /// Offending segment.
        segment_id: SegmentId,
        /// What is wrong with it.
        reason: String,
    },
    /// A join with neither an upstream nor a downstream segment.
    #[error("Join has neither upstream nor downstream segment")]
    EmptyJoin,
}

/// Parameters of the terminal repair heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepairSettings {
    /// Maximum end-to-start distance (m) for reconnecting a terminal.
    pub tolerance: f64,
    /// Radius (m) within which unrepaired near misses are reported.
    pub search_radius: f64,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            tolerance: 100.0,
            search_radius: 500.0,
        }
    }
}

impl RepairSettings {
    /// Take repair settings from an analysis policy.
    pub fn from_policy(policy: &AnalysisPolicy) -> Self {
        Self {
            tolerance: policy.repair_tolerance,
            search_radius: policy.repair_search_radius.max(policy.repair_tolerance),
        }
    }
}

/// Builds a `FlowGraph` for one processing unit.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    settings: RepairSettings,
}

impl GraphBuilder {
    /// Create a builder with the given repair settings.
    pub fn new(settings: RepairSettings) -> Self {
        Self { settings }
    }

    /// Build the graph.
    pub fn build(
        &self,
        segments: Vec<RawSegment>,
        joins: Vec<RawJoin>,
        log: &mut DiagnosticLog,
    ) -> Result<FlowGraph, TopologyError> {
        let table = index_segments(segments, log)?;
        let joins: Vec<RawJoin> = joins.into_iter().map(RawJoin::with_shape_kind).collect();
        validate_joins(&table, &joins)?;

        let joins = self.repair_terminals(&table, joins, log);
        let removed: HashSet<SegmentId> = table
            .values()
            .filter(|s| s.flowline_type.is_excluded() || s.drainage_area <= 0.0)
            .map(|s| s.segment_id)
            .collect();
        let joins = propagate_removals(&table, &removed, joins);

        let graph = assemble(&table, &removed, &joins);
        tracing::debug!(
            segments = graph.len(),
            joins = graph.join_count(),
            removed = removed.len(),
            "flow graph built"
        );
        Ok(graph)
    }

    /// Reconnect terminal joins whose segment ends next to the start of
    /// another segment.
    fn repair_terminals(
        &self,
        table: &BTreeMap<SegmentId, RawSegment>,
        mut joins: Vec<RawJoin>,
        log: &mut DiagnosticLog,
    ) -> Vec<RawJoin> {
        let mut downstream_of: HashMap<SegmentId, Vec<SegmentId>> = HashMap::new();
        let mut terminals: HashSet<SegmentId> = HashSet::new();
        for join in &joins {
            match (join.upstream, join.downstream) {
                (Some(u), Some(d)) => downstream_of.entry(u).or_default().push(d),
                (Some(u), None) => {
                    terminals.insert(u);
                }
                _ => {}
            }
        }

        // Candidates: segments with geometry that are neither terminals
        // themselves nor about to be dropped.
        let candidates: Vec<&RawSegment> = table
            .values()
            .filter(|s| s.endpoints.is_some())
            .filter(|s| !terminals.contains(&s.segment_id))
            .filter(|s| !s.flowline_type.is_excluded() && s.drainage_area > 0.0)
            .collect();
        if candidates.is_empty() {
            return joins;
        }
        let grid = PointGrid::new(
            candidates
                .iter()
                .filter_map(|s| s.endpoints.map(|e| e.start))
                .collect(),
            self.settings.search_radius,
        );

        for join in joins.iter_mut() {
            if join.kind != JoinKind::Terminal || join.marine {
                continue;
            }
            let Some(upstream) = join.upstream else { continue };
            let Some(end) = table.get(&upstream).and_then(|s| s.endpoints).map(|e| e.end) else {
                continue;
            };

            let hits: Vec<(SegmentId, f64)> = grid
                .within(&end, self.settings.search_radius)
                .into_iter()
                .map(|(i, d)| (candidates[i].segment_id, d))
                .filter(|(id, _)| *id != upstream)
                .collect();
            let Some(&(nearest, nearest_distance)) = hits.first() else {
                continue;
            };

            if nearest_distance > self.settings.tolerance {
                log.record(DataQualityEvent::TerminalNotRepaired {
                    segment_id: upstream,
                    nearest,
                    distance: nearest_distance,
                });
                continue;
            }

            let tied: Vec<SegmentId> = hits
                .iter()
                .take_while(|(_, d)| (d - nearest_distance).abs() <= DISTANCE_EPSILON)
                .map(|(id, _)| *id)
                .collect();
            let chosen = break_repair_tie(&tied, &downstream_of);

            tracing::debug!(
                segment = %upstream,
                downstream = %chosen,
                distance = nearest_distance,
                "repaired false terminal"
            );
            log.record(DataQualityEvent::TerminalRepaired {
                segment_id: upstream,
                downstream: chosen,
                distance: nearest_distance,
            });
            *join = RawJoin {
                upstream: Some(upstream),
                downstream: Some(chosen),
                kind: JoinKind::Internal,
                marine: false,
            };
        }
        joins
    }
}

/// Among equidistant candidates, prefer one that is directly downstream of
/// another tied candidate; otherwise the lowest id.
fn break_repair_tie(
    tied: &[SegmentId],
    downstream_of: &HashMap<SegmentId, Vec<SegmentId>>,
) -> SegmentId {
    let mut sorted = tied.to_vec();
    sorted.sort();
    sorted
        .iter()
        .copied()
        .find(|candidate| {
            sorted.iter().any(|other| {
                other != candidate
                    && downstream_of
                        .get(other)
                        .map(|ds| ds.contains(candidate))
                        .unwrap_or(false)
            })
        })
        .unwrap_or(sorted[0])
}

fn index_segments(
    segments: Vec<RawSegment>,
    log: &mut DiagnosticLog,
) -> Result<BTreeMap<SegmentId, RawSegment>, TopologyError> {
    let mut table = BTreeMap::new();
    for segment in segments {
        if !segment.length.is_finite() || segment.length < 0.0 {
            return Err(TopologyError::InvalidSegment {
                segment_id: segment.segment_id,
                reason: format!("length {} is not a non-negative number", segment.length),
            });
        }
        if segment.length == 0.0 {
            log.record(DataQualityEvent::ZeroLengthSegment {
                segment_id: segment.segment_id,
            });
        }
        if !segment.drainage_area.is_finite() {
            return Err(TopologyError::InvalidSegment {
                segment_id: segment.segment_id,
                reason: "drainage area is not finite".to_string(),
            });
        }
        let id = segment.segment_id;
        if table.insert(id, segment).is_some() {
            return Err(TopologyError::DuplicateSegment(id));
        }
    }
    Ok(table)
}

fn validate_joins(
    table: &BTreeMap<SegmentId, RawSegment>,
    joins: &[RawJoin],
) -> Result<(), TopologyError> {
    for join in joins {
        if join.upstream.is_none() && join.downstream.is_none() {
            return Err(TopologyError::EmptyJoin);
        }
        let upstream_may_be_outside = join.kind == JoinKind::HucIn;
        let checked = join
            .upstream
            .filter(|_| !upstream_may_be_outside)
            .into_iter()
            .chain(join.downstream);
        for id in checked {
            if !table.contains_key(&id) {
                return Err(TopologyError::DanglingJoin {
                    upstream: join.upstream,
                    downstream: join.downstream,
                    missing: id,
                });
            }
        }
    }
    Ok(())
}

/// Rewrite joins touching removed segments, then canonicalize the table.
///
/// A join into a removed segment is dropped when its upstream keeps another
/// way downstream, otherwise it becomes a terminal (marine when the removed
/// segment is a coastline). Joins out of removed segments mirror this with
/// origins. Terminal and origin rows of segments that still have internal
/// joins are dropped, and duplicates are merged.
fn propagate_removals(
    table: &BTreeMap<SegmentId, RawSegment>,
    removed: &HashSet<SegmentId>,
    joins: Vec<RawJoin>,
) -> Vec<RawJoin> {
    let alive = |id: &Option<SegmentId>| id.map(|id| table.contains_key(&id) && !removed.contains(&id));

    let mut has_downstream: HashSet<SegmentId> = HashSet::new();
    let mut has_upstream: HashSet<SegmentId> = HashSet::new();
    for join in &joins {
        if let (Some(u), Some(d)) = (join.upstream, join.downstream) {
            if alive(&join.upstream) == Some(true) && alive(&join.downstream) == Some(true) {
                has_downstream.insert(u);
                has_upstream.insert(d);
            }
        }
    }

    let mut rewritten = Vec::with_capacity(joins.len());
    for join in joins {
        let up_removed = join.upstream.map(|u| removed.contains(&u)).unwrap_or(false);
        let down_removed = join.downstream.map(|d| removed.contains(&d)).unwrap_or(false);

        match (up_removed, down_removed) {
            (true, true) => {}
            (false, true) => {
                let (Some(u), Some(r)) = (join.upstream, join.downstream) else { continue };
                if join.kind == JoinKind::HucIn && !table.contains_key(&u) {
                    continue;
                }
                if !has_downstream.contains(&u) {
                    let into_coast = table
                        .get(&r)
                        .map(|s| s.flowline_type == FlowlineType::Coastline)
                        .unwrap_or(false);
                    rewritten.push(RawJoin {
                        upstream: Some(u),
                        downstream: None,
                        kind: JoinKind::Terminal,
                        marine: join.marine || into_coast,
                    });
                }
            }
            (true, false) => {
                let Some(d) = join.downstream else {
                    continue;
                };
                if !has_upstream.contains(&d) {
                    rewritten.push(RawJoin {
                        upstream: None,
                        downstream: Some(d),
                        kind: JoinKind::Origin,
                        marine: false,
                    });
                }
            }
            (false, false) => rewritten.push(join),
        }
    }

    let mut merged: BTreeMap<(Option<SegmentId>, Option<SegmentId>, JoinKind), bool> = BTreeMap::new();
    for join in rewritten {
        let redundant = match (join.upstream, join.downstream) {
            (Some(u), None) => has_downstream.contains(&u),
            (None, Some(d)) => has_upstream.contains(&d),
            _ => false,
        };
        if redundant {
            continue;
        }
        let marine = merged
            .entry((join.upstream, join.downstream, join.kind))
            .or_insert(false);
        *marine |= join.marine;
    }

    merged
        .into_iter()
        .map(|((upstream, downstream, kind), marine)| RawJoin {
            upstream,
            downstream,
            kind,
            marine,
        })
        .collect()
}

/// Dense-index the surviving segments and derive boundary flags.
fn assemble(
    table: &BTreeMap<SegmentId, RawSegment>,
    removed: &HashSet<SegmentId>,
    joins: &[RawJoin],
) -> FlowGraph {
    let mut segments: Vec<Segment> = table
        .values()
        .filter(|s| !removed.contains(&s.segment_id))
        .map(Segment::from_raw)
        .collect();
    let index: HashMap<SegmentId, SegmentIx> = segments
        .iter()
        .enumerate()
        .map(|(ix, s)| (s.id, ix as SegmentIx))
        .collect();

    let mut pairs: BTreeSet<(SegmentIx, SegmentIx)> = BTreeSet::new();
    let mut marine_ends: HashSet<SegmentIx> = HashSet::new();
    let mut region_exits: HashSet<SegmentIx> = HashSet::new();

    for join in joins {
        let up = join.upstream.and_then(|id| index.get(&id).copied());
        let down = join.downstream.and_then(|id| index.get(&id).copied());
        match (up, down) {
            (Some(u), Some(d)) if u != d => {
                pairs.insert((u, d));
            }
            (None, Some(d)) if join.kind == JoinKind::HucIn => {
                segments[d as usize].huc_in = true;
            }
            (Some(u), None) if join.downstream.is_none() => {
                if join.marine {
                    marine_ends.insert(u);
                }
                if join.kind == JoinKind::HucOut {
                    region_exits.insert(u);
                }
            }
            _ => {}
        }
    }

    let pairs: Vec<(SegmentIx, SegmentIx)> = pairs.into_iter().collect();
    let mut graph = FlowGraph::from_parts(segments, &pairs);

    for ix in 0..graph.len() as SegmentIx {
        if !graph.is_terminal(ix) {
            continue;
        }
        let kind = if marine_ends.contains(&ix) {
            TerminalKind::Marine
        } else if region_exits.contains(&ix) {
            TerminalKind::RegionExit
        } else {
            TerminalKind::Outlet
        };
        let segment = graph.segment_mut(ix);
        segment.terminal = Some(kind);
        segment.is_marine = kind == TerminalKind::Marine;
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn build(segments: Vec<RawSegment>, joins: Vec<RawJoin>) -> (FlowGraph, DiagnosticLog) {
        let mut log = DiagnosticLog::new("test");
        let graph = GraphBuilder::default()
            .build(segments, joins, &mut log)
            .unwrap();
        (graph, log)
    }

    fn ix(graph: &FlowGraph, id: u64) -> SegmentIx {
        graph.segment_ix(SegmentId::new(id)).unwrap()
    }

    #[test]
    fn test_builds_chain_with_bidirectional_lookup() {
        let (graph, _) = build(
            vec![
                RawSegment::new(1, 1.0, 1.0),
                RawSegment::new(2, 1.0, 2.0),
                RawSegment::new(3, 1.0, 3.0),
            ],
            vec![
                RawJoin::origin(1),
                RawJoin::internal(1, 2),
                RawJoin::internal(2, 3),
                RawJoin::terminal(3),
            ],
        );

        assert_eq!(graph.len(), 3);
        assert_eq!(graph.downstream_of(ix(&graph, 1)), &[ix(&graph, 2)]);
        assert_eq!(graph.upstream_of(ix(&graph, 3)), &[ix(&graph, 2)]);
        assert!(graph.is_origin(ix(&graph, 1)));
        assert_eq!(graph.terminal_kind(ix(&graph, 3)), Some(TerminalKind::Outlet));
    }

    #[test]
    fn test_dangling_join_is_fatal() {
        let mut log = DiagnosticLog::new("test");
        let err = GraphBuilder::default()
            .build(
                vec![RawSegment::new(1, 1.0, 1.0)],
                vec![RawJoin::internal(1, 99)],
                &mut log,
            )
            .unwrap_err();

        assert_eq!(
            err,
            TopologyError::DanglingJoin {
                upstream: Some(SegmentId::new(1)),
                downstream: Some(SegmentId::new(99)),
                missing: SegmentId::new(99),
            }
        );
    }

    #[test]
    fn test_huc_in_upstream_may_be_outside_unit() {
        let (graph, _) = build(
            vec![RawSegment::new(2, 1.0, 1.0)],
            vec![RawJoin::huc_in(1, 2), RawJoin::terminal(2)],
        );
        let two = ix(&graph, 2);
        assert!(graph.segment(two).huc_in);
        assert!(!graph.is_origin(two));
    }

    #[test]
    fn test_duplicate_segment_rejected() {
        let mut log = DiagnosticLog::new("test");
        let err = GraphBuilder::default()
            .build(
                vec![RawSegment::new(1, 1.0, 1.0), RawSegment::new(1, 2.0, 1.0)],
                vec![],
                &mut log,
            )
            .unwrap_err();
        assert_eq!(err, TopologyError::DuplicateSegment(SegmentId::new(1)));
    }

    #[test]
    fn test_coastline_join_becomes_marine_terminal() {
        let (graph, _) = build(
            vec![
                RawSegment::new(1, 1.0, 1.0),
                RawSegment::new(2, 1.0, 1.0).with_type(FlowlineType::Coastline),
            ],
            vec![RawJoin::internal(1, 2), RawJoin::terminal(2)],
        );

        assert_eq!(graph.len(), 1);
        let one = ix(&graph, 1);
        assert_eq!(graph.terminal_kind(one), Some(TerminalKind::Marine));
        assert!(graph.segment(one).is_marine);
    }

    #[test]
    fn test_removed_segment_propagates_to_joins() {
        // 1 -> 2 -> 3 where 2 is an underground conduit: 1 becomes a
        // terminal, 3 an origin.
        let (graph, _) = build(
            vec![
                RawSegment::new(1, 1.0, 1.0),
                RawSegment::new(2, 1.0, 1.0).with_type(FlowlineType::UndergroundConduit),
                RawSegment::new(3, 1.0, 1.0),
            ],
            vec![
                RawJoin::internal(1, 2),
                RawJoin::internal(2, 3),
                RawJoin::terminal(3),
            ],
        );

        assert_eq!(graph.len(), 2);
        assert!(graph.is_terminal(ix(&graph, 1)));
        assert!(graph.is_origin(ix(&graph, 3)));
    }

    #[test]
    fn test_zero_drainage_removed_without_breaking_branch() {
        // 1 flows to both 2 (noise) and 3; dropping 2 keeps 1 -> 3.
        let (graph, _) = build(
            vec![
                RawSegment::new(1, 1.0, 1.0),
                RawSegment::new(2, 1.0, 0.0),
                RawSegment::new(3, 1.0, 2.0),
            ],
            vec![
                RawJoin::internal(1, 2),
                RawJoin::internal(1, 3),
                RawJoin::terminal(3),
            ],
        );

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.downstream_of(ix(&graph, 1)), &[ix(&graph, 3)]);
        assert!(graph.is_terminal(ix(&graph, 3)));
    }

    fn repair_fixture(gap: f64) -> (Vec<RawSegment>, Vec<RawJoin>) {
        let segments = vec![
            RawSegment::new(1, 1.0, 1.0)
                .with_endpoints(Point::new(0.0, 1000.0), Point::new(0.0, 0.0)),
            RawSegment::new(2, 1.0, 5.0)
                .with_endpoints(Point::new(gap, 0.0), Point::new(gap, -1000.0)),
            RawSegment::new(3, 1.0, 6.0)
                .with_endpoints(Point::new(gap, -1000.0), Point::new(gap, -2000.0)),
        ];
        let joins = vec![
            RawJoin::terminal(1),
            RawJoin::internal(2, 3),
            RawJoin::terminal(3),
        ];
        (segments, joins)
    }

    #[test]
    fn test_terminal_repaired_within_tolerance() {
        let (segments, joins) = repair_fixture(50.0);
        let (graph, log) = build(segments, joins);

        assert_eq!(graph.downstream_of(ix(&graph, 1)), &[ix(&graph, 2)]);
        assert_eq!(log.count("terminal_repaired"), 1);
    }

    #[test]
    fn test_terminal_beyond_tolerance_logged_not_repaired() {
        let (segments, joins) = repair_fixture(150.0);
        let (graph, log) = build(segments, joins);

        assert!(graph.is_terminal(ix(&graph, 1)));
        assert_eq!(log.count("terminal_repaired"), 0);
        assert_eq!(log.count("terminal_not_repaired"), 1);
    }

    #[test]
    fn test_terminal_row_without_kind_is_repaired() {
        let (segments, _) = repair_fixture(50.0);
        let joins: Vec<RawJoin> = serde_json::from_str(
            r#"[
                {"upstream": 1, "downstream": null},
                {"upstream": 2, "downstream": 3},
                {"upstream": 3, "downstream": null}
            ]"#,
        )
        .unwrap();
        let (graph, log) = build(segments, joins);

        assert_eq!(graph.downstream_of(ix(&graph, 1)), &[ix(&graph, 2)]);
        assert_eq!(log.count("terminal_repaired"), 1);
    }

    #[test]
    fn test_zero_length_segment_logged() {
        let (graph, log) = build(
            vec![RawSegment::new(1, 0.0, 1.0), RawSegment::new(2, 1.0, 2.0)],
            vec![RawJoin::internal(1, 2), RawJoin::terminal(2)],
        );

        assert_eq!(graph.len(), 2);
        assert_eq!(log.count("zero_length_segment"), 1);
    }

    #[test]
    fn test_repair_tie_prefers_downstream_of_tied_sibling() {
        let tied = vec![SegmentId::new(5), SegmentId::new(7)];
        let mut downstream_of = HashMap::new();
        downstream_of.insert(SegmentId::new(5), vec![SegmentId::new(7)]);
        assert_eq!(break_repair_tie(&tied, &downstream_of), SegmentId::new(7));

        let no_relation = HashMap::new();
        assert_eq!(break_repair_tie(&tied, &no_relation), SegmentId::new(5));
    }

    #[test]
    fn test_region_exit_terminal_kind() {
        let (graph, _) = build(
            vec![RawSegment::new(1, 1.0, 1.0)],
            vec![RawJoin::huc_out(1)],
        );
        assert_eq!(graph.terminal_kind(ix(&graph, 1)), Some(TerminalKind::RegionExit));
    }
}
