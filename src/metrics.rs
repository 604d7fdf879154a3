//! Metrics aggregator: reduce functional networks and downstream paths to
//! per-barrier connectivity statistics.
//!
//! Every network is walked once. Lengths are converted to miles with the
//! policy's `miles_per_length_unit`. Barriers with no network in a pass
//! (unattached, or not cutting in this pass) get `Assessed::NotApplicable`
//! instead of zeros, so "no network" is never confused with "empty network".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attach::BarrierIndex;
use crate::canonical::{fingerprint, quantize};
use crate::cutter::{
    CutResult, DownstreamPath, DownstreamRoutes, FunctionalNetwork, NetworkId, NetworkRoot, PathEnd,
};
use crate::policy::{AnalysisPolicy, NetworkType};
use crate::resolve::ResolvedGraph;
use crate::types::{
    AttachedBarrier, Assessed, BarrierCounts, BarrierId, BarrierKind, Segment, SegmentIx,
    TerminalKind,
};

/// Length sums by category, in miles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LengthSums {
    /// All length.
    pub total: f64,
    /// Perennial length.
    pub perennial: f64,
    /// Intermittent length.
    pub intermittent: f64,
    /// Altered length.
    pub altered: f64,
    /// Unaltered length.
    pub unaltered: f64,
    /// Perennial and unaltered length.
    pub perennial_unaltered: f64,
    /// Length per habitat layer.
    pub habitat: BTreeMap<u8, f64>,
}

impl LengthSums {
    /// Add `miles` of a segment's categories.
    pub fn add(&mut self, segment: &Segment, miles: f64) {
        self.total += miles;
        if segment.is_perennial() {
            self.perennial += miles;
        } else {
            self.intermittent += miles;
        }
        if segment.altered {
            self.altered += miles;
        } else {
            self.unaltered += miles;
            if segment.is_perennial() {
                self.perennial_unaltered += miles;
            }
        }
        for layer in segment.habitat_flags.layers() {
            *self.habitat.entry(layer).or_insert(0.0) += miles;
        }
    }

    /// Percent of total length that is unaltered.
    pub fn percent_unaltered(&self) -> f64 {
        percent(self.unaltered, self.total)
    }

    /// Percent of perennial length that is also unaltered.
    pub fn percent_perennial_unaltered(&self) -> f64 {
        percent(self.perennial_unaltered, self.perennial)
    }
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        100.0 * part / whole
    } else {
        0.0
    }
}

/// Upstream statistics of one functional network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Network index in the cut result.
    pub network_id: NetworkId,
    /// Root of the network.
    pub root: NetworkRoot,
    /// Length sums.
    pub lengths: LengthSums,
    /// Distinct segments touched.
    pub segment_count: u32,
    /// Headwater segments.
    pub headwaters: u32,
    /// Active barriers bounding the network from above, by kind.
    pub upstream_barriers: BarrierCounts,
    /// Transparent barriers inside the network, by kind.
    pub transparent_barriers: BarrierCounts,
    /// Drainage area at the root segment (km²).
    pub drainage_area: f64,
    /// Network reaches a unit inflow boundary.
    pub open_upstream_edge: bool,
}

impl NetworkStats {
    /// Reduce a network in one pass over its spans.
    pub fn compute(
        graph: &ResolvedGraph,
        barriers: &BarrierIndex,
        network: &FunctionalNetwork,
        miles_per_unit: f64,
    ) -> Self {
        let mut lengths = LengthSums::default();
        let mut segment_count = 0u32;
        let mut last: Option<SegmentIx> = None;
        for span in &network.spans {
            lengths.add(graph.segment(span.ix), span.length() * miles_per_unit);
            if last != Some(span.ix) {
                segment_count += 1;
                last = Some(span.ix);
            }
        }

        Self {
            network_id: network.id,
            root: network.root,
            lengths,
            segment_count,
            headwaters: network.headwaters,
            upstream_barriers: count_kinds(barriers, &network.upstream_barriers),
            transparent_barriers: count_kinds(barriers, &network.transparent_barriers),
            drainage_area: graph.segment(network.root_segment).drainage_area,
            open_upstream_edge: network.open_upstream_edge,
        }
    }
}

fn count_kinds(barriers: &BarrierIndex, ids: &[BarrierId]) -> BarrierCounts {
    let mut counts = BarrierCounts::default();
    for kind in ids.iter().filter_map(|id| barriers.get(*id)).map(|b| b.kind) {
        counts.increment(kind);
    }
    counts
}

// ─────────────────────────────────────────────────────────────────────────────
// Outlet paths (independent of which barriers are active)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct TopSummary {
    length: f64,
    barriers: BarrierCounts,
    terminal: Option<TerminalKind>,
}

/// Path from a barrier to the end of the network, counting every barrier
/// on the way regardless of the analysis pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutletPath {
    /// Miles from the barrier to the terminal.
    pub miles_to_outlet: f64,
    /// Barriers strictly downstream, by kind.
    pub downstream_barriers: BarrierCounts,
    /// Terminal reached; `None` when the route closes a cycle.
    pub terminal: Option<TerminalKind>,
    /// Some downstream route reaches marine water.
    pub flows_to_ocean: bool,
    /// Some downstream route reaches a Great Lake.
    pub flows_to_great_lakes: bool,
    /// Main route leaves the processing unit.
    pub exits_region: bool,
}

/// Memoized outlet-path summaries from the upstream end of every segment.
#[derive(Debug, Clone)]
pub struct OutletPaths {
    from_top: Vec<TopSummary>,
    miles_per_unit: f64,
}

impl OutletPaths {
    /// Summarize the main route below every segment.
    pub fn compute(
        graph: &ResolvedGraph,
        routes: &DownstreamRoutes,
        barriers: &BarrierIndex,
        miles_per_unit: f64,
    ) -> Self {
        let n = graph.len();
        let mut memo: Vec<Option<TopSummary>> = vec![None; n];
        let mut in_walk = vec![false; n];

        for start in 0..n as SegmentIx {
            if memo[start as usize].is_some() {
                continue;
            }
            let mut walk = Vec::new();
            let mut current = start;
            let base = loop {
                if let Some(done) = memo[current as usize] {
                    break done;
                }
                if in_walk[current as usize] {
                    break TopSummary {
                        length: 0.0,
                        barriers: BarrierCounts::default(),
                        terminal: None,
                    };
                }
                in_walk[current as usize] = true;
                walk.push(current);
                match routes.main(current) {
                    Some(next) => current = next,
                    None => {
                        break TopSummary {
                            length: 0.0,
                            barriers: BarrierCounts::default(),
                            terminal: Some(graph.terminal_kind(current).unwrap_or(TerminalKind::Outlet)),
                        }
                    }
                }
            };

            let mut acc = base;
            for &ix in walk.iter().rev() {
                acc.length += graph.segment(ix).length;
                for barrier in barriers.on_segment(ix) {
                    acc.barriers.increment(barrier.kind);
                }
                memo[ix as usize] = Some(acc);
                in_walk[ix as usize] = false;
            }
        }

        Self {
            from_top: memo.into_iter().flatten().collect(),
            miles_per_unit,
        }
    }

    /// Outlet path below a barrier.
    pub fn for_barrier(
        &self,
        graph: &ResolvedGraph,
        routes: &DownstreamRoutes,
        barriers: &BarrierIndex,
        barrier: &AttachedBarrier,
    ) -> OutletPath {
        let ix = barrier.segment;
        let rest = match routes.main(ix) {
            Some(next) => self.from_top[next as usize],
            None => TopSummary {
                length: 0.0,
                barriers: BarrierCounts::default(),
                terminal: Some(graph.terminal_kind(ix).unwrap_or(TerminalKind::Outlet)),
            },
        };

        let mut downstream_barriers = rest.barriers;
        for below in barriers.on_segment(ix).filter(|b| b.ordinal < barrier.ordinal) {
            downstream_barriers.increment(below.kind);
        }
        let segment = graph.segment(ix);

        OutletPath {
            miles_to_outlet: (barrier.position + rest.length) * self.miles_per_unit,
            downstream_barriers,
            terminal: rest.terminal,
            flows_to_ocean: segment.flows_to_ocean,
            flows_to_great_lakes: segment.flows_to_great_lakes,
            exits_region: rest.terminal == Some(TerminalKind::RegionExit),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-barrier metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Connectivity metrics of a barrier that cuts the network in a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    /// Upstream functional network lengths.
    pub upstream: LengthSums,
    /// Segments in the upstream network.
    pub upstream_segments: u32,
    /// Headwaters in the upstream network.
    pub headwaters: u32,
    /// Active barriers bounding the upstream network, by kind.
    pub upstream_barriers: BarrierCounts,
    /// Transparent barriers inside the upstream network, by kind.
    pub transparent_barriers: BarrierCounts,
    /// Drainage area at the barrier's segment (km²).
    pub upstream_drainage_area: f64,
    /// Upstream network reaches a unit inflow boundary.
    pub open_upstream_edge: bool,
    /// Length of the downstream linear path.
    pub total_downstream_miles: f64,
    /// Downstream path length outside waterbodies.
    pub free_downstream_miles: f64,
    /// Perennial downstream path length outside waterbodies.
    pub free_perennial_downstream_miles: f64,
    /// How the downstream path ends.
    pub downstream_end: PathEnd,
    /// Miles reconnected by removing the barrier.
    pub gain_miles: f64,
    /// Perennial miles reconnected by removing the barrier.
    pub perennial_gain_miles: f64,
    /// Upstream total plus free downstream.
    pub total_network_miles: f64,
    /// Percent of upstream length unaltered.
    pub percent_unaltered: f64,
    /// Percent of upstream perennial length unaltered.
    pub percent_perennial_unaltered: f64,
}

/// Reconnected length: the smaller side, unless the path below runs
/// unobstructed to open water.
pub fn gain(upstream: f64, free_downstream: f64, end: &PathEnd) -> f64 {
    if end.is_open_water() {
        upstream
    } else {
        upstream.min(free_downstream)
    }
}

impl NetworkMetrics {
    fn compute(stats: &NetworkStats, path: &DownstreamPath, drainage_area: f64, miles_per_unit: f64) -> Self {
        let upstream = stats.lengths.clone();
        let free_downstream = path.free_length * miles_per_unit;
        let free_perennial_downstream = path.free_perennial_length * miles_per_unit;

        Self {
            upstream_segments: stats.segment_count,
            headwaters: stats.headwaters,
            upstream_barriers: stats.upstream_barriers,
            transparent_barriers: stats.transparent_barriers,
            upstream_drainage_area: drainage_area,
            open_upstream_edge: stats.open_upstream_edge,
            total_downstream_miles: path.length * miles_per_unit,
            free_downstream_miles: free_downstream,
            free_perennial_downstream_miles: free_perennial_downstream,
            downstream_end: path.end,
            gain_miles: gain(upstream.total, free_downstream, &path.end),
            perennial_gain_miles: gain(upstream.perennial, free_perennial_downstream, &path.end),
            total_network_miles: upstream.total + free_downstream,
            percent_unaltered: upstream.percent_unaltered(),
            percent_perennial_unaltered: upstream.percent_perennial_unaltered(),
            upstream,
        }
    }
}

/// Metrics record of one barrier in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierMetrics {
    /// Barrier identifier.
    pub barrier_id: BarrierId,
    /// Barrier kind.
    pub kind: BarrierKind,
    /// Pass.
    pub network_type: NetworkType,
    /// Network metrics; `NotApplicable` when the barrier has no network.
    pub network: Assessed<NetworkMetrics>,
    /// Outlet path; `NotApplicable` when the barrier is not attached.
    pub outlet: Assessed<OutletPath>,
    /// Attached to a loop segment: off-network and never ranked.
    #[serde(default)]
    pub on_loop: bool,
}

impl BarrierMetrics {
    /// Gain miles, or why there is none.
    pub fn gain_miles(&self) -> Assessed<f64> {
        self.network.clone().map(|m| m.gain_miles)
    }

    /// Perennial gain miles, or why there is none.
    pub fn perennial_gain_miles(&self) -> Assessed<f64> {
        self.network.clone().map(|m| m.perennial_gain_miles)
    }
}

/// Metrics of one pass over one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassMetrics {
    /// Pass.
    pub network_type: NetworkType,
    /// Fingerprint of the cut these metrics were computed from.
    pub cut_fingerprint: String,
    /// Upstream statistics of every network.
    pub networks: Vec<NetworkStats>,
    /// Per-barrier records, attached and unattached.
    pub barriers: BTreeMap<BarrierId, BarrierMetrics>,
    /// Canonical fingerprint of the barrier records.
    pub fingerprint: String,
}

impl PassMetrics {
    /// Record of one barrier.
    pub fn barrier(&self, barrier_id: BarrierId) -> Option<&BarrierMetrics> {
        self.barriers.get(&barrier_id)
    }
}

#[derive(Serialize)]
struct MetricsFingerprint<'a> {
    network_type: NetworkType,
    cut_fingerprint: &'a str,
    barriers: Vec<(u64, Option<[i64; 4]>, Option<&'a PathEnd>)>,
}

impl PassMetrics {
    fn compute_fingerprint(&self) -> String {
        let barriers = self
            .barriers
            .values()
            .map(|b| {
                let m = b.network.value();
                (
                    b.barrier_id.as_u64(),
                    m.map(|m| {
                        [
                            quantize(m.upstream.total),
                            quantize(m.free_downstream_miles),
                            quantize(m.gain_miles),
                            quantize(m.perennial_gain_miles),
                        ]
                    }),
                    m.map(|m| &m.downstream_end),
                )
            })
            .collect();
        fingerprint(
            "pass_metrics",
            &MetricsFingerprint {
                network_type: self.network_type,
                cut_fingerprint: &self.cut_fingerprint,
                barriers,
            },
        )
    }
}

/// Aggregate a cut into per-network and per-barrier metrics.
pub fn aggregate(
    graph: &ResolvedGraph,
    barriers: &BarrierIndex,
    routes: &DownstreamRoutes,
    outlets: &OutletPaths,
    cut: &CutResult,
    policy: &AnalysisPolicy,
) -> PassMetrics {
    let miles = policy.miles_per_length_unit;
    let networks: Vec<NetworkStats> = cut
        .networks
        .iter()
        .map(|n| NetworkStats::compute(graph, barriers, n, miles))
        .collect();

    let mut records = BTreeMap::new();
    for barrier in barriers.barriers() {
        let network = match cut.barrier(barrier.barrier_id) {
            Some(b) => Assessed::Value(NetworkMetrics::compute(
                &networks[b.upstream as usize],
                &b.downstream,
                graph.segment(barrier.segment).drainage_area,
                miles,
            )),
            None => Assessed::NotApplicable,
        };
        records.insert(
            barrier.barrier_id,
            BarrierMetrics {
                barrier_id: barrier.barrier_id,
                kind: barrier.kind,
                network_type: cut.network_type,
                network,
                outlet: Assessed::Value(outlets.for_barrier(graph, routes, barriers, barrier)),
                on_loop: graph.segment(barrier.segment).is_loop,
            },
        );
    }
    for unattached in barriers.unattached() {
        records.entry(unattached.barrier_id).or_insert(BarrierMetrics {
            barrier_id: unattached.barrier_id,
            kind: unattached.kind,
            network_type: cut.network_type,
            network: Assessed::NotApplicable,
            outlet: Assessed::NotApplicable,
            on_loop: false,
        });
    }

    let mut metrics = PassMetrics {
        network_type: cut.network_type,
        cut_fingerprint: cut.fingerprint.clone(),
        networks,
        barriers: records,
        fingerprint: String::new(),
    };
    metrics.fingerprint = metrics.compute_fingerprint();
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::attach_barriers;
    use crate::cutter::NetworkCutter;
    use crate::graph::GraphBuilder;
    use crate::resolve::{resolve, DrainsInto, MarineArea, MarineInput, AreaKind};
    use crate::types::{BarrierAttachment, DiagnosticLog, HabitatFlags, RawJoin, RawSegment, SegmentId};

    fn chain_segments() -> Vec<RawSegment> {
        (1..=5).map(|i| RawSegment::new(i, i as f64, i as f64)).collect()
    }

    fn chain_joins() -> Vec<RawJoin> {
        let mut joins: Vec<RawJoin> = (1..5).map(|i| RawJoin::internal(i, i + 1)).collect();
        joins.push(RawJoin::terminal(5));
        joins
    }

    fn run(
        segments: Vec<RawSegment>,
        marine: MarineInput,
        attachments: &[BarrierAttachment],
        network_type: NetworkType,
    ) -> PassMetrics {
        let mut log = DiagnosticLog::new("test");
        let graph = GraphBuilder::default().build(segments, chain_joins(), &mut log).unwrap();
        let graph = resolve(graph, &marine, &mut log);
        let index = attach_barriers(&graph, attachments, &mut log);
        let routes = DownstreamRoutes::compute(&graph, &mut log);
        let outlets = OutletPaths::compute(&graph, &routes, &index, 1.0);
        let cut = NetworkCutter::new(&graph, &index, &routes, network_type).cut();
        aggregate(&graph, &index, &routes, &outlets, &cut, &AnalysisPolicy::default())
    }

    #[test]
    fn test_gain_rule() {
        assert_eq!(gain(6.0, 9.0, &PathEnd::Terminal(TerminalKind::Outlet)), 6.0);
        assert_eq!(gain(6.0, 2.0, &PathEnd::Barrier(BarrierId::new(1))), 2.0);
        assert_eq!(gain(6.0, 2.0, &PathEnd::Terminal(TerminalKind::Marine)), 6.0);
        assert_eq!(gain(6.0, 2.0, &PathEnd::Terminal(TerminalKind::GreatLakes)), 6.0);
    }

    #[test]
    fn test_length_sums_categories() {
        let mut raw = RawSegment::new(1, 1.0, 1.0);
        raw.intermittent = true;
        raw.habitat_flags = HabitatFlags::empty().with(2);
        let intermittent = Segment::from_raw(&raw);
        let mut raw = RawSegment::new(2, 1.0, 1.0);
        raw.altered = true;
        let altered = Segment::from_raw(&raw);

        let mut sums = LengthSums::default();
        sums.add(&intermittent, 3.0);
        sums.add(&altered, 1.0);

        assert_eq!(sums.total, 4.0);
        assert_eq!(sums.intermittent, 3.0);
        assert_eq!(sums.perennial, 1.0);
        assert_eq!(sums.altered, 1.0);
        assert_eq!(sums.perennial_unaltered, 0.0);
        assert_eq!(sums.habitat.get(&2), Some(&3.0));
        assert_eq!(sums.percent_unaltered(), 75.0);
    }

    #[test]
    fn test_chain_metrics() {
        let metrics = run(
            chain_segments(),
            MarineInput::default(),
            &[BarrierAttachment::new(1, 3, BarrierKind::Dam)],
            NetworkType::Dams,
        );
        let record = metrics.barrier(BarrierId::new(1)).unwrap();
        let m = record.network.value().unwrap();

        assert_eq!(m.upstream.total, 6.0);
        assert_eq!(m.free_downstream_miles, 9.0);
        assert_eq!(m.gain_miles, 6.0);
        assert_eq!(m.total_network_miles, 15.0);
        assert_eq!(m.headwaters, 1);

        let outlet = record.outlet.value().unwrap();
        assert_eq!(outlet.miles_to_outlet, 9.0);
        assert_eq!(outlet.terminal, Some(TerminalKind::Outlet));
    }

    #[test]
    fn test_ocean_exception() {
        let marine = MarineInput {
            areas: vec![MarineArea { id: 1, kind: AreaKind::SeaOcean }],
            adjacency: vec![],
            drains_into: vec![DrainsInto { segment_id: SegmentId::new(5), area_id: 1 }],
        };
        let mut segments = chain_segments();
        // Short free downstream stretch: 4 and 5 run through a reservoir.
        segments[3].waterbody = true;
        segments[4].waterbody = true;

        let metrics = run(segments, marine, &[BarrierAttachment::new(1, 3, BarrierKind::Dam)], NetworkType::Dams);
        let m = metrics.barrier(BarrierId::new(1)).unwrap().network.value().unwrap().clone();

        assert_eq!(m.free_downstream_miles, 0.0);
        assert_eq!(m.gain_miles, 6.0);
        assert!(metrics.barrier(BarrierId::new(1)).unwrap().outlet.value().unwrap().flows_to_ocean);
    }

    #[test]
    fn test_no_network_is_not_applicable() {
        let metrics = run(
            chain_segments(),
            MarineInput::default(),
            &[
                BarrierAttachment::new(1, 3, BarrierKind::RoadCrossing),
                BarrierAttachment::new(2, 42, BarrierKind::Dam),
            ],
            NetworkType::Dams,
        );

        let inactive = metrics.barrier(BarrierId::new(1)).unwrap();
        assert_eq!(inactive.gain_miles(), Assessed::NotApplicable);
        assert!(inactive.outlet.is_available());

        let unattached = metrics.barrier(BarrierId::new(2)).unwrap();
        assert_eq!(unattached.gain_miles(), Assessed::NotApplicable);
        assert_eq!(unattached.outlet, Assessed::NotApplicable);
        assert_eq!(unattached.gain_miles().to_sentinel(), -1.0);
    }

    #[test]
    fn test_outlet_counts_every_downstream_barrier() {
        let metrics = run(
            chain_segments(),
            MarineInput::default(),
            &[
                BarrierAttachment::new(1, 2, BarrierKind::Dam),
                BarrierAttachment::new(2, 4, BarrierKind::RoadCrossing),
                BarrierAttachment::new(3, 4, BarrierKind::SmallBarrier).at(1.0),
            ],
            NetworkType::Dams,
        );

        let outlet = metrics.barrier(BarrierId::new(1)).unwrap().outlet.value().unwrap().clone();
        assert_eq!(outlet.downstream_barriers.road_crossings, 1);
        assert_eq!(outlet.downstream_barriers.small_barriers, 1);
        assert_eq!(outlet.miles_to_outlet, 12.0);

        let upper = metrics.barrier(BarrierId::new(3)).unwrap().outlet.value().unwrap().clone();
        assert_eq!(upper.downstream_barriers.road_crossings, 1);
        assert_eq!(upper.miles_to_outlet, 6.0);
    }
}
