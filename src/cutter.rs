//! Network cutter: partition a resolved graph into functional networks
//! bounded by the barriers active in one analysis pass.
//!
//! ## Algorithm
//!
//! 1. Active barriers on each segment split it into pieces. Piece 0 runs
//!    from the downstream end to the first cut; piece `i` runs from cut
//!    `i - 1` to cut `i`; the last piece ends at the segment's upstream end.
//!    Segments are never duplicated; a piece is addressed by
//!    (segment, index).
//! 2. Roots are processed in a fixed order: active barriers by barrier id,
//!    then terminal segments by segment id. A barrier's network starts at
//!    the piece above its cut; an outlet network starts at piece 0 of its
//!    terminal. Growing a network walks upstream, entering each upstream
//!    segment at piece 0 and stopping at the first cut. A piece already
//!    owned by another network acts as a boundary, so every piece has at
//!    most one owner.
//! 3. The downstream path of a barrier follows the main downstream route
//!    until the next active cut, a terminal, or a directed cycle. Path
//!    summaries from the top of each segment are memoized per pass.
//!
//! Barriers not active in the pass are transparent: they are counted in
//! the network whose piece contains them, and flowed through. Barriers on
//! loop segments are off-network and never cut, whatever the pass.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attach::BarrierIndex;
use crate::canonical::{fingerprint, quantize};
use crate::policy::NetworkType;
use crate::resolve::ResolvedGraph;
use crate::types::{
    AttachedBarrier, BarrierId, BarrierKind, DataQualityEvent, DiagnosticLog, Segment, SegmentId,
    SegmentIx, TerminalKind,
};

/// Index of a network within a `CutResult`.
pub type NetworkId = u32;

const UNOWNED: NetworkId = NetworkId::MAX;

// ─────────────────────────────────────────────────────────────────────────────
// Downstream routes
// ─────────────────────────────────────────────────────────────────────────────

/// The single downstream join followed from each segment.
///
/// Computed once per unit: the choice does not depend on which barriers are
/// active.
#[derive(Debug, Clone)]
pub struct DownstreamRoutes {
    main: Vec<Option<SegmentIx>>,
    ambiguous: usize,
}

impl DownstreamRoutes {
    /// Choose the main downstream join of every segment.
    ///
    /// Non-loop branches are preferred over loop branches. Among several
    /// non-loop branches the one with the largest drainage area wins (tie:
    /// lowest segment id) and the split is recorded.
    pub fn compute(graph: &ResolvedGraph, log: &mut DiagnosticLog) -> Self {
        let mut main = Vec::with_capacity(graph.len());
        let mut ambiguous = 0;

        for ix in 0..graph.len() as SegmentIx {
            let candidates = graph.downstream_of(ix);
            let non_loop: Vec<SegmentIx> = candidates
                .iter()
                .copied()
                .filter(|d| !graph.segment(*d).is_loop)
                .collect();
            let pool: &[SegmentIx] = if non_loop.is_empty() { candidates } else { &non_loop };

            // Neighbour slices are sorted by index, which follows segment id.
            let chosen = pool.iter().copied().fold(None, |best: Option<SegmentIx>, d| match best {
                Some(b) if graph.segment(b).drainage_area >= graph.segment(d).drainage_area => Some(b),
                _ => Some(d),
            });

            if non_loop.len() > 1 {
                if let Some(chosen) = chosen {
                    ambiguous += 1;
                    log.record(DataQualityEvent::AmbiguousDownstreamBranch {
                        segment_id: graph.segment(ix).id,
                        chosen: graph.segment(chosen).id,
                        candidates: non_loop.iter().map(|d| graph.segment(*d).id).collect(),
                    });
                }
            }
            main.push(chosen);
        }

        Self { main, ambiguous }
    }

    /// Main downstream segment, `None` at terminals.
    pub fn main(&self, ix: SegmentIx) -> Option<SegmentIx> {
        self.main[ix as usize]
    }

    /// Number of segments with an ambiguous downstream split.
    pub fn ambiguous_count(&self) -> usize {
        self.ambiguous
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result types
// ─────────────────────────────────────────────────────────────────────────────

/// Part of a segment, measured from its downstream end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentSpan {
    /// Segment identifier.
    pub segment_id: SegmentId,
    /// Dense segment index.
    #[serde(skip)]
    pub ix: SegmentIx,
    /// Start of the span (distance from the downstream end).
    pub from: f64,
    /// End of the span (distance from the downstream end).
    pub to: f64,
}

impl SegmentSpan {
    /// Span length.
    pub fn length(&self) -> f64 {
        self.to - self.from
    }
}

/// What a functional network grows from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum NetworkRoot {
    /// Upstream network of an active barrier.
    Barrier(BarrierId),
    /// Network draining to a terminal with no barrier below it.
    Outlet(SegmentId),
}

/// Segments (or parts of segments) reachable upstream from a root without
/// crossing an active barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionalNetwork {
    /// Network index.
    pub id: NetworkId,
    /// Root of the network.
    pub root: NetworkRoot,
    /// Dense segment index of the root segment.
    #[serde(skip)]
    pub root_segment: SegmentIx,
    /// Member spans, ordered by segment id then position.
    pub spans: Vec<SegmentSpan>,
    /// Active barriers bounding the network from above, ordered by id.
    pub upstream_barriers: Vec<BarrierId>,
    /// Inactive barriers inside the network, ordered by id.
    pub transparent_barriers: Vec<BarrierId>,
    /// Headwater segments fully inside the network.
    pub headwaters: u32,
    /// Network reaches a boundary inflow from a neighbouring unit.
    pub open_upstream_edge: bool,
}

impl FunctionalNetwork {
    /// Total span length.
    pub fn length(&self) -> f64 {
        self.spans.iter().map(SegmentSpan::length).sum()
    }

    /// Whether any span lies on the given segment.
    pub fn contains_segment(&self, segment_id: SegmentId) -> bool {
        self.spans.iter().any(|s| s.segment_id == segment_id)
    }
}

/// How a downstream path ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PathEnd {
    /// Next active barrier downstream.
    Barrier(BarrierId),
    /// Terminal of the network.
    Terminal(TerminalKind),
    /// Walk closed a directed cycle at this segment.
    Cycle(SegmentId),
}

impl PathEnd {
    /// Whether the path ends in open water with no barrier in between.
    pub fn is_open_water(&self) -> bool {
        matches!(self, Self::Terminal(kind) if kind.is_open_water())
    }
}

/// Summary of the linear path below a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownstreamPath {
    /// Path length.
    pub length: f64,
    /// Path length outside waterbodies.
    pub free_length: f64,
    /// Perennial path length outside waterbodies.
    pub free_perennial_length: f64,
    /// Segments touched.
    pub segments: u32,
    /// How the path ends.
    pub end: PathEnd,
}

impl DownstreamPath {
    fn empty(end: PathEnd) -> Self {
        Self {
            length: 0.0,
            free_length: 0.0,
            free_perennial_length: 0.0,
            segments: 0,
            end,
        }
    }

    fn extend(mut self, length: f64, segment: &Segment) -> Self {
        self.length += length;
        if !segment.waterbody {
            self.free_length += length;
            if segment.is_perennial() {
                self.free_perennial_length += length;
            }
        }
        self.segments += 1;
        self
    }
}

/// Cut outcome for one active barrier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarrierNetwork {
    /// Barrier identifier.
    pub barrier_id: BarrierId,
    /// Barrier kind.
    pub kind: BarrierKind,
    /// Segment the barrier is on.
    pub segment_id: SegmentId,
    /// Upstream functional network.
    pub upstream: NetworkId,
    /// Linear path downstream.
    pub downstream: DownstreamPath,
}

/// All functional networks of one pass over one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutResult {
    /// Pass that produced the result.
    pub network_type: NetworkType,
    /// Networks; barrier networks first (by barrier id), then outlets.
    pub networks: Vec<FunctionalNetwork>,
    /// Per active barrier outcome.
    pub barrier_networks: BTreeMap<BarrierId, BarrierNetwork>,
    /// Spans reachable from no root.
    pub unassigned: Vec<SegmentSpan>,
    /// Canonical fingerprint of membership and paths.
    pub fingerprint: String,
}

impl CutResult {
    /// Network by index.
    pub fn network(&self, id: NetworkId) -> &FunctionalNetwork {
        &self.networks[id as usize]
    }

    /// Cut outcome of a barrier, if it was active and attached.
    pub fn barrier(&self, barrier_id: BarrierId) -> Option<&BarrierNetwork> {
        self.barrier_networks.get(&barrier_id)
    }

    /// Upstream network of a barrier.
    pub fn upstream_network(&self, barrier_id: BarrierId) -> Option<&FunctionalNetwork> {
        self.barrier(barrier_id).map(|b| self.network(b.upstream))
    }

    /// Total length of all network spans.
    pub fn assigned_length(&self) -> f64 {
        self.networks.iter().map(FunctionalNetwork::length).sum()
    }

    /// Total length of unassigned spans.
    pub fn unassigned_length(&self) -> f64 {
        self.unassigned.iter().map(SegmentSpan::length).sum()
    }
}

#[derive(Serialize)]
struct CutFingerprint<'a> {
    network_type: NetworkType,
    networks: Vec<(&'a NetworkRoot, Vec<(u64, i64, i64)>)>,
    barriers: Vec<(u64, NetworkId, i64, i64, &'a PathEnd)>,
    unassigned: Vec<(u64, i64, i64)>,
}

fn quantized_spans(spans: &[SegmentSpan]) -> Vec<(u64, i64, i64)> {
    spans
        .iter()
        .map(|s| (s.segment_id.as_u64(), quantize(s.from), quantize(s.to)))
        .collect()
}

impl CutResult {
    fn compute_fingerprint(&self) -> String {
        let input = CutFingerprint {
            network_type: self.network_type,
            networks: self
                .networks
                .iter()
                .map(|n| (&n.root, quantized_spans(&n.spans)))
                .collect(),
            barriers: self
                .barrier_networks
                .values()
                .map(|b| {
                    (
                        b.barrier_id.as_u64(),
                        b.upstream,
                        quantize(b.downstream.length),
                        quantize(b.downstream.free_length),
                        &b.downstream.end,
                    )
                })
                .collect(),
            unassigned: quantized_spans(&self.unassigned),
        };
        fingerprint("cut_result", &input)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cutter
// ─────────────────────────────────────────────────────────────────────────────

/// Whether `barrier` cuts the network in a pass.
fn is_active(graph: &ResolvedGraph, network_type: NetworkType, barrier: &AttachedBarrier) -> bool {
    network_type.breaks_at(barrier.kind) && !graph.segment(barrier.segment).is_loop
}

/// Active cuts per segment, stored as a compressed list.
struct CutLayout<'b> {
    offsets: Vec<u32>,
    cuts: Vec<&'b AttachedBarrier>,
}

impl<'b> CutLayout<'b> {
    fn new(graph: &ResolvedGraph, barriers: &'b BarrierIndex, network_type: NetworkType) -> Self {
        let segment_count = graph.len();
        let mut offsets = Vec::with_capacity(segment_count + 1);
        let mut cuts = Vec::new();
        offsets.push(0);
        for ix in 0..segment_count as SegmentIx {
            cuts.extend(barriers.on_segment(ix).filter(|b| is_active(graph, network_type, b)));
            offsets.push(cuts.len() as u32);
        }
        Self { offsets, cuts }
    }

    fn cuts(&self, ix: SegmentIx) -> &[&'b AttachedBarrier] {
        let ix = ix as usize;
        &self.cuts[self.offsets[ix] as usize..self.offsets[ix + 1] as usize]
    }

    /// Global index of piece `j` of segment `ix`.
    fn piece(&self, ix: SegmentIx, j: usize) -> usize {
        self.offsets[ix as usize] as usize + ix as usize + j
    }

    fn piece_count(&self) -> usize {
        self.cuts.len() + self.offsets.len() - 1
    }
}

/// Mutable state of one network while it grows.
struct Growth {
    spans: Vec<SegmentSpan>,
    upstream_barriers: Vec<BarrierId>,
    transparent_barriers: Vec<BarrierId>,
    headwaters: u32,
    open_upstream_edge: bool,
    frontier: Vec<SegmentIx>,
}

/// Cuts one unit for one analysis pass.
pub struct NetworkCutter<'a> {
    graph: &'a ResolvedGraph,
    barriers: &'a BarrierIndex,
    routes: &'a DownstreamRoutes,
    network_type: NetworkType,
}

impl<'a> NetworkCutter<'a> {
    /// Create a cutter.
    pub fn new(
        graph: &'a ResolvedGraph,
        barriers: &'a BarrierIndex,
        routes: &'a DownstreamRoutes,
        network_type: NetworkType,
    ) -> Self {
        Self {
            graph,
            barriers,
            routes,
            network_type,
        }
    }

    /// Partition the graph.
    pub fn cut(&self) -> CutResult {
        let graph = self.graph;
        let layout = CutLayout::new(graph, self.barriers, self.network_type);
        let mut owner = vec![UNOWNED; layout.piece_count()];
        let mut networks: Vec<FunctionalNetwork> = Vec::new();

        // Active barriers by id, with their cut index on the segment.
        let active: Vec<(&AttachedBarrier, usize)> = self
            .barriers
            .barriers()
            .iter()
            .filter(|b| is_active(graph, self.network_type, b))
            .filter_map(|b| {
                layout
                    .cuts(b.segment)
                    .iter()
                    .position(|c| c.barrier_id == b.barrier_id)
                    .map(|i| (b, i))
            })
            .collect();

        let mut upstream_of_barrier: Vec<NetworkId> = Vec::with_capacity(active.len());
        for &(barrier, cut) in &active {
            let id = networks.len() as NetworkId;
            let network = self.grow(
                &layout,
                &mut owner,
                id,
                NetworkRoot::Barrier(barrier.barrier_id),
                barrier.segment,
                cut + 1,
            );
            upstream_of_barrier.push(id);
            networks.push(network);
        }

        let terminals: Vec<SegmentIx> = graph.terminals().collect();
        for t in terminals {
            if owner[layout.piece(t, 0)] != UNOWNED {
                continue;
            }
            let id = networks.len() as NetworkId;
            let network = self.grow(
                &layout,
                &mut owner,
                id,
                NetworkRoot::Outlet(graph.segment(t).id),
                t,
                0,
            );
            networks.push(network);
        }

        let mut unassigned = Vec::new();
        for ix in 0..graph.len() as SegmentIx {
            for j in 0..=layout.cuts(ix).len() {
                if owner[layout.piece(ix, j)] == UNOWNED {
                    unassigned.push(self.span(&layout, ix, j));
                }
            }
        }

        let mut memo: Vec<Option<DownstreamPath>> = vec![None; graph.len()];
        let mut in_walk = vec![false; graph.len()];
        let mut barrier_networks = BTreeMap::new();
        for (&(barrier, cut), &upstream) in active.iter().zip(&upstream_of_barrier) {
            let downstream = self.downstream_path(&layout, barrier, cut, &mut memo, &mut in_walk);
            barrier_networks.insert(
                barrier.barrier_id,
                BarrierNetwork {
                    barrier_id: barrier.barrier_id,
                    kind: barrier.kind,
                    segment_id: barrier.segment_id,
                    upstream,
                    downstream,
                },
            );
        }
        let mut result = CutResult {
            network_type: self.network_type,
            networks,
            barrier_networks,
            unassigned,
            fingerprint: String::new(),
        };
        result.fingerprint = result.compute_fingerprint();

        tracing::debug!(
            network_type = %self.network_type,
            networks = result.networks.len(),
            barriers = result.barrier_networks.len(),
            unassigned = result.unassigned.len(),
            fingerprint = %result.fingerprint,
            "unit cut"
        );
        result
    }

    fn span(&self, layout: &CutLayout<'_>, ix: SegmentIx, j: usize) -> SegmentSpan {
        let cuts = layout.cuts(ix);
        let segment = self.graph.segment(ix);
        SegmentSpan {
            segment_id: segment.id,
            ix,
            from: if j == 0 { 0.0 } else { cuts[j - 1].position },
            to: if j == cuts.len() { segment.length } else { cuts[j].position },
        }
    }

    /// Grow one network from its root piece.
    fn grow(
        &self,
        layout: &CutLayout<'_>,
        owner: &mut [NetworkId],
        id: NetworkId,
        root: NetworkRoot,
        root_segment: SegmentIx,
        root_piece: usize,
    ) -> FunctionalNetwork {
        let mut growth = Growth {
            spans: Vec::new(),
            upstream_barriers: Vec::new(),
            transparent_barriers: Vec::new(),
            headwaters: 0,
            open_upstream_edge: false,
            frontier: Vec::new(),
        };

        owner[layout.piece(root_segment, root_piece)] = id;
        self.take_piece(layout, &mut growth, root_segment, root_piece);

        while let Some(ix) = growth.frontier.pop() {
            for &up in self.graph.upstream_of(ix) {
                let piece = layout.piece(up, 0);
                if owner[piece] != UNOWNED {
                    continue;
                }
                owner[piece] = id;
                self.take_piece(layout, &mut growth, up, 0);
            }
        }

        growth.spans.sort_by(|a, b| a.ix.cmp(&b.ix).then(a.from.total_cmp(&b.from)));
        growth.upstream_barriers.sort();
        growth.transparent_barriers.sort();

        FunctionalNetwork {
            id,
            root,
            root_segment,
            spans: growth.spans,
            upstream_barriers: growth.upstream_barriers,
            transparent_barriers: growth.transparent_barriers,
            headwaters: growth.headwaters,
            open_upstream_edge: growth.open_upstream_edge,
        }
    }

    /// Add a piece to a growing network; queue its segment for upstream
    /// expansion when the piece reaches the segment's upstream end.
    fn take_piece(&self, layout: &CutLayout<'_>, growth: &mut Growth, ix: SegmentIx, j: usize) {
        let span = self.span(layout, ix, j);
        let cuts = layout.cuts(ix);
        let top = j == cuts.len();

        for barrier in self.barriers.on_segment(ix) {
            if is_active(self.graph, self.network_type, barrier) {
                continue;
            }
            let inside = barrier.position >= span.from
                && (barrier.position < span.to || (top && barrier.position <= span.to));
            if inside {
                growth.transparent_barriers.push(barrier.barrier_id);
            }
        }
        growth.spans.push(span);

        if top {
            if self.graph.is_origin(ix) {
                growth.headwaters += 1;
            }
            if self.graph.segment(ix).huc_in {
                growth.open_upstream_edge = true;
            }
            growth.frontier.push(ix);
        } else {
            growth.upstream_barriers.push(cuts[j].barrier_id);
        }
    }

    /// Linear path below the cut of `barrier` (cut index `cut` on its segment).
    fn downstream_path(
        &self,
        layout: &CutLayout<'_>,
        barrier: &AttachedBarrier,
        cut: usize,
        memo: &mut [Option<DownstreamPath>],
        in_walk: &mut [bool],
    ) -> DownstreamPath {
        let ix = barrier.segment;
        let cuts = layout.cuts(ix);
        let segment = self.graph.segment(ix);

        if cut > 0 {
            let below = cuts[cut - 1];
            return DownstreamPath::empty(PathEnd::Barrier(below.barrier_id))
                .extend(barrier.position - below.position, segment);
        }

        let rest = match self.routes.main(ix) {
            None => DownstreamPath::empty(PathEnd::Terminal(self.terminal_kind(ix))),
            Some(next) => self.path_from_top(layout, next, memo, in_walk),
        };
        rest.extend(barrier.position, segment)
    }

    /// Path summary from the upstream end of `start`.
    ///
    /// Walks that end at a barrier or terminal are memoized. Walks closing a
    /// cycle are not: their length depends on where the cycle was entered.
    fn path_from_top(
        &self,
        layout: &CutLayout<'_>,
        start: SegmentIx,
        memo: &mut [Option<DownstreamPath>],
        in_walk: &mut [bool],
    ) -> DownstreamPath {
        let mut walk: Vec<SegmentIx> = Vec::new();
        let mut current = start;

        let base = loop {
            if let Some(done) = memo[current as usize] {
                break done;
            }
            if in_walk[current as usize] {
                break DownstreamPath::empty(PathEnd::Cycle(self.graph.segment(current).id));
            }
            let segment = self.graph.segment(current);
            if let Some(top_cut) = layout.cuts(current).last() {
                let path = DownstreamPath::empty(PathEnd::Barrier(top_cut.barrier_id))
                    .extend(segment.length - top_cut.position, segment);
                memo[current as usize] = Some(path);
                break path;
            }
            in_walk[current as usize] = true;
            walk.push(current);
            match self.routes.main(current) {
                Some(next) => current = next,
                None => break DownstreamPath::empty(PathEnd::Terminal(self.terminal_kind(current))),
            }
        };

        let cacheable = !matches!(base.end, PathEnd::Cycle(_));
        let mut acc = base;
        for &ix in walk.iter().rev() {
            let segment = self.graph.segment(ix);
            acc = acc.extend(segment.length, segment);
            if cacheable {
                memo[ix as usize] = Some(acc);
            }
            in_walk[ix as usize] = false;
        }
        acc
    }

    fn terminal_kind(&self, ix: SegmentIx) -> TerminalKind {
        self.graph.terminal_kind(ix).unwrap_or(TerminalKind::Outlet)
    }
}
