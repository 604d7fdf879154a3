//! Marine and Great Lakes connectivity.
//!
//! Area polygons and their adjacency are supplied by the geometry stage.
//! Adjacent areas are unioned into groups; a group with a sea/ocean member
//! is tidal, a group with a Great Lake member is a Great Lakes group.
//! Terminals draining into a group take the group's terminal kind, and the
//! `flows_to_*` flags are then pushed upstream from those terminals.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::graph::FlowGraph;
use crate::types::{SegmentId, SegmentIx, TerminalKind};

/// Kind of a receiving water area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaKind {
    /// Sea or ocean.
    SeaOcean,
    /// Bay or inlet.
    BayInlet,
    /// Estuary.
    Estuary,
    /// One of the Great Lakes.
    GreatLake,
}

impl AreaKind {
    /// Map an NHD area `FType` code; Great Lakes carry no code of their own.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            445 => Some(Self::SeaOcean),
            312 => Some(Self::BayInlet),
            493 => Some(Self::Estuary),
            _ => None,
        }
    }
}

/// One receiving water area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarineArea {
    /// Area identifier.
    pub id: u64,
    /// Area kind.
    pub kind: AreaKind,
}

/// A terminal segment that ends inside an area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrainsInto {
    /// Terminal segment.
    pub segment_id: SegmentId,
    /// Receiving area.
    pub area_id: u64,
}

/// Externally supplied marine geometry relations for one unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarineInput {
    /// Receiving areas.
    pub areas: Vec<MarineArea>,
    /// Pairs of areas that touch.
    pub adjacency: Vec<(u64, u64)>,
    /// Terminals and the areas they end in.
    pub drains_into: Vec<DrainsInto>,
}

/// Disjoint-set forest with path halving and union by size.
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (mut a, mut b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        if self.size[a] < self.size[b] {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        self.size[a] += self.size[b];
    }
}

/// Terminal kind implied by each area, after grouping.
pub fn area_terminal_kinds(input: &MarineInput) -> BTreeMap<u64, TerminalKind> {
    let position: BTreeMap<u64, usize> = input
        .areas
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id, i))
        .collect();

    let mut groups = UnionFind::new(input.areas.len());
    for (a, b) in &input.adjacency {
        match (position.get(a), position.get(b)) {
            (Some(&a), Some(&b)) => groups.union(a, b),
            _ => tracing::warn!(a, b, "area adjacency references unknown area"),
        }
    }

    let mut tidal = vec![false; input.areas.len()];
    let mut great_lakes = vec![false; input.areas.len()];
    for (i, area) in input.areas.iter().enumerate() {
        let root = groups.find(i);
        match area.kind {
            AreaKind::SeaOcean => tidal[root] = true,
            AreaKind::GreatLake => great_lakes[root] = true,
            AreaKind::BayInlet | AreaKind::Estuary => {}
        }
    }

    let mut kinds = BTreeMap::new();
    for (i, area) in input.areas.iter().enumerate() {
        let root = groups.find(i);
        if tidal[root] {
            kinds.insert(area.id, TerminalKind::Marine);
        } else if great_lakes[root] {
            kinds.insert(area.id, TerminalKind::GreatLakes);
        }
    }
    kinds
}

/// Reclassify terminals draining into marine / Great Lakes groups and set
/// the `flows_to_*` flags. Returns (ocean, great lakes) terminal counts.
pub fn apply(graph: &mut FlowGraph, input: &MarineInput) -> (usize, usize) {
    let kinds = area_terminal_kinds(input);

    for drain in &input.drains_into {
        let Some(kind) = kinds.get(&drain.area_id).copied() else {
            continue;
        };
        let Some(ix) = graph.segment_ix(drain.segment_id) else {
            continue;
        };
        if !graph.is_terminal(ix) {
            continue;
        }
        let segment = graph.segment_mut(ix);
        let upgraded = match (segment.terminal, kind) {
            (Some(TerminalKind::Marine), _) => TerminalKind::Marine,
            (_, kind) => kind,
        };
        segment.terminal = Some(upgraded);
        segment.is_marine = upgraded == TerminalKind::Marine;
    }

    let ocean: Vec<SegmentIx> = graph
        .terminals()
        .filter(|ix| graph.terminal_kind(*ix) == Some(TerminalKind::Marine))
        .collect();
    let lakes: Vec<SegmentIx> = graph
        .terminals()
        .filter(|ix| graph.terminal_kind(*ix) == Some(TerminalKind::GreatLakes))
        .collect();

    for ix in flood_upstream(graph, &ocean) {
        graph.segment_mut(ix).flows_to_ocean = true;
    }
    for ix in flood_upstream(graph, &lakes) {
        graph.segment_mut(ix).flows_to_great_lakes = true;
    }
    (ocean.len(), lakes.len())
}

/// Every segment upstream of (and including) the seeds.
fn flood_upstream(graph: &FlowGraph, seeds: &[SegmentIx]) -> Vec<SegmentIx> {
    let mut seen = vec![false; graph.len()];
    let mut queue: VecDeque<SegmentIx> = VecDeque::new();
    for &s in seeds {
        if !seen[s as usize] {
            seen[s as usize] = true;
            queue.push_back(s);
        }
    }
    let mut reached = Vec::new();
    while let Some(ix) = queue.pop_front() {
        reached.push(ix);
        for &up in graph.upstream_of(ix) {
            if !seen[up as usize] {
                seen[up as usize] = true;
                queue.push_back(up);
            }
        }
    }
    reached
}
