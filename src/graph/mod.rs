//! Directed flow graph over stream segments.
//!
//! Segments live in a dense arena ordered by `SegmentId`; joins are stored
//! as two compressed adjacency lists (upstream and downstream), so neighbour
//! lookup in either direction is a slice borrow with no hashing.

pub mod builder;
pub mod spatial;
pub mod snapshot;

use std::collections::HashMap;

use crate::types::{Segment, SegmentId, SegmentIx, TerminalKind};

pub use builder::{GraphBuilder, RepairSettings, TopologyError};
pub use snapshot::GraphSnapshot;

/// Compressed adjacency list (CSR).
#[derive(Debug, Clone, Default)]
pub(crate) struct Adjacency {
    offsets: Vec<u32>,
    targets: Vec<SegmentIx>,
}

impl Adjacency {
    /// Build from (source, target) pairs. Targets of each source are sorted.
    pub(crate) fn from_pairs(node_count: usize, pairs: &[(SegmentIx, SegmentIx)]) -> Self {
        let mut offsets = vec![0u32; node_count + 1];
        for &(source, _) in pairs {
            offsets[source as usize + 1] += 1;
        }
        for i in 0..node_count {
            offsets[i + 1] += offsets[i];
        }

        let mut cursor = offsets.clone();
        let mut targets = vec![0; pairs.len()];
        for &(source, target) in pairs {
            let slot = &mut cursor[source as usize];
            targets[*slot as usize] = target;
            *slot += 1;
        }
        for i in 0..node_count {
            targets[offsets[i] as usize..offsets[i + 1] as usize].sort_unstable();
        }

        Self { offsets, targets }
    }

    pub(crate) fn neighbours(&self, ix: SegmentIx) -> &[SegmentIx] {
        let ix = ix as usize;
        &self.targets[self.offsets[ix] as usize..self.offsets[ix + 1] as usize]
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.targets.len()
    }
}

/// Directed multigraph of stream segments for one processing unit.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    segments: Vec<Segment>,
    index: HashMap<SegmentId, SegmentIx>,
    upstream: Adjacency,
    downstream: Adjacency,
}

impl FlowGraph {
    /// Assemble a graph from segments sorted by id and internal join pairs.
    pub(crate) fn from_parts(segments: Vec<Segment>, pairs: &[(SegmentIx, SegmentIx)]) -> Self {
        debug_assert!(segments.windows(2).all(|w| w[0].id < w[1].id));
        let index = segments
            .iter()
            .enumerate()
            .map(|(ix, s)| (s.id, ix as SegmentIx))
            .collect();
        let flipped: Vec<(SegmentIx, SegmentIx)> = pairs.iter().map(|&(u, d)| (d, u)).collect();

        Self {
            upstream: Adjacency::from_pairs(segments.len(), &flipped),
            downstream: Adjacency::from_pairs(segments.len(), pairs),
            segments,
            index,
        }
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether the graph has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of internal joins.
    pub fn join_count(&self) -> usize {
        self.downstream.edge_count()
    }

    /// Segment at a dense index.
    pub fn segment(&self, ix: SegmentIx) -> &Segment {
        &self.segments[ix as usize]
    }

    pub(crate) fn segment_mut(&mut self, ix: SegmentIx) -> &mut Segment {
        &mut self.segments[ix as usize]
    }

    /// All segments, ordered by id.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Dense index of a segment id.
    pub fn segment_ix(&self, id: SegmentId) -> Option<SegmentIx> {
        self.index.get(&id).copied()
    }

    /// Segments flowing directly into `ix`.
    pub fn upstream_of(&self, ix: SegmentIx) -> &[SegmentIx] {
        self.upstream.neighbours(ix)
    }

    /// Segments `ix` flows directly into.
    pub fn downstream_of(&self, ix: SegmentIx) -> &[SegmentIx] {
        self.downstream.neighbours(ix)
    }

    /// Whether the segment is a headwater: no upstream join and no
    /// inflow from a neighbouring unit.
    pub fn is_origin(&self, ix: SegmentIx) -> bool {
        self.upstream_of(ix).is_empty() && !self.segment(ix).huc_in
    }

    /// Whether the segment has no downstream join.
    pub fn is_terminal(&self, ix: SegmentIx) -> bool {
        self.downstream_of(ix).is_empty()
    }

    /// Terminal condition of a terminal segment.
    pub fn terminal_kind(&self, ix: SegmentIx) -> Option<TerminalKind> {
        self.segment(ix).terminal
    }

    /// Indices of all terminal segments, ascending.
    pub fn terminals(&self) -> impl Iterator<Item = SegmentIx> + '_ {
        (0..self.len() as SegmentIx).filter(move |ix| self.is_terminal(*ix))
    }

    /// Sum of segment lengths.
    pub fn total_length(&self) -> f64 {
        self.segments.iter().map(|s| s.length).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjacency_from_pairs() {
        let adj = Adjacency::from_pairs(4, &[(0, 2), (0, 1), (2, 3), (1, 3)]);
        assert_eq!(adj.neighbours(0), &[1, 2]);
        assert_eq!(adj.neighbours(1), &[3]);
        assert_eq!(adj.neighbours(3), &[] as &[SegmentIx]);
        assert_eq!(adj.edge_count(), 4);
    }
}
