//! Unit snapshot identity for provenance of outputs.
//!
//! A `GraphSnapshot` fingerprints the built (and annotated) graph of one
//! unit. Every cut result and metrics table of the unit references its
//! `snapshot_id`, so two outputs can be proven to come from the same
//! network state.

use serde::{Deserialize, Serialize};

use super::FlowGraph;
use crate::canonical::{canonical_hash_hex, quantize, to_canonical_bytes};
use crate::ENGINE_SCHEMA_VERSION;

/// Deterministic fingerprint of a unit's flow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Unique identifier for this snapshot (xxh64 of all components).
    pub snapshot_id: String,
    /// Number of segments.
    pub segment_count: u64,
    /// Number of internal joins.
    pub join_count: u64,
    /// Total segment length, quantized.
    pub total_length_q: i64,
    /// Schema version used for types.
    pub schema_version: String,
    /// Hash of segment ids with their attributes and derived flags.
    pub segment_hash: String,
    /// Hash of sorted (upstream, downstream) id pairs.
    pub join_pair_hash: String,
}

/// Per-segment fields that take part in the snapshot.
#[derive(Serialize)]
struct SegmentFingerprint {
    id: u64,
    length_q: i64,
    drainage_q: i64,
    stream_order: u8,
    flags: [bool; 7],
    habitat: u32,
    terminal: Option<String>,
}

#[derive(Serialize)]
struct SnapshotIdInput<'a> {
    segment_count: u64,
    join_count: u64,
    total_length_q: i64,
    schema_version: &'a str,
    segment_hash: &'a str,
    join_pair_hash: &'a str,
}

impl GraphSnapshot {
    /// Compute the snapshot of a graph.
    pub fn compute(graph: &FlowGraph) -> Self {
        let fingerprints: Vec<SegmentFingerprint> = graph
            .segments()
            .iter()
            .map(|s| SegmentFingerprint {
                id: s.id.as_u64(),
                length_q: quantize(s.length),
                drainage_q: quantize(s.drainage_area),
                stream_order: s.stream_order,
                flags: [
                    s.altered,
                    s.intermittent,
                    s.waterbody,
                    s.huc_in,
                    s.is_loop,
                    s.flows_to_ocean,
                    s.flows_to_great_lakes,
                ],
                habitat: s.habitat_flags.bits(),
                terminal: s.terminal.map(|t| t.to_string()),
            })
            .collect();
        let segment_hash = canonical_hash_hex(&fingerprints);

        // Segments are id-ordered and neighbour slices are sorted, so this
        // is already canonical.
        let mut pairs: Vec<(u64, u64)> = Vec::with_capacity(graph.join_count());
        for ix in 0..graph.len() as u32 {
            let up = graph.segment(ix).id.as_u64();
            for &d in graph.downstream_of(ix) {
                pairs.push((up, graph.segment(d).id.as_u64()));
            }
        }
        let join_pair_hash = canonical_hash_hex(&pairs);

        let segment_count = graph.len() as u64;
        let join_count = pairs.len() as u64;
        let total_length_q = quantize(graph.total_length());

        let snapshot_id = canonical_hash_hex(&SnapshotIdInput {
            segment_count,
            join_count,
            total_length_q,
            schema_version: ENGINE_SCHEMA_VERSION,
            segment_hash: &segment_hash,
            join_pair_hash: &join_pair_hash,
        });

        Self {
            snapshot_id,
            segment_count,
            join_count,
            total_length_q,
            schema_version: ENGINE_SCHEMA_VERSION.to_string(),
            segment_hash,
            join_pair_hash,
        }
    }

    /// Serialize to canonical JSON bytes.
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        to_canonical_bytes(self)
    }

    /// Verify that this snapshot matches the given graph.
    pub fn verify(&self, graph: &FlowGraph) -> bool {
        Self::compute(graph).snapshot_id == self.snapshot_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use crate::types::{DiagnosticLog, RawJoin, RawSegment};

    fn chain(lengths: &[f64]) -> FlowGraph {
        let segments = lengths
            .iter()
            .enumerate()
            .map(|(i, l)| RawSegment::new(i as u64 + 1, *l, 1.0 + i as f64))
            .collect();
        let mut joins: Vec<RawJoin> = (1..lengths.len() as u64)
            .map(|i| RawJoin::internal(i, i + 1))
            .collect();
        joins.push(RawJoin::terminal(lengths.len() as u64));
        GraphBuilder::default()
            .build(segments, joins, &mut DiagnosticLog::new("test"))
            .unwrap()
    }

    #[test]
    fn test_snapshot_determinism() {
        let graph = chain(&[1.0, 2.0, 3.0]);
        let s1 = GraphSnapshot::compute(&graph);
        let s2 = GraphSnapshot::compute(&graph);

        assert_eq!(s1.snapshot_id, s2.snapshot_id);
        assert_eq!(s1.segment_count, 3);
        assert_eq!(s1.join_count, 2);
        assert!(s1.verify(&graph));
    }

    #[test]
    fn test_snapshot_changes_with_length() {
        let a = GraphSnapshot::compute(&chain(&[1.0, 2.0, 3.0]));
        let b = GraphSnapshot::compute(&chain(&[1.0, 2.0, 3.5]));
        assert_ne!(a.snapshot_id, b.snapshot_id);
        assert_eq!(a.join_pair_hash, b.join_pair_hash);
    }
}
