//! Loop & marine resolver.
//!
//! Takes the builder's `FlowGraph` by value, annotates loops and marine
//! connectivity, reports directed cycles, and hands back a `ResolvedGraph`
//! that only exposes the graph read-only.

pub mod loops;
pub mod marine;

use std::ops::Deref;

use crate::graph::FlowGraph;
use crate::types::{DataQualityEvent, DiagnosticLog, SegmentId};

pub use marine::{AreaKind, DrainsInto, MarineArea, MarineInput};

/// Annotated, read-only flow graph.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    graph: FlowGraph,
    loop_count: usize,
    cycles: Vec<SegmentId>,
}

impl ResolvedGraph {
    /// Number of segments tagged as loops.
    pub fn loop_count(&self) -> usize {
        self.loop_count
    }

    /// Segments closing a directed cycle (diagnostic).
    pub fn cycles(&self) -> &[SegmentId] {
        &self.cycles
    }

    /// The underlying graph.
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }
}

impl Deref for ResolvedGraph {
    type Target = FlowGraph;

    fn deref(&self) -> &FlowGraph {
        &self.graph
    }
}

/// Annotate a built graph.
pub fn resolve(mut graph: FlowGraph, marine: &MarineInput, log: &mut DiagnosticLog) -> ResolvedGraph {
    let loop_count = loops::tag_loops(&mut graph);
    let (ocean, lakes) = marine::apply(&mut graph, marine);

    let cycles: Vec<SegmentId> = loops::find_cycles(&graph)
        .into_iter()
        .map(|ix| graph.segment(ix).id)
        .collect();
    for &segment_id in &cycles {
        log.record(DataQualityEvent::CycleDetected { segment_id });
    }

    tracing::debug!(
        loops = loop_count,
        ocean_terminals = ocean,
        great_lakes_terminals = lakes,
        cycles = cycles.len(),
        "graph resolved"
    );
    ResolvedGraph {
        graph,
        loop_count,
        cycles,
    }
}
