//! Loop tagging and directed cycle diagnostics.
//!
//! A segment is a loop when it sits on a cycle of the undirected projection
//! (incident to a join that is not a bridge) and its own direction
//! attributes are inconsistent. Both searches are iterative so that
//! million-segment units do not exhaust the call stack.

use std::collections::BTreeSet;

use crate::graph::FlowGraph;
use crate::types::SegmentIx;

const NONE: u32 = u32::MAX;

/// Undirected multigraph view: per node, (neighbour, edge id).
fn undirected_adjacency(graph: &FlowGraph) -> Vec<Vec<(SegmentIx, u32)>> {
    let mut adj: Vec<Vec<(SegmentIx, u32)>> = vec![Vec::new(); graph.len()];
    let mut edge = 0u32;
    for u in 0..graph.len() as SegmentIx {
        for &d in graph.downstream_of(u) {
            adj[u as usize].push((d, edge));
            adj[d as usize].push((u, edge));
            edge += 1;
        }
    }
    adj
}

/// Segments incident to at least one non-bridge join.
pub fn cycle_members(graph: &FlowGraph) -> Vec<bool> {
    let n = graph.len();
    let adj = undirected_adjacency(graph);
    let edge_count = graph.join_count();

    let mut disc = vec![NONE; n];
    let mut low = vec![0u32; n];
    let mut is_bridge = vec![false; edge_count];
    let mut timer = 0u32;

    // (node, edge used to enter it, next neighbour position)
    let mut stack: Vec<(SegmentIx, u32, usize)> = Vec::new();
    for root in 0..n as SegmentIx {
        if disc[root as usize] != NONE {
            continue;
        }
        disc[root as usize] = timer;
        low[root as usize] = timer;
        timer += 1;
        stack.push((root, NONE, 0));

        while let Some(frame) = stack.last_mut() {
            let (v, parent_edge, pos) = *frame;
            if let Some(&(w, e)) = adj[v as usize].get(pos) {
                frame.2 += 1;
                if e == parent_edge {
                    continue;
                }
                if disc[w as usize] == NONE {
                    disc[w as usize] = timer;
                    low[w as usize] = timer;
                    timer += 1;
                    stack.push((w, e, 0));
                } else {
                    low[v as usize] = low[v as usize].min(disc[w as usize]);
                }
            } else {
                stack.pop();
                if let Some(&(p, _, _)) = stack.last() {
                    low[p as usize] = low[p as usize].min(low[v as usize]);
                    if low[v as usize] > disc[p as usize] {
                        is_bridge[parent_edge as usize] = true;
                    }
                }
            }
        }
    }

    let mut on_cycle = vec![false; n];
    for (v, neighbours) in adj.iter().enumerate() {
        on_cycle[v] = neighbours.iter().any(|&(_, e)| !is_bridge[e as usize]);
    }
    on_cycle
}

/// Set `is_loop` on every cycle member with inconsistent direction.
/// Returns the number of loop segments.
pub fn tag_loops(graph: &mut FlowGraph) -> usize {
    let on_cycle = cycle_members(graph);
    let mut count = 0;
    for (ix, member) in on_cycle.into_iter().enumerate() {
        let ix = ix as SegmentIx;
        if member && graph.segment(ix).has_inconsistent_direction() {
            graph.segment_mut(ix).is_loop = true;
            count += 1;
        }
    }
    count
}

/// Directed cycles over non-loop segments reachable upstream from a
/// terminal or downstream from an origin.
///
/// Each cycle is reported once, by its lowest segment index.
pub fn find_cycles(graph: &FlowGraph) -> Vec<SegmentIx> {
    let mut found = BTreeSet::new();

    let terminals: Vec<SegmentIx> = graph
        .terminals()
        .filter(|ix| !graph.segment(*ix).is_loop)
        .collect();
    closing_segments(graph, &terminals, |g, ix| g.upstream_of(ix), &mut found);

    let origins: Vec<SegmentIx> = (0..graph.len() as SegmentIx)
        .filter(|ix| graph.upstream_of(*ix).is_empty() && !graph.segment(*ix).is_loop)
        .collect();
    closing_segments(graph, &origins, |g, ix| g.downstream_of(ix), &mut found);

    found.into_iter().collect()
}

/// Colour DFS; a join into a node still on the path closes a cycle.
fn closing_segments<'g, F>(
    graph: &'g FlowGraph,
    starts: &[SegmentIx],
    next: F,
    found: &mut BTreeSet<SegmentIx>,
) where
    F: Fn(&'g FlowGraph, SegmentIx) -> &'g [SegmentIx],
{
    const WHITE: u8 = 0;
    const GREY: u8 = 1;
    const BLACK: u8 = 2;

    let mut colour = vec![WHITE; graph.len()];
    let mut path_pos = vec![usize::MAX; graph.len()];
    let mut stack: Vec<(SegmentIx, usize)> = Vec::new();

    for &start in starts {
        if colour[start as usize] != WHITE {
            continue;
        }
        colour[start as usize] = GREY;
        path_pos[start as usize] = 0;
        stack.push((start, 0));

        while let Some(frame) = stack.last_mut() {
            let (v, pos) = *frame;
            let neighbours = next(graph, v);
            if let Some(&w) = neighbours.get(pos) {
                frame.1 += 1;
                if graph.segment(w).is_loop {
                    continue;
                }
                match colour[w as usize] {
                    WHITE => {
                        colour[w as usize] = GREY;
                        path_pos[w as usize] = stack.len();
                        stack.push((w, 0));
                    }
                    GREY => {
                        let from = path_pos[w as usize];
                        let lowest = stack[from..]
                            .iter()
                            .map(|(ix, _)| *ix)
                            .min()
                            .unwrap_or(w);
                        found.insert(lowest);
                    }
                    _ => {}
                }
            } else {
                colour[v as usize] = BLACK;
                path_pos[v as usize] = usize::MAX;
                stack.pop();
            }
        }
    }
}
