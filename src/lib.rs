//! # barrier-connectivity
//!
//! Deterministic river-network cutting for aquatic barrier prioritization.
//!
//! The engine answers one question per barrier:
//!
//! > How many miles of river would be **reconnected** if this barrier were removed?
//!
//! ## Core Contract
//!
//! 1. Build a directed flow graph per processing unit from segment and join tables
//! 2. Cut the graph at the barriers active in an analysis pass into functional networks
//! 3. Reduce each network and its downstream path to per-barrier metrics
//! 4. Rank barriers into equal-population tiers per scenario and scope
//!
//! ## Architecture
//!
//! ```text
//! Segments + Joins → GraphBuilder → resolve (loops, cycles, marine)
//!                                        ↓
//!              Attachments → BarrierIndex → NetworkCutter (per pass)
//!                                        ↓
//!                             aggregate → PassMetrics → TieringEngine
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same unit tables + same policy → identical `GraphSnapshot`, cuts and metrics
//! - Every traversal visits segments in segment-id order
//! - Cut results, metrics and tier tables carry xxh64 fingerprints over
//!   quantized values

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod policy;
pub mod canonical;
pub mod graph;
pub mod resolve;
pub mod attach;
pub mod cutter;
pub mod metrics;
pub mod tiering;
pub mod pipeline;
pub mod export;

pub(crate) mod maybe_rayon;

// Re-exports
pub use types::{
    SegmentId, SegmentIx, Segment, RawSegment, FlowlineType, FlowDirection, HabitatFlags,
    Point, Endpoints, TerminalKind, RawJoin, JoinKind, BarrierId, BarrierKind,
    BarrierAttachment, AttachedBarrier, Assessed, Severity, DataQualityEvent, DiagnosticLog,
    RunReport, UnitFailure, BarrierCounts,
};
pub use policy::{AnalysisPolicy, NetworkType, DomainLabels, PolicyError, MAX_TIER_COUNT};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex, fingerprint};
pub use graph::{FlowGraph, GraphBuilder, GraphSnapshot, RepairSettings, TopologyError};
pub use resolve::{resolve, ResolvedGraph, MarineInput, MarineArea, AreaKind, DrainsInto};
pub use attach::{attach_barriers, BarrierIndex, AttachmentError, UnattachedBarrierError};
pub use cutter::{
    NetworkCutter, CutResult, FunctionalNetwork, NetworkRoot, SegmentSpan, DownstreamRoutes,
    DownstreamPath, PathEnd, BarrierNetwork, NetworkId,
};
pub use metrics::{
    aggregate, gain, BarrierMetrics, NetworkMetrics, NetworkStats, LengthSums, OutletPath,
    OutletPaths, PassMetrics,
};
pub use tiering::{
    assign_tiers, Scenario, Tier, TierRecord, TierScope, TierTable, TieringEngine, TieringInput,
};
pub use pipeline::{
    process_unit, tiering_inputs, BarrierContext, BatchResult, BatchRunner, UnitError, UnitInput,
    UnitOutput,
};
pub use export::{export_row, export_unit, BarrierExportRow};

/// Schema version for all engine output types.
/// Increment on breaking changes to any schema type.
pub const ENGINE_SCHEMA_VERSION: &str = "1.0.0";

/// Default policy version identifier.
pub const DEFAULT_POLICY_VERSION: &str = "analysis_policy_v1";
