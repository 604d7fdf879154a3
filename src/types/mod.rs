//! Core types for the connectivity engine.

pub mod segment;
pub mod join;
pub mod barrier;
pub mod domain;
pub mod report;

pub use segment::{
    SegmentId, SegmentIx, Segment, RawSegment, FlowlineType, FlowDirection,
    HabitatFlags, Point, Endpoints, TerminalKind,
};
pub use join::{RawJoin, JoinKind};
pub use barrier::{BarrierId, BarrierKind, BarrierAttachment, AttachedBarrier};
pub use domain::Assessed;
pub use report::{
    Severity, DataQualityEvent, DiagnosticLog, RunReport, UnitFailure, UnitEvents,
    BarrierCounts,
};
