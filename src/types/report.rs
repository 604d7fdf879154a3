//! Data-quality events and the run report.
//!
//! ## Purpose
//!
//! Non-fatal conditions met while building, annotating and cutting a unit
//! are never swallowed. Each one becomes a `DataQualityEvent`, is logged
//! through `tracing` when recorded, and is surfaced to the operator in the
//! `RunReport` after the whole batch has run.
//!
//! | Event | Severity | Operator response |
//! |-------|----------|-------------------|
//! | UnattachedBarrier | Medium | Re-snap barrier |
//! | DuplicateAttachment | Medium | Fix snapping output |
//! | AmbiguousDownstreamBranch | Low | Review distributary |
//! | CycleDetected | Medium | Manual topology review |
//! | TerminalRepaired | Info | Report to data provider |
//! | TerminalNotRepaired | Low | Review near-miss join |
//! | ZeroLengthSegment | Low | Check flowline geometry |
//! | UnitFailed | High | Fix source data, rerun unit |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::barrier::{BarrierId, BarrierKind};
use super::segment::SegmentId;

/// Severity levels for data-quality events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational record of an automatic repair.
    Info,
    /// Low severity - review when convenient.
    Low,
    /// Medium severity - review before publishing results.
    Medium,
    /// High severity - results for a unit are missing.
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
        }
    }
}

/// A non-fatal condition recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataQualityEvent {
    /// Barrier snapped to a segment that is not in the built graph.
    UnattachedBarrier {
        /// Barrier excluded from the pass.
        barrier_id: BarrierId,
        /// Segment it was snapped to.
        segment_id: SegmentId,
    },
    /// Barrier snapped to more than one segment.
    DuplicateAttachment {
        /// Barrier with several attachments.
        barrier_id: BarrierId,
        /// Segment kept.
        kept: SegmentId,
        /// Segment discarded.
        dropped: SegmentId,
    },
    /// Segment has several non-loop downstream joins.
    AmbiguousDownstreamBranch {
        /// Segment where the flow splits.
        segment_id: SegmentId,
        /// Branch followed (largest drainage area).
        chosen: SegmentId,
        /// All candidate branches.
        candidates: Vec<SegmentId>,
    },
    /// Directed cycle reachable from a normal traversal origin.
    CycleDetected {
        /// Segment where the cycle closes.
        segment_id: SegmentId,
    },
    /// Join marked terminal was reconnected to a nearby segment.
    TerminalRepaired {
        /// Former terminal segment.
        segment_id: SegmentId,
        /// New downstream segment.
        downstream: SegmentId,
        /// Distance between the end point and the matched start point.
        distance: f64,
    },
    /// Terminal with a candidate just beyond the repair tolerance.
    TerminalNotRepaired {
        /// Terminal segment left as-is.
        segment_id: SegmentId,
        /// Nearest candidate.
        nearest: SegmentId,
        /// Distance to the nearest candidate.
        distance: f64,
    },
    /// Segment with zero length. Kept in the graph, contributes no miles.
    ZeroLengthSegment {
        /// Offending segment.
        segment_id: SegmentId,
    },
}

impl DataQualityEvent {
    /// Get the severity of this event.
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnattachedBarrier { .. } => Severity::Medium,
            Self::DuplicateAttachment { .. } => Severity::Medium,
            Self::AmbiguousDownstreamBranch { .. } => Severity::Low,
            Self::CycleDetected { .. } => Severity::Medium,
            Self::TerminalRepaired { .. } => Severity::Info,
            Self::TerminalNotRepaired { .. } => Severity::Low,
            Self::ZeroLengthSegment { .. } => Severity::Low,
        }
    }

    /// Short stable name, used as a report key.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::UnattachedBarrier { .. } => "unattached_barrier",
            Self::DuplicateAttachment { .. } => "duplicate_attachment",
            Self::AmbiguousDownstreamBranch { .. } => "ambiguous_downstream_branch",
            Self::CycleDetected { .. } => "cycle_detected",
            Self::TerminalRepaired { .. } => "terminal_repaired",
            Self::TerminalNotRepaired { .. } => "terminal_not_repaired",
            Self::ZeroLengthSegment { .. } => "zero_length_segment",
        }
    }
}

/// Collects events for one unit and logs each one as it arrives.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    unit_id: String,
    events: Vec<DataQualityEvent>,
}

impl DiagnosticLog {
    /// Create an empty log for a unit.
    pub fn new(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            events: Vec::new(),
        }
    }

    /// Record an event.
    pub fn record(&mut self, event: DataQualityEvent) {
        match event.severity() {
            Severity::Info => tracing::debug!(
                unit = %self.unit_id,
                event = event.kind_name(),
                detail = ?event,
                "data quality event"
            ),
            Severity::Low | Severity::Medium => tracing::warn!(
                unit = %self.unit_id,
                event = event.kind_name(),
                severity = %event.severity(),
                detail = ?event,
                "data quality event"
            ),
            Severity::High => tracing::error!(
                unit = %self.unit_id,
                event = event.kind_name(),
                detail = ?event,
                "data quality event"
            ),
        }
        self.events.push(event);
    }

    /// Events recorded so far.
    pub fn events(&self) -> &[DataQualityEvent] {
        &self.events
    }

    /// Number of events of the given kind.
    pub fn count(&self, kind_name: &str) -> usize {
        self.events.iter().filter(|e| e.kind_name() == kind_name).count()
    }

    /// Consume the log.
    pub fn into_events(self) -> Vec<DataQualityEvent> {
        self.events
    }
}

/// A unit that aborted on a fatal error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Processing unit identifier.
    pub unit_id: String,
    /// Rendered error.
    pub error: String,
}

/// Events of one unit as they appear in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitEvents {
    /// Processing unit identifier.
    pub unit_id: String,
    /// Events in the order they were recorded.
    pub events: Vec<DataQualityEvent>,
}

/// Structured report surfaced to the operator after a full run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run ID.
    pub run_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Hash of the analysis policy parameters.
    pub policy_params_hash: String,
    /// Units that completed.
    pub completed_units: Vec<String>,
    /// Units that aborted.
    pub failed_units: Vec<UnitFailure>,
    /// Non-fatal events per unit.
    pub unit_events: Vec<UnitEvents>,
}

impl RunReport {
    /// Start a new report.
    pub fn start(policy_params_hash: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            policy_params_hash: policy_params_hash.into(),
            completed_units: Vec::new(),
            failed_units: Vec::new(),
            unit_events: Vec::new(),
        }
    }

    /// Record a completed unit and its events.
    pub fn add_unit(&mut self, unit_id: impl Into<String>, events: Vec<DataQualityEvent>) {
        let unit_id = unit_id.into();
        self.completed_units.push(unit_id.clone());
        if !events.is_empty() {
            self.unit_events.push(UnitEvents { unit_id, events });
        }
    }

    /// Record a failed unit.
    pub fn add_failure(&mut self, failure: UnitFailure) {
        tracing::error!(
            unit = %failure.unit_id,
            severity = %Severity::High,
            error = %failure.error,
            "unit failed"
        );
        self.failed_units.push(failure);
    }

    /// Mark the run finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Event totals by kind across all units.
    pub fn totals(&self) -> BTreeMap<&'static str, usize> {
        let mut totals = BTreeMap::new();
        for unit in &self.unit_events {
            for event in &unit.events {
                *totals.entry(event.kind_name()).or_insert(0) += 1;
            }
        }
        totals
    }

    /// Whether every unit completed.
    pub fn is_clean(&self) -> bool {
        self.failed_units.is_empty()
    }
}

/// Count of barriers per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarrierCounts {
    /// Waterfalls.
    pub waterfalls: u32,
    /// Dams.
    pub dams: u32,
    /// Small barriers.
    pub small_barriers: u32,
    /// Road crossings.
    pub road_crossings: u32,
}

impl BarrierCounts {
    /// Increment count for a kind.
    pub fn increment(&mut self, kind: BarrierKind) {
        match kind {
            BarrierKind::Waterfall => self.waterfalls += 1,
            BarrierKind::Dam => self.dams += 1,
            BarrierKind::SmallBarrier => self.small_barriers += 1,
            BarrierKind::RoadCrossing => self.road_crossings += 1,
        }
    }

    /// Add another set of counts.
    pub fn add(&mut self, other: &BarrierCounts) {
        self.waterfalls += other.waterfalls;
        self.dams += other.dams;
        self.small_barriers += other.small_barriers;
        self.road_crossings += other.road_crossings;
    }

    /// Count for one kind.
    pub fn get(&self, kind: BarrierKind) -> u32 {
        match kind {
            BarrierKind::Waterfall => self.waterfalls,
            BarrierKind::Dam => self.dams,
            BarrierKind::SmallBarrier => self.small_barriers,
            BarrierKind::RoadCrossing => self.road_crossings,
        }
    }

    /// Total across all kinds.
    pub fn total(&self) -> u32 {
        self.waterfalls + self.dams + self.small_barriers + self.road_crossings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_counts_by_kind() {
        let mut log = DiagnosticLog::new("0601");
        log.record(DataQualityEvent::CycleDetected { segment_id: SegmentId::new(1) });
        log.record(DataQualityEvent::CycleDetected { segment_id: SegmentId::new(2) });
        log.record(DataQualityEvent::UnattachedBarrier {
            barrier_id: BarrierId::new(9),
            segment_id: SegmentId::new(3),
        });

        assert_eq!(log.count("cycle_detected"), 2);
        assert_eq!(log.count("unattached_barrier"), 1);
        assert_eq!(log.events().len(), 3);
    }

    #[test]
    fn test_report_totals() {
        let mut report = RunReport::start("hash");
        report.add_unit("a", vec![DataQualityEvent::CycleDetected { segment_id: SegmentId::new(1) }]);
        report.add_unit("b", vec![]);
        report.add_failure(UnitFailure { unit_id: "c".into(), error: "dangling".into() });
        report.finish();

        assert_eq!(report.completed_units, vec!["a", "b"]);
        assert_eq!(report.unit_events.len(), 1);
        assert_eq!(report.totals().get("cycle_detected"), Some(&1));
        assert!(!report.is_clean());
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = DataQualityEvent::TerminalRepaired {
            segment_id: SegmentId::new(1),
            downstream: SegmentId::new(2),
            distance: 50.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "terminal_repaired");
        assert_eq!(event.severity(), Severity::Info);
    }

    #[test]
    fn test_barrier_counts() {
        let mut counts = BarrierCounts::default();
        counts.increment(BarrierKind::Dam);
        counts.increment(BarrierKind::Dam);
        counts.increment(BarrierKind::Waterfall);
        assert_eq!(counts.get(BarrierKind::Dam), 2);
        assert_eq!(counts.total(), 3);
    }
}
