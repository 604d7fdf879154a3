//! Barrier types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::segment::{SegmentId, SegmentIx};

/// External identifier of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BarrierId(u64);

impl BarrierId {
    /// Create a new BarrierId.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BarrierId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Kind of barrier.
///
/// Ordered from natural, always-blocking features to the least certain
/// road-related crossings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierKind {
    /// Natural waterfall.
    Waterfall,
    /// Dam.
    Dam,
    /// Assessed road-related barrier (culvert, ford).
    SmallBarrier,
    /// Unassessed road / stream crossing.
    RoadCrossing,
}

impl BarrierKind {
    /// Parse barrier kind from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "waterfall" | "waterfalls" => Some(Self::Waterfall),
            "dam" | "dams" => Some(Self::Dam),
            "small_barrier" | "small_barriers" => Some(Self::SmallBarrier),
            "road_crossing" | "road_crossings" => Some(Self::RoadCrossing),
            _ => None,
        }
    }
}

impl fmt::Display for BarrierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waterfall => write!(f, "waterfall"),
            Self::Dam => write!(f, "dam"),
            Self::SmallBarrier => write!(f, "small_barrier"),
            Self::RoadCrossing => write!(f, "road_crossing"),
        }
    }
}

/// Barrier snapped to a segment by the external snapping step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarrierAttachment {
    /// Barrier identifier.
    pub barrier_id: BarrierId,
    /// Segment the barrier was snapped to.
    pub segment_id: SegmentId,
    /// Distance from the segment's downstream end, in input length units.
    #[serde(default)]
    pub position: f64,
    /// Kind of barrier.
    pub kind: BarrierKind,
}

impl BarrierAttachment {
    /// Create an attachment at the downstream end of a segment.
    pub fn new(barrier_id: u64, segment_id: u64, kind: BarrierKind) -> Self {
        Self {
            barrier_id: BarrierId::new(barrier_id),
            segment_id: SegmentId::new(segment_id),
            position: 0.0,
            kind,
        }
    }

    /// Set the distance from the segment's downstream end.
    pub fn at(mut self, position: f64) -> Self {
        self.position = position;
        self
    }
}

/// Barrier after validation against a built graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachedBarrier {
    /// Barrier identifier.
    pub barrier_id: BarrierId,
    /// Segment identifier.
    pub segment_id: SegmentId,
    /// Dense segment index in the graph.
    #[serde(skip)]
    pub segment: SegmentIx,
    /// Distance from the segment's downstream end, clamped to the segment.
    pub position: f64,
    /// Order among barriers on the same segment; 0 is the most downstream.
    pub ordinal: u32,
    /// Kind of barrier.
    pub kind: BarrierKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_kind_parse() {
        assert_eq!(BarrierKind::parse("Dams"), Some(BarrierKind::Dam));
        assert_eq!(BarrierKind::parse("small_barrier"), Some(BarrierKind::SmallBarrier));
        assert_eq!(BarrierKind::parse("weir"), None);
    }

    #[test]
    fn test_kind_ordering() {
        assert!(BarrierKind::Waterfall < BarrierKind::Dam);
        assert!(BarrierKind::SmallBarrier < BarrierKind::RoadCrossing);
    }
}
