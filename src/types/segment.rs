//! Stream segment types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a stream segment.
///
/// Derived from the external hydrography identifier (NHDPlusID). Implements
/// `Ord` so segment tables and adjacency lists iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(u64);

impl SegmentId {
    /// Create a SegmentId from the external identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw external identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SegmentId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Dense index of a segment inside a built graph.
pub type SegmentIx = u32;

/// Feature type of a flowline.
///
/// Closed set of the hydrography feature types the engine distinguishes;
/// anything else maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowlineType {
    /// Natural stream or river.
    StreamRiver,
    /// Artificial path through a waterbody.
    ArtificialPath,
    /// Canal or ditch.
    CanalDitch,
    /// Connector between networks.
    Connector,
    /// Pipeline (kept: many pass through dams).
    Pipeline,
    /// Coastline; removed from the network.
    Coastline,
    /// Underground conduit; removed from the network.
    UndergroundConduit,
    /// Feature type not recognized.
    #[default]
    Unknown,
}

impl FlowlineType {
    /// Map an NHD `FType` code to a flowline type.
    pub fn from_code(code: u16) -> Self {
        match code {
            460 => Self::StreamRiver,
            558 => Self::ArtificialPath,
            336 => Self::CanalDitch,
            334 => Self::Connector,
            428 => Self::Pipeline,
            566 => Self::Coastline,
            420 => Self::UndergroundConduit,
            _ => Self::Unknown,
        }
    }

    /// Whether segments of this type are dropped by the graph builder.
    pub fn is_excluded(&self) -> bool {
        matches!(self, Self::Coastline | Self::UndergroundConduit)
    }
}

/// Digitized flow direction of a flowline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    /// Flow follows the digitized direction.
    #[default]
    WithDigitized,
    /// Flow direction was never initialized in the source.
    Uninitialized,
}

/// Bitset of species / habitat layers present on a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct HabitatFlags(u32);

impl HabitatFlags {
    /// Number of habitat layers a bitset can hold.
    pub const MAX_LAYERS: u8 = 32;

    /// Empty set.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Create from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Return a copy with the given layer set.
    pub fn with(self, layer: u8) -> Self {
        debug_assert!(layer < Self::MAX_LAYERS);
        Self(self.0 | (1 << layer))
    }

    /// Whether the given layer is present.
    pub fn contains(&self, layer: u8) -> bool {
        layer < Self::MAX_LAYERS && self.0 & (1 << layer) != 0
    }

    /// Whether no layer is present.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Iterate over present layers in ascending order.
    pub fn layers(&self) -> impl Iterator<Item = u8> + '_ {
        (0..Self::MAX_LAYERS).filter(move |l| self.contains(*l))
    }

    /// Raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Planar point in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Easting.
    pub x: f64,
    /// Northing.
    pub y: f64,
}

impl Point {
    /// Create a new point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// End points of a segment's line geometry.
///
/// `start` is the upstream-most vertex, `end` the downstream-most.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Upstream start point.
    pub start: Point,
    /// Downstream end point.
    pub end: Point,
}

/// How a terminal segment leaves the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    /// Inland outlet (sink, dry end, unresolved end).
    Outlet,
    /// Leaves the processing unit.
    RegionExit,
    /// Drains to tidal / marine water.
    Marine,
    /// Drains to one of the Great Lakes.
    GreatLakes,
}

impl TerminalKind {
    /// Whether removing a barrier above this terminal creates no new
    /// downstream constraint.
    pub fn is_open_water(&self) -> bool {
        matches!(self, Self::Marine | Self::GreatLakes)
    }
}

impl fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outlet => write!(f, "outlet"),
            Self::RegionExit => write!(f, "region_exit"),
            Self::Marine => write!(f, "marine"),
            Self::GreatLakes => write!(f, "great_lakes"),
        }
    }
}

/// Segment record as supplied by the hydrography extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSegment {
    /// External identifier.
    pub segment_id: SegmentId,
    /// Length in input length units.
    pub length: f64,
    /// Cumulative drainage area (km²).
    pub drainage_area: f64,
    /// Stream order.
    pub stream_order: u8,
    /// Calculated stream order; differs from `stream_order` on divergent loops.
    #[serde(default)]
    pub stream_calc: Option<u8>,
    /// Feature type.
    #[serde(default)]
    pub flowline_type: FlowlineType,
    /// Digitized flow direction.
    #[serde(default)]
    pub flow_direction: FlowDirection,
    /// Channel is altered (canalized, ditched).
    #[serde(default)]
    pub altered: bool,
    /// Flow is intermittent or ephemeral.
    #[serde(default)]
    pub intermittent: bool,
    /// Segment runs through a waterbody (reservoir, lake).
    #[serde(default)]
    pub waterbody: bool,
    /// Habitat layers present.
    #[serde(default)]
    pub habitat_flags: HabitatFlags,
    /// Line end points, used only to repair false terminals.
    #[serde(default)]
    pub endpoints: Option<Endpoints>,
}

impl RawSegment {
    /// Create a plain stream segment with default attributes.
    pub fn new(segment_id: u64, length: f64, drainage_area: f64) -> Self {
        Self {
            segment_id: SegmentId::new(segment_id),
            length,
            drainage_area,
            stream_order: 1,
            stream_calc: None,
            flowline_type: FlowlineType::StreamRiver,
            flow_direction: FlowDirection::WithDigitized,
            altered: false,
            intermittent: false,
            waterbody: false,
            habitat_flags: HabitatFlags::empty(),
            endpoints: None,
        }
    }

    /// Set the flowline type.
    pub fn with_type(mut self, flowline_type: FlowlineType) -> Self {
        self.flowline_type = flowline_type;
        self
    }

    /// Set the line end points.
    pub fn with_endpoints(mut self, start: Point, end: Point) -> Self {
        self.endpoints = Some(Endpoints { start, end });
        self
    }
}

/// Segment as held by the flow graph.
///
/// Derived flags are filled by the builder (`huc_in`, `terminal`) and the
/// resolver (`is_loop`, `is_marine`, `flows_to_*`); afterwards the segment
/// is read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// External identifier.
    pub id: SegmentId,
    /// Length in input length units.
    pub length: f64,
    /// Cumulative drainage area (km²).
    pub drainage_area: f64,
    /// Stream order.
    pub stream_order: u8,
    /// Calculated stream order.
    pub stream_calc: Option<u8>,
    /// Digitized flow direction.
    pub flow_direction: FlowDirection,
    /// Channel is altered.
    pub altered: bool,
    /// Flow is intermittent.
    pub intermittent: bool,
    /// Segment runs through a waterbody.
    pub waterbody: bool,
    /// Habitat layers present.
    pub habitat_flags: HabitatFlags,
    /// Receives flow from outside the processing unit.
    pub huc_in: bool,
    /// Terminal condition, if the segment has no downstream join.
    pub terminal: Option<TerminalKind>,
    /// Part of an inconsistent undirected cycle.
    pub is_loop: bool,
    /// Terminates into marine water.
    pub is_marine: bool,
    /// Some downstream path reaches marine water.
    pub flows_to_ocean: bool,
    /// Some downstream path reaches a Great Lake.
    pub flows_to_great_lakes: bool,
}

impl Segment {
    pub(crate) fn from_raw(raw: &RawSegment) -> Self {
        Self {
            id: raw.segment_id,
            length: raw.length,
            drainage_area: raw.drainage_area,
            stream_order: raw.stream_order,
            stream_calc: raw.stream_calc,
            flow_direction: raw.flow_direction,
            altered: raw.altered,
            intermittent: raw.intermittent,
            waterbody: raw.waterbody,
            habitat_flags: raw.habitat_flags,
            huc_in: false,
            terminal: None,
            is_loop: false,
            is_marine: false,
            flows_to_ocean: false,
            flows_to_great_lakes: false,
        }
    }

    /// Whether the directional attributes disagree with each other.
    pub fn has_inconsistent_direction(&self) -> bool {
        let order_mismatch = self
            .stream_calc
            .map(|calc| calc != self.stream_order)
            .unwrap_or(false);
        order_mismatch || self.flow_direction == FlowDirection::Uninitialized
    }

    /// Whether flow is perennial.
    pub fn is_perennial(&self) -> bool {
        !self.intermittent
    }
}
