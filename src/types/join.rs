//! Join types: directed upstream → downstream connections between segments.

use serde::{Deserialize, Serialize};
use super::segment::SegmentId;

/// Classification of a join row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    /// Both ends inside the unit.
    #[default]
    Internal,
    /// Headwater: no upstream segment.
    Origin,
    /// Outlet: no downstream segment.
    Terminal,
    /// Upstream segment lives in a neighbouring unit (open upstream edge).
    HucIn,
    /// Downstream segment lives in a neighbouring unit (region exit).
    HucOut,
}

impl JoinKind {
    /// Parse join kind from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "internal" | "" => Some(Self::Internal),
            "origin" => Some(Self::Origin),
            "terminal" => Some(Self::Terminal),
            "huc_in" => Some(Self::HucIn),
            "huc_out" => Some(Self::HucOut),
            _ => None,
        }
    }
}

impl std::fmt::Display for JoinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Internal => write!(f, "internal"),
            Self::Origin => write!(f, "origin"),
            Self::Terminal => write!(f, "terminal"),
            Self::HucIn => write!(f, "huc_in"),
            Self::HucOut => write!(f, "huc_out"),
        }
    }
}

/// Join row as supplied by the hydrography extract.
///
/// `upstream == None` marks a network origin, `downstream == None` a
/// terminal. Ordering is canonical: (upstream, downstream, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RawJoin {
    /// Upstream segment.
    pub upstream: Option<SegmentId>,
    /// Downstream segment.
    pub downstream: Option<SegmentId>,
    /// Terminal / boundary classification.
    #[serde(default)]
    pub kind: JoinKind,
    /// Downstream side drains to marine water (set for joins into coastlines).
    #[serde(default)]
    pub marine: bool,
}

impl RawJoin {
    /// Create a join between two segments in the unit.
    pub fn internal(upstream: u64, downstream: u64) -> Self {
        Self {
            upstream: Some(SegmentId::new(upstream)),
            downstream: Some(SegmentId::new(downstream)),
            kind: JoinKind::Internal,
            marine: false,
        }
    }

    /// Create a headwater origin join.
    pub fn origin(downstream: u64) -> Self {
        Self {
            upstream: None,
            downstream: Some(SegmentId::new(downstream)),
            kind: JoinKind::Origin,
            marine: false,
        }
    }

    /// Create an outlet join.
    pub fn terminal(upstream: u64) -> Self {
        Self {
            upstream: Some(SegmentId::new(upstream)),
            downstream: None,
            kind: JoinKind::Terminal,
            marine: false,
        }
    }

    /// Create a join receiving flow from a neighbouring unit.
    pub fn huc_in(upstream: u64, downstream: u64) -> Self {
        Self {
            upstream: Some(SegmentId::new(upstream)),
            downstream: Some(SegmentId::new(downstream)),
            kind: JoinKind::HucIn,
            marine: false,
        }
    }

    /// Create a join leaving the unit.
    pub fn huc_out(upstream: u64) -> Self {
        Self {
            upstream: Some(SegmentId::new(upstream)),
            downstream: None,
            kind: JoinKind::HucOut,
            marine: false,
        }
    }

    /// Fill in the kind a row's shape implies when it arrived without one.
    ///
    /// Rows with no downstream segment become terminals and rows with no
    /// upstream segment become origins. Explicit kinds are left alone.
    pub fn with_shape_kind(mut self) -> Self {
        if self.kind == JoinKind::Internal {
            self.kind = match (self.upstream, self.downstream) {
                (Some(_), None) => JoinKind::Terminal,
                (None, Some(_)) => JoinKind::Origin,
                _ => JoinKind::Internal,
            };
        }
        self
    }

    /// Whether this join ends the network.
    pub fn is_terminal(&self) -> bool {
        self.downstream.is_none()
    }

    /// Whether this join starts the network.
    pub fn is_origin(&self) -> bool {
        self.upstream.is_none()
    }
}
