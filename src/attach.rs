//! Barrier attachment: validate snapped barriers against a resolved graph
//! and order barriers that share a segment.
//!
//! Snapping itself happens upstream of the engine. This stage only checks
//! that each barrier maps to exactly one segment that survived graph
//! building, clamps its position into the segment, and assigns ordinals
//! (0 = most downstream) along the segment.

use std::collections::{BTreeMap, HashMap};

use crate::resolve::ResolvedGraph;
use crate::types::{
    AttachedBarrier, BarrierAttachment, BarrierId, BarrierKind, DataQualityEvent, DiagnosticLog,
    SegmentId, SegmentIx,
};

/// Barrier attached to a segment that is not in the network.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Barrier {barrier_id} attached to segment {segment_id}, which is not in the network")]
pub struct UnattachedBarrierError {
    /// Barrier excluded from network computation.
    pub barrier_id: BarrierId,
    /// Segment it was snapped to.
    pub segment_id: SegmentId,
    /// Barrier kind.
    pub kind: BarrierKind,
}

/// Reasons an attachment row is not used.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttachmentError {
    /// Segment missing from the graph.
    #[error(transparent)]
    Unattached(#[from] UnattachedBarrierError),
    /// Barrier snapped to more than one segment; this row was discarded.
    #[error("Barrier {barrier_id} also attached to segment {dropped}; kept segment {kept}")]
    Duplicate {
        /// Barrier with several rows.
        barrier_id: BarrierId,
        /// Segment kept.
        kept: SegmentId,
        /// Segment discarded.
        dropped: SegmentId,
    },
}

/// Validated barriers of one unit.
#[derive(Debug, Clone, Default)]
pub struct BarrierIndex {
    barriers: Vec<AttachedBarrier>,
    by_id: BTreeMap<BarrierId, usize>,
    by_segment: HashMap<SegmentIx, Vec<usize>>,
    rejected: Vec<AttachmentError>,
}

impl BarrierIndex {
    /// All attached barriers, ordered by barrier id.
    pub fn barriers(&self) -> &[AttachedBarrier] {
        &self.barriers
    }

    /// Look up a barrier.
    pub fn get(&self, barrier_id: BarrierId) -> Option<&AttachedBarrier> {
        self.by_id.get(&barrier_id).map(|&i| &self.barriers[i])
    }

    /// Barriers on a segment, most downstream first.
    pub fn on_segment(&self, ix: SegmentIx) -> impl Iterator<Item = &AttachedBarrier> + '_ {
        self.by_segment
            .get(&ix)
            .into_iter()
            .flatten()
            .map(move |&i| &self.barriers[i])
    }

    /// Attachment rows that were not used.
    pub fn rejected(&self) -> &[AttachmentError] {
        &self.rejected
    }

    /// Barriers whose segment is not in the network.
    pub fn unattached(&self) -> impl Iterator<Item = &UnattachedBarrierError> + '_ {
        self.rejected.iter().filter_map(|e| match e {
            AttachmentError::Unattached(u) => Some(u),
            AttachmentError::Duplicate { .. } => None,
        })
    }

    /// Number of attached barriers.
    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    /// Whether no barrier is attached.
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }
}

/// Validate attachments and build the per-segment barrier order.
pub fn attach_barriers(
    graph: &ResolvedGraph,
    attachments: &[BarrierAttachment],
    log: &mut DiagnosticLog,
) -> BarrierIndex {
    let mut rows: BTreeMap<BarrierId, Vec<&BarrierAttachment>> = BTreeMap::new();
    for attachment in attachments {
        rows.entry(attachment.barrier_id).or_default().push(attachment);
    }

    let mut index = BarrierIndex::default();

    for (barrier_id, mut candidates) in rows {
        // Lowest segment id among the rows whose segment is in the graph.
        candidates.sort_by_key(|a| a.segment_id);
        let chosen = candidates
            .iter()
            .position(|a| graph.segment_ix(a.segment_id).is_some())
            .unwrap_or(0);
        let attachment = candidates[chosen];

        for (i, dropped) in candidates.iter().enumerate() {
            if i == chosen {
                continue;
            }
            log.record(DataQualityEvent::DuplicateAttachment {
                barrier_id,
                kept: attachment.segment_id,
                dropped: dropped.segment_id,
            });
            index.rejected.push(AttachmentError::Duplicate {
                barrier_id,
                kept: attachment.segment_id,
                dropped: dropped.segment_id,
            });
        }

        let Some(ix) = graph.segment_ix(attachment.segment_id) else {
            log.record(DataQualityEvent::UnattachedBarrier {
                barrier_id,
                segment_id: attachment.segment_id,
            });
            index.rejected.push(
                UnattachedBarrierError {
                    barrier_id,
                    segment_id: attachment.segment_id,
                    kind: attachment.kind,
                }
                .into(),
            );
            continue;
        };

        let length = graph.segment(ix).length;
        let position = if attachment.position.is_finite() {
            attachment.position.clamp(0.0, length)
        } else {
            0.0
        };
        index.by_id.insert(attachment.barrier_id, index.barriers.len());
        index.by_segment.entry(ix).or_default().push(index.barriers.len());
        index.barriers.push(AttachedBarrier {
            barrier_id: attachment.barrier_id,
            segment_id: attachment.segment_id,
            segment: ix,
            position,
            ordinal: 0,
            kind: attachment.kind,
        });
    }

    let barriers = &mut index.barriers;
    for members in index.by_segment.values_mut() {
        members.sort_by(|&a, &b| {
            barriers[a]
                .position
                .total_cmp(&barriers[b].position)
                .then(barriers[a].barrier_id.cmp(&barriers[b].barrier_id))
        });
        for (ordinal, &i) in members.iter().enumerate() {
            barriers[i].ordinal = ordinal as u32;
        }
    }

    tracing::debug!(
        attached = index.barriers.len(),
        rejected = index.rejected.len(),
        "barriers attached"
    );
    index
}
