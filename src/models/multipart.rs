//! Multipart upload sessions and the part layout used to fill them.

use super::object::ObjectLocation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Size and count of the parts a session expects.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartLayout {
    /// Nominal part size in bytes. Only the last part may be shorter.
    pub part_size: u64,

    /// Number of parts, numbered `1..=total_parts`.
    pub total_parts: u32,
}

impl PartLayout {
    /// Layout for an object of `size` bytes split into `part_size` chunks.
    ///
    /// `total_parts = ceil(size / part_size)`; an exact multiple of `part_size`
    /// never produces a trailing empty part.
    pub fn for_size(size: u64, part_size: u64) -> Self {
        debug_assert!(part_size > 0, "part size must be positive");
        let total_parts = size.div_ceil(part_size);
        Self {
            part_size,
            total_parts: u32::try_from(total_parts).unwrap_or(u32::MAX),
        }
    }
}

/// One unit of work in a multipart transfer: a contiguous byte range of the source.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartRange {
    /// Part number (1-based).
    pub part_number: u32,

    /// Byte offset in the source object.
    pub offset: u64,

    /// Length in bytes (never zero).
    pub length: u64,
}

/// The ordered work queue of parts covering an object with no gap or overlap.
#[derive(Clone, Debug)]
pub struct PartPlan {
    layout: PartLayout,
    size: u64,
}

impl PartPlan {
    pub fn new(size: u64, part_size: u64) -> Self {
        Self {
            layout: PartLayout::for_size(size, part_size),
            size,
        }
    }

    pub fn layout(&self) -> PartLayout {
        self.layout
    }

    /// Iterate parts in ascending part-number order.
    pub fn parts(&self) -> impl Iterator<Item = PartRange> + Send + 'static {
        let PartLayout {
            part_size,
            total_parts,
        } = self.layout;
        let size = self.size;
        (1..=total_parts).map(move |part_number| {
            let offset = u64::from(part_number - 1) * part_size;
            PartRange {
                part_number,
                offset,
                length: part_size.min(size - offset),
            }
        })
    }
}

/// A part accepted by the destination store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompletedPart {
    /// Part number (1-based).
    pub part_number: u32,

    /// Checksum returned by the store for this part (ETag for S3/OSS).
    pub checksum: String,
}

/// A live multipart upload.
///
/// Owned exclusively by the orchestrator call that opened it, and always
/// completed or aborted before that call returns.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MultipartSession {
    /// Store-issued upload id.
    pub session_id: String,

    /// Object being assembled.
    pub destination: ObjectLocation,

    /// Nominal part size in bytes.
    pub part_size: u64,

    /// Number of parts required for completion.
    pub total_parts: u32,

    /// Parts accepted so far, kept sorted by part number.
    pub completed_parts: Vec<CompletedPart>,
}

impl MultipartSession {
    pub fn new(
        session_id: impl Into<String>,
        destination: ObjectLocation,
        layout: PartLayout,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            destination,
            part_size: layout.part_size,
            total_parts: layout.total_parts,
            completed_parts: Vec::new(),
        }
    }

    /// Record accepted parts; later entries for a part number replace earlier ones.
    pub fn record_parts(&mut self, parts: impl IntoIterator<Item = CompletedPart>) {
        for part in parts {
            match self
                .completed_parts
                .binary_search_by_key(&part.part_number, |p| p.part_number)
            {
                Ok(idx) => self.completed_parts[idx] = part,
                Err(idx) => self.completed_parts.insert(idx, part),
            }
        }
    }

    /// Part numbers in `1..=total_parts` that have not been recorded.
    pub fn missing_parts(&self) -> Vec<u32> {
        let present: BTreeSet<u32> = self.completed_parts.iter().map(|p| p.part_number).collect();
        (1..=self.total_parts)
            .filter(|n| !present.contains(n))
            .collect()
    }

    /// True when the full contiguous set `1..=total_parts` is present and nothing else.
    pub fn is_complete(&self) -> bool {
        self.total_parts > 0
            && self.completed_parts.len() == self.total_parts as usize
            && self.missing_parts().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::object::StoreKind;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn layout_rounds_up() {
        assert_eq!(PartLayout::for_size(205 * MIB, 20 * MIB).total_parts, 11);
        assert_eq!(PartLayout::for_size(100 * MIB + 1, 20 * MIB).total_parts, 6);
    }

    #[test]
    fn exact_multiple_has_no_trailing_empty_part() {
        let plan = PartPlan::new(120 * MIB, 20 * MIB);
        let parts: Vec<_> = plan.parts().collect();
        assert_eq!(parts.len(), 6);
        assert!(parts.iter().all(|p| p.length == 20 * MIB));
    }

    #[test]
    fn parts_cover_object_without_gap_or_overlap() {
        for size in [100 * MIB + 1, 101 * MIB, 205 * MIB, 240 * MIB, 1024 * MIB + 7] {
            let plan = PartPlan::new(size, 20 * MIB);
            let parts: Vec<_> = plan.parts().collect();
            assert_eq!(parts.len() as u32, plan.layout().total_parts);

            let mut expected_offset = 0;
            for (idx, part) in parts.iter().enumerate() {
                assert_eq!(part.part_number as usize, idx + 1);
                assert_eq!(part.offset, expected_offset);
                assert!(part.length > 0 && part.length <= 20 * MIB);
                expected_offset += part.length;
            }
            assert_eq!(expected_offset, size);
        }
    }

    #[test]
    fn scenario_b_layout() {
        let parts: Vec<_> = PartPlan::new(205 * MIB, 20 * MIB).parts().collect();
        assert_eq!(parts.len(), 11);
        assert_eq!(parts[10].length, 5 * MIB);
        assert_eq!(parts[10].offset, 200 * MIB);
    }

    #[test]
    fn session_tracks_missing_parts() {
        let dest = ObjectLocation::new(StoreKind::Oss, "b", "k", "cn-hangzhou");
        let mut session = MultipartSession::new("up-1", dest, PartLayout::for_size(50, 20));
        assert_eq!(session.missing_parts(), vec![1, 2, 3]);

        session.record_parts([
            CompletedPart { part_number: 3, checksum: "c".into() },
            CompletedPart { part_number: 1, checksum: "a".into() },
        ]);
        assert_eq!(session.missing_parts(), vec![2]);
        assert!(!session.is_complete());

        session.record_parts([CompletedPart { part_number: 2, checksum: "b".into() }]);
        assert!(session.is_complete());
        let numbers: Vec<_> = session.completed_parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
