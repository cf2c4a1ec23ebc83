//! Object picking: identifier ranges handed out while rendering a picking
//! frame, and their decoding.

/// A contiguous identifier range registered by one draw.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PickRecord {
    /// Object the identifiers belong to, as set by
    /// [`PickingRecords::begin_pick_object`].
    pub owner: Option<u64>,
    pub base_id: u32,
    pub count: u32,
}

/// The result of looking up a picked identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PickHit {
    pub owner: Option<u64>,
    /// Index of the sub-object within the range of its draw.
    pub sub_object: u32,
}

/// Sequentially allocated picking identifier ranges of one frame.
///
/// Identifier 0 is the cleared background, so allocation starts at 1 and
/// every range directly follows the previous one.
#[derive(Clone, Debug)]
pub struct PickingRecords {
    records: Vec<PickRecord>,
    next_id: u32,
    current_owner: Option<u64>,
}

impl Default for PickingRecords {
    fn default() -> Self {
        PickingRecords {
            records: Vec::new(),
            next_id: 1,
            current_owner: None,
        }
    }
}

impl PickingRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all ranges; the next allocation starts at 1 again.
    pub fn reset(&mut self) {
        self.records.clear();
        self.next_id = 1;
        self.current_owner = None;
    }

    /// Makes `owner` the object subsequent ranges are recorded for.
    pub fn begin_pick_object(&mut self, owner: u64) {
        self.current_owner = Some(owner);
    }

    pub fn end_pick_object(&mut self) {
        self.current_owner = None;
    }

    /// Allocates `count` consecutive identifiers and returns the first one.
    pub fn register_sub_object_ids(&mut self, count: u32) -> u32 {
        let base_id = self.next_id;
        self.records.push(PickRecord {
            owner: self.current_owner,
            base_id,
            count,
        });
        self.next_id = self.next_id.saturating_add(count);
        base_id
    }

    /// All ranges registered so far, in allocation order.
    pub fn records(&self) -> &[PickRecord] {
        &self.records
    }

    /// Finds the range containing `id`: the last one whose base is not
    /// greater than `id`. Identifier 0 never hits.
    pub fn object_at(&self, id: u32) -> Option<PickHit> {
        if id == 0 {
            return None;
        }
        let idx = self.records.partition_point(|r| r.base_id <= id);
        let record = self.records.get(idx.checked_sub(1)?)?;
        let sub_object = id - record.base_id;
        if sub_object >= record.count {
            return None;
        }
        Some(PickHit {
            owner: record.owner,
            sub_object,
        })
    }
}

/// Decodes the identifier stored in an RGBA8 picking pixel.
#[inline]
pub fn decode_pick_id(rgba: [u8; 4]) -> u32 {
    rgba[0] as u32 | (rgba[1] as u32) << 8 | (rgba[2] as u32) << 16 | (rgba[3] as u32) << 24
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_contiguous_from_one() {
        let mut records = PickingRecords::new();
        records.begin_pick_object(7);
        assert_eq!(records.register_sub_object_ids(10), 1);
        assert_eq!(records.register_sub_object_ids(5), 11);
        records.end_pick_object();
        records.begin_pick_object(8);
        assert_eq!(records.register_sub_object_ids(3), 16);

        assert_eq!(records.object_at(0), None);
        for id in 1..=10 {
            let hit = records.object_at(id).unwrap();
            assert_eq!(hit.owner, Some(7));
            assert_eq!(hit.sub_object, id - 1);
        }
        assert_eq!(records.object_at(11).unwrap().sub_object, 0);
        assert_eq!(records.object_at(18).unwrap().owner, Some(8));
        assert_eq!(records.object_at(19), None);
    }

    #[test]
    fn reset_restarts_allocation() {
        let mut records = PickingRecords::new();
        records.register_sub_object_ids(4);
        records.reset();
        assert!(records.records().is_empty());
        assert_eq!(records.register_sub_object_ids(1), 1);
    }

    #[test]
    fn pixel_decoding_is_little_endian() {
        assert_eq!(decode_pick_id([1, 0, 0, 0]), 1);
        assert_eq!(decode_pick_id([0x34, 0x12, 0, 0]), 0x1234);
        assert_eq!(decode_pick_id([0, 0, 0, 1]), 1 << 24);
    }
}
