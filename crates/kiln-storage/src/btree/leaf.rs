//! Leaf page IO.
//!
//! Leaf items are opaque fixed-width rows (key bytes followed by value
//! bytes). This layer never looks inside them, so copying a range of items is
//! a single contiguous memory move.

use super::io::{BPlusIo, ItemLayout, ITEMS_OFF};
use kiln_common::page::{IoVersions, PageIo, PageType, VersionedIo};
use kiln_common::{KilnError, Result};

/// Interpreter for B+ tree leaf pages.
#[derive(Debug, Clone)]
pub struct BPlusLeafIo {
    page_io: PageIo,
    layout: ItemLayout,
}

impl BPlusLeafIo {
    /// Current leaf page format version.
    pub const VERSION: u16 = 1;

    /// Creates a leaf IO for rows of `item_size` bytes starting at `items_off`.
    pub fn new(version: u16, item_size: usize, items_off: usize) -> Result<Self> {
        if item_size == 0 {
            return Err(KilnError::ConfigError("leaf item size must be positive".to_string()));
        }
        if version == 0 {
            return Err(KilnError::InvalidParameter {
                name: "version".to_string(),
                value: version.to_string(),
            });
        }
        if items_off < ITEMS_OFF {
            return Err(KilnError::InvalidParameter {
                name: "items_offset".to_string(),
                value: items_off.to_string(),
            });
        }
        Ok(Self {
            page_io: PageIo::new(PageType::BPlusLeaf, version),
            layout: ItemLayout::new(items_off, item_size),
        })
    }

    /// All supported leaf versions for the given geometry.
    pub fn versions(item_size: usize, items_off: usize) -> Result<IoVersions<Self>> {
        IoVersions::new(vec![Self::new(Self::VERSION, item_size, items_off)?])
    }

    pub fn layout(&self) -> ItemLayout {
        self.layout
    }
}

impl VersionedIo for BPlusLeafIo {
    fn page_io(&self) -> PageIo {
        self.page_io
    }
}

impl BPlusIo for BPlusLeafIo {
    fn is_leaf(&self) -> bool {
        true
    }

    fn item_size(&self) -> usize {
        self.layout.stride()
    }

    fn max_count(&self, buf: &[u8]) -> usize {
        self.layout.max_count(buf.len())
    }

    #[inline]
    fn offset(&self, idx: usize) -> usize {
        self.layout.offset(idx)
    }

    fn copy_items(
        &self,
        src: &[u8],
        dst: &mut [u8],
        src_idx: usize,
        dst_idx: usize,
        cnt: usize,
        _cp_left: bool,
    ) {
        let len = cnt * self.item_size();
        let src_off = self.offset(src_idx);
        let dst_off = self.offset(dst_idx);
        dst[dst_off..dst_off + len].copy_from_slice(&src[src_off..src_off + len]);
    }

    fn move_items(
        &self,
        buf: &mut [u8],
        src_idx: usize,
        dst_idx: usize,
        cnt: usize,
        _cp_left: bool,
    ) -> Result<()> {
        if src_idx == dst_idx {
            return Err(KilnError::AliasingViolation { index: src_idx });
        }
        let len = cnt * self.item_size();
        let src_off = self.offset(src_idx);
        buf.copy_within(src_off..src_off + len, self.offset(dst_idx));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    const PAGE: usize = 4096;

    fn leaf(item_size: usize) -> BPlusLeafIo {
        BPlusLeafIo::new(BPlusLeafIo::VERSION, item_size, ITEMS_OFF).unwrap()
    }

    fn new_page(io: &BPlusLeafIo) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE];
        io.init_new_page(&mut buf);
        buf
    }

    /// Item whose every byte encodes its tag, so corruption is visible.
    fn row(io: &BPlusLeafIo, tag: u8) -> Vec<u8> {
        (0..io.item_size()).map(|i| tag.wrapping_add(i as u8)).collect()
    }

    fn fill(io: &BPlusLeafIo, buf: &mut [u8], n: usize) {
        for i in 0..n {
            io.store_item(buf, i, &row(io, i as u8)).unwrap();
        }
        io.set_count(buf, n).unwrap();
    }

    #[test]
    fn test_new_page_is_empty() {
        let io = leaf(40);
        let buf = new_page(&io);
        assert!(io.check(&buf).is_ok());
        assert_eq!(io.count(&buf), 0);
        assert_eq!(io.forward(&buf), None);
        assert_eq!(io.remove_id(&buf), 0);
        assert!(io.is_leaf());
    }

    #[test]
    fn test_max_count_formula() {
        let io = leaf(40);
        let buf = new_page(&io);
        assert_eq!(io.max_count(&buf), 101);
        // Stable across calls and independent of the count.
        assert_eq!(io.max_count(&buf), 101);

        for (capacity, size) in [(4096, 16), (8192, 40), (512, 7), (1000, 1)] {
            let io = leaf(size);
            let mut buf = vec![0u8; capacity];
            io.init_new_page(&mut buf);
            let expected = (capacity - ITEMS_OFF) / size;
            assert_eq!(io.max_count(&buf), expected);
            io.set_count(&mut buf, expected / 2).unwrap();
            assert_eq!(io.max_count(&buf), expected);
        }
    }

    #[test]
    fn test_max_count_honors_items_offset() {
        let io = BPlusLeafIo::new(BPlusLeafIo::VERSION, 40, 64).unwrap();
        let buf = vec![0u8; PAGE];
        assert_eq!(io.max_count(&buf), (PAGE - 64) / 40);
        assert_eq!(io.offset(0), 64);
    }

    #[test]
    fn test_offset_strictly_increasing() {
        let io = leaf(40);
        let mut prev = None;
        for idx in 0..200 {
            let off = io.offset(idx);
            assert_eq!(off, ITEMS_OFF + idx * 40);
            if let Some(p) = prev {
                assert!(off > p);
            }
            prev = Some(off);
        }
    }

    #[test]
    fn test_set_count_roundtrip_and_overflow() {
        let io = leaf(40);
        let mut buf = new_page(&io);
        let max = io.max_count(&buf);

        for n in 0..=max {
            io.set_count(&mut buf, n).unwrap();
            assert_eq!(io.count(&buf), n);
        }

        let err = io.set_count(&mut buf, max + 1).unwrap_err();
        assert!(matches!(
            err,
            KilnError::CapacityInvariant {
                requested: 102,
                max: 101
            }
        ));
        assert!(err.is_layout_violation());
        // Failed call did not clamp or truncate.
        assert_eq!(io.count(&buf), max);
    }

    #[test]
    fn test_set_count_on_oversized_buffer_never_wraps() {
        let io = leaf(1);
        let mut buf = vec![0u8; 70_000];
        io.init_new_page(&mut buf);
        assert_eq!(io.max_count(&buf), u16::MAX as usize);

        io.set_count(&mut buf, 464).unwrap();
        let err = io.set_count(&mut buf, 66_000).unwrap_err();
        assert!(matches!(
            err,
            KilnError::CapacityInvariant {
                requested: 66_000,
                ..
            }
        ));
        assert_eq!(io.count(&buf), 464);

        io.set_count(&mut buf, u16::MAX as usize).unwrap();
        assert_eq!(io.count(&buf), u16::MAX as usize);
    }

    #[test]
    fn test_write_then_read_items() {
        let io = leaf(40);
        let max = io.max_count(&new_page(&io));

        for n in [0, 1, 2, 50, max] {
            let mut buf = new_page(&io);
            fill(&io, &mut buf, n);
            assert_eq!(io.count(&buf), n);
            for i in 0..n {
                assert_eq!(io.item(&buf, i), &row(&io, i as u8)[..]);
            }
        }
    }

    #[test]
    fn test_insert_until_full() {
        let io = leaf(40);
        let mut buf = new_page(&io);

        for i in 0..101 {
            io.insert(&mut buf, i, &row(&io, i as u8)).unwrap();
        }
        assert_eq!(io.count(&buf), 101);

        let err = io.insert(&mut buf, 101, &row(&io, 0)).unwrap_err();
        assert!(matches!(err, KilnError::CapacityInvariant { requested: 102, max: 101 }));
        assert_eq!(io.count(&buf), 101);
    }

    #[test]
    fn test_insert_shifts_right() {
        let io = leaf(8);
        let mut buf = new_page(&io);
        fill(&io, &mut buf, 4);

        io.insert(&mut buf, 1, &row(&io, 100)).unwrap();
        let tags: Vec<u8> = (0..5).map(|i| io.item(&buf, i)[0]).collect();
        assert_eq!(tags, vec![0, 100, 1, 2, 3]);
    }

    #[test]
    fn test_insert_past_count_fails() {
        let io = leaf(8);
        let mut buf = new_page(&io);
        fill(&io, &mut buf, 2);
        assert!(matches!(
            io.insert(&mut buf, 3, &row(&io, 9)),
            Err(KilnError::IndexOutOfBounds { index: 3, count: 2 })
        ));
    }

    #[test]
    fn test_remove_shifts_left() {
        let io = leaf(8);
        let mut buf = new_page(&io);
        fill(&io, &mut buf, 5);

        io.remove(&mut buf, 1).unwrap();
        io.remove(&mut buf, 3).unwrap();
        let tags: Vec<u8> = (0..io.count(&buf)).map(|i| io.item(&buf, i)[0]).collect();
        assert_eq!(tags, vec![0, 2, 3]);

        assert!(io.remove(&mut buf, 3).is_err());
    }

    #[test]
    fn test_move_items_overlap_matches_reference() {
        let io = leaf(12);
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let mut buf = new_page(&io);
            let max = io.max_count(&buf);
            let n = rng.gen_range(2..=max);
            fill(&io, &mut buf, n);

            let src_idx = rng.gen_range(0..n);
            let cnt = rng.gen_range(1..=n - src_idx);
            if cnt == max {
                continue;
            }
            let dst_idx = loop {
                let d = rng.gen_range(0..=max - cnt);
                if d != src_idx {
                    break d;
                }
            };

            // Naive reference: snapshot the source range, then write it out.
            let mut expected = buf.clone();
            let snapshot: Vec<Vec<u8>> =
                (0..cnt).map(|i| io.item(&buf, src_idx + i).to_vec()).collect();
            for (i, item) in snapshot.iter().enumerate() {
                io.item_mut(&mut expected, dst_idx + i).copy_from_slice(item);
            }

            io.move_items_checked(&mut buf, src_idx, dst_idx, cnt, false).unwrap();
            assert_eq!(buf, expected, "src {} dst {} cnt {}", src_idx, dst_idx, cnt);
        }
    }

    #[test]
    fn test_shift_right_by_one() {
        let io = leaf(40);
        for k in 0..6 {
            let n = 6;
            let mut buf = new_page(&io);
            fill(&io, &mut buf, n);

            io.move_items(&mut buf, k, k + 1, n - k, false).unwrap();
            for i in 0..k {
                assert_eq!(io.item(&buf, i), &row(&io, i as u8)[..]);
            }
            for i in k..n {
                assert_eq!(io.item(&buf, i + 1), &row(&io, i as u8)[..]);
            }
        }
    }

    #[test]
    fn test_move_onto_itself_fails() {
        let io = leaf(8);
        let mut buf = new_page(&io);
        fill(&io, &mut buf, 3);
        let err = io.move_items(&mut buf, 1, 1, 2, false).unwrap_err();
        assert!(matches!(err, KilnError::AliasingViolation { index: 1 }));
        assert!(err.is_layout_violation());
    }

    #[test]
    fn test_checked_copy_rejects_dead_source() {
        let io = leaf(8);
        let mut src = new_page(&io);
        let mut dst = new_page(&io);
        fill(&io, &mut src, 3);

        assert!(io.copy_items_checked(&src, &mut dst, 1, 0, 3, false).is_err());
        assert!(io.copy_items_checked(&src, &mut dst, 1, 0, 2, false).is_ok());

        let max = io.max_count(&dst);
        assert!(io.copy_items_checked(&src, &mut dst, 0, max - 1, 2, false).is_err());
    }

    #[test]
    fn test_split_at_midpoint() {
        let io = leaf(40);
        let mut a = new_page(&io);
        let mut b = new_page(&io);
        fill(&io, &mut a, 4);
        io.set_remove_id(&mut a, 17);

        let b_id = kiln_common::PageId::new(0, 9);
        io.split_forward_page(&a, &mut b, 2).unwrap();
        io.split_existing_page(&mut a, 2, b_id).unwrap();

        assert_eq!(io.count(&a), 2);
        assert_eq!(io.count(&b), 2);
        assert_eq!(io.item(&a, 0), &row(&io, 0)[..]);
        assert_eq!(io.item(&a, 1), &row(&io, 1)[..]);
        assert_eq!(io.item(&b, 0), &row(&io, 2)[..]);
        assert_eq!(io.item(&b, 1), &row(&io, 3)[..]);

        assert_eq!(io.forward(&a), Some(b_id));
        assert_eq!(io.forward(&b), None);
        assert_eq!(io.remove_id(&b), 17);
    }

    #[test]
    fn test_merge_appends_right() {
        let io = leaf(8);
        let mut left = new_page(&io);
        let mut right = new_page(&io);
        fill(&io, &mut left, 2);
        for i in 0..3 {
            io.store_item(&mut right, i, &row(&io, 10 + i as u8)).unwrap();
        }
        io.set_count(&mut right, 3).unwrap();
        let next = kiln_common::PageId::new(0, 5);
        io.set_forward(&mut right, Some(next));
        io.set_remove_id(&mut right, 4);
        io.set_remove_id(&mut left, 2);

        assert!(io.merge(&mut left, &right, None).unwrap());
        let tags: Vec<u8> = (0..io.count(&left)).map(|i| io.item(&left, i)[0]).collect();
        assert_eq!(tags, vec![0, 1, 10, 11, 12]);
        assert_eq!(io.forward(&left), Some(next));
        assert_eq!(io.remove_id(&left), 4);
    }

    #[test]
    fn test_merge_that_does_not_fit() {
        let io = leaf(40);
        let mut left = new_page(&io);
        let mut right = new_page(&io);
        fill(&io, &mut left, 60);
        fill(&io, &mut right, 60);

        assert!(!io.merge(&mut left, &right, None).unwrap());
        assert_eq!(io.count(&left), 60);
    }

    #[test]
    fn test_versions_registry() {
        let versions = BPlusLeafIo::versions(40, ITEMS_OFF).unwrap();
        let mut buf = vec![0u8; PAGE];
        versions.latest().init_new_page(&mut buf);
        assert_eq!(versions.for_page(&buf).unwrap().item_size(), 40);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(BPlusLeafIo::new(1, 0, ITEMS_OFF).is_err());
        assert!(BPlusLeafIo::new(1, 8, ITEMS_OFF - 1).is_err());
        assert!(BPlusLeafIo::new(0, 8, ITEMS_OFF).is_err());
    }
}
