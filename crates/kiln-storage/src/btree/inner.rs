//! Inner page IO.
//!
//! An inner page with `n` routing keys holds `n + 1` child links. Links and
//! keys interleave, so the right link of key `i` is the left link of key
//! `i + 1`:
//!
//! ```text
//! ITEMS_OFF
//! |
//! v
//! +--------+-------+--------+-------+--------+-----
//! | left_0 | key_0 | left_1 | key_1 | left_2 | ...
//! +--------+-------+--------+-------+--------+-----
//!          |<-- item 0 ---->|<-- item 1 ---->|
//!                  (key + right link)
//! ```
//!
//! An item is a key followed by its right link, which keeps every item the
//! same width. The single link in front of item 0 is what `cp_left` covers:
//! copying a range with `cp_left` also carries the link to the left of its
//! first key, which a split or merge needs and an in-page shift does not.

use super::constants::LINK_SIZE;
use super::io::{BPlusIo, ItemLayout, ITEMS_OFF};
use kiln_common::page::{read_u64, write_u64, IoVersions, PageId, PageIo, PageType, VersionedIo};
use kiln_common::{KilnError, Result};

/// Interpreter for B+ tree inner pages.
#[derive(Debug, Clone)]
pub struct BPlusInnerIo {
    page_io: PageIo,
    /// Key offsets: items start after the leftmost link.
    layout: ItemLayout,
    key_size: usize,
}

impl BPlusInnerIo {
    /// Current inner page format version.
    pub const VERSION: u16 = 1;

    /// Creates an inner IO for keys of `key_size` bytes, with the leftmost
    /// link at `items_off`.
    pub fn new(version: u16, key_size: usize, items_off: usize) -> Result<Self> {
        if key_size == 0 {
            return Err(KilnError::ConfigError("inner key size must be positive".to_string()));
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
            page_io: PageIo::new(PageType::BPlusInner, version),
            layout: ItemLayout::new(items_off + LINK_SIZE, key_size + LINK_SIZE),
            key_size,
        })
    }

    /// All supported inner versions for the given geometry.
    pub fn versions(key_size: usize, items_off: usize) -> Result<IoVersions<Self>> {
        IoVersions::new(vec![Self::new(Self::VERSION, key_size, items_off)?])
    }

    pub fn layout(&self) -> ItemLayout {
        self.layout
    }

    #[inline]
    fn left_offset(&self, idx: usize) -> usize {
        self.offset(idx) - LINK_SIZE
    }

    #[inline]
    fn right_offset(&self, idx: usize) -> usize {
        self.offset(idx) + self.key_size
    }

    /// Link to the left of key `idx`. `left(count)` is the rightmost child.
    #[inline]
    pub fn left(&self, buf: &[u8], idx: usize) -> PageId {
        PageId::from_u64(read_u64(buf, self.left_offset(idx)))
    }

    /// Link to the right of key `idx`.
    #[inline]
    pub fn right(&self, buf: &[u8], idx: usize) -> PageId {
        PageId::from_u64(read_u64(buf, self.right_offset(idx)))
    }

    pub fn set_left(&self, buf: &mut [u8], idx: usize, page_id: PageId) {
        write_u64(buf, self.left_offset(idx), page_id.as_u64());
    }

    pub fn set_right(&self, buf: &mut [u8], idx: usize, page_id: PageId) {
        write_u64(buf, self.right_offset(idx), page_id.as_u64());
    }

    /// Inserts `key` at `idx` with `right` as its right child. The left
    /// child of the new key is the link that was already at `left(idx)`.
    pub fn insert_with_right(
        &self,
        buf: &mut [u8],
        idx: usize,
        key: &[u8],
        right: PageId,
    ) -> Result<()> {
        self.insert(buf, idx, key)?;
        self.set_right(buf, idx, right);
        Ok(())
    }

    /// Initializes `buf` as a root with one key and two children.
    pub fn init_new_root(
        &self,
        buf: &mut [u8],
        left: PageId,
        key: &[u8],
        right: PageId,
    ) -> Result<()> {
        self.init_new_page(buf);
        self.set_left(buf, 0, left);
        self.store_item(buf, 0, key)?;
        self.set_right(buf, 0, right);
        self.set_count(buf, 1)
    }

    /// Byte span of `cnt` items from `idx`, widened by the left link when
    /// `cp_left` is set.
    #[inline]
    fn span(&self, idx: usize, cnt: usize, cp_left: bool) -> (usize, usize) {
        let len = cnt * self.layout.stride();
        if cp_left {
            (self.left_offset(idx), len + LINK_SIZE)
        } else {
            (self.offset(idx), len)
        }
    }
}

impl VersionedIo for BPlusInnerIo {
    fn page_io(&self) -> PageIo {
        self.page_io
    }
}

impl BPlusIo for BPlusInnerIo {
    fn is_leaf(&self) -> bool {
        false
    }

    fn item_size(&self) -> usize {
        self.key_size
    }

    fn max_count(&self, buf: &[u8]) -> usize {
        // The trailing right link of the last key is part of its item, so
        // only the leftmost link sits outside the item array.
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
        cp_left: bool,
    ) {
        let (src_off, len) = self.span(src_idx, cnt, cp_left);
        let (dst_off, _) = self.span(dst_idx, cnt, cp_left);
        dst[dst_off..dst_off + len].copy_from_slice(&src[src_off..src_off + len]);
    }

    fn move_items(
        &self,
        buf: &mut [u8],
        src_idx: usize,
        dst_idx: usize,
        cnt: usize,
        cp_left: bool,
    ) -> Result<()> {
        if src_idx == dst_idx {
            return Err(KilnError::AliasingViolation { index: src_idx });
        }
        let (src_off, len) = self.span(src_idx, cnt, cp_left);
        let (dst_off, _) = self.span(dst_idx, cnt, cp_left);
        buf.copy_within(src_off..src_off + len, dst_off);
        Ok(())
    }
}
