//! Item layout contract shared by leaf and inner B+ tree pages.
//!
//! Both page kinds carry the same items header after the common page prefix:
//!
//! ```text
//! +------------------+ 0
//! | page_type: u16   |
//! | version: u16     |
//! +------------------+ 4 (CNT_OFF)
//! | count: u16       |
//! | reserved: u16    |
//! +------------------+ 8 (FORWARD_OFF)
//! | forward: u64     |  right sibling on the same level, 0 = none
//! +------------------+ 16 (REMOVE_ID_OFF)
//! | remove_id: u64   |
//! +------------------+ 24 (ITEMS_OFF)
//! | items ...        |  count * stride bytes, packed
//! +------------------+
//! ```
//!
//! The primitives here ([`BPlusIo::offset`], [`BPlusIo::copy_items`],
//! [`BPlusIo::move_items`]) do not validate indices against the live count.
//! The `*_checked` wrappers and the page-level operations built on them do,
//! and are what the tree calls.

use kiln_common::page::{read_u16, read_u64, write_u16, write_u64, PageId, PageIo, VersionedIo};
use kiln_common::{KilnError, Result};
use std::fmt::Debug;

/// Offset of the live item count.
pub const CNT_OFF: usize = PageIo::COMMON_HEADER_END;

/// Offset of the forward (right sibling) link.
pub const FORWARD_OFF: usize = CNT_OFF + 4;

/// Offset of the remove id.
pub const REMOVE_ID_OFF: usize = FORWARD_OFF + 8;

/// End of the items header; default start of the item array.
pub const ITEMS_OFF: usize = REMOVE_ID_OFF + 8;

/// Position and spacing of an item array within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLayout {
    items_off: usize,
    stride: usize,
}

impl ItemLayout {
    pub const fn new(items_off: usize, stride: usize) -> Self {
        Self { items_off, stride }
    }

    pub fn items_off(&self) -> usize {
        self.items_off
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Byte offset of item `idx`. Unchecked.
    #[inline(always)]
    pub fn offset(&self, idx: usize) -> usize {
        self.items_off + idx * self.stride
    }

    /// Number of whole items that fit after `items_off` in `capacity` bytes,
    /// capped at what the u16 count field can hold.
    #[inline]
    pub fn max_count(&self, capacity: usize) -> usize {
        (capacity.saturating_sub(self.items_off) / self.stride).min(u16::MAX as usize)
    }
}

/// Operations every B+ tree page kind provides.
///
/// The tree drives search, insert, split and merge purely through this trait;
/// it never decodes an item beyond comparing its leading key bytes.
pub trait BPlusIo: VersionedIo + Debug + Send + Sync {
    /// True for leaf pages.
    fn is_leaf(&self) -> bool;

    /// Width of one item's payload in bytes.
    fn item_size(&self) -> usize;

    /// Number of items that fit in `buf`. Depends only on the buffer length
    /// and this IO's geometry.
    fn max_count(&self, buf: &[u8]) -> usize;

    /// Byte offset of the payload of item `idx`. Unchecked.
    fn offset(&self, idx: usize) -> usize;

    /// Copies `cnt` items from `src[src_idx..]` to `dst[dst_idx..]`.
    ///
    /// `cp_left` asks variants whose items carry a leading link (inner pages)
    /// to also copy the link to the left of the first item. Unchecked.
    fn copy_items(
        &self,
        src: &[u8],
        dst: &mut [u8],
        src_idx: usize,
        dst_idx: usize,
        cnt: usize,
        cp_left: bool,
    );

    /// Moves `cnt` items within one page. Overlapping ranges are handled.
    /// Moving a range onto itself is an [`KilnError::AliasingViolation`].
    fn move_items(
        &self,
        buf: &mut [u8],
        src_idx: usize,
        dst_idx: usize,
        cnt: usize,
        cp_left: bool,
    ) -> Result<()>;

    /// Writes the common header and an empty items header.
    fn init_new_page(&self, buf: &mut [u8]) {
        self.page_io().init_new_page(buf);
        buf[CNT_OFF..ITEMS_OFF].fill(0);
    }

    /// Fails unless `buf` was written by this IO's type and version.
    fn check(&self, buf: &[u8]) -> Result<()> {
        self.page_io().check(buf)
    }

    #[inline]
    fn count(&self, buf: &[u8]) -> usize {
        read_u16(buf, CNT_OFF) as usize
    }

    /// Sets the live item count. Never clamps or truncates.
    fn set_count(&self, buf: &mut [u8], count: usize) -> Result<()> {
        let max = self.max_count(buf);
        let stored = u16::try_from(count)
            .ok()
            .filter(|_| count <= max)
            .ok_or(KilnError::CapacityInvariant {
                requested: count,
                max,
            })?;
        write_u16(buf, CNT_OFF, stored);
        Ok(())
    }

    fn forward(&self, buf: &[u8]) -> Option<PageId> {
        PageId::from_link(read_u64(buf, FORWARD_OFF))
    }

    fn set_forward(&self, buf: &mut [u8], forward: Option<PageId>) {
        write_u64(buf, FORWARD_OFF, PageId::to_link(forward));
    }

    fn remove_id(&self, buf: &[u8]) -> u64 {
        read_u64(buf, REMOVE_ID_OFF)
    }

    fn set_remove_id(&self, buf: &mut [u8], remove_id: u64) {
        write_u64(buf, REMOVE_ID_OFF, remove_id);
    }

    /// Payload bytes of item `idx`.
    #[inline]
    fn item<'a>(&self, buf: &'a [u8], idx: usize) -> &'a [u8] {
        let off = self.offset(idx);
        &buf[off..off + self.item_size()]
    }

    #[inline]
    fn item_mut<'a>(&self, buf: &'a mut [u8], idx: usize) -> &'a mut [u8] {
        let off = self.offset(idx);
        let size = self.item_size();
        &mut buf[off..off + size]
    }

    /// Writes the payload of item `idx` without touching the count.
    fn store_item(&self, buf: &mut [u8], idx: usize, item: &[u8]) -> Result<()> {
        let max = self.max_count(buf);
        if idx >= max {
            return Err(KilnError::IndexOutOfBounds {
                index: idx,
                count: max,
            });
        }
        if item.len() != self.item_size() {
            return Err(KilnError::Internal(format!(
                "item of {} bytes stored in {}-byte slot",
                item.len(),
                self.item_size()
            )));
        }
        self.item_mut(buf, idx).copy_from_slice(item);
        Ok(())
    }

    /// [`BPlusIo::copy_items`] after checking the source range is live and
    /// the destination range fits.
    fn copy_items_checked(
        &self,
        src: &[u8],
        dst: &mut [u8],
        src_idx: usize,
        dst_idx: usize,
        cnt: usize,
        cp_left: bool,
    ) -> Result<()> {
        check_range(src_idx, cnt, self.count(src))?;
        check_range(dst_idx, cnt, self.max_count(dst))?;
        self.copy_items(src, dst, src_idx, dst_idx, cnt, cp_left);
        Ok(())
    }

    /// [`BPlusIo::move_items`] after the same checks as
    /// [`BPlusIo::copy_items_checked`].
    fn move_items_checked(
        &self,
        buf: &mut [u8],
        src_idx: usize,
        dst_idx: usize,
        cnt: usize,
        cp_left: bool,
    ) -> Result<()> {
        check_range(src_idx, cnt, self.count(buf))?;
        check_range(dst_idx, cnt, self.max_count(buf))?;
        self.move_items(buf, src_idx, dst_idx, cnt, cp_left)
    }

    /// Inserts `item` at `idx`, shifting `[idx..count)` one slot right.
    fn insert(&self, buf: &mut [u8], idx: usize, item: &[u8]) -> Result<()> {
        let cnt = self.count(buf);
        if idx > cnt {
            return Err(KilnError::IndexOutOfBounds {
                index: idx,
                count: cnt,
            });
        }
        let max = self.max_count(buf);
        if cnt >= max {
            return Err(KilnError::CapacityInvariant {
                requested: cnt + 1,
                max,
            });
        }

        if idx < cnt {
            self.move_items_checked(buf, idx, idx + 1, cnt - idx, false)?;
        }
        self.store_item(buf, idx, item)?;
        self.set_count(buf, cnt + 1)
    }

    /// Removes item `idx`, shifting `[idx + 1..count)` one slot left.
    fn remove(&self, buf: &mut [u8], idx: usize) -> Result<()> {
        let cnt = self.count(buf);
        if idx >= cnt {
            return Err(KilnError::IndexOutOfBounds {
                index: idx,
                count: cnt,
            });
        }

        if idx + 1 < cnt {
            self.move_items_checked(buf, idx + 1, idx, cnt - idx - 1, false)?;
        }
        self.set_count(buf, cnt - 1)
    }

    /// Fills a freshly initialized `fwd_buf` with items `[mid..count)` of
    /// `buf` and hands it `buf`'s forward link and remove id. `buf` itself is
    /// left untouched; finish with [`BPlusIo::split_existing_page`].
    fn split_forward_page(&self, buf: &[u8], fwd_buf: &mut [u8], mid: usize) -> Result<()> {
        let cnt = self.count(buf);
        if mid > cnt {
            return Err(KilnError::IndexOutOfBounds {
                index: mid,
                count: cnt,
            });
        }

        let fwd_cnt = cnt - mid;
        self.copy_items_checked(buf, fwd_buf, mid, 0, fwd_cnt, true)?;
        self.set_count(fwd_buf, fwd_cnt)?;
        self.set_forward(fwd_buf, self.forward(buf));
        self.set_remove_id(fwd_buf, self.remove_id(buf));
        Ok(())
    }

    /// Truncates `buf` to its first `mid` items and links it to `fwd_id`.
    fn split_existing_page(&self, buf: &mut [u8], mid: usize, fwd_id: PageId) -> Result<()> {
        let cnt = self.count(buf);
        if mid > cnt {
            return Err(KilnError::IndexOutOfBounds {
                index: mid,
                count: cnt,
            });
        }
        self.set_count(buf, mid)?;
        self.set_forward(buf, Some(fwd_id));
        Ok(())
    }

    /// Appends every item of `right` to `left`.
    ///
    /// Inner pages pull the parent's separator down between the two halves,
    /// so `separator` is required for them and ignored for leaves. Returns
    /// false, leaving both pages untouched, if the result would not fit.
    fn merge(&self, left: &mut [u8], right: &[u8], separator: Option<&[u8]>) -> Result<bool> {
        let separator = if self.is_leaf() {
            None
        } else {
            Some(separator.ok_or_else(|| {
                KilnError::Internal("inner merge without separator".to_string())
            })?)
        };

        let left_cnt = self.count(left);
        let right_cnt = self.count(right);
        let new_cnt = left_cnt + right_cnt + usize::from(separator.is_some());
        if new_cnt > self.max_count(left) {
            return Ok(false);
        }

        let mut dst_idx = left_cnt;
        if let Some(key) = separator {
            self.store_item(left, dst_idx, key)?;
            dst_idx += 1;
        }
        self.copy_items_checked(right, left, 0, dst_idx, right_cnt, separator.is_some())?;
        self.set_count(left, new_cnt)?;

        self.set_forward(left, self.forward(right));
        let right_remove_id = self.remove_id(right);
        if right_remove_id > self.remove_id(left) {
            self.set_remove_id(left, right_remove_id);
        }
        Ok(true)
    }
}

/// Fails unless `[start..start + cnt)` lies within `[0..limit)`.
#[inline]
fn check_range(start: usize, cnt: usize, limit: usize) -> Result<()> {
    let end = start.checked_add(cnt).ok_or(KilnError::IndexOutOfBounds {
        index: start,
        count: limit,
    })?;
    if end > limit {
        return Err(KilnError::IndexOutOfBounds {
            index: end,
            count: limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_offsets() {
        assert_eq!(CNT_OFF, 4);
        assert_eq!(FORWARD_OFF, 8);
        assert_eq!(REMOVE_ID_OFF, 16);
        assert_eq!(ITEMS_OFF, 24);
        assert_eq!(ITEMS_OFF, kiln_common::config::MIN_ITEMS_OFFSET);
    }

    #[test]
    fn test_item_layout_offsets() {
        let layout = ItemLayout::new(24, 40);
        assert_eq!(layout.offset(0), 24);
        assert_eq!(layout.offset(1), 64);
        assert_eq!(layout.offset(100), 24 + 4000);
    }

    #[test]
    fn test_item_layout_max_count() {
        let layout = ItemLayout::new(24, 40);
        assert_eq!(layout.max_count(4096), 101);
        assert_eq!(layout.max_count(24), 0);
        assert_eq!(layout.max_count(10), 0);
        // Capped at the width of the count field.
        assert_eq!(ItemLayout::new(24, 1).max_count(70_000), u16::MAX as usize);
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 0, 0).is_ok());
        assert!(check_range(2, 3, 5).is_ok());
        assert!(matches!(
            check_range(2, 4, 5),
            Err(KilnError::IndexOutOfBounds { index: 6, count: 5 })
        ));
        assert!(check_range(usize::MAX, 2, 5).is_err());
    }
}
