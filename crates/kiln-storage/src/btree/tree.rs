//! Page-based B+ tree over fixed-width keys and values.
//!
//! Keys compare as unsigned bytes. A separator in an inner page is the
//! largest key of the subtree to its left, so a search for `k` follows
//! `left(i)` where `i` is the first separator `>= k`.
//!
//! Writers hold the tree latch exclusively and readers share it. Page latches
//! are taken top-down and, among siblings, left to right; a child latch is
//! always released before its parent is latched again.

use super::constants::{MAX_HEIGHT, MIN_ITEMS_PER_PAGE};
use super::inner::BPlusInnerIo;
use super::io::BPlusIo;
use super::leaf::BPlusLeafIo;
use super::meta::BPlusMetaIo;
use crate::store::PageStore;
use crate::wal::{PageOpLog, PageOperation};
use bytes::Bytes;
use kiln_common::config::IndexConfig;
use kiln_common::page::{IoVersions, PageId};
use kiln_common::{KilnError, Result};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Descent path: every inner page visited and the child index taken.
type Path = Vec<(PageId, usize)>;

#[derive(Debug, Clone, Copy)]
struct TreeState {
    root: PageId,
    /// Number of levels; 1 while the root is a leaf.
    height: u16,
    len: u64,
    /// Last remove id handed out.
    remove_seq: u64,
}

pub struct BPlusTree {
    store: Arc<dyn PageStore>,
    log: Arc<dyn PageOpLog>,
    config: IndexConfig,
    meta_page_id: PageId,
    meta_ios: IoVersions<BPlusMetaIo>,
    leaf_ios: IoVersions<BPlusLeafIo>,
    inner_ios: IoVersions<BPlusInnerIo>,
    state: RwLock<TreeState>,
}

impl BPlusTree {
    /// Creates an empty tree: a meta page and an empty root leaf.
    pub fn create(
        store: Arc<dyn PageStore>,
        log: Arc<dyn PageOpLog>,
        config: IndexConfig,
    ) -> Result<Self> {
        let (leaf_ios, inner_ios) = Self::page_ios(&config, store.page_size())?;
        let meta_ios = BPlusMetaIo::versions()?;

        let meta_page_id = store.allocate_page()?;
        let root = store.allocate_page()?;
        log.log_page_operation(&PageOperation::CreateTree {
            meta: meta_page_id,
            root,
        })?;

        {
            let handle = store.acquire(root)?;
            leaf_ios.latest().init_new_page(&mut handle.write());
        }
        {
            let handle = store.acquire(meta_page_id)?;
            meta_ios
                .latest()
                .init_new_page(&mut handle.write(), &config, root);
        }
        debug!(meta = %meta_page_id, root = %root, "created B+ tree");

        Ok(Self {
            store,
            log,
            config,
            meta_page_id,
            meta_ios,
            leaf_ios,
            inner_ios,
            state: RwLock::new(TreeState {
                root,
                height: 1,
                len: 0,
                remove_seq: 0,
            }),
        })
    }

    /// Opens a tree from its meta page. The stored geometry must match
    /// `config`.
    pub fn open(
        store: Arc<dyn PageStore>,
        log: Arc<dyn PageOpLog>,
        config: IndexConfig,
        meta_page_id: PageId,
    ) -> Result<Self> {
        let (leaf_ios, inner_ios) = Self::page_ios(&config, store.page_size())?;
        let meta_ios = BPlusMetaIo::versions()?;

        let state = {
            let handle = store.acquire(meta_page_id)?;
            let buf = handle.read();
            let io = meta_ios.for_page(&buf)?;
            io.check_geometry(&buf, &config)?;
            TreeState {
                root: io.root(&buf),
                height: io.height(&buf),
                len: io.len(&buf),
                remove_seq: io.remove_seq(&buf),
            }
        };
        if state.height == 0 || state.height > MAX_HEIGHT || state.root.as_u64() == 0 {
            return Err(corrupted(format!(
                "meta page {} holds root {} at height {}",
                meta_page_id, state.root, state.height
            )));
        }
        debug!(meta = %meta_page_id, root = %state.root, height = state.height, "opened B+ tree");

        Ok(Self {
            store,
            log,
            config,
            meta_page_id,
            meta_ios,
            leaf_ios,
            inner_ios,
            state: RwLock::new(state),
        })
    }

    /// Builds the leaf and inner IOs for `config`, checking that both page
    /// kinds hold enough items to split and rebalance.
    fn page_ios(
        config: &IndexConfig,
        page_size: usize,
    ) -> Result<(IoVersions<BPlusLeafIo>, IoVersions<BPlusInnerIo>)> {
        config.validate()?;
        if page_size != config.page_size {
            return Err(KilnError::PageSizeMismatch {
                expected: config.page_size,
                actual: page_size,
            });
        }

        let leaf_ios = BPlusLeafIo::versions(config.leaf_item_size(), config.items_offset)?;
        let inner_ios = BPlusInnerIo::versions(config.key_size, config.items_offset)?;

        let leaf_max = leaf_ios.latest().layout().max_count(page_size);
        let inner_max = inner_ios.latest().layout().max_count(page_size);
        if leaf_max < MIN_ITEMS_PER_PAGE || inner_max < MIN_ITEMS_PER_PAGE {
            return Err(KilnError::ConfigError(format!(
                "{}-byte pages hold {} leaf and {} inner items, need at least {}",
                page_size, leaf_max, inner_max, MIN_ITEMS_PER_PAGE
            )));
        }
        Ok((leaf_ios, inner_ios))
    }

    pub fn meta_page_id(&self) -> PageId {
        self.meta_page_id
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.state.read().len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().len == 0
    }

    pub fn height(&self) -> u16 {
        self.state.read().height
    }

    pub fn root_page_id(&self) -> PageId {
        self.state.read().root
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_key(key)?;
        let state = self.state.read();
        let (_, leaf_id) = self.descend(&state, |io, buf| search(io, buf, key).0)?;

        let handle = self.store.acquire(leaf_id)?;
        let buf = handle.read();
        let io = self.leaf_io(&buf)?;
        match search(io, &buf, key) {
            (idx, true) => Ok(Some(Bytes::copy_from_slice(
                &io.item(&buf, idx)[self.config.key_size..],
            ))),
            _ => Ok(None),
        }
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Smallest entry.
    pub fn first(&self) -> Result<Option<(Bytes, Bytes)>> {
        let state = self.state.read();
        let (_, leaf_id) = self.descend(&state, |_, _| 0)?;
        self.leaf_entry(leaf_id, |_| 0)
    }

    /// Largest entry.
    pub fn last(&self) -> Result<Option<(Bytes, Bytes)>> {
        let state = self.state.read();
        let (_, leaf_id) = self.descend(&state, |io, buf| io.count(buf))?;
        self.leaf_entry(leaf_id, |cnt| cnt - 1)
    }

    fn leaf_entry(
        &self,
        leaf_id: PageId,
        pick: impl Fn(usize) -> usize,
    ) -> Result<Option<(Bytes, Bytes)>> {
        let handle = self.store.acquire(leaf_id)?;
        let buf = handle.read();
        let io = self.leaf_io(&buf)?;
        let cnt = io.count(&buf);
        if cnt == 0 {
            return Ok(None);
        }
        Ok(Some(self.split_item(io.item(&buf, pick(cnt)))))
    }

    /// Entries with `start <= key < end` in key order. Either bound may be
    /// open. Follows leaf forward links.
    pub fn range(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Vec<(Bytes, Bytes)>> {
        if let Some(key) = start {
            self.check_key(key)?;
        }
        if let Some(key) = end {
            self.check_key(key)?;
        }

        let state = self.state.read();
        let (_, mut page_id) = match start {
            Some(key) => self.descend(&state, |io, buf| search(io, buf, key).0)?,
            None => self.descend(&state, |_, _| 0)?,
        };

        let mut entries = Vec::new();
        let mut from_start = start;
        loop {
            let handle = self.store.acquire(page_id)?;
            let buf = handle.read();
            let io = self.leaf_io(&buf)?;
            let first = match from_start.take() {
                Some(key) => search(io, &buf, key).0,
                None => 0,
            };
            for idx in first..io.count(&buf) {
                let item = io.item(&buf, idx);
                if let Some(end) = end {
                    if &item[..self.config.key_size] >= end {
                        return Ok(entries);
                    }
                }
                entries.push(self.split_item(item));
            }
            match io.forward(&buf) {
                Some(next) => page_id = next,
                None => return Ok(entries),
            }
        }
    }

    // =========================================================================
    // Insert
    // =========================================================================

    /// Inserts or replaces. Returns the previous value, if any.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<Option<Bytes>> {
        self.check_key(key)?;
        if value.len() != self.config.value_size {
            return Err(KilnError::InvalidValueSize {
                size: value.len(),
                expected: self.config.value_size,
            });
        }

        let mut state = self.state.write();
        let (path, leaf_id) = self.descend(&state, |io, buf| search(io, buf, key).0)?;

        let split = {
            let handle = self.store.acquire(leaf_id)?;
            let mut buf = handle.write();
            let io = self.leaf_io(&buf)?;
            let (idx, found) = search(io, &buf, key);
            if found {
                let value_slot = &mut io.item_mut(&mut buf, idx)[self.config.key_size..];
                let old = Bytes::copy_from_slice(value_slot);
                value_slot.copy_from_slice(value);
                return Ok(Some(old));
            }

            let mut item = Vec::with_capacity(io.item_size());
            item.extend_from_slice(key);
            item.extend_from_slice(value);
            if io.count(&buf) < io.max_count(&buf) {
                io.insert(&mut buf, idx, &item)?;
                None
            } else {
                Some(self.split_leaf(leaf_id, io, &mut buf, idx, &item)?)
            }
        };

        state.len += 1;
        if let Some((separator, forward)) = split {
            self.insert_separator(&mut state, &path, separator, forward)?;
        }
        self.sync_meta(&state)?;
        Ok(None)
    }

    /// Splits a full leaf around its midpoint and inserts `item` into the
    /// half it belongs to. Returns the separator and the new right page.
    fn split_leaf(
        &self,
        page_id: PageId,
        io: &BPlusLeafIo,
        buf: &mut [u8],
        idx: usize,
        item: &[u8],
    ) -> Result<(Vec<u8>, PageId)> {
        let mid = io.count(buf) / 2;
        let fwd_id = self.store.allocate_page()?;
        self.log.log_page_operation(&PageOperation::Split {
            page: page_id,
            forward: fwd_id,
            level: 0,
            mid,
        })?;

        let fwd_handle = self.store.acquire(fwd_id)?;
        let mut fwd = fwd_handle.write();
        io.init_new_page(&mut fwd);
        io.split_forward_page(buf, &mut fwd, mid)?;
        io.split_existing_page(buf, mid, fwd_id)?;

        if idx < mid {
            io.insert(buf, idx, item)?;
        } else {
            io.insert(&mut fwd, idx - mid, item)?;
        }

        let last = io.count(buf) - 1;
        let separator = io.item(buf, last)[..self.config.key_size].to_vec();
        debug!(page = %page_id, forward = %fwd_id, mid, "split leaf page");
        Ok((separator, fwd_id))
    }

    /// Adds `(key, right)` to each parent on `path`, bottom-up, splitting full
    /// inner pages and growing a new root if the old one splits.
    fn insert_separator(
        &self,
        state: &mut TreeState,
        path: &[(PageId, usize)],
        mut key: Vec<u8>,
        mut right: PageId,
    ) -> Result<()> {
        for (depth, &(page_id, idx)) in path.iter().enumerate().rev() {
            let level = (path.len() - depth) as u16;
            let handle = self.store.acquire(page_id)?;
            let mut buf = handle.write();
            let io = self.inner_io(&buf)?;
            if io.count(&buf) < io.max_count(&buf) {
                return io.insert_with_right(&mut buf, idx, &key, right);
            }
            let (promoted, fwd_id) = self.split_inner(page_id, io, &mut buf, level, idx, &key, right)?;
            key = promoted;
            right = fwd_id;
        }
        self.grow_root(state, &key, right)
    }

    /// Splits a full inner page, moving its middle key up, and inserts
    /// `(key, right)` at child position `idx`. Returns the promoted key and
    /// the new right page.
    #[allow(clippy::too_many_arguments)]
    fn split_inner(
        &self,
        page_id: PageId,
        io: &BPlusInnerIo,
        buf: &mut [u8],
        level: u16,
        idx: usize,
        key: &[u8],
        right: PageId,
    ) -> Result<(Vec<u8>, PageId)> {
        // Keys [0..mid-1) stay, key mid-1 moves up, [mid..) go right.
        let mid = io.count(buf) / 2 + 1;
        let fwd_id = self.store.allocate_page()?;
        self.log.log_page_operation(&PageOperation::Split {
            page: page_id,
            forward: fwd_id,
            level,
            mid,
        })?;

        let fwd_handle = self.store.acquire(fwd_id)?;
        let mut fwd = fwd_handle.write();
        io.init_new_page(&mut fwd);
        io.split_forward_page(buf, &mut fwd, mid)?;
        io.split_existing_page(buf, mid, fwd_id)?;
        let promoted = io.item(buf, mid - 1).to_vec();
        io.set_count(buf, mid - 1)?;

        if idx < mid {
            io.insert_with_right(buf, idx, key, right)?;
        } else {
            io.insert_with_right(&mut fwd, idx - mid, key, right)?;
        }
        debug!(page = %page_id, forward = %fwd_id, level, mid, "split inner page");
        Ok((promoted, fwd_id))
    }

    fn grow_root(&self, state: &mut TreeState, key: &[u8], right: PageId) -> Result<()> {
        if state.height >= MAX_HEIGHT {
            return Err(KilnError::Internal(format!(
                "B+ tree height limit {} reached",
                MAX_HEIGHT
            )));
        }

        let root_id = self.store.allocate_page()?;
        self.log.log_page_operation(&PageOperation::NewRoot {
            root: root_id,
            left: state.root,
            right,
            level: state.height,
        })?;

        let handle = self.store.acquire(root_id)?;
        self.inner_ios
            .latest()
            .init_new_root(&mut handle.write(), state.root, key, right)?;
        debug!(root = %root_id, left = %state.root, right = %right, height = state.height + 1, "grew new root");

        state.root = root_id;
        state.height += 1;
        Ok(())
    }

    // =========================================================================
    // Remove
    // =========================================================================

    /// Removes `key`. Returns the removed value, if any.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.check_key(key)?;
        let mut state = self.state.write();
        let (path, leaf_id) = self.descend(&state, |io, buf| search(io, buf, key).0)?;
        let remove_id = state.remove_seq + 1;

        let (old, underfull) = {
            let handle = self.store.acquire(leaf_id)?;
            let mut buf = handle.write();
            let io = self.leaf_io(&buf)?;
            let (idx, found) = search(io, &buf, key);
            if !found {
                return Ok(None);
            }
            let old = Bytes::copy_from_slice(&io.item(&buf, idx)[self.config.key_size..]);
            io.remove(&mut buf, idx)?;
            io.set_remove_id(&mut buf, remove_id);
            (old, io.count(&buf) < self.min_count(io, &buf))
        };

        state.remove_seq = remove_id;
        state.len -= 1;
        if underfull && !path.is_empty() {
            self.rebalance(&mut state, &path)?;
        }
        self.sync_meta(&state)?;
        Ok(Some(old))
    }

    /// Repairs underfull pages bottom-up along `path`, then collapses an
    /// empty inner root.
    fn rebalance(&self, state: &mut TreeState, path: &[(PageId, usize)]) -> Result<()> {
        for (depth, &(parent_id, cidx)) in path.iter().enumerate().rev() {
            let level = (path.len() - depth - 1) as u16;
            let parent_underfull = self.fix_child(parent_id, cidx, level, state.remove_seq)?;
            if depth == 0 || !parent_underfull {
                break;
            }
        }
        self.collapse_root(state)
    }

    /// Merges the underfull child at `cidx` with a sibling, or borrows from
    /// the sibling when the merge would not fit. The left sibling is used
    /// when there is one. Returns whether the parent is now underfull.
    fn fix_child(&self, parent_id: PageId, cidx: usize, level: u16, remove_id: u64) -> Result<bool> {
        let parent = self.store.acquire(parent_id)?;
        let mut pbuf = parent.write();
        let pio = self.inner_io(&pbuf)?;
        if pio.count(&pbuf) == 0 {
            return Err(corrupted(format!("inner page {} has no keys", parent_id)));
        }

        let sep_idx = cidx.saturating_sub(1);
        let left_id = pio.left(&pbuf, sep_idx);
        let right_id = pio.right(&pbuf, sep_idx);
        let left = self.store.acquire(left_id)?;
        let right = self.store.acquire(right_id)?;
        let mut lbuf = left.write();
        let mut rbuf = right.write();

        let io = self.node_io(&lbuf, level)?;
        io.check(&rbuf)?;
        let separator = (level > 0).then(|| pio.item(&pbuf, sep_idx).to_vec());
        let (lc, rc) = (io.count(&lbuf), io.count(&rbuf));

        if lc + rc + usize::from(separator.is_some()) <= io.max_count(&lbuf) {
            self.log.log_page_operation(&PageOperation::Merge {
                parent: parent_id,
                left: left_id,
                right: right_id,
                level,
            })?;
            if !io.merge(&mut lbuf, &rbuf, separator.as_deref())? {
                return Err(KilnError::Internal(format!(
                    "merge of {} into {} did not fit",
                    right_id, left_id
                )));
            }
            io.set_remove_id(&mut lbuf, remove_id);
            pio.remove(&mut pbuf, sep_idx)?;

            drop(rbuf);
            drop(right);
            self.store.free_page(right_id)?;
            debug!(parent = %parent_id, left = %left_id, right = %right_id, level, "merged pages");
        } else {
            let (from, to, cnt, sib) = if cidx == 0 {
                (right_id, left_id, lc, rc)
            } else {
                (left_id, right_id, rc, lc)
            };
            let n = (sib.saturating_sub(cnt) / 2).max(1);
            self.log.log_page_operation(&PageOperation::Borrow {
                parent: parent_id,
                from,
                to,
                count: n,
                level,
            })?;

            let key_size = self.config.key_size;
            let new_separator = if cidx == 0 {
                borrow_from_right(io, &mut lbuf, &mut rbuf, separator.as_deref(), n, key_size)?
            } else {
                borrow_from_left(io, &mut lbuf, &mut rbuf, separator.as_deref(), n, key_size)?
            };
            io.set_remove_id(&mut lbuf, remove_id);
            io.set_remove_id(&mut rbuf, remove_id);
            pio.store_item(&mut pbuf, sep_idx, &new_separator)?;
            debug!(parent = %parent_id, from = %from, to = %to, count = n, level, "borrowed items");
        }

        Ok(pio.count(&pbuf) < self.min_count(pio, &pbuf))
    }

    /// Replaces an inner root with no keys by its only child.
    fn collapse_root(&self, state: &mut TreeState) -> Result<()> {
        while state.height > 1 {
            let child = {
                let handle = self.store.acquire(state.root)?;
                let buf = handle.read();
                let io = self.inner_io(&buf)?;
                if io.count(&buf) > 0 {
                    return Ok(());
                }
                io.left(&buf, 0)
            };

            self.log.log_page_operation(&PageOperation::CollapseRoot {
                old_root: state.root,
                new_root: child,
            })?;
            self.store.free_page(state.root)?;
            debug!(old_root = %state.root, new_root = %child, height = state.height - 1, "collapsed root");
            state.root = child;
            state.height -= 1;
        }
        Ok(())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Walks the whole tree checking key order, separator bounds, counts,
    /// page kinds per level, forward links and the entry count.
    pub fn validate(&self) -> Result<()> {
        let state = self.state.read();
        let mut levels: Vec<Vec<(PageId, Option<PageId>)>> = vec![Vec::new(); state.height as usize];
        let mut entries = 0u64;
        self.validate_page(
            state.root,
            state.height - 1,
            None,
            None,
            true,
            &mut levels,
            &mut entries,
        )?;

        if entries != state.len {
            return Err(corrupted(format!(
                "tree holds {} entries, expected {}",
                entries, state.len
            )));
        }
        for (level, pages) in levels.iter().enumerate() {
            for (i, &(page_id, forward)) in pages.iter().enumerate() {
                let expected = pages.get(i + 1).map(|&(next, _)| next);
                if forward != expected {
                    return Err(corrupted(format!(
                        "page {} at level {} links forward to {:?}, expected {:?}",
                        page_id, level, forward, expected
                    )));
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn validate_page(
        &self,
        page_id: PageId,
        level: u16,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        is_root: bool,
        levels: &mut Vec<Vec<(PageId, Option<PageId>)>>,
        entries: &mut u64,
    ) -> Result<()> {
        if page_id.as_u64() == 0 {
            return Err(corrupted(format!("null child link at level {}", level)));
        }
        let handle = self.store.acquire(page_id)?;
        let buf = handle.read();
        let io = self.node_io(&buf, level)?;
        let key_size = self.config.key_size;

        let cnt = io.count(&buf);
        if cnt > io.max_count(&buf) {
            return Err(corrupted(format!(
                "page {} holds {} items, max {}",
                page_id,
                cnt,
                io.max_count(&buf)
            )));
        }
        if cnt == 0 && !is_root {
            return Err(corrupted(format!("non-root page {} is empty", page_id)));
        }
        levels[level as usize].push((page_id, io.forward(&buf)));

        let mut prev: Option<&[u8]> = None;
        for idx in 0..cnt {
            let key = &io.item(&buf, idx)[..key_size];
            let out_of_order = prev.is_some_and(|p| p >= key)
                || lower.is_some_and(|l| key <= l)
                || upper.is_some_and(|u| key > u);
            if out_of_order {
                return Err(corrupted(format!(
                    "key {} on page {} is out of order",
                    idx, page_id
                )));
            }
            prev = Some(key);
        }

        if level == 0 {
            *entries += cnt as u64;
            return Ok(());
        }

        let inner = self.inner_io(&buf)?;
        for idx in 0..=cnt {
            let lo = if idx == 0 {
                lower
            } else {
                Some(&inner.item(&buf, idx - 1)[..key_size])
            };
            let hi = if idx == cnt {
                upper
            } else {
                Some(&inner.item(&buf, idx)[..key_size])
            };
            self.validate_page(inner.left(&buf, idx), level - 1, lo, hi, false, levels, entries)?;
        }
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Follows `choose` from the root down to a leaf.
    fn descend<F>(&self, state: &TreeState, choose: F) -> Result<(Path, PageId)>
    where
        F: Fn(&BPlusInnerIo, &[u8]) -> usize,
    {
        let mut path = Vec::with_capacity(state.height as usize);
        let mut page_id = state.root;
        for _ in 1..state.height {
            let handle = self.store.acquire(page_id)?;
            let buf = handle.read();
            let io = self.inner_io(&buf)?;
            let idx = choose(io, &buf);
            path.push((page_id, idx));
            page_id = io.left(&buf, idx);
            if page_id.as_u64() == 0 {
                return Err(corrupted(format!(
                    "inner page {} has a null child at {}",
                    path[path.len() - 1].0,
                    idx
                )));
            }
        }
        Ok((path, page_id))
    }

    fn leaf_io(&self, buf: &[u8]) -> Result<&BPlusLeafIo> {
        self.leaf_ios.for_page(buf)
    }

    fn inner_io(&self, buf: &[u8]) -> Result<&BPlusInnerIo> {
        self.inner_ios.for_page(buf)
    }

    /// IO for a page at `level`; leaves live at level 0.
    fn node_io(&self, buf: &[u8], level: u16) -> Result<&dyn BPlusIo> {
        if level == 0 {
            Ok(self.leaf_io(buf)?)
        } else {
            Ok(self.inner_io(buf)?)
        }
    }

    /// Fewest items a non-root page may hold before it is rebalanced.
    fn min_count(&self, io: &dyn BPlusIo, buf: &[u8]) -> usize {
        ((io.max_count(buf) as f64 * self.config.min_fill_factor) as usize).max(1)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.config.key_size {
            return Err(KilnError::InvalidKeySize {
                size: key.len(),
                expected: self.config.key_size,
            });
        }
        Ok(())
    }

    fn split_item(&self, item: &[u8]) -> (Bytes, Bytes) {
        let (key, value) = item.split_at(self.config.key_size);
        (Bytes::copy_from_slice(key), Bytes::copy_from_slice(value))
    }

    fn sync_meta(&self, state: &TreeState) -> Result<()> {
        let handle = self.store.acquire(self.meta_page_id)?;
        let mut buf = handle.write();
        let io = self.meta_ios.for_page(&buf)?;
        io.set_root(&mut buf, state.root);
        io.set_height(&mut buf, state.height);
        io.set_len(&mut buf, state.len);
        io.set_remove_seq(&mut buf, state.remove_seq);
        Ok(())
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("meta_page_id", &self.meta_page_id)
            .field("config", &self.config)
            .field("state", &*self.state.read())
            .finish()
    }
}

/// Binary search over the leading key bytes of each item. Returns the first
/// index whose key is `>= key` and whether it is an exact match.
fn search(io: &dyn BPlusIo, buf: &[u8], key: &[u8]) -> (usize, bool) {
    let mut lo = 0;
    let mut hi = io.count(buf);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match io.item(buf, mid)[..key.len()].cmp(key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Equal => return (mid, true),
            Ordering::Greater => hi = mid,
        }
    }
    (lo, false)
}

/// Moves the first `n` items of `right` to the end of `left`. For inner
/// pages the parent separator comes down in front of them and `right`'s
/// `n - 1`th key goes up. Returns the new separator.
fn borrow_from_right(
    io: &dyn BPlusIo,
    left: &mut [u8],
    right: &mut [u8],
    separator: Option<&[u8]>,
    n: usize,
    key_size: usize,
) -> Result<Vec<u8>> {
    let (lc, rc) = (io.count(left), io.count(right));
    let new_separator = match separator {
        None => {
            io.copy_items_checked(right, left, 0, lc, n, false)?;
            io.move_items_checked(right, n, 0, rc - n, false)?;
            io.item(left, lc + n - 1)[..key_size].to_vec()
        }
        Some(separator) => {
            io.store_item(left, lc, separator)?;
            io.copy_items_checked(right, left, 0, lc + 1, n - 1, true)?;
            let up = io.item(right, n - 1).to_vec();
            io.move_items_checked(right, n, 0, rc - n, true)?;
            up
        }
    };
    io.set_count(left, lc + n)?;
    io.set_count(right, rc - n)?;
    Ok(new_separator)
}

/// Moves the last `n` items of `left` to the front of `right`. Mirror of
/// [`borrow_from_right`].
fn borrow_from_left(
    io: &dyn BPlusIo,
    left: &mut [u8],
    right: &mut [u8],
    separator: Option<&[u8]>,
    n: usize,
    key_size: usize,
) -> Result<Vec<u8>> {
    let (lc, rc) = (io.count(left), io.count(right));
    let new_separator = match separator {
        None => {
            io.move_items_checked(right, 0, n, rc, false)?;
            io.copy_items_checked(left, right, lc - n, 0, n, false)?;
            io.item(left, lc - n - 1)[..key_size].to_vec()
        }
        Some(separator) => {
            io.move_items_checked(right, 0, n, rc, true)?;
            io.store_item(right, n - 1, separator)?;
            io.copy_items_checked(left, right, lc - n + 1, 0, n - 1, true)?;
            io.item(left, lc - n).to_vec()
        }
    };
    io.set_count(right, rc + n)?;
    io.set_count(left, lc - n)?;
    Ok(new_separator)
}

fn corrupted(msg: String) -> KilnError {
    warn!(reason = %msg, "B+ tree corruption detected");
    KilnError::TreeCorrupted(msg)
}
