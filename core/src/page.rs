//! Guest Page Table: tracks per-guest-page protection flags and the head
//! of each page's Translation-Block list.
//!
//! A direct generalization of QEMU's two-level `l1_map`/`PageDesc` table
//! (`exec.c`): a sparse array of 4 KiB guest pages, each page carrying its
//! effective protection flags, whether it was ever made writable
//! (`write_original`, used to decide what to restore a host mprotect to
//! after an SMC-triggered unprotect), and the head of the list of TBs
//! whose code overlaps the page.

/// Guest page size, log2. 4 KiB pages.
pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_BITS;

const L2_BITS: u32 = 10;
const L1_BITS: u32 = 32 - L2_BITS - PAGE_BITS;
const L1_SIZE: usize = 1 << L1_BITS;
const L2_SIZE: usize = 1 << L2_BITS;

/// Per-page protection flags, mirroring QEMU's `PAGE_*` bits.
pub mod flags {
    pub const PAGE_READ: u32 = 0x0001;
    pub const PAGE_WRITE: u32 = 0x0002;
    pub const PAGE_EXEC: u32 = 0x0004;
    pub const PAGE_BITS: u32 = PAGE_READ | PAGE_WRITE | PAGE_EXEC;
    /// Sticky bit: this page was made writable at some point, so an
    /// SMC-driven unprotect should restore `PAGE_WRITE`, not just whatever
    /// the host currently allows.
    pub const PAGE_WRITE_ORG: u32 = 0x0010;
    /// The page descriptor has actually been touched (distinguishes "no
    /// mapping" from "mapped with flags == 0").
    pub const PAGE_VALID: u32 = 0x0020;
}
pub use flags::*;

/// Per-page bookkeeping. Maps to QEMU's `PageDesc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageDesc {
    pub raw_flags: u32,
    /// Head of the intrusive TB list for this page, as a pool index.
    pub first_tb: Option<usize>,
}

impl PageDesc {
    pub fn flags(&self) -> u32 {
        self.raw_flags
    }

    pub fn is_valid(&self) -> bool {
        self.raw_flags & PAGE_VALID != 0
    }
}

/// Two-level sparse map from guest page index to [`PageDesc`], generalizing
/// QEMU's `l1_map`/`l2_map`. Lazily allocates L2 tables, so the address
/// space (4 GiB / `PAGE_SIZE` pages) costs nothing until touched.
pub struct PageTable {
    l1_map: Vec<Option<Box<[PageDesc; L2_SIZE]>>>,
}

impl PageTable {
    pub fn new() -> Self {
        let mut l1_map = Vec::with_capacity(L1_SIZE);
        l1_map.resize_with(L1_SIZE, || None);
        Self { l1_map }
    }

    fn page_index(addr: u64) -> usize {
        (addr >> PAGE_BITS) as usize
    }

    fn find(&self, page_index: usize) -> Option<&PageDesc> {
        let l1 = page_index >> L2_BITS as usize;
        let l2 = page_index & (L2_SIZE - 1);
        self.l1_map.get(l1)?.as_ref().map(|t| &t[l2])
    }

    fn find_alloc(&mut self, page_index: usize) -> &mut PageDesc {
        let l1 = page_index >> L2_BITS as usize;
        let l2 = page_index & (L2_SIZE - 1);
        let slot = &mut self.l1_map[l1];
        if slot.is_none() {
            *slot = Some(Box::new([PageDesc::default(); L2_SIZE]));
        }
        &mut slot.as_mut().unwrap()[l2]
    }

    /// Effective protection flags for the page containing `addr`.
    /// Unmapped pages read as 0 (no access), matching `page_get_flags`.
    pub fn get_flags(&self, addr: u64) -> u32 {
        match self.find(Self::page_index(addr)) {
            Some(p) if p.is_valid() => p.raw_flags & PAGE_BITS,
            _ => 0,
        }
    }

    /// Descriptor for the page containing `addr`, if it has ever been
    /// touched by [`set_flags`](Self::set_flags) or TB registration.
    pub fn page_desc(&self, addr: u64) -> Option<&PageDesc> {
        self.find(Self::page_index(addr))
    }

    pub fn page_desc_mut(&mut self, addr: u64) -> &mut PageDesc {
        self.find_alloc(Self::page_index(addr))
    }

    /// Set protection flags on every page in `[start, end)`. `PAGE_WRITE`
    /// is sticky into `PAGE_WRITE_ORG`: once a page has been writable, it's
    /// remembered, so an SMC unprotect later knows to restore write
    /// access rather than leaving the page permanently read-only.
    ///
    /// Returns the pool indices of the `first_tb` heads that existed on
    /// pages that were *not* writable and are newly granted `PAGE_WRITE`
    /// while still holding translations — the caller (the SMC Invalidator)
    /// must invalidate those before the new flags take effect, matching
    /// `page_set_flags`'s guard in the original implementation.
    pub fn set_flags(&mut self, start: u64, end: u64, mut new_flags: u32) -> Vec<usize> {
        if new_flags & PAGE_WRITE != 0 {
            new_flags |= PAGE_WRITE_ORG;
        }
        let mut to_invalidate = Vec::new();
        let first = Self::page_index(start);
        let last = Self::page_index(end.saturating_sub(1).max(start));
        for page_index in first..=last {
            let p = self.find_alloc(page_index);
            let was_writable = p.raw_flags & PAGE_WRITE != 0;
            let becomes_writable = new_flags & PAGE_WRITE != 0;
            if !was_writable && becomes_writable {
                if let Some(head) = p.first_tb {
                    to_invalidate.push(head);
                }
            }
            let preserved = p.raw_flags & PAGE_WRITE_ORG;
            p.raw_flags = (new_flags & PAGE_BITS) | PAGE_VALID | preserved.max(new_flags & PAGE_WRITE_ORG);
        }
        to_invalidate
    }

    /// Register `tb_idx` as covering the page containing `addr`, threading
    /// it onto the page's list via [`crate::tb::page_parity`]. Returns the
    /// previous list head so the caller can store it in the TB's
    /// `page_next[parity]` slot.
    pub fn link_tb(&mut self, addr: u64, tb_idx: usize) -> Option<usize> {
        let p = self.page_desc_mut(addr);
        let prev = p.first_tb;
        p.first_tb = Some(tb_idx);
        p.raw_flags |= PAGE_VALID;
        prev
    }

    /// Zero every page descriptor's `first_tb`, leaving protection flags
    /// (and `PAGE_WRITE_ORG`) untouched. Called after a full TB-store
    /// flush: the pool indices the old heads pointed at are about to be
    /// reused for unrelated blocks, so every page list must forget them
    /// rather than be left dangling.
    pub fn clear_tb_links(&mut self) {
        for l2 in self.l1_map.iter_mut().flatten() {
            for desc in l2.iter_mut() {
                desc.first_tb = None;
            }
        }
    }

    /// Remove `tb_idx` from the head of a page's list if it is there,
    /// replacing it with `next`. Used when unlinking during invalidation;
    /// callers walking the list itself splice directly.
    pub fn unlink_head(&mut self, addr: u64, tb_idx: usize, next: Option<usize>) {
        let page_index = Self::page_index(addr);
        if let Some(p) = self
            .l1_map
            .get_mut(page_index >> L2_BITS as usize)
            .and_then(|t| t.as_mut())
            .map(|t| &mut t[page_index & (L2_SIZE - 1)])
        {
            if p.first_tb == Some(tb_idx) {
                p.first_tb = next;
            }
        }
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(pub u32);
