//! Host Page Protector (component B).
//!
//! Wraps host `mprotect` toggling of guest pages that back translated
//! code, and the SIGSEGV-recoverable "someone just wrote to a page we
//! marked read-only for SMC detection" path. The actual host address
//! space is owned by whatever embeds the cache (`linux_user::GuestSpace`
//! for the user-mode target); this module only needs the narrow surface
//! in [`HostMemory`].

use xlate_backend::code_buffer::CodeBuffer;
use xlate_backend::HostCodeGen;
use xlate_core::page::{self, PageTable};

use crate::smc;
use crate::tb_store::TbStore;

/// The address-space operations the Host Page Protector needs from its
/// embedder. Kept minimal and host-address-space-agnostic so the cache
/// doesn't need to know whether it's running under `linux-user`-style
/// guest-address-space emulation or a full-system translation.
pub trait HostMemory {
    /// Host page size, in bytes.
    fn host_page_size(&self) -> usize;
    /// Translate a guest address to its host-backing pointer.
    fn guest_to_host(&self, guest_addr: u64) -> *mut u8;
    /// Change host protection on `[guest_addr, guest_addr + len)`.
    fn host_mprotect(&self, guest_addr: u64, len: usize, prot: i32) -> std::io::Result<()>;
}

/// Protector state: which guest pages currently have host write
/// permission withdrawn for SMC detection, so a repeat fault on an
/// already-unprotected page is recognized as a real bug rather than
/// silently retried forever.
pub struct HostProtector {
    page_size: usize,
}

impl HostProtector {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// Withdraw host write permission from the page containing
    /// `guest_addr`, so any write to it re-enters the fault path. Called
    /// right before a TB's code pages are marked read-only in the guest
    /// page table.
    pub fn protect_page<M: HostMemory>(&self, mem: &M, guest_addr: u64) -> std::io::Result<()> {
        let page = guest_addr & !(self.page_size as u64 - 1);
        mem.host_mprotect(page, self.page_size, libc::PROT_READ)
    }

    /// Restore host write permission to the page containing `host_addr`
    /// (already translated to a guest address by the caller) if and only
    /// if the guest page table says it's supposed to be writable.
    /// Returns `false` if the page was never marked writable — the fault
    /// wasn't an SMC write-protect trap and the caller should treat it as
    /// a genuine guest page fault instead.
    ///
    /// If restoring write access resurrects a page that still has live
    /// translations on it (it was narrowed to read-only while TBs were
    /// generated from it), every TB overlapping the page is invalidated via
    /// [`smc::invalidate_page`] before this returns, so the next lookup at
    /// that guest PC regenerates instead of replaying stale code.
    pub fn unprotect<B: HostCodeGen, M: HostMemory>(
        &self,
        mem: &M,
        page_table: &mut PageTable,
        store: &mut TbStore,
        code_buf: &CodeBuffer,
        backend: &B,
        guest_addr: u64,
    ) -> std::io::Result<bool> {
        let page = guest_addr & !(self.page_size as u64 - 1);
        let flags = page_table.get_flags(page);
        if flags & page::PAGE_WRITE == 0 {
            let desc = page_table.page_desc(page);
            let write_org = desc.map(|d| d.raw_flags & page::PAGE_WRITE_ORG != 0).unwrap_or(false);
            if !write_org {
                return Ok(false);
            }
        }
        mem.host_mprotect(page, self.page_size, libc::PROT_READ | libc::PROT_WRITE)?;
        let victims = page_table.set_flags(page, page + self.page_size as u64, flags | page::PAGE_WRITE);
        if !victims.is_empty() {
            smc::invalidate_page(store, page_table, code_buf, backend, page);
        }
        Ok(true)
    }
}
