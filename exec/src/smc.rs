//! SMC Invalidator (component E).
//!
//! Walks a guest page's TB list and evicts every block overlapping it,
//! tearing down the hash index entry, the chain-graph edges, and the
//! link into whichever *other* page the TB also spans. Grounded in
//! QEMU's `tb_invalidate_page`/`tb_alloc_page`: the page-parity trick
//! there picks which of a TB's two `page_next` slots continues a given
//! page's list; it survives the translation to Rust (see
//! [`xlate_core::tb::page_parity`]) even though the memory-safety hazard
//! it originally guarded against (a dangling pointer from a concurrently
//! freed TB) cannot arise here — `page_next` holds pool indices, not
//! pointers.

use xlate_backend::code_buffer::CodeBuffer;
use xlate_backend::HostCodeGen;
use xlate_core::page::PageTable;
use xlate_core::tb::page_parity;

use crate::chain;
use crate::tb_store::TbStore;

/// Invalidate every TB whose code overlaps the guest page containing
/// `addr`. Returns the number of TBs evicted, for the dispatcher's
/// instrumentation.
pub fn invalidate_page<B: HostCodeGen>(
    store: &mut TbStore,
    page_table: &mut PageTable,
    code_buf: &CodeBuffer,
    backend: &B,
    addr: u64,
) -> usize {
    let page_addr = addr & !(xlate_core::page::PAGE_SIZE - 1);
    let parity = page_parity(page_addr);
    let mut count = 0;

    let mut cur = page_table.page_desc(page_addr).and_then(|d| d.first_tb);
    while let Some(tb_idx) = cur {
        let tb = store.get(tb_idx);
        let next = tb.page_next[parity];

        // Splice this TB out of the *other* page's list, if it spans two.
        let other_slot = 1 - tb.page_addr.iter().position(|p| *p == Some(page_addr)).unwrap_or(0);
        if let Some(other_page) = tb.page_addr[other_slot] {
            if other_page != page_addr {
                unlink_from_page(store, page_table, other_page, tb_idx);
            }
        }

        store.hash_remove(tb_idx);
        chain::unlink_all(store, tb_idx);
        store.get_mut(tb_idx).invalid = true;

        count += 1;
        cur = next;
    }
    // Every TB reachable from the head has just been invalidated, so the
    // page's list is now empty.
    page_table.page_desc_mut(page_addr).first_tb = None;
    count
}

/// Remove `tb_idx` from `page_addr`'s list without assuming it's the
/// head — it may be anywhere in the chain since this page isn't the one
/// [`invalidate_page`] is walking from the front.
fn unlink_from_page(store: &mut TbStore, page_table: &mut PageTable, page_addr: u64, tb_idx: usize) {
    let parity = page_parity(page_addr);
    let head = page_table.page_desc(page_addr).and_then(|d| d.first_tb);
    if head == Some(tb_idx) {
        let next = store.get(tb_idx).page_next[parity];
        page_table.unlink_head(page_addr, tb_idx, next);
        return;
    }
    let mut prev = head;
    while let Some(p) = prev {
        let next = store.get(p).page_next[parity];
        if next == Some(tb_idx) {
            let skip = store.get(tb_idx).page_next[parity];
            store.get_mut(p).page_next[parity] = skip;
            return;
        }
        prev = next;
    }
}
