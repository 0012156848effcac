//! Block Chain Manager (component F).
//!
//! Patches and unpatches the direct-jump slots recorded by the code
//! generator at `jmp_insn_offset`/`jmp_reset_offset`, and tracks the
//! resulting chain graph through each TB's `jmp_dest`/`inbound` fields so
//! it can be torn down again (on invalidation, breakpoint insertion, or
//! an async interrupt) without walking the whole store.

use xlate_backend::code_buffer::CodeBuffer;
use xlate_backend::HostCodeGen;

use crate::tb_store::TbStore;

/// Patch TB `a`'s exit slot `n` to jump directly into TB `b`, and record
/// the edge so it can be undone later.
pub fn link<B: HostCodeGen>(
    store: &mut TbStore,
    code_buf: &CodeBuffer,
    backend: &B,
    a: usize,
    n: usize,
    b: usize,
) {
    debug_assert!(n < 2);
    if store.get(a).jmp_dest[n] == Some(b) {
        return; // already linked — matches spec's "chain_already" case
    }
    if let Some(jmp_off) = store.get(a).jmp_insn_offset[n] {
        let target = store.get(b).host_offset;
        backend.patch_jump(code_buf, jmp_off as usize, target);
    }
    store.get_mut(a).jmp_dest[n] = Some(b);
    store.get_mut(b).inbound.push((a, n as u8));
}

/// Undo TB `a`'s exit slot `n`, patching the jump back to its original
/// (non-chained) target and dropping the edge bookkeeping on both ends.
pub fn reset<B: HostCodeGen>(store: &mut TbStore, code_buf: &CodeBuffer, backend: &B, a: usize, n: usize) {
    debug_assert!(n < 2);
    let dest = store.get(a).jmp_dest[n].take();
    if let (Some(jmp_off), Some(reset_off)) = (
        store.get(a).jmp_insn_offset[n],
        store.get(a).jmp_reset_offset[n],
    ) {
        backend.patch_jump(code_buf, jmp_off as usize, reset_off as usize);
    }
    if let Some(b) = dest {
        store.get_mut(b).inbound.retain(|&(src, slot)| !(src == a && slot as usize == n));
    }
}

/// Cut every edge, in either direction, touching TB `t`: its own outgoing
/// chain slots, and every predecessor currently chained into it. Used
/// both for SMC invalidation and for breakpoint insertion/removal and
/// async-interrupt delivery, where a TB that might still be mid-execution
/// must not be re-entered via a stale direct jump.
///
/// Implemented with an explicit work-list rather than native recursion —
/// the direct-jump graph can be arbitrarily deep (a long chain of
/// tail-calling blocks), and QEMU's own recursive C implementation is the
/// one structure called out in the design notes as needing a non-recursive
/// rendition on a smaller host stack.
pub fn reset_recursive<B: HostCodeGen>(store: &mut TbStore, code_buf: &CodeBuffer, backend: &B, t: usize) {
    let mut worklist = vec![t];
    let mut visited = std::collections::HashSet::new();
    while let Some(cur) = worklist.pop() {
        if !visited.insert(cur) {
            continue;
        }
        for n in 0..2 {
            reset(store, code_buf, backend, cur, n);
        }
        let preds: Vec<usize> = store.get(cur).inbound.iter().map(|&(src, _)| src).collect();
        for pred in preds {
            for n in 0..2 {
                if store.get(pred).jmp_dest[n] == Some(cur) {
                    reset(store, code_buf, backend, pred, n);
                }
            }
            worklist.push(pred);
        }
    }
}

/// Remove every in- and out-edge of `t` without resetting the host jump
/// instructions — used right before the TB's slot is discarded entirely
/// (SMC invalidation, flush), where patching a jump back to its reset
/// offset would be wasted work on code about to be overwritten.
pub fn unlink_all(store: &mut TbStore, t: usize) {
    for n in 0..2 {
        if let Some(b) = store.get_mut(t).jmp_dest[n].take() {
            store.get_mut(b).inbound.retain(|&(src, slot)| !(src == t && slot as usize == n));
        }
    }
    let preds: Vec<(usize, u8)> = std::mem::take(&mut store.get_mut(t).inbound);
    for (pred, slot) in preds {
        store.get_mut(pred).jmp_dest[slot as usize] = None;
    }
}
