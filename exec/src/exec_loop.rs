//! Execution Dispatcher (component G).
//!
//! Drives the lookup → translate → execute cycle for one guest CPU:
//! find or generate a TB for the current `(pc, cs_base, flags)`, run it,
//! and either chain directly into the next block or fall back to a fresh
//! lookup. Also owns the unwind checkpoint that lets a SIGSEGV/SIGBUS
//! delivered from inside generated code unwind back here instead of
//! taking down the process, and the interrupt/breakpoint check that runs
//! once per iteration rather than inside generated code.

use crate::chain;
use crate::host_protect::HostMemory;
use crate::signal;
use crate::{ExecEnv, GuestCpu};
use xlate_backend::translate::translate;
use xlate_backend::HostCodeGen;
use xlate_core::page;
use xlate_core::tb::{decode_tb_exit, encode_tb_exit, TranslationBlock, EXCP_INTERRUPT, TB_EXIT_NOCHAIN};

/// Minimum remaining bytes in the code buffer before refusing to
/// translate a new TB.
pub const MIN_CODE_BUF_REMAINING: usize = 4096;

/// Reason the execution loop exited, matching the error-kinds table:
/// a real guest exit (syscall, ecall, ebreak, ...) surfaces as
/// `Exception`; everything else is a reason to come back and retry or
/// to treat as fatal at a higher level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The guest CPU raised exception `index` (ECALL, EBREAK, illegal
    /// instruction, a page fault routed through the signal bridge, or an
    /// asynchronous interrupt).
    Exception { index: u32, error_code: u32 },
    /// The code arena is full; the caller should flush the cache
    /// (`TbStore::flush` + `JumpCache::invalidate`) and resume.
    ArenaFull,
}

/// Run guest code until an exception, an async interrupt, or arena
/// exhaustion. Re-entrant: callers typically call this in a loop,
/// flushing on `ArenaFull` and resuming on `Exception` once the caller
/// has handled it (or exiting the process for a true guest exit).
///
/// # Safety
/// `cpu.env_ptr()` must point to a CPU state struct matching the globals
/// registered in `env.ir_ctx`, and must stay valid for as long as this
/// call can run generated code (it's read again from the signal handler
/// at an arbitrary point during that window).
pub unsafe fn cpu_exec_loop<B, M, C>(env: &mut ExecEnv<B, M>, cpu: &mut C) -> ExitReason
where
    B: HostCodeGen,
    M: HostMemory,
    C: GuestCpu,
{
    let mut next_tb_hint: Option<usize> = None;

    loop {
        // Unwind checkpoint: a fault inside generated code resumes
        // execution right here via the signal bridge rewriting the
        // faulting ucontext_t, which is indistinguishable to this code
        // from `save` returning a second time.
        if !signal::save(&mut env.checkpoint as *mut _) {
            let index = cpu.exception_index();
            let error_code = cpu.error_code();
            cpu.set_exception_index(0);
            return ExitReason::Exception { index, error_code };
        }

        if cpu.interrupt_request() {
            cpu.clear_interrupt();
            return ExitReason::Exception { index: EXCP_INTERRUPT, error_code: 0 };
        }

        let tb_idx = match next_tb_hint.take() {
            Some(idx) => idx,
            None => {
                let pc = cpu.get_pc();
                let flags = cpu.get_flags();
                match tb_find(env, cpu, pc, flags) {
                    Some(idx) => idx,
                    None => return ExitReason::ArenaFull,
                }
            }
        };

        signal::set_current(
            cpu.env_ptr(),
            &env.checkpoint as *const _,
            (env.code_buf.base_ptr(), env.code_buf.capacity()),
        );

        let raw_exit = cpu_tb_exec(env, cpu, tb_idx);
        let (_exiting_tb_idx, exit_code) = decode_tb_exit(raw_exit);

        match exit_code {
            slot @ 0..=1 => {
                let pc = cpu.get_pc();
                let flags = cpu.get_flags();
                if let Some(dst) = env.tb_store.get(tb_idx).jmp_dest[slot as usize] {
                    if env.tb_store.get(dst).matches(pc, 0, flags) {
                        next_tb_hint = Some(dst);
                        env.stats.chain_already += 1;
                        continue;
                    }
                }
                let dst = match tb_find(env, cpu, pc, flags) {
                    Some(idx) => idx,
                    None => return ExitReason::ArenaFull,
                };
                chain::link(&mut env.tb_store, &env.code_buf, &env.backend, tb_idx, slot as usize, dst);
                env.stats.chain_patched += 1;
                env.stats.chain_exit[slot as usize] += 1;
                next_tb_hint = Some(dst);
            }
            v if v == TB_EXIT_NOCHAIN => {
                let pc = cpu.get_pc();
                let flags = cpu.get_flags();
                env.stats.nochain_exit += 1;
                next_tb_hint = tb_find(env, cpu, pc, flags);
                if next_tb_hint.is_none() {
                    return ExitReason::ArenaFull;
                }
            }
            _ => {
                env.stats.real_exit += 1;
                let index = cpu.exception_index();
                let error_code = cpu.error_code();
                cpu.set_exception_index(0);
                return ExitReason::Exception { index, error_code };
            }
        }
        env.stats.loop_iters += 1;
    }
}

fn tb_find<B, M, C>(env: &mut ExecEnv<B, M>, cpu: &mut C, pc: u64, flags: u32) -> Option<usize>
where
    B: HostCodeGen,
    M: HostMemory,
    C: GuestCpu,
{
    if let Some(idx) = env.jump_cache.lookup(pc) {
        if env.tb_store.get(idx).matches(pc, 0, flags) {
            env.stats.jc_hit += 1;
            return Some(idx);
        }
    }

    if let Some(idx) = env.tb_store.lookup(pc, 0, flags) {
        env.jump_cache.insert(pc, idx);
        env.stats.ht_hit += 1;
        return Some(idx);
    }

    env.stats.translate += 1;
    tb_gen_code(env, cpu, pc, flags)
}

fn tb_gen_code<B, M, C>(env: &mut ExecEnv<B, M>, cpu: &mut C, pc: u64, flags: u32) -> Option<usize>
where
    B: HostCodeGen,
    M: HostMemory,
    C: GuestCpu,
{
    if env.code_buf.remaining() < MIN_CODE_BUF_REMAINING {
        return None;
    }

    let tb_idx = env.tb_store.alloc(pc, 0, flags, 0)?;
    env.ir_ctx.reset();
    env.ir_ctx.tb_idx = tb_idx as u32;

    let guest_size = cpu.gen_code(&mut env.ir_ctx, pc, TranslationBlock::max_insns(0));
    env.tb_store.get_mut(tb_idx).size = guest_size;
    env.tb_store.get_mut(tb_idx).phys_pc = pc;

    env.backend.clear_goto_tb_offsets();

    env.code_buf.set_writable().expect("set_writable failed");
    let host_offset = translate(&mut env.ir_ctx, &env.backend, &mut env.code_buf);
    let host_size = env.code_buf.offset() - host_offset;
    env.code_buf.set_executable().expect("set_executable failed");

    {
        let tb = env.tb_store.get_mut(tb_idx);
        tb.host_offset = host_offset;
        tb.host_size = host_size;
    }

    let offsets = env.backend.goto_tb_offsets();
    for (i, &(jmp, reset)) in offsets.iter().enumerate().take(2) {
        let tb = env.tb_store.get_mut(tb_idx);
        tb.set_jmp_insn_offset(i, jmp as u32);
        tb.set_jmp_reset_offset(i, reset as u32);
    }

    register_tb_pages(env, tb_idx, pc, guest_size as u64);

    env.tb_store.hash_insert(tb_idx);
    env.jump_cache.insert(pc, tb_idx);

    Some(tb_idx)
}

/// Register the TB's guest page(s) in the page table, and write-protect
/// any page that didn't already have a translation on it, so the next
/// write to it traps through the signal bridge instead of silently
/// corrupting cached code. Grounded in `tb_alloc_page`'s interaction with
/// `page_set_flags` in the original implementation.
fn register_tb_pages<B, M>(env: &mut ExecEnv<B, M>, tb_idx: usize, pc: u64, size: u64)
where
    B: HostCodeGen,
    M: HostMemory,
{
    let start_page = pc & !(page::PAGE_SIZE - 1);
    let end_page = (pc + size.max(1) - 1) & !(page::PAGE_SIZE - 1);

    let pages = if start_page == end_page {
        [Some(start_page), None]
    } else {
        [Some(start_page), Some(end_page)]
    };

    for (slot, page_addr) in pages.into_iter().enumerate() {
        let Some(page_addr) = page_addr else { continue };
        let was_empty = env
            .page_table
            .page_desc(page_addr)
            .map(|d| d.first_tb.is_none())
            .unwrap_or(true);
        env.tb_store.link_page(&mut env.page_table, tb_idx, slot, page_addr);
        if was_empty {
            let flags = env.page_table.get_flags(page_addr);
            if flags & page::PAGE_WRITE != 0 {
                env.page_table.set_flags(page_addr, page_addr + page::PAGE_SIZE, flags & !page::PAGE_WRITE);
                let _ = env.protector.protect_page(&env.mem, page_addr);
            }
        }
    }
}

/// Execute a single TB and return its raw exit value (TB index + exit
/// code, packed by [`encode_tb_exit`]).
///
/// # Safety
/// Called from the unsafe `cpu_exec_loop`.
unsafe fn cpu_tb_exec<B, M, C>(env: &mut ExecEnv<B, M>, cpu: &mut C, tb_idx: usize) -> usize
where
    B: HostCodeGen,
    M: HostMemory,
    C: GuestCpu,
{
    let tb = env.tb_store.get(tb_idx);
    let tb_ptr = env.code_buf.ptr_at(tb.host_offset);
    let env_ptr = cpu.env_ptr();

    let prologue_fn: unsafe extern "C" fn(*mut u8, *const u8) -> usize =
        core::mem::transmute(env.code_buf.base_ptr());
    let raw = prologue_fn(env_ptr, tb_ptr);
    // The prologue/epilogue convention returns the packed (tb_idx, exit)
    // pair only for the goto_tb/nochain exits generated via `ExitTb`;
    // for a raw guest exception exit code >= TB_EXIT_NOCHAIN+1 it's
    // already the bare exception path, so re-encode with this TB's own
    // index for symmetry with the chained cases above.
    if decode_tb_exit(raw).1 > TB_EXIT_NOCHAIN {
        encode_tb_exit(tb_idx as u32, raw as u32)
    } else {
        raw
    }
}
