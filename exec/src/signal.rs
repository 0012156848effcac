//! Fault & Signal Bridge (component H).
//!
//! Installs a `SIGSEGV`/`SIGBUS` handler that recognizes a write fault on
//! a page the cache deliberately write-protected for SMC detection,
//! restores host write access via the [`crate::host_protect::HostProtector`],
//! and retries; any other fault routes back to the dispatcher's unwind
//! checkpoint as a guest exception, instead of the process dying.
//!
//! `libc`'s bindings don't expose `setjmp`/`longjmp`, so the "non-local
//! exit from inside generated code, or from the signal handler examining
//! it" that the original gets from `sigsetjmp`/`siglongjmp` is hand-rolled
//! here as [`Checkpoint`]: an explicit record of the callee-saved
//! registers and stack pointer, captured with inline asm, that the signal
//! handler can write into the faulting `ucontext_t` so the kernel's own
//! `sigreturn` does the actual control transfer — the handler itself never
//! jumps anywhere, which keeps it allocation-free and signal-safe.

use std::cell::Cell;
use std::io;
use std::mem::MaybeUninit;

use xlate_backend::code_buffer::CodeBuffer;
use xlate_core::page::PageTable;

use crate::host_protect::HostProtector;
use crate::tb_store::TbStore;

/// Saved dispatcher resume point: the callee-saved registers and stack
/// pointer a `ucontext_t` needs so that resuming there looks, from the
/// CPU's perspective, exactly like [`save`] returning a second time.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Checkpoint {
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rsp: u64,
    pub rip: u64,
}

/// Capture the current callee-saved register state as a resume point.
/// Returns `true` on the initial (direct) call. Returns `false` when
/// control arrives here a second time via the signal handler splicing
/// this checkpoint into a faulting `ucontext_t` — from the caller's
/// point of view this looks exactly like `sigsetjmp` returning nonzero.
///
/// # Safety
/// Must be called from the dispatcher loop with `cp` valid for the
/// lifetime of the CPU's execution (it's read again from the signal
/// handler at an arbitrary later point).
#[inline(never)]
pub unsafe fn save(cp: *mut Checkpoint) -> bool {
    let resumed: u64;
    let rip: u64;
    let rsp: u64;
    let rbx: u64;
    let rbp: u64;
    let r12: u64;
    let r13: u64;
    let r14: u64;
    let r15: u64;
    std::arch::asm!(
        "lea {rip}, [rip + 2f]",
        "mov {resumed}, 0",
        "jmp 3f",
        "2:",
        "mov {resumed}, 1",
        "3:",
        rip = out(reg) rip,
        resumed = out(reg) resumed,
        out("rbx") rbx,
        out("rbp") rbp,
        out("r12") r12,
        out("r13") r13,
        out("r14") r14,
        out("r15") r15,
    );
    std::arch::asm!("mov {}, rsp", out(reg) rsp);
    if resumed == 0 {
        (*cp) = Checkpoint { rbx, rbp, r12, r13, r14, r15, rsp, rip };
        true
    } else {
        false
    }
}

thread_local! {
    /// Raw pointer to the currently-executing guest CPU's env struct, so
    /// the handler (which gets no user data pointer on the classic POSIX
    /// `sigaction` API) can find where to stash `cr2`/`exception_index`.
    static CURRENT_CPU_ENV: Cell<*mut u8> = Cell::new(std::ptr::null_mut());
    static CURRENT_CHECKPOINT: Cell<*const Checkpoint> = Cell::new(std::ptr::null());
    static CURRENT_ARENA: Cell<(*const u8, usize)> = Cell::new((std::ptr::null(), 0));
}

/// Record the env pointer and checkpoint for the CPU about to run
/// generated code, and the arena's bounds so the handler can tell a JIT
/// fault from a genuinely foreign one. Must be called right before
/// entering generated code and is cheap enough to do every dispatch loop
/// iteration.
pub fn set_current(env_ptr: *mut u8, checkpoint: *const Checkpoint, arena: (*const u8, usize)) {
    CURRENT_CPU_ENV.with(|c| c.set(env_ptr));
    CURRENT_CHECKPOINT.with(|c| c.set(checkpoint));
    CURRENT_ARENA.with(|c| c.set(arena));
}

/// Offsets into the guest CPU env struct the handler writes on an
/// unrecovered fault, matching [`crate::GuestCpu`]'s contract fields.
/// Passed in explicitly rather than hardcoded so the handler doesn't need
/// to know the concrete `GuestCpu` type.
#[derive(Clone, Copy)]
pub struct FaultFieldOffsets {
    pub cr2: usize,
    pub exception_index: usize,
    pub error_code: usize,
}

/// Type-erased shape of `HostProtector::unprotect`: `(mem, page_table,
/// tb_store, code_buf, backend, fault_addr) -> recovered`. `mem` and
/// `backend` are `*const ()` because the handler can't be generic over the
/// embedder's concrete `HostMemory`/`HostCodeGen` types; `page_table`,
/// `tb_store`, and `code_buf` are concrete cache types and need no erasure.
pub type UnprotectFn =
    unsafe fn(*const (), *mut PageTable, *mut TbStore, *const CodeBuffer, *const (), u64) -> bool;

thread_local! {
    static FAULT_OFFSETS: Cell<FaultFieldOffsets> = Cell::new(FaultFieldOffsets { cr2: 0, exception_index: 0, error_code: 0 });
    static PAGE_TABLE_PTR: Cell<*mut PageTable> = Cell::new(std::ptr::null_mut());
    static TB_STORE_PTR: Cell<*mut TbStore> = Cell::new(std::ptr::null_mut());
    static CODE_BUF_PTR: Cell<*const CodeBuffer> = Cell::new(std::ptr::null());
    static MEM_PTR: Cell<*const ()> = Cell::new(std::ptr::null());
    static BACKEND_PTR: Cell<*const ()> = Cell::new(std::ptr::null());
    static UNPROTECT_FN: Cell<Option<UnprotectFn>> = Cell::new(None);
}

/// Wire the host-memory/page-table/cache handles the handler needs to
/// attempt an SMC recovery, including invalidating any TB the recovered
/// page still holds. `unprotect` is a type-erased thunk into
/// `HostProtector::unprotect` for whatever concrete `HostMemory`/
/// `HostCodeGen` the embedder uses, since the handler can't be generic.
pub fn configure(
    offsets: FaultFieldOffsets,
    page_table: *mut PageTable,
    tb_store: *mut TbStore,
    code_buf: *const CodeBuffer,
    mem: *const (),
    backend: *const (),
    unprotect: UnprotectFn,
) {
    FAULT_OFFSETS.with(|c| c.set(offsets));
    PAGE_TABLE_PTR.with(|c| c.set(page_table));
    TB_STORE_PTR.with(|c| c.set(tb_store));
    CODE_BUF_PTR.with(|c| c.set(code_buf));
    MEM_PTR.with(|c| c.set(mem));
    BACKEND_PTR.with(|c| c.set(backend));
    UNPROTECT_FN.with(|c| c.set(Some(unprotect)));
}

/// Build the type-erased unprotect thunk for a concrete `HostMemory`/
/// `HostCodeGen` pair, so the handler — which can't be generic — can still
/// call into `HostProtector::unprotect` and its SMC invalidation path.
pub fn unprotect_thunk<M: crate::host_protect::HostMemory, B: xlate_backend::HostCodeGen>() -> UnprotectFn {
    unsafe fn thunk<M: crate::host_protect::HostMemory, B: xlate_backend::HostCodeGen>(
        mem: *const (),
        pt: *mut PageTable,
        store: *mut TbStore,
        code_buf: *const CodeBuffer,
        backend: *const (),
        addr: u64,
    ) -> bool {
        let mem = &*(mem as *const M);
        let pt = &mut *pt;
        let store = &mut *store;
        let code_buf = &*code_buf;
        let backend = &*(backend as *const B);
        let protector = HostProtector::new(mem.host_page_size());
        matches!(protector.unprotect(mem, pt, store, code_buf, backend, addr), Ok(true))
    }
    thunk::<M, B>
}

/// Install the SIGSEGV/SIGBUS handler. Idempotent; call once at process
/// start before any generated code runs.
pub fn install() -> io::Result<()> {
    unsafe {
        let mut sa: libc::sigaction = MaybeUninit::zeroed().assume_init();
        sa.sa_sigaction = handle_fault as usize;
        sa.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut sa.sa_mask);
        for sig in [libc::SIGSEGV, libc::SIGBUS] {
            if libc::sigaction(sig, &sa, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
    }
    Ok(())
}

extern "C" fn handle_fault(
    sig: libc::c_int,
    info: *mut libc::siginfo_t,
    ucontext: *mut libc::c_void,
) {
    unsafe {
        let fault_addr = (*info).si_addr() as u64;
        let ucontext = &mut *(ucontext as *mut libc::ucontext_t);
        let is_write = fault_is_write(ucontext);

        if is_write {
            if let Some(unprotect) = UNPROTECT_FN.with(|c| c.get()) {
                let pt = PAGE_TABLE_PTR.with(|c| c.get());
                let store = TB_STORE_PTR.with(|c| c.get());
                let code_buf = CODE_BUF_PTR.with(|c| c.get());
                let mem = MEM_PTR.with(|c| c.get());
                let backend = BACKEND_PTR.with(|c| c.get());
                if !pt.is_null()
                    && !store.is_null()
                    && !code_buf.is_null()
                    && !mem.is_null()
                    && !backend.is_null()
                    && unprotect(mem, pt, store, code_buf, backend, fault_addr)
                {
                    return; // retry: kernel resumes the faulting instruction
                }
            }
        }

        let env = CURRENT_CPU_ENV.with(|c| c.get());
        let cp = CURRENT_CHECKPOINT.with(|c| c.get());
        if !env.is_null() && !cp.is_null() {
            let offsets = FAULT_OFFSETS.with(|c| c.get());
            (env.add(offsets.cr2) as *mut u64).write_unaligned(fault_addr);
            (env.add(offsets.exception_index) as *mut u32)
                .write_unaligned(xlate_core::tb::EXCP_PAGE);
            (env.add(offsets.error_code) as *mut u32).write_unaligned(is_write as u32);
            splice_checkpoint_into_ucontext(ucontext, &*cp);
            return;
        }

        // Not ours: restore default disposition and re-raise.
        let mut sa: libc::sigaction = MaybeUninit::zeroed().assume_init();
        sa.sa_sigaction = libc::SIG_DFL;
        libc::sigaction(sig, &sa, std::ptr::null_mut());
        libc::raise(sig);
    }
}

#[cfg(target_os = "linux")]
unsafe fn fault_is_write(ucontext: &libc::ucontext_t) -> bool {
    // ERR bit 1 of the x86-64 page-fault error code is the write bit.
    let err = ucontext.uc_mcontext.gregs[libc::REG_ERR as usize];
    err & 0x2 != 0
}

#[cfg(target_os = "linux")]
unsafe fn splice_checkpoint_into_ucontext(ucontext: &mut libc::ucontext_t, cp: &Checkpoint) {
    let g = &mut ucontext.uc_mcontext.gregs;
    g[libc::REG_RBX as usize] = cp.rbx as i64;
    g[libc::REG_RBP as usize] = cp.rbp as i64;
    g[libc::REG_R12 as usize] = cp.r12 as i64;
    g[libc::REG_R13 as usize] = cp.r13 as i64;
    g[libc::REG_R14 as usize] = cp.r14 as i64;
    g[libc::REG_R15 as usize] = cp.r15 as i64;
    g[libc::REG_RSP as usize] = cp.rsp as i64;
    g[libc::REG_RIP as usize] = cp.rip as i64;
}

/// Abort with a diagnostic for a `HostBug`-class error: a fault whose
/// address doesn't correspond to anything the cache or guest page table
/// knows about. Mirrors the teacher's existing plain-`eprintln!`
/// diagnostic style (see `ExecStats`'s `Display` impl) rather than
/// reaching for a logging crate this corpus never uses.
pub fn abort_with_diagnostic(msg: &str) -> ! {
    eprintln!("[xlate] fatal: {msg}");
    std::process::abort();
}
