//! Execution Engine — Translation-Block cache, guest page table, SMC
//! protection, and the CPU execution loop that ties them together.
//!
//! Single `cache_lock`-guarded cache shared by one guest CPU at a time;
//! multi-core parallel execution of one guest is out of scope (see
//! `DESIGN.md`).
//!
//! Reference: `~/qemu/accel/tcg/cpu-exec.c`, `~/qemu/accel/tcg/translate-all.c`,
//! `~/qemu/exec.c`.

pub mod chain;
pub mod exec_loop;
pub mod host_protect;
pub mod signal;
pub mod smc;
pub mod tb_store;


pub use exec_loop::{cpu_exec_loop, ExitReason};
pub use host_protect::HostMemory;
pub use tb_store::TbStore;

use std::fmt;
use std::sync::Mutex;

use xlate_backend::code_buffer::CodeBuffer;
use xlate_backend::HostCodeGen;
use xlate_core::page::PageTable;
use xlate_core::tb::JumpCache;
use xlate_core::Context;

use host_protect::HostProtector;
use signal::Checkpoint;

/// Execution statistics for profiling the TB lookup/chain pipeline.
#[derive(Default)]
pub struct ExecStats {
    pub loop_iters: u64,
    // TB lookup
    pub jc_hit: u64,
    pub ht_hit: u64,
    pub translate: u64,
    // Exit types
    pub chain_exit: [u64; 2],
    pub nochain_exit: u64,
    pub real_exit: u64,
    // Chaining
    pub chain_patched: u64,
    pub chain_already: u64,
    // Hint
    pub hint_used: u64,
}

impl fmt::Display for ExecStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_lookup = self.jc_hit + self.ht_hit + self.translate;
        writeln!(f, "=== Execution Stats ===")?;
        writeln!(f, "loop iters:    {}", self.loop_iters)?;
        writeln!(f, "--- TB lookup ---")?;
        writeln!(f, "  jc hit:      {} ({:.1}%)", self.jc_hit, pct(self.jc_hit, total_lookup))?;
        writeln!(f, "  ht hit:      {} ({:.1}%)", self.ht_hit, pct(self.ht_hit, total_lookup))?;
        writeln!(f, "  translate:   {} ({:.1}%)", self.translate, pct(self.translate, total_lookup))?;
        writeln!(f, "--- Exit types ---")?;
        writeln!(f, "  chain[0]:    {}", self.chain_exit[0])?;
        writeln!(f, "  chain[1]:    {}", self.chain_exit[1])?;
        writeln!(f, "  nochain:     {}", self.nochain_exit)?;
        writeln!(f, "  real exit:   {}", self.real_exit)?;
        writeln!(f, "--- Chaining ---")?;
        writeln!(f, "  patched:     {}", self.chain_patched)?;
        writeln!(f, "  already:     {}", self.chain_already)?;
        writeln!(f, "--- Hint ---")?;
        writeln!(f, "  hint used:   {}", self.hint_used)
    }
}

fn pct(n: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        n as f64 / total as f64 * 100.0
    }
}

/// Trait for guest CPU state used by the execution loop. `env_ptr`'s
/// target struct must also carry the `cr2`/`exception_index`/`error_code`
/// fields the signal bridge writes on an unrecovered fault, at the
/// offsets passed to [`signal::configure`].
pub trait GuestCpu {
    fn get_pc(&self) -> u64;
    fn get_flags(&self) -> u32;
    fn gen_code(&mut self, ir: &mut Context, pc: u64, max_insns: u32) -> u32;
    fn env_ptr(&mut self) -> *mut u8;

    fn exception_index(&self) -> u32;
    fn set_exception_index(&mut self, index: u32);
    fn error_code(&self) -> u32;
    fn interrupt_request(&self) -> bool;
    fn clear_interrupt(&mut self);
}

/// All cache state for one guest CPU: TB pool + hash index, guest page
/// table, code arena, host code generator, the translation IR context,
/// the per-CPU jump cache, and the host-mprotect bridge for SMC
/// detection. Guarded as a unit by `cache_lock` for the mutating
/// operations (translate, chain, invalidate, flush); non-goal: sharing
/// one cache across multiple concurrently-executing vCPUs.
pub struct ExecEnv<B: HostCodeGen, M: HostMemory> {
    pub tb_store: TbStore,
    pub page_table: PageTable,
    pub code_buf: CodeBuffer,
    pub backend: B,
    pub code_gen_start: usize,
    pub ir_ctx: Context,
    pub jump_cache: JumpCache,
    pub stats: ExecStats,
    pub protector: HostProtector,
    pub mem: M,
    pub checkpoint: Checkpoint,
    /// Serializes the mutating cache operations. A single-CPU embedder
    /// never contends on it; it exists so the shape of the cache matches
    /// what a second vCPU thread would need to respect, without actually
    /// supporting concurrent execution (see `DESIGN.md`'s Non-goals).
    pub cache_lock: Mutex<()>,
}

impl<B: HostCodeGen, M: HostMemory> ExecEnv<B, M> {
    pub fn new(mut backend: B, mem: M) -> Self {
        let mut code_buf = CodeBuffer::new(16 * 1024 * 1024).expect("mmap failed");
        backend.emit_prologue(&mut code_buf);
        backend.emit_epilogue(&mut code_buf);
        let code_gen_start = code_buf.offset();

        let mut ir_ctx = Context::new();
        backend.init_context(&mut ir_ctx);

        let page_size = mem.host_page_size();

        Self {
            tb_store: TbStore::new(),
            page_table: PageTable::new(),
            code_buf,
            backend,
            code_gen_start,
            ir_ctx,
            jump_cache: JumpCache::new(),
            stats: ExecStats::default(),
            protector: HostProtector::new(page_size),
            mem,
            checkpoint: Checkpoint::default(),
            cache_lock: Mutex::new(()),
        }
    }

    /// Flush every TB, the hash index, the guest page table's TB links,
    /// and the per-CPU jump cache. Called by the dispatcher on
    /// `ExitReason::ArenaFull`, and available for an explicit
    /// guest-triggered full flush (e.g. `SYS_MUNMAP` covering code the
    /// embedder can't cheaply invalidate page-by-page).
    ///
    /// Resetting the page table's `first_tb` links is load-bearing, not
    /// cosmetic: `tb_store.flush()` discards the pool and the next
    /// `alloc` reuses index 0 onward, so a page list still pointing at a
    /// pre-flush index would alias an unrelated post-flush TB instead of
    /// being empty.
    pub fn flush(&mut self) {
        let _guard = self.cache_lock.lock().unwrap();
        self.tb_store.flush();
        self.page_table.clear_tb_links();
        self.jump_cache.invalidate();
        self.code_buf.set_offset(self.code_gen_start);
    }
}
