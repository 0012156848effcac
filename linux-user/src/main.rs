use std::env;
use std::process;

use xlate_backend::X86_64CodeGen;
use xlate_core::context::Context;
use xlate_core::tb::{EXCP_EBREAK, EXCP_ECALL, EXCP_INTERRUPT, EXCP_PAGE, EXCP_UNDEF};
use xlate_core::TempIdx;
use xlate_exec::exec_loop::{cpu_exec_loop, ExitReason};
use xlate_exec::signal::{self, FaultFieldOffsets};
use xlate_exec::smc;
use xlate_exec::{ExecEnv, GuestCpu};
use xlate_frontend::riscv::cpu::{
    RiscvCpu, CR2_OFFSET, ERROR_CODE_OFFSET, EXCEPTION_INDEX_OFFSET, NUM_GPRS,
};
use xlate_frontend::riscv::{RiscvDisasContext, RiscvTranslator};
use xlate_frontend::{translator_loop, DisasJumpType, TranslatorOps};
use xlate_linux_user::guest_space::GuestSpace;
use xlate_linux_user::loader::{load_elf, ElfInfo};
use xlate_linux_user::syscall::{handle_syscall, SyscallResult};

/// Wrapper: `RiscvCpu` plus the bits `GuestCpu` needs that aren't part of
/// the architectural state (exception/error-code/interrupt bookkeeping
/// lives directly on `RiscvCpu` so the signal bridge can reach it at a
/// fixed offset from the env pointer).
struct LinuxCpu {
    cpu: RiscvCpu,
}

impl GuestCpu for LinuxCpu {
    fn get_pc(&self) -> u64 {
        self.cpu.pc
    }

    fn get_flags(&self) -> u32 {
        0
    }

    fn gen_code(&mut self, ir: &mut Context, pc: u64, max_insns: u32) -> u32 {
        let base = self.cpu.guest_base as *const u8;
        if ir.nb_globals() == 0 {
            let mut d = RiscvDisasContext::new(pc, base);
            d.base.max_insns = max_insns;
            translator_loop::<RiscvTranslator>(&mut d, ir);
            d.base.num_insns * 4
        } else {
            let mut d = RiscvDisasContext::new(pc, base);
            d.base.max_insns = max_insns;
            d.env = TempIdx(0);
            for i in 0..NUM_GPRS {
                d.gpr[i] = TempIdx(1 + i as u32);
            }
            d.pc = TempIdx(1 + NUM_GPRS as u32);
            d.load_res = TempIdx(1 + NUM_GPRS as u32 + 1);
            d.load_val = TempIdx(1 + NUM_GPRS as u32 + 2);
            RiscvTranslator::tb_start(&mut d, ir);
            loop {
                RiscvTranslator::insn_start(&mut d, ir);
                RiscvTranslator::translate_insn(&mut d, ir);
                if d.base.is_jmp != DisasJumpType::Next {
                    break;
                }
                if d.base.num_insns >= d.base.max_insns {
                    d.base.is_jmp = DisasJumpType::TooMany;
                    break;
                }
            }
            RiscvTranslator::tb_stop(&mut d, ir);
            d.base.num_insns * 4
        }
    }

    fn env_ptr(&mut self) -> *mut u8 {
        &mut self.cpu as *mut RiscvCpu as *mut u8
    }

    fn exception_index(&self) -> u32 {
        self.cpu.exception_index
    }

    fn set_exception_index(&mut self, index: u32) {
        self.cpu.exception_index = index;
    }

    fn error_code(&self) -> u32 {
        self.cpu.error_code
    }

    fn interrupt_request(&self) -> bool {
        self.cpu.interrupt_pending
    }

    fn clear_interrupt(&mut self) {
        self.cpu.interrupt_pending = false;
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("usage: xlate-riscv64 <elf> [args...]");
        process::exit(1);
    }

    let elf_path =
        std::fs::canonicalize(&args[1]).expect("failed to resolve elf path");
    let elf_path = elf_path.to_str().unwrap();
    let guest_argv: Vec<&str> = args[1..].iter().map(|s| s.as_str()).collect();

    // Load ELF
    let mut space = GuestSpace::new().expect("failed to create guest space");
    let info: ElfInfo =
        load_elf(std::path::Path::new(elf_path), &mut space, &guest_argv, &[])
            .expect("failed to load ELF");

    // Set up CPU
    let mut lcpu = LinuxCpu {
        cpu: RiscvCpu::new(),
    };
    lcpu.cpu.pc = info.entry;
    lcpu.cpu.gpr[2] = info.sp; // SP = x2
    lcpu.cpu.guest_base = space.guest_base() as u64;

    // mmap_next starts after brk
    let mut mmap_next =
        xlate_linux_user::guest_space::page_align_up(info.brk) + 0x1000_0000; // 256 MB gap

    let show_stats = env::var("XLATE_STATS").is_ok();
    let mut env = ExecEnv::new(X86_64CodeGen::new(), space);

    signal::install().expect("failed to install signal handler");
    signal::configure(
        FaultFieldOffsets {
            cr2: CR2_OFFSET,
            exception_index: EXCEPTION_INDEX_OFFSET,
            error_code: ERROR_CODE_OFFSET,
        },
        &mut env.page_table as *mut _,
        &mut env.tb_store as *mut _,
        &env.code_buf as *const _,
        &env.mem as *const GuestSpace as *const (),
        &env.backend as *const X86_64CodeGen as *const (),
        signal::unprotect_thunk::<GuestSpace, X86_64CodeGen>(),
    );

    loop {
        let reason = unsafe { cpu_exec_loop(&mut env, &mut lcpu) };
        match reason {
            ExitReason::Exception { index, .. } if index == EXCP_ECALL => {
                let mut to_invalidate = Vec::new();
                let result = handle_syscall(
                    &mut env.mem,
                    &mut lcpu.cpu.gpr,
                    &mut mmap_next,
                    elf_path,
                    &mut env.page_table,
                    &mut to_invalidate,
                );
                for page_addr in to_invalidate {
                    smc::invalidate_page(
                        &mut env.tb_store,
                        &mut env.page_table,
                        &env.code_buf,
                        &env.backend,
                        page_addr,
                    );
                }
                env.jump_cache.invalidate();
                match result {
                    SyscallResult::Continue(ret) => {
                        lcpu.cpu.gpr[10] = ret;
                        lcpu.cpu.pc += 4; // skip past ECALL
                    }
                    SyscallResult::Exit(code) => {
                        if show_stats {
                            eprint!("{}", env.stats);
                        }
                        process::exit(code);
                    }
                }
            }
            ExitReason::Exception { index, .. } if index == EXCP_EBREAK => {
                if show_stats {
                    eprint!("{}", env.stats);
                }
                eprintln!("ebreak at pc={:#x}", lcpu.cpu.pc);
                process::exit(1);
            }
            ExitReason::Exception { index, .. } if index == EXCP_UNDEF => {
                if show_stats {
                    eprint!("{}", env.stats);
                }
                eprintln!("illegal instruction at pc={:#x}", lcpu.cpu.pc);
                process::exit(1);
            }
            ExitReason::Exception { index, error_code } if index == EXCP_PAGE => {
                if show_stats {
                    eprint!("{}", env.stats);
                }
                eprintln!(
                    "segmentation fault at pc={:#x} addr={:#x} write={}",
                    lcpu.cpu.pc, lcpu.cpu.cr2, error_code != 0
                );
                process::exit(139);
            }
            ExitReason::Exception { index, .. } if index == EXCP_INTERRUPT => {
                // No asynchronous interrupt sources in single-threaded
                // user-mode emulation yet; nothing to deliver.
                continue;
            }
            ExitReason::Exception { index, .. } => {
                if show_stats {
                    eprint!("{}", env.stats);
                }
                eprintln!("unexpected exception {index}");
                process::exit(1);
            }
            ExitReason::ArenaFull => {
                env.flush();
                lcpu.cpu.exception_index = 0;
            }
        }
    }
}
