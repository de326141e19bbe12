// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Fatal-exit and `SIGQUIT` diagnostics: register dump, a 64-byte code
//! window around `RIP`, and (if the guest has left real mode) a
//! four-level page-table walk. Matches §7.4/§5's diagnostic contract —
//! best-effort only, never itself a source of a fatal error.

use crate::cpu::Vcpu;
use crate::memory::GuestMemory;

const CODE_WINDOW_LEN: usize = 64;
const CODE_WINDOW_RIP_OFFSET: u64 = 43;
const PAGE_TABLE_LEVELS: usize = 4;
const PTE_PRESENT: u64 = 1;
const PTE_ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

pub fn dump(vcpu: &Vcpu, guest_memory: &GuestMemory) {
    let regs = match vcpu.vcpu_fd.get_regs() {
        Ok(r) => r,
        Err(e) => {
            log::error!("diagnostic dump: failed to read registers: {e}");
            return;
        }
    };
    let sregs = match vcpu.vcpu_fd.get_sregs() {
        Ok(s) => s,
        Err(e) => {
            log::error!("diagnostic dump: failed to read sregs: {e}");
            return;
        }
    };

    log::error!(
        "regs: rip={:#018x} rsp={:#018x} rbp={:#018x} rflags={:#018x}",
        regs.rip,
        regs.rsp,
        regs.rbp,
        regs.rflags
    );
    log::error!(
        "regs: rax={:#018x} rbx={:#018x} rcx={:#018x} rdx={:#018x}",
        regs.rax,
        regs.rbx,
        regs.rcx,
        regs.rdx
    );
    log::error!(
        "sregs: cs={:#06x} base={:#010x} ds={:#06x} es={:#06x} ss={:#06x} cr0={:#010x} cr3={:#010x}",
        sregs.cs.selector,
        sregs.cs.base,
        sregs.ds.selector,
        sregs.es.selector,
        sregs.ss.selector,
        sregs.cr0,
        sregs.cr3
    );

    dump_code_window(guest_memory, sregs.cs.base.wrapping_add(regs.rip));

    let protected_mode = sregs.cr0 & 1 != 0;
    if protected_mode {
        dump_page_table_walk(guest_memory, sregs.cr3, sregs.cs.base.wrapping_add(regs.rip));
    }
}

fn dump_code_window(guest_memory: &GuestMemory, linear_rip: u64) {
    let start = linear_rip.wrapping_sub(CODE_WINDOW_RIP_OFFSET);
    let mut bytes = Vec::with_capacity(CODE_WINDOW_LEN);
    for i in 0..CODE_WINDOW_LEN as u64 {
        let ptr = guest_memory.flat_to_host(start.wrapping_add(i));
        if !guest_memory.host_in_ram(ptr) {
            log::error!("diagnostic dump: code window runs outside guest RAM, truncating");
            break;
        }
        // SAFETY: `host_in_ram` just confirmed `ptr` is inside the guest
        // RAM mapping owned by `guest_memory`, which outlives this call.
        bytes.push(unsafe { *ptr });
    }
    log::error!(
        "code window @ {:#010x} (rip-{CODE_WINDOW_RIP_OFFSET}): {}",
        start,
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(" ")
    );
}

/// Best-effort 4-level walk (PML4 -> PDPT -> PD -> PT) rooted at `cr3`,
/// translating the linear address that faulted. Any entry pointing
/// outside guest RAM, or marked not-present, truncates the trail rather
/// than faulting the monitor itself.
fn dump_page_table_walk(guest_memory: &GuestMemory, cr3: u64, linear: u64) {
    let mut table_base = cr3 & PTE_ADDR_MASK;
    log::error!("page-table trail for linear {:#010x}, cr3={:#010x}:", linear, cr3);

    for level in (0..PAGE_TABLE_LEVELS).rev() {
        let index = (linear >> (12 + level * 9)) & 0x1ff;
        let entry_addr = table_base + index * 8;

        let ptr = guest_memory.flat_to_host(entry_addr);
        if !guest_memory.host_in_ram(ptr) {
            log::error!("  level {level}: entry address {entry_addr:#010x} outside guest RAM");
            return;
        }
        // SAFETY: `host_in_ram` confirmed `ptr` and the 8 bytes at it lie
        // inside the guest RAM mapping.
        let entry = unsafe { (ptr as *const u64).read_unaligned() };
        log::error!("  level {level}: index={index:#05x} entry={entry:#018x}");

        if entry & PTE_PRESENT == 0 {
            log::error!("  level {level}: not present, stopping walk");
            return;
        }
        table_base = entry & PTE_ADDR_MASK;
    }

    log::error!("  final physical page base: {:#010x}", table_base);
}
