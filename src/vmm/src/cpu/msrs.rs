// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Builds the zeroed MSR set the bring-up sequence writes once per reset.
//! Zeroing `IA32_TSC` aligns the guest clock to boot; the others simply
//! ensure no stale SYSENTER/SYSCALL state leaks into a freshly reset vCPU.

use kvm_bindings::{kvm_msr_entry, Msrs};

use super::msr_index::*;
use std::result;

#[derive(Debug)]
pub enum Error {
    /// The FAM wrapper rejected the entry count (never expected in practice).
    InvalidMsrEntries,
}

pub type Result<T> = result::Result<T, Error>;

fn zeroed(index: u32) -> kvm_msr_entry {
    kvm_msr_entry {
        index,
        data: 0,
        ..Default::default()
    }
}

/// Entries common to 32- and 64-bit hosts.
fn base_entries() -> Vec<kvm_msr_entry> {
    vec![
        zeroed(MSR_IA32_SYSENTER_CS),
        zeroed(MSR_IA32_SYSENTER_ESP),
        zeroed(MSR_IA32_SYSENTER_EIP),
        zeroed(MSR_IA32_TSC),
    ]
}

/// Entries only present on 64-bit hosts (SYSCALL/SYSRET MSRs).
fn long_mode_entries() -> Vec<kvm_msr_entry> {
    vec![
        zeroed(MSR_STAR),
        zeroed(MSR_LSTAR),
        zeroed(MSR_CSTAR),
        zeroed(MSR_SYSCALL_MASK),
        zeroed(MSR_KERNEL_GS_BASE),
    ]
}

/// Builds the full zeroed MSR list for this (64-bit) host.
pub fn create_boot_msr_entries() -> Result<Msrs> {
    let mut entries = base_entries();
    entries.extend(long_mode_entries());

    Msrs::from_entries(&entries).map_err(|_| Error::InvalidMsrEntries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_entries_are_zero() {
        let msrs = create_boot_msr_entries().unwrap();
        for entry in msrs.as_slice() {
            assert_eq!(entry.data, 0);
        }
    }
}
