// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! CPUID setup for the sole vCPU. With only one vCPU there's no topology
//! to filter (no APIC ID spreading, no core/thread count patching as a
//! multi-vCPU monitor would need) — the host's supported CPUID set is
//! used as-is.

use kvm_ioctls::{Kvm, VcpuFd};

use super::Result;
use crate::cpu::Error;

/// Queries the host for its supported CPUID set and applies it to `vcpu`.
pub fn configure(kvm: &Kvm, vcpu: &VcpuFd, max_entries: usize) -> Result<()> {
    let cpuid = kvm
        .get_supported_cpuid(max_entries)
        .map_err(Error::KvmIoctl)?;
    vcpu.set_cpuid2(&cpuid).map_err(Error::KvmIoctl)
}
