// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! vCPU bring-up: seeds segment registers, control registers,
//! general-purpose registers, MSRs and FPU state so the guest starts in a
//! well-defined 16-bit real mode. Everything here runs once, in the
//! strict order spec'd in the component design (§4.5), and is idempotent:
//! calling [`Vcpu::reset`] again after a non-fatal debug exit reproduces
//! the identical pre-boot state.

use std::result;

use kvm_bindings::{kvm_fpu, kvm_regs, kvm_sregs};
use kvm_ioctls::{Kvm, VcpuExit, VcpuFd, VmFd};

pub(crate) mod cpuid;
pub(crate) mod msr_index;
pub(crate) mod msrs;

use crate::kernel::BootInfo;

/// Errors encountered during vCPU operation.
#[derive(Debug)]
pub enum Error {
    /// I/O Error.
    IO(std::io::Error),
    /// Error issuing an ioctl to KVM.
    KvmIoctl(kvm_ioctls::Error),
    /// The real-mode invariant `rip <= 0xffff` was violated.
    RipOutOfRealModeRange(u64),
    /// Failed to configure MSRs.
    SetModelSpecificRegistersCount,
    /// Failed to build the MSR list.
    CreateMsr(msrs::Error),
}

/// Dedicated Result type.
pub type Result<T> = result::Result<T, Error>;

const REAL_MODE_RFLAGS: u64 = 0x0000_0000_0000_0002;
const REAL_MODE_RIP_MAX: u64 = 0xffff;

const FCW_DEFAULT: u16 = 0x037f;
const MXCSR_DEFAULT: u32 = 0x1f80;

/// Wraps a single vCPU file descriptor with the bring-up and
/// exit-dispatch operations the monitor needs.
pub struct Vcpu {
    pub index: u64,
    pub vcpu_fd: VcpuFd,
    boot_info: BootInfo,
}

impl Vcpu {
    /// Creates the sole vCPU.
    pub fn new(vm_fd: &VmFd, index: u64, boot_info: BootInfo) -> Result<Self> {
        Ok(Vcpu {
            index,
            vcpu_fd: vm_fd.create_vcpu(index).map_err(Error::KvmIoctl)?,
            boot_info,
        })
    }

    /// Runs the full bring-up sequence: CPUID, segment state, general
    /// registers, FPU state, MSRs — in that order, matching §4.5.
    pub fn reset(&self, kvm: &Kvm, max_cpuid_entries: usize) -> Result<()> {
        cpuid::configure(kvm, &self.vcpu_fd, max_cpuid_entries)?;
        self.configure_sregs()?;
        self.configure_regs()?;
        self.configure_fpu()?;
        self.configure_msrs()?;
        Ok(())
    }

    /// Segment state: CS/SS/DS/ES/FS/GS selector and base set for a flat
    /// real-mode start; limits, GDT/IDT/LDT are left at whatever the
    /// hypervisor's freshly-created vCPU already has.
    fn configure_sregs(&self) -> Result<()> {
        let mut sregs: kvm_sregs = self.vcpu_fd.get_sregs().map_err(Error::KvmIoctl)?;

        let selector = self.boot_info.selector;
        let base = (selector as u64) * 16;

        for seg in [
            &mut sregs.cs,
            &mut sregs.ss,
            &mut sregs.ds,
            &mut sregs.es,
            &mut sregs.fs,
            &mut sregs.gs,
        ] {
            seg.selector = selector;
            seg.base = base;
        }

        self.vcpu_fd.set_sregs(&sregs).map_err(Error::KvmIoctl)
    }

    /// General-purpose state: `rflags = 2`, `rip`/`rsp`/`rbp` from the
    /// loader's entry point and stack.
    fn configure_regs(&self) -> Result<()> {
        let rip = self.boot_info.ip as u64;
        if rip > REAL_MODE_RIP_MAX {
            return Err(Error::RipOutOfRealModeRange(rip));
        }

        let sp = self.boot_info.sp as u64;
        let regs = kvm_regs {
            rflags: REAL_MODE_RFLAGS,
            rip,
            rsp: sp,
            rbp: sp,
            ..Default::default()
        };
        self.vcpu_fd.set_regs(&regs).map_err(Error::KvmIoctl)
    }

    /// Floating-point state: default x87 control word and MXCSR, all
    /// other fields zero.
    fn configure_fpu(&self) -> Result<()> {
        let fpu = kvm_fpu {
            fcw: FCW_DEFAULT,
            mxcsr: MXCSR_DEFAULT,
            ..Default::default()
        };
        self.vcpu_fd.set_fpu(&fpu).map_err(Error::KvmIoctl)
    }

    /// MSRs: SYSENTER_CS/ESP/EIP, TSC, and (64-bit hosts) the SYSCALL
    /// MSRs, all zeroed.
    fn configure_msrs(&self) -> Result<()> {
        let msrs = msrs::create_boot_msr_entries().map_err(Error::CreateMsr)?;
        self.vcpu_fd
            .set_msrs(&msrs)
            .map_err(Error::KvmIoctl)
            .and_then(|written| {
                if written as u32 != msrs.as_fam_struct_ref().nmsrs {
                    Err(Error::SetModelSpecificRegistersCount)
                } else {
                    Ok(())
                }
            })
    }

    /// Calls into KVM to run the vCPU. Blocks until either an error or a
    /// VM exit; the caller (the monitor's dispatch loop) decodes the
    /// exit reason.
    pub fn run(&mut self) -> result::Result<VcpuExit, kvm_ioctls::Error> {
        self.vcpu_fd.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_mode_rflags_has_only_the_reserved_bit() {
        assert_eq!(REAL_MODE_RFLAGS, 0x2);
    }

    #[test]
    fn rip_above_real_mode_ceiling_is_out_of_range() {
        assert!(0x1_0000u64 > REAL_MODE_RIP_MAX);
    }
}
