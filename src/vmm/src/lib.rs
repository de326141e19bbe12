// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

#![cfg(target_arch = "x86_64")]

extern crate libc;
extern crate linux_loader;
extern crate vm_memory;

use std::fs::OpenOptions;
use std::io;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use kvm_bindings::{
    kvm_guest_debug, kvm_pit_config, kvm_userspace_memory_region, KVM_GUESTDBG_ENABLE,
    KVM_GUESTDBG_SINGLESTEP, KVM_MAX_CPUID_ENTRIES, KVM_PIT_SPEAKER_DUMMY,
};
use kvm_ioctls::{Cap, Kvm, VcpuExit, VmFd};
use vm_memory::{Address, GuestAddress, GuestMemory as GuestMemoryTrait, GuestMemoryRegion};
use vmm_sys_util::terminal::Terminal;

pub mod bios;
pub mod config;
mod cpu;
pub mod devices;
mod diagnostics;
mod ivt;
mod kernel;
mod memory;
pub mod signals;
mod timer;

pub use config::VMMConfig;
pub use memory::GuestMemory;

use cpu::Vcpu;
use devices::block::BlockConfig;
use devices::serial::ConsoleUart;
use devices::{Bus, DeviceBus, IoDirection};
use timer::IntervalTimer;

/// `KVM_SET_TSS_ADDR` target. Chosen, as on every x86_64 rust-vmm
/// monitor, to sit just below the 4 GiB boundary and out of the way of
/// any guest-visible memory.
const TSS_ADDRESS: u64 = 0xFFFB_D000;
/// Legacy COM1 IRQ line the UART's eventfd is wired to via `KVM_IRQFD`.
const SERIAL_IRQ: u32 = 4;

/// Every capability the monitor requires before it will touch the
/// hypervisor device further. Absence of any one is fatal (§6).
const REQUIRED_CAPS: &[(Cap, &str)] = &[
    (Cap::CoalescedMmio, "KVM_CAP_COALESCED_MMIO"),
    (Cap::SetTssAddr, "KVM_CAP_SET_TSS_ADDR"),
    (Cap::Pit2, "KVM_CAP_PIT2"),
    (Cap::UserMemory, "KVM_CAP_USER_MEMORY"),
    (Cap::IrqRouting, "KVM_CAP_IRQ_ROUTING"),
    (Cap::Irqchip, "KVM_CAP_IRQCHIP"),
    (Cap::Hlt, "KVM_CAP_HLT"),
    (Cap::IrqInjectStatus, "KVM_CAP_IRQ_INJECT_STATUS"),
    (Cap::ExtCpuid, "KVM_CAP_EXT_CPUID"),
];

/// Monitor errors. Every variant here is fatal: the dispatch loop never
/// retries (§7).
#[derive(Debug)]
pub enum Error {
    /// A required hypervisor capability is missing.
    MissingCapability(&'static str),
    /// Error issuing an ioctl to KVM.
    KvmIoctl(kvm_ioctls::Error),
    /// Memory error.
    Memory(vm_memory::Error),
    /// I/O error (opening the kvm device, reading the kernel image, ...).
    IO(io::Error),
    /// vCPU bring-up or runtime error.
    Vcpu(cpu::Error),
    /// The kernel image was recognized as neither a valid bzImage nor
    /// loadable as a flat binary.
    NotBzImage,
    /// bzImage protocol version below the supported floor.
    KernelTooOld(u16),
    /// Invalid E820 configuration (too many entries, or RAM too small to
    /// cover the high region the bzImage loader maps at 1 MiB).
    E820Configuration,
    /// A VM exit the dispatcher has no handler for; `run()` terminates.
    UnhandledExit(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Opens `path` as the hypervisor control device. `kvm-ioctls` only
/// opens the hardcoded `/dev/kvm`; `--kvm-dev` needs the raw-fd path
/// instead, which every rust-vmm KVM wrapper (`VmFd`, `VcpuFd`, `Kvm`
/// itself) supports via `FromRawFd`.
fn open_kvm(path: &std::path::Path) -> Result<Kvm> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(Error::IO)?;
    Ok(unsafe { Kvm::from_raw_fd(file.into_raw_fd()) })
}

fn check_capabilities(kvm: &Kvm) -> Result<()> {
    for (cap, name) in REQUIRED_CAPS {
        if !kvm.check_extension(*cap) {
            return Err(Error::MissingCapability(name));
        }
    }
    Ok(())
}

fn register_guest_memory(vm_fd: &VmFd, guest_memory: &GuestMemory) -> Result<()> {
    let mmap = guest_memory.mmap();
    let region = mmap
        .find_region(GuestAddress(0))
        .expect("a just-allocated single-region guest memory always covers address 0");

    let kvm_region = kvm_userspace_memory_region {
        slot: 0,
        guest_phys_addr: region.start_addr().raw_value(),
        memory_size: region.len(),
        userspace_addr: guest_memory.ram_base() as u64,
        flags: 0,
    };

    // SAFETY: `userspace_addr` points at memory this process owns for the
    // lifetime of `guest_memory`, which outlives the VM (see `Vmm::drop`).
    unsafe { vm_fd.set_user_memory_region(kvm_region) }.map_err(Error::KvmIoctl)
}

/// Owns every resource the run loop touches: the hypervisor handles, the
/// guest RAM, the sole vCPU, the device bus and the periodic interrupt
/// injector. One instance per VM, per §3.
pub struct Vmm {
    vm_fd: VmFd,
    kvm: Kvm,
    guest_memory: GuestMemory,
    vcpu: Vcpu,
    device_bus: Bus,
    serial: Arc<Mutex<ConsoleUart>>,
    /// Remembers `--image`, if given; the virtio-blk device itself is out
    /// of scope, so this is never read back by the dispatch loop.
    _block: Option<BlockConfig>,
    timer: Option<IntervalTimer>,
    ioport_debug: bool,
}

impl Vmm {
    /// Brings a VM from nothing to "ready to run()": opens the
    /// hypervisor device, probes capabilities, creates the VM and its
    /// single user-memory slot, loads the kernel image, wires the UART,
    /// creates and resets the sole vCPU. Any failure here is
    /// environmental or configuration-level and is fatal (§7.1, §7.2).
    pub fn new(config: &VMMConfig) -> Result<Self> {
        let kvm = open_kvm(&config.kvm_device)?;
        check_capabilities(&kvm)?;

        let vm_fd = kvm.create_vm().map_err(Error::KvmIoctl)?;
        vm_fd
            .set_tss_address(TSS_ADDRESS as usize)
            .map_err(Error::KvmIoctl)?;

        let pit_config = kvm_pit_config {
            flags: KVM_PIT_SPEAKER_DUMMY,
            ..Default::default()
        };
        vm_fd.create_pit2(pit_config).map_err(Error::KvmIoctl)?;

        let ram_size = config.memory_mb as usize * 1024 * 1024;
        let guest_memory = GuestMemory::new(ram_size).map_err(Error::Memory)?;
        register_guest_memory(&vm_fd, &guest_memory)?;

        let boot_info = kernel::load_kernel(
            guest_memory.mmap(),
            ram_size as u64,
            &config.kernel,
            Some(config.cmdline.as_str()),
        )?;

        vm_fd.create_irq_chip().map_err(Error::KvmIoctl)?;

        let serial = Arc::new(Mutex::new(ConsoleUart::new().map_err(Error::IO)?));
        let serial_eventfd = serial.lock().unwrap().eventfd().map_err(Error::IO)?;
        vm_fd
            .register_irqfd(&serial_eventfd, SERIAL_IRQ)
            .map_err(Error::KvmIoctl)?;

        let max_cpuid_entries = KVM_MAX_CPUID_ENTRIES;
        let vcpu = Vcpu::new(&vm_fd, 0, boot_info).map_err(Error::Vcpu)?;
        vcpu.reset(&kvm, max_cpuid_entries).map_err(Error::Vcpu)?;

        if config.single_step {
            let debug = kvm_guest_debug {
                control: KVM_GUESTDBG_ENABLE | KVM_GUESTDBG_SINGLESTEP,
                ..Default::default()
            };
            vcpu.vcpu_fd.set_guest_debug(&debug).map_err(Error::KvmIoctl)?;
        }

        let device_bus = Bus::new(Arc::clone(&serial));
        let block = config.image.clone().map(BlockConfig::new);

        Ok(Vmm {
            vm_fd,
            kvm,
            guest_memory,
            vcpu,
            device_bus,
            serial,
            _block: block,
            timer: None,
            ioport_debug: config.ioport_debug,
        })
    }

    /// Builds a `VMMConfig` and a `Vmm` in one step; the thin CLI
    /// entrypoint `main.rs` calls only this and [`Vmm::run`].
    pub fn from_config(config: VMMConfig) -> Result<Self> {
        Self::new(&config)
    }

    /// The exit-dispatch loop (§4.6). Arms the 1 ms periodic interrupt
    /// injector, installs `SIGINT`/`SIGQUIT`, puts the terminal in raw
    /// mode for the guest console, then runs the sole vCPU until a fatal
    /// exit, a `SIGINT` (clean shutdown) or a `SIGQUIT` (diagnostic dump)
    /// is observed. The terminal is always restored to canonical mode
    /// before returning, fatally or not.
    pub fn run(&mut self) -> Result<()> {
        signals::register().map_err(Error::IO)?;
        self.timer = Some(IntervalTimer::arm().map_err(Error::IO)?);

        if io::stdin().lock().set_raw_mode().is_err() {
            log::warn!("failed to set raw mode on terminal; guest console will echo");
        }
        let result = self.dispatch_loop();
        if io::stdin().lock().set_canon_mode().is_err() {
            log::warn!("failed to restore terminal canonical mode");
        }
        result
    }

    fn dispatch_loop(&mut self) -> Result<()> {
        loop {
            match self.vcpu.run() {
                Ok(VcpuExit::IoIn(port, data)) => {
                    if self.ioport_debug {
                        log::debug!("io in  port={:#06x} len={}", port, data.len());
                    }
                    if !self.device_bus.emulate_io(port, data, IoDirection::In) {
                        return Err(self.fatal("unhandled IO-in"));
                    }
                }
                Ok(VcpuExit::IoOut(port, data)) => {
                    if self.ioport_debug {
                        log::debug!("io out port={:#06x} len={}", port, data.len());
                    }
                    let mut buf = [0u8; 4];
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    if !self
                        .device_bus
                        .emulate_io(port, &mut buf[..len], IoDirection::Out)
                    {
                        return Err(self.fatal("unhandled IO-out"));
                    }
                }
                Ok(VcpuExit::MmioRead(addr, data)) => {
                    if !self.device_bus.emulate_mmio(addr, data, false) {
                        return Err(self.fatal("unhandled MMIO read"));
                    }
                }
                Ok(VcpuExit::MmioWrite(addr, data)) => {
                    let mut buf = [0u8; 8];
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    if !self.device_bus.emulate_mmio(addr, &mut buf[..len], true) {
                        return Err(self.fatal("unhandled MMIO write"));
                    }
                }
                Ok(VcpuExit::Debug(_)) => {
                    self.dump_diagnostics();
                }
                Ok(VcpuExit::Hlt) => {
                    // Guest idled; the next timer tick re-enters KVM_RUN.
                }
                Ok(VcpuExit::Intr) => {
                    // A host signal (the 1 ms timer, or a shutdown/dump
                    // request) interrupted KVM_RUN; nothing to do beyond
                    // looping back — interrupt delivery to the guest
                    // already happened via the UART's irqfd.
                }
                Ok(other) => {
                    return Err(self.fatal(&format!("unhandled exit reason: {:?}", other)));
                }
                Err(e) if e.errno() == libc::EINTR => {
                    // Older kernels surface the timer/signal interruption
                    // as an ioctl error rather than `VcpuExit::Intr`.
                }
                Err(e) => {
                    return Err(Error::KvmIoctl(e));
                }
            }

            if signals::DIAGNOSTIC_DUMP_REQUESTED.swap(false, Ordering::SeqCst) {
                self.dump_diagnostics();
                return Ok(());
            }
            if signals::SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    /// Dumps registers, a 64-byte code window and (in protected mode) a
    /// four-level page-table walk to the diagnostic sink, then builds
    /// the [`Error`] the caller returns. Matches §7.4's fatal-exit
    /// diagnostic contract.
    fn fatal(&self, reason: &str) -> Error {
        log::error!("fatal VM exit: {reason}");
        self.dump_diagnostics();
        Error::UnhandledExit(reason.to_string())
    }

    fn dump_diagnostics(&self) {
        diagnostics::dump(&self.vcpu, &self.guest_memory);
    }
}
