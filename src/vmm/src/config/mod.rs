// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Monitor configuration: CLI-level validation, done before any hypervisor
//! handle is opened. A [`VMMConfig`] is the only thing [`crate::Vmm::new`]
//! ever takes as input.

mod builder;

use std::convert::TryFrom;
use std::path::{Path, PathBuf};

use linux_loader::cmdline::Cmdline;

pub use builder::VMMConfigBuilder;

const KERNEL_CMDLINE_CAPACITY: usize = 4096;
const KERNEL_CMDLINE_DEFAULT: &str = "console=ttyS0 i8042.nokbd reboot=k panic=1 pci=off";

/// Default `/dev/kvm`-alike device path.
pub const DEFAULT_KVM_DEVICE: &str = "/dev/kvm";
/// Guest RAM floor, in MiB. Below this the real-mode E820 map the BIOS
/// stub serves doesn't leave the kernel enough high memory to boot.
pub const MIN_MEMORY_MB: u32 = 64;
pub const DEFAULT_MEMORY_MB: u32 = MIN_MEMORY_MB;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("kernel image not found at {0}")]
    KernelNotFound(PathBuf),
    #[error("--mem value {0} MiB is below the {MIN_MEMORY_MB} MiB floor")]
    MemoryTooSmall(u32),
    #[error("--mem value {requested} MiB exceeds host-available memory ({available} MiB)")]
    MemoryTooLarge { requested: u32, available: u32 },
    #[error("kernel command line exceeds the {KERNEL_CMDLINE_CAPACITY}-byte capacity")]
    Cmdline(#[from] linux_loader::cmdline::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fully validated monitor configuration. Constructed only through
/// [`VMMConfigBuilder::build`], which is the single point every CLI-level
/// invariant (§7.1 of the component design: missing kernel, memory floor)
/// is enforced at.
#[derive(Debug)]
pub struct VMMConfig {
    /// Path to the bzImage or flat kernel binary.
    pub kernel: PathBuf,
    /// Backing disk image for virtio-blk (device itself out of scope).
    pub image: Option<PathBuf>,
    /// Initial ramdisk path (accepted, not yet wired into the loader).
    pub initrd: Option<PathBuf>,
    /// Fully assembled kernel command line, default plus `--params`.
    pub cmdline: Cmdline,
    /// Hypervisor control device, default `/dev/kvm`.
    pub kvm_device: PathBuf,
    /// Guest RAM, in MiB.
    pub memory_mb: u32,
    /// Request `KVM_GUESTDBG_SINGLESTEP` debug exits on every instruction.
    pub single_step: bool,
    /// Log every port I/O access at debug level.
    pub ioport_debug: bool,
}

impl VMMConfig {
    pub fn builder() -> VMMConfigBuilder {
        VMMConfigBuilder::default()
    }
}

/// Returns total host physical memory, in MiB, via `sysconf`. Used to
/// impose the ceiling on `--mem` the original left unguarded (§9 open
/// questions).
pub fn host_memory_mb() -> u32 {
    // SAFETY: both queries are pure reads of static host parameters.
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) };
    if pages <= 0 || page_size <= 0 {
        return u32::MAX;
    }
    ((pages as u64 * page_size as u64) / (1024 * 1024)) as u32
}

fn check_kernel_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::KernelNotFound(path.to_path_buf()))
    }
}

fn check_memory_bounds(memory_mb: u32) -> Result<()> {
    if memory_mb < MIN_MEMORY_MB {
        return Err(Error::MemoryTooSmall(memory_mb));
    }
    let available = host_memory_mb();
    if memory_mb > available {
        return Err(Error::MemoryTooLarge {
            requested: memory_mb,
            available,
        });
    }
    Ok(())
}

impl TryFrom<VMMConfigBuilder> for VMMConfig {
    type Error = Error;

    fn try_from(b: VMMConfigBuilder) -> Result<Self> {
        check_kernel_exists(&b.kernel)?;
        check_memory_bounds(b.memory_mb)?;

        let mut cmdline = Cmdline::new(KERNEL_CMDLINE_CAPACITY);
        cmdline.insert_str(KERNEL_CMDLINE_DEFAULT)?;
        if let Some(extra) = &b.params {
            if !extra.is_empty() {
                cmdline.insert_str(extra)?;
            }
        }

        Ok(VMMConfig {
            kernel: b.kernel,
            image: b.image,
            initrd: b.initrd,
            cmdline,
            kvm_device: b.kvm_device,
            memory_mb: b.memory_mb,
            single_step: b.single_step,
            ioport_debug: b.ioport_debug,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_kernel_is_rejected() {
        let err = check_kernel_exists(Path::new("/nonexistent/path/to/kernel"));
        assert!(matches!(err, Err(Error::KernelNotFound(_))));
    }

    #[test]
    fn memory_below_floor_is_rejected() {
        let err = check_memory_bounds(MIN_MEMORY_MB - 1);
        assert!(matches!(err, Err(Error::MemoryTooSmall(63))));
    }

    #[test]
    fn memory_above_host_is_rejected() {
        let err = check_memory_bounds(host_memory_mb() + 1);
        assert!(matches!(err, Err(Error::MemoryTooLarge { .. })));
    }

    #[test]
    fn memory_at_floor_is_accepted() {
        assert!(check_memory_bounds(MIN_MEMORY_MB).is_ok());
    }

    #[test]
    fn builder_appends_params_to_default_cmdline() {
        let config = VMMConfig::builder()
            .kernel(PathBuf::from("./Cargo.toml"))
            .memory_mb(MIN_MEMORY_MB)
            .params(Some("foo=bar".to_string()))
            .build()
            .unwrap();
        assert!(config.cmdline.as_str().starts_with(KERNEL_CMDLINE_DEFAULT));
        assert!(config.cmdline.as_str().ends_with("foo=bar"));
    }
}
