// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Kernel image loader: recognizes bzImage vs. flat binary, places setup
//! code, protected-mode payload and command line at protocol-mandated
//! offsets, and patches the boot-protocol header fields. See
//! https://www.kernel.org/doc/Documentation/x86/boot.txt for the offsets
//! referenced below.
//!
//! The `linux_loader::bootparam::boot_params` type is deliberately not
//! used here: its loader targets protected/long-mode boot, while this
//! loader boots real mode through the BIOS stub in [`crate::bios`], so the
//! setup-header fields are read and patched directly at their documented
//! byte offsets instead.

use std::convert::TryInto;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use vm_memory::{Bytes, GuestAddress, GuestMemoryMmap};

use crate::bios::{self, E820Entry, E820_RAM};
use crate::ivt::{InterruptTable, IvtEntry};
use crate::{Error, Result};

/// `BOOT_LOADER_SELECTOR` — real-mode segment the setup code is placed at.
pub const BOOT_LOADER_SELECTOR: u16 = 0x1000;
/// `BOOT_LOADER_IP` — offset within [`BOOT_LOADER_SELECTOR`] the flat
/// binary (and the zero page) starts at.
pub const BOOT_LOADER_IP: u16 = 0x0000;
/// `BOOT_LOADER_SP` — initial real-mode stack pointer.
pub const BOOT_LOADER_SP: u16 = 0x8000;
/// Linear address the kernel command line is copied to.
pub const BOOT_CMDLINE_OFFSET: u64 = 0x0002_0000;
/// Linear address the protected-mode kernel payload is copied to (1 MiB).
pub const BZ_KERNEL_START: u64 = 0x0010_0000;
/// bzImage entry point offset within `BOOT_LOADER_SELECTOR`.
const BZIMAGE_ENTRY_IP: u16 = 0x0200;

const SECTOR_SIZE: u64 = 512;
const DEFAULT_SETUP_SECTS: u8 = 4;

// Setup-header field offsets (protocol >= 2.02), relative to the start of
// the setup code at BOOT_LOADER_SELECTOR:0.
const HDR_SETUP_SECTS_OFFSET: u64 = 0x1f1;
const HDR_MAGIC_OFFSET: u64 = 0x202;
const HDR_MAGIC: [u8; 4] = *b"HdrS";
const HDR_VERSION_OFFSET: u64 = 0x206;
const HDR_TYPE_OF_LOADER_OFFSET: u64 = 0x20e;
const HDR_LOADFLAGS_OFFSET: u64 = 0x20f;
const HDR_HEAP_END_PTR_OFFSET: u64 = 0x222;
const HDR_CMD_LINE_PTR_OFFSET: u64 = 0x226;
const HDR_CMDLINE_SIZE_OFFSET: u64 = 0x238;
/// Minimum header size needed to probe magic + version + cmdline_size.
const PROBE_HEADER_SIZE: usize = 0x238 + 4;

const MIN_PROTOCOL_VERSION: u16 = 0x0202;
const CMDLINE_SIZE_SUPPORTED_SINCE: u16 = 0x0206;
/// Implied cmdline length cap for protocol versions below 2.06.
const OLD_CMDLINE_SIZE: u32 = 255;

pub const TYPE_OF_LOADER: u8 = 0xff;
pub const HEAP_END_PTR: u16 = 0xfe00;
pub const CAN_USE_HEAP: u8 = 0x80;

/// Start of the Extended BIOS Data Area; everything below it is usable RAM
/// on the machine this monitor emulates.
const EBDA_START: u64 = 0x0009_fc00;

/// Entry point and initial stack chosen by the loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootInfo {
    pub selector: u16,
    pub ip: u16,
    pub sp: u16,
}

fn probe_bzimage(file: &mut File) -> Result<(u8, u16, u32)> {
    file.rewind().map_err(Error::IO)?;
    let mut header = [0u8; PROBE_HEADER_SIZE];
    match file.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(Error::NotBzImage),
        Err(e) => return Err(Error::IO(e)),
    }

    let magic = &header[HDR_MAGIC_OFFSET as usize..HDR_MAGIC_OFFSET as usize + 4];
    if magic != HDR_MAGIC {
        return Err(Error::NotBzImage);
    }

    let version = u16::from_le_bytes(
        header[HDR_VERSION_OFFSET as usize..HDR_VERSION_OFFSET as usize + 2]
            .try_into()
            .unwrap(),
    );
    if version < MIN_PROTOCOL_VERSION {
        return Err(Error::KernelTooOld(version));
    }

    let setup_sects = header[HDR_SETUP_SECTS_OFFSET as usize];
    let cmdline_size = if version >= CMDLINE_SIZE_SUPPORTED_SINCE {
        u32::from_le_bytes(
            header[HDR_CMDLINE_SIZE_OFFSET as usize..HDR_CMDLINE_SIZE_OFFSET as usize + 4]
                .try_into()
                .unwrap(),
        )
    } else {
        OLD_CMDLINE_SIZE
    };

    Ok((setup_sects, version, cmdline_size))
}

/// Builds the E820 usable-RAM map for a guest of `ram_size` bytes: the low
/// region below the EBDA, and everything from 1 MiB up to the end of RAM.
fn build_e820_entries(ram_size: u64) -> Result<Vec<E820Entry>> {
    if ram_size <= BZ_KERNEL_START {
        return Err(Error::E820Configuration);
    }

    Ok(vec![
        E820Entry {
            addr: 0,
            size: EBDA_START,
            mem_type: E820_RAM,
        },
        E820Entry {
            addr: BZ_KERNEL_START,
            size: ram_size - BZ_KERNEL_START,
            mem_type: E820_RAM,
        },
    ])
}

fn write_cmdline(guest_memory: &GuestMemoryMmap, cmdline: &str, cmdline_size: u32) -> Result<()> {
    let reserved = cmdline_size.max(1) as usize;
    let max_len = reserved - 1;

    let mut bytes = cmdline.as_bytes().to_vec();
    bytes.truncate(max_len);

    let mut buf = vec![0u8; reserved];
    buf[..bytes.len()].copy_from_slice(&bytes);

    guest_memory
        .write_slice(&buf, GuestAddress(BOOT_CMDLINE_OFFSET))
        .map_err(Error::Memory)
}

fn install_bios_and_ivt(guest_memory: &GuestMemoryMmap, ram_size: u64) -> Result<()> {
    let e820_entries = build_e820_entries(ram_size)?;
    let (intfake_addr, int10_addr, int15_addr) = bios::install(guest_memory, &e820_entries)?;

    let default = IvtEntry::new(bios::real_segment(intfake_addr), 0);
    let mut ivt = InterruptTable::setup(default);
    ivt.set(0x10, IvtEntry::new(bios::real_segment(int10_addr), 0));
    ivt.set(0x15, IvtEntry::new(bios::real_segment(int15_addr), 0));
    ivt.copy_to(guest_memory)
}

/// Loads `path` as a bzImage. Returns [`Error::NotBzImage`] (soft failure)
/// if the setup-header magic doesn't match, so the caller can fall
/// through to the flat-binary loader.
fn load_bzimage(
    guest_memory: &GuestMemoryMmap,
    ram_size: u64,
    path: &Path,
    cmdline: Option<&str>,
) -> Result<BootInfo> {
    let mut file = File::open(path).map_err(Error::IO)?;
    let (setup_sects, _version, cmdline_size) = probe_bzimage(&mut file)?;

    let setup_sects = if setup_sects == 0 {
        DEFAULT_SETUP_SECTS
    } else {
        setup_sects
    };
    let setup_size = (setup_sects as u64 + 1) * SECTOR_SIZE;

    file.rewind().map_err(Error::IO)?;
    let mut setup_buf = vec![0u8; setup_size as usize];
    file.read_exact(&mut setup_buf).map_err(Error::IO)?;

    let mut payload_buf = Vec::new();
    file.read_to_end(&mut payload_buf).map_err(Error::IO)?;

    let setup_base = (BOOT_LOADER_SELECTOR as u64) * 16 + BOOT_LOADER_IP as u64;
    guest_memory
        .write_slice(&setup_buf, GuestAddress(setup_base))
        .map_err(Error::Memory)?;
    guest_memory
        .write_slice(&payload_buf, GuestAddress(BZ_KERNEL_START))
        .map_err(Error::Memory)?;

    write_cmdline(guest_memory, cmdline.unwrap_or(""), cmdline_size)?;

    guest_memory
        .write_obj(
            BOOT_CMDLINE_OFFSET as u32,
            GuestAddress(setup_base + HDR_CMD_LINE_PTR_OFFSET),
        )
        .map_err(Error::Memory)?;
    guest_memory
        .write_obj(
            TYPE_OF_LOADER,
            GuestAddress(setup_base + HDR_TYPE_OF_LOADER_OFFSET),
        )
        .map_err(Error::Memory)?;
    guest_memory
        .write_obj(
            HEAP_END_PTR,
            GuestAddress(setup_base + HDR_HEAP_END_PTR_OFFSET),
        )
        .map_err(Error::Memory)?;

    let loadflags_addr = GuestAddress(setup_base + HDR_LOADFLAGS_OFFSET);
    let loadflags: u8 = guest_memory.read_obj(loadflags_addr).map_err(Error::Memory)?;
    guest_memory
        .write_obj(loadflags | CAN_USE_HEAP, loadflags_addr)
        .map_err(Error::Memory)?;

    install_bios_and_ivt(guest_memory, ram_size)?;

    Ok(BootInfo {
        selector: BOOT_LOADER_SELECTOR,
        ip: BZIMAGE_ENTRY_IP,
        sp: BOOT_LOADER_SP,
    })
}

/// Loads `path` verbatim at `BOOT_LOADER_SELECTOR:BOOT_LOADER_IP`. No BIOS
/// stubs or IVT are installed.
fn load_flat(guest_memory: &GuestMemoryMmap, path: &Path) -> Result<BootInfo> {
    let mut file = File::open(path).map_err(Error::IO)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(Error::IO)?;

    let base = (BOOT_LOADER_SELECTOR as u64) * 16 + BOOT_LOADER_IP as u64;
    guest_memory
        .write_slice(&buf, GuestAddress(base))
        .map_err(Error::Memory)?;

    Ok(BootInfo {
        selector: BOOT_LOADER_SELECTOR,
        ip: BOOT_LOADER_IP,
        sp: BOOT_LOADER_SP,
    })
}

/// Tries the bzImage recognizer first; falls through to the flat-binary
/// loader only on a soft "not a bzImage" signal. Any other error (I/O,
/// too-old protocol version) is fatal.
pub fn load_kernel(
    guest_memory: &GuestMemoryMmap,
    ram_size: u64,
    path: &Path,
    cmdline: Option<&str>,
) -> Result<BootInfo> {
    match load_bzimage(guest_memory, ram_size, path, cmdline) {
        Ok(info) => Ok(info),
        Err(Error::NotBzImage) => load_flat(guest_memory, path),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::GuestMemory;
    use std::io::Write;
    use vm_memory::GuestAddress;

    fn synthetic_bzimage(setup_sects: u8, version: u16, cmdline_size: u32, payload: &[u8]) -> Vec<u8> {
        let n = if setup_sects == 0 { DEFAULT_SETUP_SECTS } else { setup_sects };
        let setup_size = (n as usize + 1) * SECTOR_SIZE as usize;
        let mut buf = vec![0u8; setup_size];
        buf[HDR_SETUP_SECTS_OFFSET as usize] = setup_sects;
        buf[HDR_MAGIC_OFFSET as usize..HDR_MAGIC_OFFSET as usize + 4].copy_from_slice(&HDR_MAGIC);
        buf[HDR_VERSION_OFFSET as usize..HDR_VERSION_OFFSET as usize + 2]
            .copy_from_slice(&version.to_le_bytes());
        buf[HDR_CMDLINE_SIZE_OFFSET as usize..HDR_CMDLINE_SIZE_OFFSET as usize + 4]
            .copy_from_slice(&cmdline_size.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn bzimage_header_patches_and_placement() {
        let payload = vec![0xAAu8; 300];
        let image = synthetic_bzimage(4, 0x0209, 256, &payload);

        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&image).unwrap();

        let gm = GuestMemory::new(16 * 1024 * 1024).unwrap();
        let info = load_kernel(gm.mmap(), 16 * 1024 * 1024, f.path(), Some("console=ttyS0")).unwrap();

        assert_eq!(info.selector, BOOT_LOADER_SELECTOR);
        assert_eq!(info.ip, BZIMAGE_ENTRY_IP);
        assert_eq!(info.sp, BOOT_LOADER_SP);

        let setup_size = 5 * SECTOR_SIZE as usize;
        let mut setup_readback = vec![0u8; setup_size];
        gm.mmap()
            .read_slice(&mut setup_readback, GuestAddress(0x10000))
            .unwrap();
        assert_eq!(&setup_readback[..], &image[..setup_size]);

        let mut payload_readback = vec![0u8; payload.len()];
        gm.mmap()
            .read_slice(&mut payload_readback, GuestAddress(BZ_KERNEL_START))
            .unwrap();
        assert_eq!(payload_readback, payload);

        let type_of_loader: u8 = gm
            .mmap()
            .read_obj(GuestAddress(0x10000 + HDR_TYPE_OF_LOADER_OFFSET))
            .unwrap();
        assert_eq!(type_of_loader, TYPE_OF_LOADER);

        let heap_end_ptr: u16 = gm
            .mmap()
            .read_obj(GuestAddress(0x10000 + HDR_HEAP_END_PTR_OFFSET))
            .unwrap();
        assert_eq!(heap_end_ptr, HEAP_END_PTR);

        let cmd_line_ptr: u32 = gm
            .mmap()
            .read_obj(GuestAddress(0x10000 + HDR_CMD_LINE_PTR_OFFSET))
            .unwrap();
        assert_eq!(cmd_line_ptr, BOOT_CMDLINE_OFFSET as u32);

        let loadflags: u8 = gm
            .mmap()
            .read_obj(GuestAddress(0x10000 + HDR_LOADFLAGS_OFFSET))
            .unwrap();
        assert_eq!(loadflags & CAN_USE_HEAP, CAN_USE_HEAP);
    }

    #[test]
    fn zero_setup_sects_defaults_to_four() {
        let image = synthetic_bzimage(0, 0x0202, 128, &[0u8; 16]);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&image).unwrap();

        let gm = GuestMemory::new(16 * 1024 * 1024).unwrap();
        let info = load_kernel(gm.mmap(), 16 * 1024 * 1024, f.path(), None).unwrap();
        assert_eq!(info.ip, BZIMAGE_ENTRY_IP);
    }

    #[test]
    fn too_old_protocol_version_is_a_hard_failure() {
        let image = synthetic_bzimage(2, 0x0201, 128, &[]);
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&image).unwrap();

        let gm = GuestMemory::new(16 * 1024 * 1024).unwrap();
        let err = load_kernel(gm.mmap(), 16 * 1024 * 1024, f.path(), None).unwrap_err();
        assert!(matches!(err, Error::KernelTooOld(0x0201)));
    }

    #[test]
    fn cmdline_is_truncated_and_nul_terminated() {
        let gm = GuestMemory::new(16 * 1024 * 1024).unwrap();
        write_cmdline(gm.mmap(), "abcdefghij", 8).unwrap();

        let mut buf = [0u8; 8];
        gm.mmap()
            .read_slice(&mut buf, GuestAddress(BOOT_CMDLINE_OFFSET))
            .unwrap();
        assert_eq!(&buf, b"abcdefg\0");
    }

    #[test]
    fn flat_binary_is_copied_verbatim_at_entry() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0xf4, 0xf4]).unwrap();

        let gm = GuestMemory::new(1024 * 1024).unwrap();
        let info = load_kernel(gm.mmap(), 1024 * 1024, f.path(), None).unwrap();
        assert_eq!(info.selector, BOOT_LOADER_SELECTOR);
        assert_eq!(info.ip, BOOT_LOADER_IP);

        let mut buf = [0u8; 2];
        gm.mmap()
            .read_slice(&mut buf, GuestAddress(0x10000))
            .unwrap();
        assert_eq!(buf, [0xf4, 0xf4]);
    }
}
