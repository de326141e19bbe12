// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Guest physical memory: the backing buffer and the flat/real-mode
//! address-translation helpers.
//!
//! `vm-memory`'s mmap backend is kept purely as the allocator: it already
//! guarantees the host-page alignment `KVM_SET_USER_MEMORY_REGION`
//! requires. The translation helpers themselves are plain pointer
//! arithmetic over a cached host base, not `vm-memory`'s checked,
//! per-call region lookup, because spec requires them to be branch-free
//! except for the `host_in_ram` membership test.

use vm_memory::{GuestAddress, GuestMemory as GuestMemoryTrait, GuestMemoryMmap, GuestMemoryRegion, GuestRegionMmap};

use crate::{Error, Result};

/// Guest RAM: a single contiguous, page-aligned host buffer covering
/// guest physical `[0, ram_size)`.
pub struct GuestMemory {
    mmap: GuestMemoryMmap,
    ram_base: usize,
    ram_size: usize,
}

impl GuestMemory {
    /// Allocates `ram_size` bytes of guest RAM starting at guest physical 0.
    pub fn new(ram_size: usize) -> Result<Self> {
        let mmap = GuestMemoryMmap::from_ranges(&[(GuestAddress(0), ram_size)])
            .map_err(Error::Memory)?;

        let region: &GuestRegionMmap = mmap
            .find_region(GuestAddress(0))
            .expect("just-created region must cover address 0");
        let ram_base = region.as_ptr() as usize;

        Ok(GuestMemory {
            mmap,
            ram_base,
            ram_size,
        })
    }

    /// The underlying `vm-memory` handle, for APIs (KVM memory-slot
    /// registration, `Bytes` reads/writes used by the loader and BIOS
    /// installer) that want the checked, region-aware interface.
    pub fn mmap(&self) -> &GuestMemoryMmap {
        &self.mmap
    }

    pub fn ram_base(&self) -> usize {
        self.ram_base
    }

    pub fn ram_size(&self) -> usize {
        self.ram_size
    }

    /// Translates a guest-physical (flat) offset to a host pointer.
    /// Does not bounds-check; combine with [`host_in_ram`](Self::host_in_ram)
    /// when the offset comes from the guest.
    pub fn flat_to_host(&self, off: u64) -> *mut u8 {
        (self.ram_base + off as usize) as *mut u8
    }

    /// Translates a real-mode segment:offset pair to a host pointer via
    /// `selector * 16 + offset`.
    pub fn seg_off_to_host(&self, selector: u16, offset: u16) -> *mut u8 {
        let linear = (selector as u64) * 16 + offset as u64;
        self.flat_to_host(linear)
    }

    /// True if `ptr` lies within `[ram_base, ram_base + ram_size)`.
    pub fn host_in_ram(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        addr >= self.ram_base && addr < self.ram_base + self.ram_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_to_host_stays_within_ram() {
        let gm = GuestMemory::new(0x10000).unwrap();
        for off in [0u64, 1, 0xff, 0xffff] {
            let ptr = gm.flat_to_host(off);
            assert!(gm.host_in_ram(ptr));
        }
    }

    #[test]
    fn seg_off_matches_flat_when_in_range() {
        let gm = GuestMemory::new(0x20000).unwrap();
        let (sel, off) = (0x1000u16, 0x0200u16);
        let linear = (sel as u64) * 16 + off as u64;
        assert_eq!(gm.seg_off_to_host(sel, off), gm.flat_to_host(linear));
    }

    #[test]
    fn host_in_ram_rejects_out_of_range_pointers() {
        let gm = GuestMemory::new(0x1000).unwrap();
        let past_end = gm.flat_to_host(0x1000);
        assert!(!gm.host_in_ram(past_end));
        let before_start = (gm.ram_base() - 1) as *const u8;
        assert!(!gm.host_in_ram(before_start));
    }
}
