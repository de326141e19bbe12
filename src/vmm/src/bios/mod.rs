// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Real-mode BIOS stub: three position-independent code blobs assembled
//! once at build time (see `build.rs`) and copied verbatim into guest RAM.
//!
//! Each stub is an opaque byte range; "begin" is offset 0 of the slice and
//! "end" is `slice.len()` — there's nothing else to track since every
//! source file assembles to exactly one blob.

use vm_memory::{Address, Bytes, GuestAddress, GuestMemoryMmap};

use crate::{Error, Result};

/// `IRET` — the default handler installed for every vector.
pub const INTFAKE: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/intfake.bin"));

/// INT 10h teletype-output handler.
pub const INT10: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/int10.bin"));

/// Offset within [`INT10`] of the wrapping column-cursor scratch word.
pub const INT10_CURSOR_OFFSET: usize = 16;

/// INT 15h E820 memory-map handler, including the `e820_query_map`
/// trampoline and its table of entries.
pub const INT15: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/int15.bin"));

/// Offset within [`INT15`] of the 16-bit entry count consumed by the
/// trampoline.
pub const INT15_ENTRY_COUNT_OFFSET: usize = 64;

/// Offset within [`INT15`] of the first 20-byte E820 entry.
pub const INT15_TABLE_OFFSET: usize = 66;

/// Maximum number of E820 entries the trampoline's embedded table holds.
pub const INT15_MAX_ENTRIES: usize = 8;

/// Size in bytes of one packed E820 entry (`base: u64, length: u64, type_: u32`).
pub const E820_ENTRY_SIZE: usize = 20;

pub const E820_RAM: u32 = 1;
pub const E820_RESERVED: u32 = 2;

/// Start of the BIOS Data Area reservation the stubs are installed into.
/// Chosen to sit comfortably below the conventional EBDA start
/// (`0x9fc00`) and leave the IVT (`[0x0, 0x400)`) untouched.
pub const BDA_START: u64 = 0x0000_0600;

/// One raw, packed E820 memory-map entry as consumed by the trampoline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct E820Entry {
    pub addr: u64,
    pub size: u64,
    pub mem_type: u32,
}

impl E820Entry {
    fn to_bytes(self) -> [u8; E820_ENTRY_SIZE] {
        let mut buf = [0u8; E820_ENTRY_SIZE];
        buf[0..8].copy_from_slice(&self.addr.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.mem_type.to_le_bytes());
        buf
    }
}

/// Real-mode segment corresponding to a linear address that is itself
/// 16-byte aligned (`segment = linear / 16`, `offset = 0`).
pub fn real_segment(linear: u64) -> u16 {
    (linear >> 4) as u16
}

/// Copies the three BIOS stubs into the BDA region and patches the E820
/// table the `int15` trampoline serves, returning the linear address each
/// stub was placed at (in installation order: intfake, int10, int15).
pub fn install(
    guest_memory: &GuestMemoryMmap,
    e820_entries: &[E820Entry],
) -> Result<(u64, u64, u64)> {
    if e820_entries.len() > INT15_MAX_ENTRIES {
        return Err(Error::E820Configuration);
    }

    let intfake_addr = BDA_START;
    let int10_addr = intfake_addr + INTFAKE.len() as u64;
    let int15_addr = int10_addr + INT10.len() as u64;

    guest_memory
        .write_slice(INTFAKE, GuestAddress(intfake_addr))
        .map_err(Error::Memory)?;
    guest_memory
        .write_slice(INT10, GuestAddress(int10_addr))
        .map_err(Error::Memory)?;
    guest_memory
        .write_slice(INT15, GuestAddress(int15_addr))
        .map_err(Error::Memory)?;

    let count_addr = int15_addr + INT15_ENTRY_COUNT_OFFSET as u64;
    guest_memory
        .write_obj(e820_entries.len() as u16, GuestAddress(count_addr))
        .map_err(Error::Memory)?;

    for (i, entry) in e820_entries.iter().enumerate() {
        let entry_addr =
            int15_addr + INT15_TABLE_OFFSET as u64 + (i * E820_ENTRY_SIZE) as u64;
        guest_memory
            .write_slice(&entry.to_bytes(), GuestAddress(entry_addr))
            .map_err(Error::Memory)?;
    }

    Ok((intfake_addr, int10_addr, int15_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm_memory::GuestMemoryMmap;

    fn mem() -> GuestMemoryMmap {
        GuestMemoryMmap::from_ranges(&[(GuestAddress(0), 0x10_0000)]).unwrap()
    }

    #[test]
    fn install_places_stubs_back_to_back_from_bda_start() {
        let gm = mem();
        let (intfake_addr, int10_addr, int15_addr) = install(&gm, &[]).unwrap();
        assert_eq!(intfake_addr, BDA_START);
        assert_eq!(int10_addr, intfake_addr + INTFAKE.len() as u64);
        assert_eq!(int15_addr, int10_addr + INT10.len() as u64);
    }

    #[test]
    fn install_rejects_more_entries_than_the_trampoline_table_holds() {
        let gm = mem();
        let entries = vec![
            E820Entry {
                addr: 0,
                size: 0x1000,
                mem_type: E820_RAM
            };
            INT15_MAX_ENTRIES + 1
        ];
        assert!(matches!(install(&gm, &entries), Err(Error::E820Configuration)));
    }

    #[test]
    fn install_writes_entry_count_and_table_readable_back() {
        let gm = mem();
        let entries = [
            E820Entry { addr: 0, size: 0x9_fc00, mem_type: E820_RAM },
            E820Entry { addr: 0x10_0000, size: 0xf_0000, mem_type: E820_RAM },
        ];
        let (_, _, int15_addr) = install(&gm, &entries).unwrap();

        let count: u16 = gm
            .read_obj(GuestAddress(int15_addr + INT15_ENTRY_COUNT_OFFSET as u64))
            .unwrap();
        assert_eq!(count, entries.len() as u16);

        for (i, entry) in entries.iter().enumerate() {
            let entry_addr =
                int15_addr + INT15_TABLE_OFFSET as u64 + (i * E820_ENTRY_SIZE) as u64;
            let mut buf = [0u8; E820_ENTRY_SIZE];
            gm.read_slice(&mut buf, GuestAddress(entry_addr)).unwrap();
            assert_eq!(buf, entry.to_bytes());
        }
    }

    #[test]
    fn real_segment_divides_linear_address_by_sixteen() {
        assert_eq!(real_segment(0x600), 0x60);
        assert_eq!(real_segment(0xf_0000), 0xf000);
    }
}
