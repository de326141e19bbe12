// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Real-mode Interrupt Vector Table staging and installer.
//!
//! The IVT lives at guest linear `0x0`: 256 entries, 4 bytes each, offset
//! first then segment, both little-endian. This module only ever touches
//! an in-monitor staging copy; [`InterruptTable::copy_to`] is the single
//! point where it's written into guest RAM.

use vm_memory::{Address, Bytes, GuestAddress, GuestMemoryMmap};

use crate::{Error, Result};

pub const IVT_ENTRIES: usize = 256;
pub const IVT_ENTRY_SIZE: usize = 4;
pub const IVT_BASE: u64 = 0x0;

/// One real-mode interrupt descriptor: a segment:offset pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct IvtEntry {
    pub segment: u16,
    pub offset: u16,
}

impl IvtEntry {
    pub fn new(segment: u16, offset: u16) -> Self {
        IvtEntry { segment, offset }
    }
}

/// Staging copy of the 256-entry IVT, mutated in the monitor before being
/// written to guest memory in one shot.
pub struct InterruptTable {
    entries: [IvtEntry; IVT_ENTRIES],
}

impl InterruptTable {
    /// Fills every vector with `default`.
    pub fn setup(default: IvtEntry) -> Self {
        InterruptTable {
            entries: [default; IVT_ENTRIES],
        }
    }

    /// Overwrites a single vector.
    pub fn set(&mut self, vector: u8, desc: IvtEntry) {
        self.entries[vector as usize] = desc;
    }

    /// Reads back a single vector (diagnostics and tests).
    pub fn get(&self, vector: u8) -> IvtEntry {
        self.entries[vector as usize]
    }

    /// Writes the table into guest RAM at linear `0x0` in canonical
    /// real-mode layout: offset (u16 LE) then segment (u16 LE), 4 bytes
    /// per entry.
    pub fn copy_to(&self, guest_memory: &GuestMemoryMmap) -> Result<()> {
        for (vector, entry) in self.entries.iter().enumerate() {
            let addr = IVT_BASE + (vector * IVT_ENTRY_SIZE) as u64;
            let mut bytes = [0u8; IVT_ENTRY_SIZE];
            bytes[0..2].copy_from_slice(&entry.offset.to_le_bytes());
            bytes[2..4].copy_from_slice(&entry.segment.to_le_bytes());
            guest_memory
                .write_slice(&bytes, GuestAddress(addr))
                .map_err(Error::Memory)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vm_memory::{GuestAddress, GuestMemoryMmap};

    fn new_guest_memory() -> GuestMemoryMmap {
        GuestMemoryMmap::from_ranges(&[(GuestAddress(0), 0x10000)]).unwrap()
    }

    #[test]
    fn setup_fills_every_vector_with_default() {
        let default = IvtEntry::new(0xf000, 0x1234);
        let table = InterruptTable::setup(default);
        for v in 0..=255u8 {
            assert_eq!(table.get(v), default);
        }
    }

    #[test]
    fn set_only_changes_one_vector() {
        let default = IvtEntry::new(0xf000, 0x1234);
        let mut table = InterruptTable::setup(default);
        let override_entry = IvtEntry::new(0xf100, 0x5678);
        table.set(0x10, override_entry);

        for v in 0..=255u8 {
            if v == 0x10 {
                assert_eq!(table.get(v), override_entry);
            } else {
                assert_eq!(table.get(v), default);
            }
        }
    }

    #[test]
    fn copy_to_round_trips_exactly() {
        let gm = new_guest_memory();
        let default = IvtEntry::new(0xf000, 0x0000);
        let mut table = InterruptTable::setup(default);
        table.set(0x10, IvtEntry::new(0xf000, 0x0100));
        table.copy_to(&gm).unwrap();

        for v in 0..=255u8 {
            let addr = GuestAddress((v as u64) * IVT_ENTRY_SIZE as u64);
            let mut bytes = [0u8; IVT_ENTRY_SIZE];
            gm.read_slice(&mut bytes, addr).unwrap();
            let offset = u16::from_le_bytes([bytes[0], bytes[1]]);
            let segment = u16::from_le_bytes([bytes[2], bytes[3]]);
            assert_eq!(IvtEntry::new(segment, offset), table.get(v));
        }
    }
}
