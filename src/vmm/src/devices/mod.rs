// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! The device bus: the interface the exit-dispatch loop forwards port I/O
//! and MMIO accesses to, and the one concrete device (the UART) wired
//! behind it.

pub mod block;
pub mod serial;

use std::sync::{Arc, Mutex};

use self::serial::ConsoleUart;

/// Direction of a port-I/O access, as reported by the hypervisor exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoDirection {
    In,
    Out,
}

/// The I/O and MMIO handler contract consumed by the exit-dispatch loop.
/// `true` means the access was handled (zero-filling unclaimed reads is
/// acceptable); `false` is fatal for the whole VM.
pub trait DeviceBus {
    fn emulate_io(&mut self, port: u16, data: &mut [u8], direction: IoDirection) -> bool;
    fn emulate_mmio(&mut self, addr: u64, data: &mut [u8], is_write: bool) -> bool;
}

/// The monitor's one wired-up device: a 16550-compatible UART on the
/// legacy COM1 range. Any other port or MMIO address falls through to
/// "unclaimed" (reads zero-fill, writes are dropped, both report handled).
pub struct Bus {
    serial: Arc<Mutex<ConsoleUart>>,
}

impl Bus {
    pub fn new(serial: Arc<Mutex<ConsoleUart>>) -> Self {
        Bus { serial }
    }
}

impl DeviceBus for Bus {
    fn emulate_io(&mut self, port: u16, data: &mut [u8], direction: IoDirection) -> bool {
        if !serial::PORT_RANGE.contains(&port) {
            if direction == IoDirection::In {
                data.iter_mut().for_each(|b| *b = 0);
            }
            return true;
        }

        let mut uart = self.serial.lock().unwrap();
        let reg = (port - serial::PORT_RANGE.start()) as u8;
        match direction {
            IoDirection::Out => {
                for &byte in data.iter() {
                    let _ = uart.serial.write(reg, byte);
                }
            }
            IoDirection::In => {
                for byte in data.iter_mut() {
                    *byte = uart.serial.read(reg);
                }
            }
        }
        true
    }

    fn emulate_mmio(&mut self, _addr: u64, data: &mut [u8], is_write: bool) -> bool {
        // No MMIO device is wired in; unclaimed addresses zero-fill reads
        // and silently accept writes, per the device-bus contract.
        if !is_write {
            data.iter_mut().for_each(|b| *b = 0);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn bus() -> Bus {
        Bus::new(Arc::new(Mutex::new(ConsoleUart::new().unwrap())))
    }

    #[test]
    fn unclaimed_port_read_zero_fills_and_reports_handled() {
        let mut bus = bus();
        let mut data = [0xffu8; 2];
        assert!(bus.emulate_io(0x0042, &mut data, IoDirection::In));
        assert_eq!(data, [0, 0]);
    }

    #[test]
    fn unclaimed_port_write_reports_handled_without_touching_buffer() {
        let mut bus = bus();
        let mut data = [0x41u8];
        assert!(bus.emulate_io(0x0042, &mut data, IoDirection::Out));
        assert_eq!(data, [0x41]);
    }

    #[test]
    fn mmio_read_zero_fills_and_write_is_accepted() {
        let mut bus = bus();
        let mut data = [0xffu8; 4];
        assert!(bus.emulate_mmio(0xd000_0000, &mut data, false));
        assert_eq!(data, [0, 0, 0, 0]);

        let mut write_data = [0x12u8; 4];
        assert!(bus.emulate_mmio(0xd000_0000, &mut write_data, true));
    }

    #[test]
    fn serial_port_range_is_com1() {
        assert!(serial::PORT_RANGE.contains(&0x3f8));
        assert!(!serial::PORT_RANGE.contains(&0x2f8));
    }
}
