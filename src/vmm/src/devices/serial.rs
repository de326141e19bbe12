// SPDX-License-Identifier: Apache-2.0

use std::io::{stdout, Error, Result, Stdout};
use std::ops::Deref;
use std::ops::RangeInclusive;

use vm_superio::serial::NoEvents;
use vm_superio::{Serial, Trigger};
use vmm_sys_util::eventfd::EventFd;

pub const SERIAL_PORT_BASE: u16 = 0x3f8;
pub const SERIAL_PORT_LAST_REGISTER: u16 = 0x3ff;
pub const PORT_RANGE: RangeInclusive<u16> = SERIAL_PORT_BASE..=SERIAL_PORT_LAST_REGISTER;

pub struct EventFdTrigger(EventFd);

impl Trigger for EventFdTrigger {
    type E = Error;

    fn trigger(&self) -> Result<()> {
        self.write(1)
    }
}

impl Deref for EventFdTrigger {
    type Target = EventFd;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl EventFdTrigger {
    pub fn new(flag: i32) -> Result<Self> {
        Ok(EventFdTrigger(EventFd::new(flag)?))
    }
    pub fn try_clone(&self) -> Result<Self> {
        Ok(EventFdTrigger((**self).try_clone()?))
    }
}

/// A 16550-compatible UART on the legacy COM1 range, the one device the
/// exit-dispatch loop's `INTR` arm may raise a line on.
pub struct ConsoleUart {
    // Lets the device raise an interrupt toward the guest.
    eventfd: EventFdTrigger,

    pub serial: Serial<EventFdTrigger, NoEvents, Stdout>,
}

impl ConsoleUart {
    pub fn new() -> Result<Self> {
        let eventfd = EventFdTrigger::new(libc::EFD_NONBLOCK)?;

        Ok(ConsoleUart {
            eventfd: eventfd.try_clone()?,
            serial: Serial::new(eventfd.try_clone()?, stdout()),
        })
    }

    pub fn eventfd(&self) -> Result<EventFd> {
        Ok(self.eventfd.try_clone()?.0)
    }
}
