// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Placeholder for the `--image` virtio-blk backing device.
//!
//! Disk image backing is explicitly out of scope for the core monitor:
//! device models are collaborators behind [`super::DeviceBus`], not part
//! of the dispatch loop itself. This stub just remembers the configured
//! path; the MMIO range it would claim currently falls through to the
//! bus's unclaimed-address behavior.

use std::path::PathBuf;

pub struct BlockConfig {
    pub image_path: PathBuf,
}

impl BlockConfig {
    pub fn new(image_path: PathBuf) -> Self {
        BlockConfig { image_path }
    }
}
