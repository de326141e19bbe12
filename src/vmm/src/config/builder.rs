// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

use std::convert::TryFrom;
use std::path::PathBuf;

use super::{Result, VMMConfig, DEFAULT_KVM_DEVICE, DEFAULT_MEMORY_MB};

/// Fluent builder for [`VMMConfig`]; the CLI (`main.rs`) is the only
/// caller, one field per flag of §6. Validation happens once, in
/// [`VMMConfigBuilder::build`].
#[derive(Debug)]
pub struct VMMConfigBuilder {
    pub(super) kernel: PathBuf,
    pub(super) image: Option<PathBuf>,
    pub(super) initrd: Option<PathBuf>,
    pub(super) params: Option<String>,
    pub(super) kvm_device: PathBuf,
    pub(super) memory_mb: u32,
    pub(super) single_step: bool,
    pub(super) ioport_debug: bool,
}

impl Default for VMMConfigBuilder {
    fn default() -> Self {
        VMMConfigBuilder {
            kernel: PathBuf::new(),
            image: None,
            initrd: None,
            params: None,
            kvm_device: PathBuf::from(DEFAULT_KVM_DEVICE),
            memory_mb: DEFAULT_MEMORY_MB,
            single_step: false,
            ioport_debug: false,
        }
    }
}

impl VMMConfigBuilder {
    pub fn kernel(mut self, path: PathBuf) -> Self {
        self.kernel = path;
        self
    }

    pub fn image(mut self, path: Option<PathBuf>) -> Self {
        self.image = path;
        self
    }

    pub fn initrd(mut self, path: Option<PathBuf>) -> Self {
        self.initrd = path;
        self
    }

    pub fn params(mut self, params: Option<String>) -> Self {
        self.params = params;
        self
    }

    pub fn kvm_device(mut self, path: PathBuf) -> Self {
        self.kvm_device = path;
        self
    }

    pub fn memory_mb(mut self, mb: u32) -> Self {
        self.memory_mb = mb;
        self
    }

    pub fn single_step(mut self, enabled: bool) -> Self {
        self.single_step = enabled;
        self
    }

    pub fn ioport_debug(mut self, enabled: bool) -> Self {
        self.ioport_debug = enabled;
        self
    }

    pub fn build(self) -> Result<VMMConfig> {
        VMMConfig::try_from(self)
    }
}
