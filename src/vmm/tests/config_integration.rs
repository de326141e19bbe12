// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! End-to-end checks of the configuration boundary, exercised the way a
//! caller outside the crate would: through `vmm::config`'s public API
//! only, against a real file on disk.

use std::io::Write;

use tempfile::NamedTempFile;
use vmm::config::{Error, VMMConfig, MIN_MEMORY_MB};

fn synthetic_kernel() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&[0xf4, 0xf4]).unwrap();
    file
}

#[test]
fn builder_rejects_a_kernel_path_that_does_not_exist() {
    let err = VMMConfig::builder()
        .kernel("/nonexistent/path/to/kernel".into())
        .memory_mb(MIN_MEMORY_MB)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::KernelNotFound(_)));
}

#[test]
fn builder_rejects_memory_below_the_floor() {
    let kernel = synthetic_kernel();
    let err = VMMConfig::builder()
        .kernel(kernel.path().to_path_buf())
        .memory_mb(MIN_MEMORY_MB - 1)
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::MemoryTooSmall(_)));
}

#[test]
fn builder_accepts_a_real_kernel_file_at_the_memory_floor() {
    let kernel = synthetic_kernel();
    let config = VMMConfig::builder()
        .kernel(kernel.path().to_path_buf())
        .memory_mb(MIN_MEMORY_MB)
        .build()
        .unwrap();
    assert_eq!(config.memory_mb, MIN_MEMORY_MB);
    assert_eq!(config.kernel.as_path(), kernel.path());
}

#[test]
fn default_cmdline_carries_the_serial_console_and_panic_settings() {
    let kernel = synthetic_kernel();
    let config = VMMConfig::builder()
        .kernel(kernel.path().to_path_buf())
        .memory_mb(MIN_MEMORY_MB)
        .build()
        .unwrap();
    let cmdline = config.cmdline.as_str();
    assert!(cmdline.contains("console=ttyS0"));
    assert!(cmdline.contains("panic=1"));
}
