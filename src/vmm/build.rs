// SPDX-License-Identifier: Apache-2.0 OR BSD-3-Clause

//! Assembles the real-mode BIOS stubs in `bios/*.S` into flat binaries.
//!
//! Each source file is a single self-contained routine; `nasm -f bin`
//! produces a position-independent blob with no relocations, which is
//! exactly what the stubs need since they're copied verbatim into guest
//! RAM at a segment chosen at boot time (see `vmm::bios`).

use std::env;
use std::path::Path;
use std::process::Command;

const STUBS: &[&str] = &["intfake", "int10", "int15"];

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let bios_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("bios");

    for stub in STUBS {
        let src = bios_dir.join(format!("{}.S", stub));
        let dst = Path::new(&out_dir).join(format!("{}.bin", stub));

        println!("cargo:rerun-if-changed={}", src.display());

        let status = Command::new("nasm")
            .args(["-f", "bin", "-o"])
            .arg(&dst)
            .arg(&src)
            .status()
            .unwrap_or_else(|e| panic!("failed to invoke nasm for {}: {}", src.display(), e));

        if !status.success() {
            panic!("nasm failed to assemble {}", src.display());
        }
    }
}
