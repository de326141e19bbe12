use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use vmm::config::VMMConfig;
use vmm::Vmm;

#[derive(Parser)]
#[clap(version = "0.1", author = "Polytech Montpellier - DevOps")]
struct VmmOpts {
    /// Path to the bzImage or flat kernel binary. May also be given as a
    /// bare positional argument.
    #[clap(short, long)]
    kernel: Option<String>,

    /// Kernel image path, given positionally instead of via --kernel.
    kernel_positional: Option<String>,

    /// Backing disk image for virtio-blk
    #[clap(long)]
    image: Option<String>,

    /// Initial ramdisk path
    #[clap(long)]
    initrd: Option<String>,

    /// Extra kernel command-line, appended to the built-in default
    #[clap(long)]
    params: Option<String>,

    /// Hypervisor device path
    #[clap(long, default_value = "/dev/kvm")]
    kvm_dev: String,

    /// Guest RAM, in MiB (must be >= 64)
    #[clap(long, default_value_t = 64)]
    mem: u32,

    /// Request KVM_GUESTDBG_SINGLESTEP debug exits on every instruction
    #[clap(long)]
    single_step: bool,

    /// Log every port I/O access at debug level
    #[clap(long)]
    ioport_debug: bool,
}

impl VmmOpts {
    fn kernel_path(&self) -> Option<&str> {
        self.kernel.as_deref().or(self.kernel_positional.as_deref())
    }
}

fn run() -> Result<(), String> {
    let opts = VmmOpts::try_parse().map_err(|e| e.to_string())?;

    let kernel = opts
        .kernel_path()
        .ok_or_else(|| "a kernel image path is required (--kernel or positional)".to_string())?;

    let config = VMMConfig::builder()
        .kernel(PathBuf::from(kernel))
        .image(opts.image.map(PathBuf::from))
        .initrd(opts.initrd.map(PathBuf::from))
        .params(opts.params)
        .kvm_device(PathBuf::from(opts.kvm_dev))
        .memory_mb(opts.mem)
        .single_step(opts.single_step)
        .ioport_debug(opts.ioport_debug)
        .build()
        .map_err(|e| e.to_string())?;

    let mut monitor = Vmm::from_config(config).map_err(|e| format!("{e:?}"))?;
    monitor.run().map_err(|e| format!("{e:?}"))
}

fn main() {
    env_logger::init();

    if let Err(reason) = run() {
        log::error!("{reason}");
        exit(1);
    }
}
