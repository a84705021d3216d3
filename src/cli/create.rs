//! Create command implementation.

use clap::Args;
use std::path::PathBuf;
use vzdriver::config::{
    CreateFlags, MachineConfig, DEFAULT_CPUS, DEFAULT_DISK_SIZE_MB, DEFAULT_MEMORY_MB,
};
use vzdriver::driver::Driver;
use vzdriver::runner::HypervisorKind;

use super::Storage;

/// Create a machine and start it.
#[derive(Args, Debug)]
pub struct CreateCmd {
    /// Machine name.
    pub name: String,

    /// Number of CPUs for the machine (-1 to use all available CPUs).
    #[arg(long = "vz-cpu-count", env = "VZ_CPU_COUNT", default_value_t = DEFAULT_CPUS as i32, allow_negative_numbers = true)]
    pub cpu_count: i32,

    /// Size of memory for the guest, in MiB.
    #[arg(long = "vz-memory-size", env = "VZ_MEMORY_SIZE", default_value_t = DEFAULT_MEMORY_MB)]
    pub memory_size: u64,

    /// Size of disk for the guest, in MB.
    #[arg(long = "vz-disk-size", env = "VZ_DISK_SIZE", default_value_t = DEFAULT_DISK_SIZE_MB)]
    pub disk_size: u64,

    /// The boot2docker ISO (local path or file:// URL).
    #[arg(long = "vz-boot2docker-url", env = "VZ_BOOT2DOCKER_URL", default_value = "")]
    pub boot2docker_url: String,

    /// Disable sharing the home directory with the guest.
    #[arg(long = "vz-no-share-directory")]
    pub no_share_directory: bool,

    /// Kernel image extracted from the boot image.
    #[arg(long = "vz-kernel", env = "VZ_KERNEL")]
    pub kernel: Option<PathBuf>,

    /// Initial ramdisk extracted from the boot image.
    #[arg(long = "vz-initrd", env = "VZ_INITRD")]
    pub initrd: Option<PathBuf>,

    /// Kernel options extracted from the boot image.
    #[arg(long = "vz-cmdline", env = "VZ_CMDLINE", default_value = "")]
    pub cmdline: String,

    /// Runner executable (default: `vz` from PATH).
    #[arg(long = "vz-runner", env = "VZ_RUNNER")]
    pub runner: Option<PathBuf>,

    /// Hypervisor backend used by the runner.
    #[arg(long = "vz-hypervisor", value_enum, default_value_t = HypervisorKind::Vfkit)]
    pub hypervisor: HypervisorKind,
}

impl CreateCmd {
    fn flags(&self) -> CreateFlags {
        CreateFlags {
            cpu_count: self.cpu_count,
            memory_size_mb: self.memory_size,
            disk_size_mb: self.disk_size,
            boot2docker_url: self.boot2docker_url.clone(),
            no_share_directory: self.no_share_directory,
            kernel: self.kernel.clone(),
            initrd: self.initrd.clone(),
            cmdline: self.cmdline.clone(),
            runner: self.runner.clone(),
            hypervisor: self.hypervisor,
        }
    }

    /// Execute the create command.
    pub fn run(self, storage: &Storage) -> vzdriver::Result<()> {
        let dir = storage.machine_dir(&self.name)?;
        let flags = self.flags();

        let mut config = MachineConfig::new(&self.name);
        config.apply_flags(&flags)?;

        println!("Creating machine {}...", self.name);
        let mut driver = Driver::new(dir, config);
        driver.create(&flags)?;

        println!("Created machine: {}", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        create: CreateCmd,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::try_parse_from(["vzdriver", "default"]).unwrap();
        let flags = cli.create.flags();
        assert_eq!(flags.cpu_count, 1);
        assert_eq!(flags.memory_size_mb, 1024);
        assert_eq!(flags.disk_size_mb, 20000);
        assert!(!flags.no_share_directory);
        assert_eq!(flags.hypervisor, HypervisorKind::Vfkit);
    }

    #[test]
    fn test_all_cpus() {
        let cli = TestCli::try_parse_from([
            "vzdriver",
            "default",
            "--vz-cpu-count",
            "-1",
            "--vz-no-share-directory",
            "--vz-hypervisor",
            "idle",
        ])
        .unwrap();
        assert_eq!(cli.create.cpu_count, -1);
        assert!(cli.create.no_share_directory);
        assert_eq!(cli.create.hypervisor, HypervisorKind::Idle);
    }
}
