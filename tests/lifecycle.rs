//! End-to-end lifecycle through the driver, the host process table and the
//! real `vz` runner (idle backend).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use vzdriver::config::MachineConfig;
use vzdriver::driver::{Driver, MachineState, LOG_FILE_NAME};
use vzdriver::pidfile::{read_pid, PID_FILE_NAME};
use vzdriver::process::{ProcessTable, SystemProcessTable};
use vzdriver::runner::HypervisorKind;
use vzdriver::Error;

fn driver(dir: &Path) -> Driver {
    let mut config = MachineConfig::new("lifecycle");
    config.cpus = 2;
    config.memory_mb = 2048;
    config.kernel = "vmlinuz64".into();
    config.initrd = "initrd.img".into();
    config.share_directory = false;
    config.runner = Some(PathBuf::from(env!("CARGO_BIN_EXE_vz")));
    config.hypervisor = HypervisorKind::Idle;

    Driver::new(dir, config).with_exit_timeout(Duration::from_secs(10))
}

fn wait_for_state(driver: &Driver, expected: MachineState) {
    let start = Instant::now();
    loop {
        let state = driver.state().unwrap();
        if state == expected {
            return;
        }
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "machine stuck in {} waiting for {}",
            state,
            expected
        );
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn test_start_then_stop() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = driver(dir.path());
    assert_eq!(driver.state().unwrap(), MachineState::Stopped);

    driver.start().unwrap();
    wait_for_state(&driver, MachineState::Running);

    let pid = read_pid(&dir.path().join(PID_FILE_NAME)).unwrap().unwrap();
    let info = SystemProcessTable::new().lookup(pid).unwrap().unwrap();
    assert!(info.is_executable("vz"));
    assert!(!driver.config().mac_address.is_empty());

    driver.stop().unwrap();
    wait_for_state(&driver, MachineState::Stopped);
    assert!(!dir.path().join(PID_FILE_NAME).exists());

    assert!(dir.path().join(LOG_FILE_NAME).exists());

    assert!(matches!(driver.stop(), Err(Error::InvalidState { .. })));
}

#[test]
fn test_stale_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = driver(dir.path());
    let pid_file = dir.path().join(PID_FILE_NAME);
    std::fs::write(&pid_file, "99999999").unwrap();

    assert_eq!(driver.state().unwrap(), MachineState::Error);

    driver.start().unwrap();
    wait_for_state(&driver, MachineState::Running);
    let pid = read_pid(&pid_file).unwrap().unwrap();
    assert_ne!(pid, 99999999);

    driver.remove().unwrap();
    wait_for_state(&driver, MachineState::Stopped);
    driver.remove().unwrap();
}

#[test]
fn test_pid_file_of_unrelated_process() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path());

    // This test binary is alive but is not the runner
    std::fs::write(dir.path().join(PID_FILE_NAME), std::process::id().to_string()).unwrap();
    assert_eq!(driver.state().unwrap(), MachineState::Error);
    assert!(matches!(driver.kill(), Err(Error::InvalidState { .. })));
}

#[test]
fn test_restart_then_kill() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join(PID_FILE_NAME);
    let mut driver = driver(dir.path());

    driver.start().unwrap();
    wait_for_state(&driver, MachineState::Running);
    let first = read_pid(&pid_file).unwrap().unwrap();
    let mac = driver.config().mac_address;

    driver.restart().unwrap();
    wait_for_state(&driver, MachineState::Running);
    let second = read_pid(&pid_file).unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(driver.config().mac_address, mac);

    driver.kill().unwrap();
    assert_eq!(driver.state().unwrap(), MachineState::Stopped);
    assert!(!pid_file.exists());
}
