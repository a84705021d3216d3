//! Backend without a guest.

use tokio::sync::{oneshot, watch};
use vz_config::VirtualMachineConfig;

use super::hypervisor::{Hypervisor, StartCompletion, VirtualMachine, VmState};
use crate::error::Result;

/// Hypervisor whose machines only track state.
#[derive(Debug, Default)]
pub struct IdleHypervisor;

impl Hypervisor for IdleHypervisor {
    fn name(&self) -> &'static str {
        "idle"
    }

    fn build(&self, config: &VirtualMachineConfig) -> Result<Box<dyn VirtualMachine>> {
        config.validate()?;
        tracing::debug!(devices = config.devices().len(), "built idle machine");
        let (state, _) = watch::channel(VmState::Stopped);
        Ok(Box::new(IdleMachine { state }))
    }
}

struct IdleMachine {
    state: watch::Sender<VmState>,
}

impl VirtualMachine for IdleMachine {
    fn start(&mut self) -> StartCompletion {
        let (tx, rx) = oneshot::channel();
        self.state.send_replace(VmState::Starting);
        self.state.send_replace(VmState::Running);
        let _ = tx.send(Ok(()));
        rx
    }

    fn request_stop(&mut self) -> Result<bool> {
        self.state.send_replace(VmState::Stopping);
        self.state.send_replace(VmState::Stopped);
        Ok(true)
    }

    fn state_changes(&self) -> watch::Receiver<VmState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VirtualMachineConfig {
        VirtualMachineConfig {
            kernel: "/k".into(),
            initrd: "/i".into(),
            command_line: String::new(),
            cpu_count: 1,
            memory_mb: 64,
            disks: vec![],
            network_interfaces: vec![],
            shared_directories: vec![],
            serial_ports: vec![],
        }
    }

    #[tokio::test]
    async fn test_idle_lifecycle() {
        let mut vm = IdleHypervisor.build(&config()).unwrap();
        let states = vm.state_changes();
        assert_eq!(*states.borrow(), VmState::Stopped);

        vm.start().await.unwrap().unwrap();
        assert_eq!(*states.borrow(), VmState::Running);

        assert!(vm.request_stop().unwrap());
        assert_eq!(*states.borrow(), VmState::Stopped);
    }

    #[test]
    fn test_idle_rejects_invalid_config() {
        let mut bad = config();
        bad.cpu_count = 0;
        assert!(IdleHypervisor.build(&bad).is_err());
    }
}
