use crate::device::{DeviceAddress, DeviceClient, DeviceCommand};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use syncc_timing::Clock;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCall {
    pub address: DeviceAddress,
    pub command: DeviceCommand,
    pub at: f64,
    pub accepted: bool,
}

/// Stand-in for real acquisition units. Accepts every command except those
/// aimed at addresses marked unreachable, and journals each call with the
/// clock time it was issued. Clones share the journal.
#[derive(Debug, Clone)]
pub struct SimulatedDeviceClient<C: Clock> {
    clock: C,
    unreachable: Arc<Mutex<HashSet<DeviceAddress>>>,
    calls: Arc<Mutex<Vec<DeviceCall>>>,
}

impl<C: Clock> SimulatedDeviceClient<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            unreachable: Arc::default(),
            calls: Arc::default(),
        }
    }

    pub fn set_unreachable(&self, address: DeviceAddress) {
        self.unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address);
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, address: &DeviceAddress, command: DeviceCommand) -> bool {
        let accepted = !self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(address);
        if accepted {
            info!(device = %address, ?command, "simulated device accepted command");
        } else {
            warn!(device = %address, ?command, "simulated device unreachable");
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DeviceCall {
                address: address.clone(),
                command,
                at: self.clock.now(),
                accepted,
            });
        accepted
    }
}

impl<C: Clock> DeviceClient for SimulatedDeviceClient<C> {
    fn health(&self, device: &DeviceAddress) -> bool {
        self.record(device, DeviceCommand::Health)
    }

    fn start(&self, device: &DeviceAddress, label: &str) -> bool {
        self.record(
            device,
            DeviceCommand::Start {
                label: label.to_string(),
            },
        )
    }

    fn stop(&self, device: &DeviceAddress) -> bool {
        self.record(device, DeviceCommand::Stop)
    }
}
