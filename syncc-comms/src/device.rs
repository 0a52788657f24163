use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Command interface of a remote acquisition unit. Every call returns
/// `false` on any failure; implementations log the reason.
pub trait DeviceClient {
    fn health(&self, device: &DeviceAddress) -> bool;
    fn start(&self, device: &DeviceAddress, label: &str) -> bool;
    fn stop(&self, device: &DeviceAddress) -> bool;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    #[default]
    Unknown,
    Healthy,
    Unreachable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    /// The last start or stop failed; the device may be in either state.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    Health,
    Start { label: String },
    Stop,
}

/// Result of one command, kept for the session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub role: String,
    #[serde(flatten)]
    pub command: DeviceCommand,
    pub ok: bool,
}

/// Local view of one device: where it is, whether it answered the last
/// health check and whether we believe it is recording.
#[derive(Debug, Clone)]
pub struct DeviceConnection {
    role: String,
    tag: String,
    address: DeviceAddress,
    health: Health,
    recording: RecordingState,
}

impl DeviceConnection {
    pub fn new(role: impl Into<String>, tag: impl Into<String>, address: DeviceAddress) -> Self {
        Self {
            role: role.into(),
            tag: tag.into(),
            address,
            health: Health::Unknown,
            recording: RecordingState::Idle,
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Short tag used in recording file labels.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn health(&self) -> Health {
        self.health
    }

    pub fn recording(&self) -> RecordingState {
        self.recording
    }

    pub fn check_health(&mut self, client: &impl DeviceClient) -> bool {
        let ok = client.health(&self.address);
        self.health = if ok {
            Health::Healthy
        } else {
            Health::Unreachable
        };
        ok
    }

    /// Starts a recording. A second start after a successful one is refused
    /// here and never reaches the device. After a failed command the device
    /// is asked again.
    pub fn start_recording(&mut self, client: &impl DeviceClient, label: &str) -> bool {
        if self.recording == RecordingState::Recording {
            warn!(
                role = %self.role,
                device = %self.address,
                label,
                "start refused: device is already recording"
            );
            return false;
        }
        let ok = client.start(&self.address, label);
        self.recording = if ok {
            RecordingState::Recording
        } else {
            RecordingState::Unknown
        };
        ok
    }

    /// Stops a recording. Sent even when the local state is Idle, because a
    /// start that timed out may still have started the device.
    pub fn stop_recording(&mut self, client: &impl DeviceClient) -> bool {
        if self.recording == RecordingState::Idle {
            warn!(role = %self.role, device = %self.address, "stop sent while no recording is known");
        }
        let ok = client.stop(&self.address);
        self.recording = if ok {
            RecordingState::Idle
        } else {
            RecordingState::Unknown
        };
        ok
    }
}

/// Every device of the session behind one client. Commands go to each device
/// in order and a failure on one never skips the next.
#[derive(Debug)]
pub struct Devices<D: DeviceClient> {
    client: D,
    connections: Vec<DeviceConnection>,
    outcomes: Vec<DeviceOutcome>,
}

impl<D: DeviceClient> Devices<D> {
    pub fn new(client: D, connections: Vec<DeviceConnection>) -> Self {
        Self {
            client,
            connections,
            outcomes: Vec::new(),
        }
    }

    pub fn connections(&self) -> &[DeviceConnection] {
        &self.connections
    }

    pub fn client(&self) -> &D {
        &self.client
    }

    pub fn outcomes(&self) -> &[DeviceOutcome] {
        &self.outcomes
    }

    pub fn check_all(&mut self) -> Vec<bool> {
        let mut results = Vec::with_capacity(self.connections.len());
        for conn in &mut self.connections {
            let ok = conn.check_health(&self.client);
            if ok {
                info!(role = conn.role(), device = %conn.address(), "device healthy");
            } else {
                warn!(role = conn.role(), device = %conn.address(), "device unreachable");
            }
            self.outcomes.push(DeviceOutcome {
                role: conn.role().to_string(),
                command: DeviceCommand::Health,
                ok,
            });
            results.push(ok);
        }
        results
    }

    /// Starts recording everywhere; `label` names each device's file.
    pub fn start_all(&mut self, label: impl Fn(&DeviceConnection) -> String) -> Vec<bool> {
        let mut results = Vec::with_capacity(self.connections.len());
        for conn in &mut self.connections {
            let label = label(conn);
            let ok = conn.start_recording(&self.client, &label);
            if ok {
                info!(role = conn.role(), %label, "recording started");
            }
            self.outcomes.push(DeviceOutcome {
                role: conn.role().to_string(),
                command: DeviceCommand::Start { label },
                ok,
            });
            results.push(ok);
        }
        results
    }

    pub fn stop_all(&mut self) -> Vec<bool> {
        let mut results = Vec::with_capacity(self.connections.len());
        for conn in &mut self.connections {
            let ok = conn.stop_recording(&self.client);
            if ok {
                info!(role = conn.role(), "recording stopped");
            }
            self.outcomes.push(DeviceOutcome {
                role: conn.role().to_string(),
                command: DeviceCommand::Stop,
                ok,
            });
            results.push(ok);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedDeviceClient;
    use std::cell::Cell;
    use syncc_timing::ManualClock;

    fn pair(client: SimulatedDeviceClient<ManualClock>) -> Devices<SimulatedDeviceClient<ManualClock>> {
        Devices::new(
            client,
            vec![
                DeviceConnection::new("child", "d", DeviceAddress::new("localhost", 8888)),
                DeviceConnection::new("caregiver", "m", DeviceAddress::new("192.168.76.100", 8888)),
            ],
        )
    }

    #[test]
    fn double_start_is_refused_locally() {
        let client = SimulatedDeviceClient::new(ManualClock::new());
        let mut conn = DeviceConnection::new("child", "d", DeviceAddress::new("localhost", 8888));

        assert!(conn.start_recording(&client, "a"));
        assert!(!conn.start_recording(&client, "b"));
        assert_eq!(conn.recording(), RecordingState::Recording);
        assert_eq!(client.calls().len(), 1);

        assert!(conn.stop_recording(&client));
        assert_eq!(conn.recording(), RecordingState::Idle);
    }

    /// Accepts every command except the first stop.
    #[derive(Default)]
    struct FirstStopFails {
        starts: Cell<u32>,
        stops: Cell<u32>,
    }

    impl DeviceClient for FirstStopFails {
        fn health(&self, _device: &DeviceAddress) -> bool {
            true
        }

        fn start(&self, _device: &DeviceAddress, _label: &str) -> bool {
            self.starts.set(self.starts.get() + 1);
            true
        }

        fn stop(&self, _device: &DeviceAddress) -> bool {
            self.stops.set(self.stops.get() + 1);
            self.stops.get() > 1
        }
    }

    #[test]
    fn failed_stop_does_not_block_the_next_start() {
        let mut devices = Devices::new(
            FirstStopFails::default(),
            vec![DeviceConnection::new("child", "d", DeviceAddress::new("localhost", 8888))],
        );

        assert_eq!(devices.start_all(|_| "s_d_movies".into()), vec![true]);
        assert_eq!(devices.stop_all(), vec![false]);
        assert_eq!(devices.connections()[0].recording(), RecordingState::Unknown);

        assert_eq!(devices.start_all(|_| "s_d_fc1".into()), vec![true]);
        assert_eq!(devices.connections()[0].recording(), RecordingState::Recording);
        assert_eq!(devices.stop_all(), vec![true]);
        assert_eq!(devices.client().starts.get(), 2);
    }

    #[test]
    fn failure_on_first_device_does_not_skip_second() {
        let client = SimulatedDeviceClient::new(ManualClock::new());
        client.set_unreachable(DeviceAddress::new("localhost", 8888));
        let mut devices = pair(client.clone());

        assert_eq!(devices.check_all(), vec![false, true]);
        assert_eq!(devices.start_all(|c| format!("s_{}_movies", c.tag())), vec![false, true]);
        assert_eq!(devices.stop_all(), vec![false, true]);

        assert_eq!(client.calls().len(), 6);
        assert_eq!(devices.connections()[0].health(), Health::Unreachable);
        assert_eq!(devices.connections()[1].health(), Health::Healthy);
        assert_eq!(devices.outcomes().len(), 6);
    }

    #[test]
    fn labels_are_built_per_device() {
        let client = SimulatedDeviceClient::new(ManualClock::new());
        let mut devices = pair(client.clone());
        devices.start_all(|c| format!("stem_{}_fc1", c.tag()));

        let labels: Vec<_> = devices
            .outcomes()
            .iter()
            .filter_map(|o| match &o.command {
                DeviceCommand::Start { label } => Some(label.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec!["stem_d_fc1", "stem_m_fc1"]);
    }
}
