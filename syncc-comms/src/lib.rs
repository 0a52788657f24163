//! Communication with the two recording devices: marker streams for event
//! alignment and the request/response protocol that starts and stops
//! recording.
//!
//! Marker dispatch failures are fatal because a missing marker cannot be
//! repaired offline. Device command failures are not: they are logged and
//! reported as `false`, and the procedure carries on with the other device.

pub mod device;
pub mod error;
pub mod http;
pub mod marker;
pub mod simulated;
pub mod transport;

pub use device::{
    DeviceAddress, DeviceClient, DeviceCommand, DeviceConnection, DeviceOutcome, Devices, Health,
    RecordingState,
};
pub use error::{DeviceError, MarkerError};
pub use http::HttpDeviceClient;
pub use marker::{MarkerBroadcast, MarkerChannel, MarkerCodec, MarkerEvent};
pub use simulated::{DeviceCall, SimulatedDeviceClient};
pub use transport::{
    MarkerRecord, MarkerSink, MarkerTransport, MemorySink, MemoryTransport, ZmqSink, ZmqTransport,
};
