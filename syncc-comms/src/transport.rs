use crate::error::MarkerError;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use syncc_timing::Clock;
use tracing::info;

/// Outbound end of one marker stream. The transport, not the caller,
/// assigns the timestamp of each sample.
pub trait MarkerSink {
    fn stream(&self) -> &str;

    /// Pushes a single-code sample and returns the transport timestamp.
    fn push(&mut self, code: &str) -> Result<f64, MarkerError>;
}

/// Creates marker streams during setup.
pub trait MarkerTransport {
    type Sink: MarkerSink;

    fn open(&mut self, stream: &str, endpoint: &str) -> Result<Self::Sink, MarkerError>;
}

/// ZeroMQ PUB sockets, one per stream. Each sample is the multipart message
/// `[stream, code, timestamp]`.
pub struct ZmqTransport<C: Clock> {
    ctx: zmq::Context,
    clock: C,
}

impl<C: Clock> ZmqTransport<C> {
    pub fn new(clock: C) -> Self {
        Self {
            ctx: zmq::Context::new(),
            clock,
        }
    }
}

impl<C: Clock> MarkerTransport for ZmqTransport<C> {
    type Sink = ZmqSink<C>;

    fn open(&mut self, stream: &str, endpoint: &str) -> Result<ZmqSink<C>, MarkerError> {
        let open_err = |e: zmq::Error| MarkerError::Open {
            stream: stream.to_string(),
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        };

        let socket = self.ctx.socket(zmq::PUB).map_err(open_err)?;
        // Markers still queued at shutdown get a short grace period.
        socket.set_linger(500).map_err(open_err)?;
        socket.set_sndhwm(1000).map_err(open_err)?;
        socket.bind(endpoint).map_err(open_err)?;

        info!(stream, endpoint, "marker stream open");
        Ok(ZmqSink {
            socket,
            stream: stream.to_string(),
            clock: self.clock.clone(),
        })
    }
}

pub struct ZmqSink<C: Clock> {
    socket: zmq::Socket,
    stream: String,
    clock: C,
}

impl<C: Clock> std::fmt::Debug for ZmqSink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZmqSink")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> MarkerSink for ZmqSink<C> {
    fn stream(&self) -> &str {
        &self.stream
    }

    fn push(&mut self, code: &str) -> Result<f64, MarkerError> {
        let timestamp = self.clock.now();
        let stamp = format!("{timestamp:.6}");
        self.socket
            .send_multipart(
                [self.stream.as_bytes(), code.as_bytes(), stamp.as_bytes()],
                0,
            )
            .map_err(|e| MarkerError::Transport {
                stream: self.stream.clone(),
                message: e.to_string(),
            })?;
        Ok(timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub stream: String,
    pub code: String,
    pub timestamp: f64,
}

/// In-process transport for dry runs: every stream appends to one shared log.
#[derive(Debug, Clone)]
pub struct MemoryTransport<C: Clock> {
    clock: C,
    log: Arc<Mutex<Vec<MarkerRecord>>>,
}

impl<C: Clock> MemoryTransport<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            log: Arc::default(),
        }
    }

    /// Every sample pushed so far, across all streams, in push order.
    pub fn records(&self) -> Vec<MarkerRecord> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl<C: Clock> MarkerTransport for MemoryTransport<C> {
    type Sink = MemorySink<C>;

    fn open(&mut self, stream: &str, endpoint: &str) -> Result<MemorySink<C>, MarkerError> {
        info!(stream, endpoint, "in-memory marker stream open");
        Ok(MemorySink {
            stream: stream.to_string(),
            clock: self.clock.clone(),
            log: Arc::clone(&self.log),
        })
    }
}

#[derive(Debug)]
pub struct MemorySink<C: Clock> {
    stream: String,
    clock: C,
    log: Arc<Mutex<Vec<MarkerRecord>>>,
}

impl<C: Clock> MarkerSink for MemorySink<C> {
    fn stream(&self) -> &str {
        &self.stream
    }

    fn push(&mut self, code: &str) -> Result<f64, MarkerError> {
        let timestamp = self.clock.now();
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MarkerRecord {
                stream: self.stream.clone(),
                code: code.to_string(),
                timestamp,
            });
        Ok(timestamp)
    }
}
