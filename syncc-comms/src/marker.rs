use crate::error::MarkerError;
use crate::transport::MarkerSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Semantic event name -> wire code. Injected from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerCodec {
    codes: BTreeMap<String, String>,
}

impl MarkerCodec {
    pub fn new(codes: BTreeMap<String, String>) -> Self {
        Self { codes }
    }

    /// The deployed table: three movies and two conversation segments,
    /// coded "1" through "10" in start/stop pairs.
    pub fn standard() -> Self {
        [
            "m1_start", "m1_stop", "m2_start", "m2_stop", "m3_start", "m3_stop", "fc1_start",
            "fc1_stop", "fc2_start", "fc2_stop",
        ]
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), (i + 1).to_string()))
        .collect()
    }

    pub fn resolve(&self, name: &str) -> Result<&str, MarkerError> {
        self.codes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| MarkerError::UnknownMarker(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl FromIterator<(String, String)> for MarkerCodec {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// One dispatched marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerEvent {
    pub name: String,
    pub code: String,
    pub channel: String,
    /// Transport-assigned timestamp.
    pub timestamp: f64,
}

/// Marker publisher for one recipient device.
#[derive(Debug)]
pub struct MarkerChannel<S: MarkerSink> {
    recipient: String,
    codec: Arc<MarkerCodec>,
    sink: S,
}

impl<S: MarkerSink> MarkerChannel<S> {
    pub fn new(recipient: impl Into<String>, codec: Arc<MarkerCodec>, sink: S) -> Self {
        Self {
            recipient: recipient.into(),
            codec,
            sink,
        }
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Resolves `name` and pushes its code. Unmapped names fail before
    /// anything reaches the wire.
    pub fn send(&mut self, name: &str) -> Result<MarkerEvent, MarkerError> {
        let code = self.codec.resolve(name).inspect_err(|e| error!("{e}"))?;
        let timestamp = self.sink.push(code)?;
        debug!(
            recipient = %self.recipient,
            stream = self.sink.stream(),
            marker = name,
            code,
            timestamp,
            "marker sent"
        );
        Ok(MarkerEvent {
            name: name.to_string(),
            code: code.to_string(),
            channel: self.recipient.clone(),
            timestamp,
        })
    }
}

/// All marker channels of a session, sent to in a fixed order, plus the log
/// of everything dispatched.
#[derive(Debug)]
pub struct MarkerBroadcast<S: MarkerSink> {
    codec: Arc<MarkerCodec>,
    channels: Vec<MarkerChannel<S>>,
    sent: Vec<MarkerEvent>,
}

impl<S: MarkerSink> MarkerBroadcast<S> {
    pub fn new(codec: Arc<MarkerCodec>) -> Self {
        Self {
            codec,
            channels: Vec::new(),
            sent: Vec::new(),
        }
    }

    pub fn add_channel(&mut self, recipient: impl Into<String>, sink: S) {
        self.channels
            .push(MarkerChannel::new(recipient, Arc::clone(&self.codec), sink));
    }

    pub fn channels(&self) -> &[MarkerChannel<S>] {
        &self.channels
    }

    /// Sends `name` on every channel. The name is resolved once up front so
    /// an unmapped name reaches no channel at all.
    pub fn send_all(&mut self, name: &str) -> Result<(), MarkerError> {
        self.codec.resolve(name).inspect_err(|e| error!("{e}"))?;
        for channel in &mut self.channels {
            let event = channel.send(name)?;
            self.sent.push(event);
        }
        Ok(())
    }

    pub fn sent(&self) -> &[MarkerEvent] {
        &self.sent
    }
}
