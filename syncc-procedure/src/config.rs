use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use syncc_comms::{DeviceAddress, DeviceConnection, MarkerCodec};
use syncc_core::Stage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("marker '{0}' is emitted by the procedure but missing from the marker map")]
    UnmappedMarker(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One recording unit and the marker stream that feeds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub role: String,
    /// Short tag used in recording labels ("d" child, "m" caregiver).
    pub tag: String,
    pub host: String,
    pub port: u16,
    pub stream: String,
    pub endpoint: String,
}

impl DeviceConfig {
    pub fn address(&self) -> DeviceAddress {
        DeviceAddress::new(&self.host, self.port)
    }

    pub fn connection(&self) -> DeviceConnection {
        DeviceConnection::new(&self.role, &self.tag, self.address())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSpec {
    pub name: String,
    pub path: PathBuf,
    pub duration_secs: f64,
}

impl MovieSpec {
    pub fn new(name: &str, path: impl Into<PathBuf>, duration_secs: f64) -> Self {
        Self {
            name: name.to_string(),
            path: path.into(),
            duration_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovieConfig {
    /// Movie set in identity order; a movie's photodiode code is its position
    /// here plus one.
    pub items: Vec<MovieSpec>,
    /// Replays a fixed presentation order instead of drawing a permutation.
    pub order: Option<Vec<String>>,
    pub fixation_secs: f64,
    pub photodiode_interval_secs: f64,
    pub debug_duration_secs: f64,
}

impl Default for MovieConfig {
    fn default() -> Self {
        Self {
            items: vec![
                MovieSpec::new("m1", "movies/norm_mov1.mp4", 60.0),
                MovieSpec::new("m2", "movies/norm_mov2.mp4", 60.0),
                MovieSpec::new("m3", "movies/norm_mov3.mp4", 60.0),
            ],
            order: None,
            fixation_secs: 10.0,
            photodiode_interval_secs: 0.5,
            debug_duration_secs: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub segments: Vec<String>,
    pub countdown_secs: f64,
    pub length_secs: f64,
    pub beacon_toggles: u32,
    pub beacon_interval_secs: f64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            segments: vec!["fc1".into(), "fc2".into()],
            countdown_secs: 30.0,
            length_secs: 180.0,
            beacon_toggles: 4,
            beacon_interval_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Continues past researcher gates and ends countdowns early.
    pub next: String,
    pub abort: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            next: "x".into(),
            abort: "escape".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub health_secs: f64,
    pub command_secs: f64,
    /// Researcher gates continue on their own after this long.
    pub gate_secs: Option<f64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            health_secs: 5.0,
            command_secs: 10.0,
            gate_secs: None,
        }
    }
}

impl TimeoutConfig {
    pub fn health(&self) -> Duration {
        Duration::from_secs_f64(self.health_secs)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs_f64(self.command_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureConfig {
    /// Slack for every start/stop boundary comparison, in seconds.
    pub frame_tolerance: f64,
    pub start_stage: Stage,
    pub debug: bool,
    pub save_dir: PathBuf,
    pub calibration_frames: usize,
    /// Pause between starting the recordings and the segment's start marker.
    pub recording_settle_secs: f64,
    pub markers: MarkerCodec,
    pub devices: Vec<DeviceConfig>,
    pub movies: MovieConfig,
    pub conversation: ConversationConfig,
    pub keys: KeyConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for ProcedureConfig {
    fn default() -> Self {
        Self {
            frame_tolerance: 0.005,
            start_stage: Stage::Calibration,
            debug: false,
            save_dir: PathBuf::from("fnirs_data"),
            calibration_frames: 120,
            recording_settle_secs: 1.0,
            markers: MarkerCodec::standard(),
            devices: vec![
                DeviceConfig {
                    role: "child".into(),
                    tag: "d".into(),
                    host: "localhost".into(),
                    port: 8888,
                    stream: "cv_child_marker_in".into(),
                    endpoint: "tcp://*:5560".into(),
                },
                DeviceConfig {
                    role: "caregiver".into(),
                    tag: "m".into(),
                    host: "192.168.76.100".into(),
                    port: 8888,
                    stream: "cv_caregiver_marker_in".into(),
                    endpoint: "tcp://*:5561".into(),
                },
            ],
            movies: MovieConfig::default(),
            conversation: ConversationConfig::default(),
            keys: KeyConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl ProcedureConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents, path)
    }

    fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Every marker name the procedure will emit, in emission order.
    pub fn emitted_markers(&self) -> Vec<String> {
        self.movies
            .items
            .iter()
            .map(|m| m.name.as_str())
            .chain(self.conversation.segments.iter().map(String::as_str))
            .flat_map(|name| [format!("{name}_start"), format!("{name}_stop")])
            .collect()
    }

    /// 1-based identity of a movie, as encoded by the photodiode.
    pub fn movie_ordinal(&self, name: &str) -> Option<u32> {
        self.movies
            .items
            .iter()
            .position(|m| m.name == name)
            .map(|i| i as u32 + 1)
    }

    pub fn movie(&self, name: &str) -> Option<&MovieSpec> {
        self.movies.items.iter().find(|m| m.name == name)
    }

    /// How long a movie is presented: its full length, or the fixed debug
    /// length in debug mode.
    pub fn presentation_secs(&self, movie: &MovieSpec) -> f64 {
        if self.debug {
            self.movies.debug_duration_secs
        } else {
            movie.duration_secs
        }
    }

    /// Rejects anything that would otherwise fail in the middle of a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("frame_tolerance", self.frame_tolerance),
            ("movies.fixation_secs", self.movies.fixation_secs),
            ("movies.photodiode_interval_secs", self.movies.photodiode_interval_secs),
            ("movies.debug_duration_secs", self.movies.debug_duration_secs),
            ("conversation.countdown_secs", self.conversation.countdown_secs),
            ("conversation.length_secs", self.conversation.length_secs),
            ("conversation.beacon_interval_secs", self.conversation.beacon_interval_secs),
            ("timeouts.health_secs", self.timeouts.health_secs),
            ("timeouts.command_secs", self.timeouts.command_secs),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{field} must be positive, got {value}")));
            }
        }
        let non_negative = [
            ("recording_settle_secs", Some(self.recording_settle_secs)),
            ("timeouts.gate_secs", self.timeouts.gate_secs),
        ];
        for (field, value) in non_negative {
            if let Some(v) = value.filter(|v| !(v.is_finite() && *v >= 0.0)) {
                return Err(ConfigError::Invalid(format!("{field} must not be negative, got {v}")));
            }
        }
        if self.conversation.beacon_toggles == 0 {
            return Err(ConfigError::Invalid("conversation.beacon_toggles must be at least 1".into()));
        }
        if self.calibration_frames == 0 {
            return Err(ConfigError::Invalid("calibration_frames must be at least 1".into()));
        }
        if !self.start_stage.is_entry_point() {
            return Err(ConfigError::Invalid(format!(
                "a session cannot start at stage '{}'",
                self.start_stage
            )));
        }

        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("at least one device is required".into()));
        }
        let mut roles = HashSet::new();
        for device in &self.devices {
            if !roles.insert(device.role.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate device role '{}'", device.role)));
            }
        }

        if self.movies.items.is_empty() {
            return Err(ConfigError::Invalid("at least one movie is required".into()));
        }
        let mut names = HashSet::new();
        for movie in &self.movies.items {
            if !names.insert(movie.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate movie '{}'", movie.name)));
            }
            if !(movie.duration_secs.is_finite() && movie.duration_secs > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "movie '{}' needs a positive duration",
                    movie.name
                )));
            }
        }
        if let Some(order) = &self.movies.order {
            let mut sorted: Vec<&str> = order.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            let mut expected: Vec<&str> = names.into_iter().collect();
            expected.sort_unstable();
            if sorted != expected {
                return Err(ConfigError::Invalid(format!(
                    "movies.order {order:?} is not a permutation of the configured movies"
                )));
            }
        }

        for name in self.emitted_markers() {
            if !self.markers.contains(&name) {
                return Err(ConfigError::UnmappedMarker(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_deployed_procedure() {
        let config = ProcedureConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frame_tolerance, 0.005);
        assert_eq!(config.markers.len(), 10);
        assert_eq!(config.devices[1].tag, "m");
        assert_eq!(config.movie_ordinal("m3"), Some(3));
        assert_eq!(
            config.emitted_markers()[..4],
            ["m1_start", "m1_stop", "m2_start", "m2_stop"]
        );
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
debug = true
start_stage = "free-conversation"

[conversation]
countdown_secs = 2.0
length_secs = 3.0

[timeouts]
gate_secs = 0.5
"#
        )
        .unwrap();

        let config = ProcedureConfig::load(file.path()).unwrap();
        config.validate().unwrap();
        assert!(config.debug);
        assert_eq!(config.start_stage, Stage::FreeConversation);
        assert_eq!(config.conversation.length_secs, 3.0);
        assert_eq!(config.conversation.segments, vec!["fc1", "fc2"]);
        assert_eq!(config.timeouts.gate_secs, Some(0.5));
        assert_eq!(config.presentation_secs(&config.movies.items[0]), 10.0);
    }

    #[test]
    fn marker_map_from_file_replaces_the_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[markers]
m1_start = "1"
m1_stop = "2"
"#
        )
        .unwrap();

        let config = ProcedureConfig::load(file.path()).unwrap();
        assert_eq!(config.markers.len(), 2);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnmappedMarker(ref n) if n == "m2_start"));
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "frame_tolerance = \"fast\"").unwrap();
        let err = ProcedureConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == file.path()));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProcedureConfig::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = ProcedureConfig::default();
        config.frame_tolerance = 0.0;
        assert!(config.validate().is_err());

        let mut config = ProcedureConfig::default();
        config.start_stage = Stage::WrapUp;
        assert!(config.validate().is_err());

        let mut config = ProcedureConfig::default();
        config.movies.order = Some(vec!["m1".into(), "m1".into(), "m2".into()]);
        assert!(config.validate().is_err());

        let mut config = ProcedureConfig::default();
        config.movies.order = Some(vec!["m3".into(), "m1".into(), "m2".into()]);
        assert!(config.validate().is_ok());

        let mut config = ProcedureConfig::default();
        config.conversation.segments.push("fc3".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnmappedMarker(ref n)) if n == "fc3_start"
        ));
    }

    #[test]
    fn nan_delays_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "recording_settle_secs = nan").unwrap();
        let config = ProcedureConfig::load(file.path()).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ProcedureConfig::default();
        config.timeouts.gate_secs = Some(f64::NAN);
        assert!(config.validate().is_err());

        config.timeouts.gate_secs = Some(0.0);
        config.recording_settle_secs = 0.0;
        assert!(config.validate().is_ok());
    }
}
