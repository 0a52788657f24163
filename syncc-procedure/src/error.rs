use crate::config::ConfigError;
use std::path::PathBuf;
use syncc_comms::MarkerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcedureError {
    /// The researcher pressed the abort key. Nothing after this point runs.
    #[error("procedure aborted by the researcher")]
    Aborted,

    #[error("routine '{routine}': component '{component}' has no duration and no end of its own")]
    MissingDuration { routine: String, component: String },

    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write session record {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode session record: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProcedureError {
    pub fn is_abort(&self) -> bool {
        matches!(self, ProcedureError::Aborted)
    }
}

pub type Result<T, E = ProcedureError> = std::result::Result<T, E>;
