use crate::context::{ProcedureContext, SessionIdentity};
use crate::error::{ProcedureError, Result};
use crate::photodiode::PhotodiodeReport;
use crate::routines::ConversationOutcome;
use crate::scheduler::RoutineReport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use syncc_comms::{DeviceOutcome, MarkerEvent};
use syncc_core::Stage;
use syncc_timing::CalibrationStats;

/// Everything needed to line the recordings up afterwards. Written once, by
/// WrapUp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session: SessionIdentity,
    pub start_stage: Stage,
    pub debug: bool,
    pub frame_tolerance: f64,
    pub stages: Vec<Stage>,
    pub calibration: Option<CalibrationStats>,
    pub movie_order: Vec<String>,
    pub routines: Vec<RoutineReport>,
    pub photodiode: Vec<PhotodiodeReport>,
    pub conversations: Vec<ConversationOutcome>,
    pub markers: Vec<MarkerEvent>,
    pub devices: Vec<DeviceOutcome>,
}

impl SessionRecord {
    pub fn new(ctx: &ProcedureContext) -> Self {
        let config = ctx.config();
        Self {
            session: ctx.session().clone(),
            start_stage: config.start_stage,
            debug: config.debug,
            frame_tolerance: config.frame_tolerance,
            stages: Vec::new(),
            calibration: None,
            movie_order: Vec::new(),
            routines: Vec::new(),
            photodiode: Vec::new(),
            conversations: Vec::new(),
            markers: Vec::new(),
            devices: Vec::new(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.session.stem)
    }

    /// Writes `<dir>/<stem>.json`, creating `dir` if needed.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(io_err(dir))?;
        let path = dir.join(self.file_name());
        let file = fs::File::create(&path).map_err(io_err(&path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(io_err(&path))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(io_err(path))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ProcedureError {
    let path = path.to_path_buf();
    move |source| ProcedureError::Io { path, source }
}
