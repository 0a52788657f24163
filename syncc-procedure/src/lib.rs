//! The dyad procedure: configuration, the frame-paced routine scheduler,
//! photodiode encoding and the stage sequencer that ties presentation,
//! markers and device commands together.

pub mod config;
pub mod context;
pub mod error;
pub mod headless;
pub mod photodiode;
pub mod record;
pub mod routines;
pub mod scheduler;
pub mod state;

pub use config::{
    ConfigError, ConversationConfig, DeviceConfig, KeyConfig, MovieConfig, MovieSpec,
    ProcedureConfig, TimeoutConfig,
};
pub use context::{ProcedureContext, SessionIdentity, recording_stem};
pub use error::{ProcedureError, Result};
pub use headless::HeadlessSurface;
pub use photodiode::{PhotodiodeReport, PhotodiodeSignal};
pub use record::SessionRecord;
pub use routines::{ConversationOutcome, CountdownOutcome, MovieOutcome};
pub use scheduler::{FrameInfo, RoutineReport, RoutineScheduler};
pub use state::ProcedureStateMachine;
