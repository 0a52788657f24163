pub mod clock;
pub mod timer;

pub use clock::{Clock, ManualClock, MonotonicClock, RoutineClock};
pub use timer::{CalibrationStats, FrameIntervals};
