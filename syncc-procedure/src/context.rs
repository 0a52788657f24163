use crate::config::ProcedureConfig;
use chrono::{DateTime, Local};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Who is being recorded and under which file stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub participant: String,
    pub session: String,
    pub started_at: DateTime<Local>,
    pub stem: String,
}

impl SessionIdentity {
    pub fn new(participant: impl Into<String>, session: impl Into<String>, started_at: DateTime<Local>) -> Self {
        let participant = participant.into();
        let stem = recording_stem(&started_at, &participant);
        Self {
            participant,
            session: session.into(),
            started_at,
            stem,
        }
    }

    /// Six-digit participant id for sessions started without one.
    pub fn random_participant(rng: &mut impl Rng) -> String {
        format!("{:06}", rng.random_range(0..1_000_000u32))
    }
}

/// `YYYY_MM_DD_fnirs_HHMM_<participant>`, the name both acquisition units
/// file their recordings under.
pub fn recording_stem(at: &DateTime<Local>, participant: &str) -> String {
    format!("{}_fnirs_{}_{participant}", at.format("%Y_%m_%d"), at.format("%H%M"))
}

/// Everything a stage handler needs to know about the session, passed
/// explicitly instead of living in process-wide state.
#[derive(Debug, Clone)]
pub struct ProcedureContext {
    config: Arc<ProcedureConfig>,
    session: SessionIdentity,
}

impl ProcedureContext {
    pub fn new(config: Arc<ProcedureConfig>, session: SessionIdentity) -> Self {
        Self { config, session }
    }

    pub fn config(&self) -> &Arc<ProcedureConfig> {
        &self.config
    }

    pub fn session(&self) -> &SessionIdentity {
        &self.session
    }

    /// Recording file label for one device and one segment.
    pub fn recording_label(&self, tag: &str, segment: &str) -> String {
        format!("{}_{tag}_{segment}", self.session.stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn stem_and_labels() {
        let at = Local.with_ymd_and_hms(2025, 1, 31, 14, 5, 9).unwrap();
        let session = SessionIdentity::new("004217", "001", at);
        assert_eq!(session.stem, "2025_01_31_fnirs_1405_004217");

        let ctx = ProcedureContext::new(Arc::new(ProcedureConfig::default()), session);
        assert_eq!(ctx.recording_label("m", "fc2"), "2025_01_31_fnirs_1405_004217_m_fc2");
    }

    #[test]
    fn random_participant_is_six_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let id = SessionIdentity::random_participant(&mut rng);
            assert_eq!(id.len(), 6);
            assert!(id.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
