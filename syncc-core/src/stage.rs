use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level stages of the dyad procedure, in execution order.
#[derive(Copy, Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    #[default]
    Setup,
    Calibration,
    Movies,
    FreeConversation,
    WrapUp,
}

impl Stage {
    pub fn next(&self) -> Option<Self> {
        use Stage::*;
        Some(match self {
            Setup => Calibration,
            Calibration => Movies,
            Movies => FreeConversation,
            FreeConversation => WrapUp,
            WrapUp => return None,
        })
    }

    /// Stages a session may be resumed at. Setup always runs and WrapUp
    /// always follows, so neither is a valid starting point.
    pub fn is_entry_point(&self) -> bool {
        matches!(
            self,
            Stage::Calibration | Stage::Movies | Stage::FreeConversation
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Calibration => "calibration",
            Stage::Movies => "movies",
            Stage::FreeConversation => "free-conversation",
            Stage::WrapUp => "wrap-up",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Stage {
    type Err = String;

    /// Accepts stage labels and the numeric labels researchers know from the
    /// session dialog ("2" calibration, "3" movies, "4" free conversation).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calibration" | "2" => Ok(Stage::Calibration),
            "movies" | "3" => Ok(Stage::Movies),
            "free-conversation" | "free-convo" | "4" => Ok(Stage::FreeConversation),
            other => Err(format!(
                "unknown start stage '{other}' (expected calibration, movies or free-conversation)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_in_order_and_terminate() {
        let mut stage = Stage::Setup;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            seen.push(next);
            stage = next;
        }
        assert_eq!(
            seen,
            vec![
                Stage::Setup,
                Stage::Calibration,
                Stage::Movies,
                Stage::FreeConversation,
                Stage::WrapUp
            ]
        );
    }

    #[test]
    fn parses_labels_and_dialog_numbers() {
        assert_eq!("movies".parse::<Stage>(), Ok(Stage::Movies));
        assert_eq!("4".parse::<Stage>(), Ok(Stage::FreeConversation));
        assert_eq!(" Calibration ".parse::<Stage>(), Ok(Stage::Calibration));
        assert!("setup".parse::<Stage>().is_err());
        assert!("wrap-up".parse::<Stage>().is_err());
    }

    #[test]
    fn only_middle_stages_are_entry_points() {
        assert!(!Stage::Setup.is_entry_point());
        assert!(Stage::Movies.is_entry_point());
        assert!(!Stage::WrapUp.is_entry_point());
        assert!(Stage::Calibration < Stage::FreeConversation);
    }
}
