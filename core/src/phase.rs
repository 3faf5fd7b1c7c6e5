use serde::{Deserialize, Serialize};

/// How a finished round ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Won,
    Lost,
}

/// Lifecycle of one game object. Created `Idle`; mutated only while
/// holding the owning game's lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Playing,
    /// Transient feedback sub-state: accepts no grid input and advances
    /// on a scheduled callback, never a blocking sleep.
    RoundTransition,
    Over(Outcome),
}

impl Phase {
    pub const fn is_playing(self) -> bool {
        matches!(self, Self::Playing)
    }

    pub const fn is_over(self) -> bool {
        matches!(self, Self::Over(_))
    }

    /// The start/restart control is honored from Idle and terminal
    /// screens only; everything else ignores it.
    pub const fn accepts_start(self) -> bool {
        matches!(self, Self::Idle | Self::Over(_))
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_accepted_from_idle_and_terminal_only() {
        assert!(Phase::Idle.accepts_start());
        assert!(Phase::Over(Outcome::Won).accepts_start());
        assert!(Phase::Over(Outcome::Lost).accepts_start());
        assert!(!Phase::Playing.accepts_start());
        assert!(!Phase::RoundTransition.accepts_start());
    }
}
