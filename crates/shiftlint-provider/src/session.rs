use serde::{Deserialize, Serialize};

/// Monotonic provider session lifecycle.
///
/// `Created` is observable only inside the engine; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Initialized,
    Prepared,
    Serving,
    Stopped,
}

impl SessionState {
    /// True when `next` is a legal forward transition. Stopping is legal
    /// from every state, including `Stopped` (stop is idempotent).
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Stopped) => true,
            (Created, Initialized) => true,
            (Initialized, Prepared) => true,
            (Initialized, Serving) => true,
            (Prepared, Serving) => true,
            (Prepared, Prepared) => true,
            (Serving, Serving) => true,
            _ => false,
        }
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_is_monotonic() {
        use SessionState::*;
        assert!(Created.can_advance_to(Initialized));
        assert!(Initialized.can_advance_to(Prepared));
        assert!(Prepared.can_advance_to(Serving));
        assert!(!Serving.can_advance_to(Initialized));
        assert!(!Stopped.can_advance_to(Serving));
    }

    #[test]
    fn stop_is_reachable_from_everywhere() {
        use SessionState::*;
        for state in [Created, Initialized, Prepared, Serving, Stopped] {
            assert!(state.can_advance_to(Stopped));
        }
    }

    #[test]
    fn prepare_is_idempotent() {
        assert!(SessionState::Prepared.can_advance_to(SessionState::Prepared));
    }
}
