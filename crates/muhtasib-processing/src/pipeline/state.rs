use std::fmt;

/// Where one artifact is in the fetch → scan → release sequence.
///
/// ```text
/// Pending → Fetching → Fetched → Scanning → Scanned → Cleaned
///              ↓          ↓          ↓          ↓
///          FetchError Cancelled  ScanError  CleanupWarning
/// ```
///
/// `Pending` can also go straight to `Cancelled`. `CleanupWarning` still carries a
/// definite verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactState {
    Pending,
    Fetching,
    Fetched,
    Scanning,
    Scanned,
    Cleaned,
    FetchError,
    ScanError,
    CleanupWarning,
    Cancelled,
}

impl ArtifactState {
    pub fn can_transition_to(self, next: ArtifactState) -> bool {
        use ArtifactState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Cancelled)
                | (Fetching, Fetched)
                | (Fetching, FetchError)
                | (Fetched, Scanning)
                | (Fetched, Cancelled)
                | (Scanning, Scanned)
                | (Scanning, ScanError)
                | (Scanned, Cleaned)
                | (Scanned, CleanupWarning)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ArtifactState::Cleaned
                | ArtifactState::FetchError
                | ArtifactState::ScanError
                | ArtifactState::CleanupWarning
                | ArtifactState::Cancelled
        )
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-artifact state holder; logs every move
#[derive(Debug)]
pub(crate) struct Tracker {
    state: ArtifactState,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Self {
            state: ArtifactState::Pending,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ArtifactState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: ArtifactState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal artifact transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(from = %self.state, to = %next, "Artifact state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::ArtifactState::*;
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [Pending, Fetching, Fetched, Scanning, Scanned, Cleaned];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
        assert!(Cleaned.is_terminal());
    }

    #[test]
    fn error_exits_only_from_their_phase() {
        assert!(Fetching.can_transition_to(FetchError));
        assert!(Scanning.can_transition_to(ScanError));
        assert!(Scanned.can_transition_to(CleanupWarning));

        assert!(!Scanning.can_transition_to(FetchError));
        assert!(!Fetched.can_transition_to(ScanError));
        assert!(!Scanning.can_transition_to(CleanupWarning));
        // No cancellation once the scan call is in flight
        assert!(!Scanning.can_transition_to(Cancelled));
    }

    #[test]
    fn terminal_states_go_nowhere() {
        let all = [
            Pending, Fetching, Fetched, Scanning, Scanned, Cleaned, FetchError, ScanError,
            CleanupWarning, Cancelled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn tracker_follows_transitions() {
        let mut tracker = Tracker::new();
        tracker.advance(Fetching);
        tracker.advance(FetchError);
        assert_eq!(tracker.state(), FetchError);
    }
}
