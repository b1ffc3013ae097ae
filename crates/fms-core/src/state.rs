//! Per-measurement ingestion state machine
//!
//! ```text
//! Received -> Validated -> Classified -> Persisted
//!     |                          \
//!     v                           -> Queued
//! Rejected
//! ```
//!
//! `Persisted`, `Queued` and `Rejected` are terminal for the request. A
//! queued measurement continues in the retry queue, outside this machine.

use crate::error::TransitionError;
use serde::Serialize;

/// Where a single measurement is in the ingestion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IngestState {
    /// Handed over by the transport
    Received,
    /// Passed boundary validation
    Validated,
    /// Anomaly flag attached
    Classified,
    /// First write succeeded
    Persisted,
    /// First write failed, handed to the retry queue
    Queued,
    /// Failed validation
    Rejected,
}

impl IngestState {
    /// Check if no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        allowed_transitions(self).is_empty()
    }
}

/// States reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: IngestState) -> &'static [IngestState] {
    use IngestState::*;
    match from {
        Received => &[Validated, Rejected],
        Validated => &[Classified],
        Classified => &[Persisted, Queued],
        Persisted | Queued | Rejected => &[],
    }
}

/// Check a single transition
///
/// # Errors
/// [`TransitionError`] if `to` is not reachable from `from`.
pub fn validate_transition(from: IngestState, to: IngestState) -> Result<(), TransitionError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Tracks one measurement through the machine
#[derive(Debug, Clone)]
pub(crate) struct IngestFlow {
    state: IngestState,
    tag: String,
}

impl IngestFlow {
    pub(crate) fn received(tag: &str) -> Self {
        Self {
            state: IngestState::Received,
            tag: tag.to_string(),
        }
    }

    /// Move to `to`; transitions are fixed by the orchestrator's code path
    pub(crate) fn advance(&mut self, to: IngestState) {
        let step = validate_transition(self.state, to);
        debug_assert!(step.is_ok(), "{step:?}");
        if let Err(err) = step {
            tracing::error!(tag = %self.tag, %err, "ingest state machine violated");
        }
        tracing::trace!(tag = %self.tag, from = ?self.state, ?to, "ingest transition");
        self.state = to;
    }

    pub(crate) fn state(&self) -> IngestState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [IngestState; 6] = [
        IngestState::Received,
        IngestState::Validated,
        IngestState::Classified,
        IngestState::Persisted,
        IngestState::Queued,
        IngestState::Rejected,
    ];

    #[test]
    fn happy_paths() {
        use IngestState::*;
        assert!(validate_transition(Received, Validated).is_ok());
        assert!(validate_transition(Validated, Classified).is_ok());
        assert!(validate_transition(Classified, Persisted).is_ok());
        assert!(validate_transition(Classified, Queued).is_ok());
        assert!(validate_transition(Received, Rejected).is_ok());
    }

    #[test]
    fn no_shortcuts_or_reversals() {
        use IngestState::*;
        assert!(validate_transition(Received, Persisted).is_err());
        assert!(validate_transition(Validated, Rejected).is_err());
        assert!(validate_transition(Queued, Persisted).is_err());
        assert!(validate_transition(Persisted, Queued).is_err());
    }

    #[test]
    fn terminal_states() {
        let terminal: Vec<_> = ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![IngestState::Persisted, IngestState::Queued, IngestState::Rejected]
        );
    }

    #[test]
    fn flow_follows_transitions() {
        let mut flow = IngestFlow::received("fermenter_ph");
        flow.advance(IngestState::Validated);
        flow.advance(IngestState::Classified);
        flow.advance(IngestState::Queued);
        assert_eq!(flow.state(), IngestState::Queued);
    }

    proptest! {
        #[test]
        fn prop_validation_matches_table(from in 0usize..6, to in 0usize..6) {
            let (from, to) = (ALL[from], ALL[to]);
            let ok = validate_transition(from, to).is_ok();
            prop_assert_eq!(ok, allowed_transitions(from).contains(&to));
        }
    }
}
