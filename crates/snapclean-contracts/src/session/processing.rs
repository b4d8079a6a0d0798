/// Status text shown while an edit request is outstanding.
pub const PROCESSING_MESSAGE: &str = "Analyzing and editing image...";

/// Tracks the single in-flight edit request. `message` is non-empty exactly
/// while `is_processing` is true.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessingState {
    pub is_processing: bool,
    pub message: String,
}

impl ProcessingState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn active(message: impl Into<String>) -> Self {
        Self {
            is_processing: true,
            message: message.into(),
        }
    }
}

/// Phase of the session state machine, derived from the owned state: no
/// source image selected, source selected and quiescent, or one request in
/// flight.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionPhase {
    Idle,
    Ready,
    Processing,
}

#[cfg(test)]
mod tests {
    use super::ProcessingState;

    #[test]
    fn idle_state_has_no_message() {
        let state = ProcessingState::idle();
        assert!(!state.is_processing);
        assert!(state.message.is_empty());
    }

    #[test]
    fn active_state_carries_status_text() {
        let state = ProcessingState::active("Analyzing and editing image...");
        assert!(state.is_processing);
        assert_eq!(state.message, "Analyzing and editing image...");
    }
}
