#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    Streaming,
    Completed,
    Errored,
}

/// Observable snapshot of the accumulator.
///
/// The derived [`StreamPhase`] is the state machine position; the flags are
/// what a view binds to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingState {
    pub is_streaming: bool,
    pub current_content: String,
    pub finished: bool,
    pub error: Option<String>,
}

impl StreamingState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub(crate) fn streaming() -> Self {
        Self {
            is_streaming: true,
            ..Self::default()
        }
    }

    pub fn phase(&self) -> StreamPhase {
        if self.is_streaming {
            StreamPhase::Streaming
        } else if self.error.is_some() {
            StreamPhase::Errored
        } else if self.finished {
            StreamPhase::Completed
        } else {
            StreamPhase::Idle
        }
    }

    pub fn is_complete(&self) -> bool {
        self.finished && !self.is_streaming && self.error.is_none()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn can_start_new_stream(&self) -> bool {
        !self.is_streaming
    }
}
