use std::time::Duration;

use tokio::time::Instant;

/// Idle period after the last keystroke before `typing_stop` is sent.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(3);

/// Signal the debounce wants sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

/// Local debounce of outbound typing indicators.
///
/// `Start` is produced only when entering the typing state; every keystroke
/// pushes the idle deadline forward; `Stop` is produced at most once per
/// typing period.
#[derive(Debug, Clone)]
pub struct TypingDebounce {
    idle: Duration,
    deadline: Option<Instant>,
}

impl TypingDebounce {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// A keystroke left non-empty content.
    pub fn keystroke(&mut self, now: Instant) -> Option<TypingSignal> {
        let was_typing = self.deadline.replace(now + self.idle).is_some();
        (!was_typing).then_some(TypingSignal::Start)
    }

    /// Input became empty.
    pub fn cleared(&mut self) -> Option<TypingSignal> {
        self.deadline.take().map(|_| TypingSignal::Stop)
    }

    /// Timer check; yields `Stop` once the deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }

    /// Drop the pending deadline without producing a signal.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

impl Default for TypingDebounce {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_IDLE)
    }
}
