#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Polling,
    HasMessages,
    Empty,
    Terminated,
}

/// What the loop should do with the result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Dispatch { received: usize },
    Backoff { empty_polls: u32 },
    Terminate { empty_polls: u32 },
}

/// Counts consecutive empty polls and decides when a drain is finished.
#[derive(Debug, Clone)]
pub struct DrainTracker {
    state: DrainState,
    empty_polls: u32,
    max_empty_polls: u32,
}

impl DrainTracker {
    pub fn new(max_empty_polls: u32) -> Self {
        Self {
            state: DrainState::Polling,
            empty_polls: 0,
            max_empty_polls: max_empty_polls.max(1),
        }
    }

    pub fn state(&self) -> DrainState {
        self.state
    }

    pub fn empty_polls(&self) -> u32 {
        self.empty_polls
    }

    pub fn max_empty_polls(&self) -> u32 {
        self.max_empty_polls
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DrainState::Terminated
    }

    pub fn observe(&mut self, received: usize) -> PollOutcome {
        if self.is_terminated() {
            return PollOutcome::Terminate {
                empty_polls: self.empty_polls,
            };
        }

        if received > 0 {
            self.empty_polls = 0;
            self.state = DrainState::HasMessages;
            return PollOutcome::Dispatch { received };
        }

        self.empty_polls += 1;
        if self.empty_polls < self.max_empty_polls {
            self.state = DrainState::Empty;
            PollOutcome::Backoff {
                empty_polls: self.empty_polls,
            }
        } else {
            self.state = DrainState::Terminated;
            PollOutcome::Terminate {
                empty_polls: self.empty_polls,
            }
        }
    }

    /// Back to `Polling` once a batch has been dispatched or the backoff has elapsed.
    pub fn resume(&mut self) {
        if !self.is_terminated() {
            self.state = DrainState::Polling;
        }
    }
}
