//! Recovery state machine for the long-running loops.
//!
//! ```text
//!            StreamEnded
//!           +----------+
//!           v          |
//!        Running ------+
//!           |  ^
//!   Failed  |  | Recovered
//!           v  |
//!   BackingOff(r) --BackoffElapsed--> Recovering(r)
//!           ^                              |
//!           +------- RecoveryFailed -------+
//! ```

use crate::error::BrokerError;

/// What to do to the broker session before running again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Retry with the same session.
    None,
    /// Ask the client to refresh its cached topology.
    MarkStale,
    /// Drop the session and open a new one.
    Reconnect,
}

impl Recovery {
    pub fn for_error(err: &BrokerError) -> Self {
        match err {
            BrokerError::TopicNotFound(_) => Recovery::MarkStale,
            BrokerError::Connection(_) | BrokerError::Timeout(_) => Recovery::Reconnect,
            BrokerError::Client(_) => Recovery::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Running,
    BackingOff(Recovery),
    Recovering(Recovery),
}

#[derive(Debug, Clone, Copy)]
pub enum SupervisorEvent<'a> {
    StreamEnded,
    Failed(&'a BrokerError),
    BackoffElapsed,
    Recovered,
    RecoveryFailed(&'a BrokerError),
}

impl SupervisorState {
    /// Transition on `event`. Events that do not apply to the current state
    /// leave it unchanged.
    pub fn next(self, event: SupervisorEvent<'_>) -> SupervisorState {
        use SupervisorEvent as E;
        use SupervisorState as S;

        match (self, event) {
            (S::Running, E::StreamEnded) => S::Running,
            (S::Running, E::Failed(err)) => S::BackingOff(Recovery::for_error(err)),
            (S::BackingOff(recovery), E::BackoffElapsed) => S::Recovering(recovery),
            (S::Recovering(_), E::Recovered) => S::Running,
            (S::Recovering(_), E::RecoveryFailed(err)) => {
                S::BackingOff(Recovery::for_error(err))
            }
            (state, _) => state,
        }
    }
}
