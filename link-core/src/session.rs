//! Cluster session state machine for clusterlink.
//!
//! This module provides a pure, side-effect-free state machine for a single
//! cluster's connection lifecycle. The machine takes events as input and
//! produces a new machine plus a list of actions to execute.
//!
//! The actual I/O (opening the upstream client, waking waiters, tearing down
//! watches) is performed by `link-host`, not by this module.
//!
//! Every activation attempt carries a number. Completion events name the
//! attempt they belong to, so the result of an attempt that was abandoned by
//! `disconnect()` can never move a later session into `Ready` or `Error`.

use link_types::ClusterStatus;

/// Lifecycle state of one cluster session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No upstream client.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Activating {
        /// Attempt every concurrent caller is waiting on.
        attempt: u64,
    },
    /// Upstream client open.
    Ready {
        /// Attempt that produced the client.
        attempt: u64,
    },
    /// The last attempt failed. Only an explicit `activate()` leaves this state.
    Error {
        /// Failure message of the last attempt.
        error: String,
    },
}

impl SessionState {
    /// Externally visible status for this state.
    pub fn status(&self) -> ClusterStatus {
        match self {
            Self::Disconnected => ClusterStatus::Disconnected,
            Self::Activating { .. } => ClusterStatus::Activating,
            Self::Ready { .. } => ClusterStatus::Ready,
            Self::Error { .. } => ClusterStatus::Error,
        }
    }
}

/// Session state plus the attempt counter, which outlives individual states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionMachine {
    state: SessionState,
    attempts: u64,
}

impl SessionMachine {
    /// Create a new machine in the Disconnected state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Externally visible status.
    pub fn status(&self) -> ClusterStatus {
        self.state.status()
    }

    /// Number of connection attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Whether watches may be opened.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready { .. })
    }

    /// Process an event and return the new machine plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller is responsible
    /// for executing the returned actions in order.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        let Self { state, attempts } = self;

        let (state, attempts, actions) = match (state, event) {
            // Start a fresh attempt
            (SessionState::Disconnected | SessionState::Error { .. }, Event::ActivateRequested) => {
                let attempt = attempts + 1;
                (
                    SessionState::Activating { attempt },
                    attempt,
                    vec![
                        Action::Connect { attempt },
                        Action::EmitStatus(ClusterStatus::Activating),
                    ],
                )
            }

            // Coalesce with the attempt in flight
            (SessionState::Activating { attempt }, Event::ActivateRequested) => (
                SessionState::Activating { attempt },
                attempts,
                vec![Action::AwaitAttempt { attempt }],
            ),
            (SessionState::Ready { attempt }, Event::ActivateRequested) => (
                SessionState::Ready { attempt },
                attempts,
                vec![Action::AlreadyReady],
            ),

            // Attempt completed
            (SessionState::Activating { attempt }, Event::ActivationSucceeded { attempt: done })
                if attempt == done =>
            {
                (
                    SessionState::Ready { attempt },
                    attempts,
                    vec![
                        Action::ResolveWaiters { attempt },
                        Action::EmitStatus(ClusterStatus::Ready),
                    ],
                )
            }
            (
                SessionState::Activating { attempt },
                Event::ActivationFailed {
                    attempt: done,
                    error,
                },
            ) if attempt == done => (
                SessionState::Error {
                    error: error.clone(),
                },
                attempts,
                vec![
                    Action::RejectWaiters {
                        attempt,
                        reason: error,
                    },
                    Action::EmitStatus(ClusterStatus::Error),
                ],
            ),

            // Disconnect
            (SessionState::Activating { attempt }, Event::DisconnectRequested) => (
                SessionState::Disconnected,
                attempts,
                vec![
                    Action::RejectWaiters {
                        attempt,
                        reason: "disconnected before activation completed".into(),
                    },
                    Action::EmitStatus(ClusterStatus::Disconnected),
                ],
            ),
            (SessionState::Ready { .. }, Event::DisconnectRequested) => (
                SessionState::Disconnected,
                attempts,
                vec![
                    Action::CloseAllWatches,
                    Action::ReleaseClient,
                    Action::EmitStatus(ClusterStatus::Disconnected),
                ],
            ),
            (SessionState::Error { .. }, Event::DisconnectRequested) => (
                SessionState::Disconnected,
                attempts,
                vec![Action::EmitStatus(ClusterStatus::Disconnected)],
            ),

            // Stale completions and redundant requests - stay in current state
            (state, _) => (state, attempts, vec![]),
        };

        (Self { state, attempts }, actions)
    }
}

/// Events that can occur in a session's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Someone called `activate()`.
    ActivateRequested,
    /// The upstream client for `attempt` is open.
    ActivationSucceeded {
        /// Attempt that completed.
        attempt: u64,
    },
    /// Opening the upstream client for `attempt` failed.
    ActivationFailed {
        /// Attempt that completed.
        attempt: u64,
        /// Error message describing the failure.
        error: String,
    },
    /// Someone called `disconnect()`.
    DisconnectRequested,
}

/// Actions to be executed by the session owner.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start opening the upstream client for `attempt`.
    Connect {
        /// Attempt number to report back on completion.
        attempt: u64,
    },
    /// The caller joins the in-flight attempt.
    AwaitAttempt {
        /// Attempt to wait for.
        attempt: u64,
    },
    /// The caller returns immediately; the session is already Ready.
    AlreadyReady,
    /// Wake every waiter of `attempt` with success.
    ResolveWaiters {
        /// Attempt that succeeded.
        attempt: u64,
    },
    /// Wake every waiter of `attempt` with an error.
    RejectWaiters {
        /// Attempt that failed or was abandoned.
        attempt: u64,
        /// Error message for the waiters.
        reason: String,
    },
    /// Tear down every upstream watch.
    CloseAllWatches,
    /// Drop the upstream client.
    ReleaseClient,
    /// Publish the new status.
    EmitStatus(ClusterStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activating() -> SessionMachine {
        let (machine, _) = SessionMachine::new().on_event(Event::ActivateRequested);
        machine
    }

    fn ready() -> SessionMachine {
        let (machine, _) = activating().on_event(Event::ActivationSucceeded { attempt: 1 });
        machine
    }

    #[test]
    fn starts_disconnected() {
        let machine = SessionMachine::new();
        assert_eq!(machine.status(), ClusterStatus::Disconnected);
        assert_eq!(machine.attempts(), 0);
    }

    #[test]
    fn activate_request_starts_attempt() {
        let (machine, actions) = SessionMachine::new().on_event(Event::ActivateRequested);

        assert!(matches!(
            machine.state(),
            SessionState::Activating { attempt: 1 }
        ));
        assert_eq!(actions[0], Action::Connect { attempt: 1 });
        assert!(actions.contains(&Action::EmitStatus(ClusterStatus::Activating)));
    }

    #[test]
    fn concurrent_activate_joins_in_flight_attempt() {
        let (machine, actions) = activating().on_event(Event::ActivateRequested);

        assert_eq!(machine.attempts(), 1);
        assert_eq!(actions, vec![Action::AwaitAttempt { attempt: 1 }]);
    }

    #[test]
    fn activate_when_ready_returns_immediately() {
        let (machine, actions) = ready().on_event(Event::ActivateRequested);

        assert!(machine.is_ready());
        assert_eq!(actions, vec![Action::AlreadyReady]);
    }

    #[test]
    fn success_resolves_waiters() {
        let (machine, actions) = activating().on_event(Event::ActivationSucceeded { attempt: 1 });

        assert!(machine.is_ready());
        assert_eq!(actions[0], Action::ResolveWaiters { attempt: 1 });
        assert!(actions.contains(&Action::EmitStatus(ClusterStatus::Ready)));
    }

    #[test]
    fn failure_records_error_and_rejects_waiters() {
        let (machine, actions) = activating().on_event(Event::ActivationFailed {
            attempt: 1,
            error: "connection refused".into(),
        });

        match machine.state() {
            SessionState::Error { error } => assert_eq!(error, "connection refused"),
            other => panic!("unexpected state: {other:?}"),
        }
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::RejectWaiters { attempt: 1, reason } if reason == "connection refused"
        )));
    }

    #[test]
    fn error_never_retries_on_its_own() {
        let (machine, _) = activating().on_event(Event::ActivationFailed {
            attempt: 1,
            error: "boom".into(),
        });

        // Stale completions are ignored and no Connect is produced
        let (machine, actions) = machine.on_event(Event::ActivationSucceeded { attempt: 1 });
        assert_eq!(machine.status(), ClusterStatus::Error);
        assert!(actions.is_empty());
    }

    #[test]
    fn explicit_activate_retries_from_error() {
        let (machine, _) = activating().on_event(Event::ActivationFailed {
            attempt: 1,
            error: "boom".into(),
        });
        let (machine, actions) = machine.on_event(Event::ActivateRequested);

        assert!(matches!(
            machine.state(),
            SessionState::Activating { attempt: 2 }
        ));
        assert_eq!(actions[0], Action::Connect { attempt: 2 });
    }

    #[test]
    fn disconnect_from_ready_closes_watches() {
        let (machine, actions) = ready().on_event(Event::DisconnectRequested);

        assert_eq!(machine.status(), ClusterStatus::Disconnected);
        assert_eq!(
            actions,
            vec![
                Action::CloseAllWatches,
                Action::ReleaseClient,
                Action::EmitStatus(ClusterStatus::Disconnected),
            ]
        );
    }

    #[test]
    fn disconnect_while_activating_rejects_waiters() {
        let (machine, actions) = activating().on_event(Event::DisconnectRequested);

        assert_eq!(machine.status(), ClusterStatus::Disconnected);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::RejectWaiters { attempt: 1, .. })));
    }

    #[test]
    fn abandoned_attempt_cannot_complete_later_session() {
        let (machine, _) = activating().on_event(Event::DisconnectRequested);
        let (machine, _) = machine.on_event(Event::ActivateRequested);

        // Attempt 1 finishes after attempt 2 started
        let (machine, actions) = machine.on_event(Event::ActivationSucceeded { attempt: 1 });
        assert!(matches!(
            machine.state(),
            SessionState::Activating { attempt: 2 }
        ));
        assert!(actions.is_empty());

        let (machine, _) = machine.on_event(Event::ActivationSucceeded { attempt: 2 });
        assert!(machine.is_ready());
    }

    #[test]
    fn disconnect_when_disconnected_is_noop() {
        let (machine, actions) = SessionMachine::new().on_event(Event::DisconnectRequested);
        assert_eq!(machine.status(), ClusterStatus::Disconnected);
        assert!(actions.is_empty());
    }

    #[test]
    fn disconnect_from_error_clears_it() {
        let (machine, _) = activating().on_event(Event::ActivationFailed {
            attempt: 1,
            error: "boom".into(),
        });
        let (machine, actions) = machine.on_event(Event::DisconnectRequested);

        assert_eq!(machine.status(), ClusterStatus::Disconnected);
        assert_eq!(actions, vec![Action::EmitStatus(ClusterStatus::Disconnected)]);
    }
}
