//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Adapter lifecycle and connection state machines."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Lifecycle and connection state machines.
//!
//! Both machines are plain values. [`LifecycleState::transition`] and
//! [`ConnectionState::transition`] only describe whether a move is legal and
//! never mutate anything; the owner of the state commits the target when the
//! response reports [`TransitionStatus::Success`].

use std::fmt;

use serde::Serialize;

/// Outcome of evaluating a requested state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TransitionStatus {
    Success,
    Failure,
    NotChanged,
}

/// Status plus the human readable message shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionResponse {
    pub status: TransitionStatus,
    pub message: String,
}

impl TransitionResponse {
    pub fn is_success(&self) -> bool {
        self.status == TransitionStatus::Success
    }

    pub fn is_failure(&self) -> bool {
        self.status == TransitionStatus::Failure
    }

    pub fn is_not_changed(&self) -> bool {
        self.status == TransitionStatus::NotChanged
    }
}

/// Supervision lifecycle of one adapter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum LifecycleState {
    Starting,
    Started,
    Stopping,
    #[default]
    Stopped,
    Error,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 5] = [
        LifecycleState::Starting,
        LifecycleState::Started,
        LifecycleState::Stopping,
        LifecycleState::Stopped,
        LifecycleState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "Starting",
            LifecycleState::Started => "Started",
            LifecycleState::Stopping => "Stopping",
            LifecycleState::Stopped => "Stopped",
            LifecycleState::Error => "Error",
        }
    }

    pub fn legal_targets(&self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Starting => &[Started, Stopping, Error],
            Started => &[Stopping, Error],
            Stopping => &[Stopped, Error],
            Stopped => &[Starting],
            Error => &[Starting],
        }
    }

    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        self.legal_targets().contains(&target)
    }

    pub fn transition(self, target: LifecycleState) -> TransitionResponse {
        if self == target {
            return TransitionResponse {
                status: TransitionStatus::NotChanged,
                message: format!("{} is unchanged.", self),
            };
        }
        if self.can_transition_to(target) {
            TransitionResponse {
                status: TransitionStatus::Success,
                message: format!("Transitioned from {} to {}.", self, target),
            }
        } else {
            TransitionResponse {
                status: TransitionStatus::Failure,
                message: format!("Unable to transition from {} to {}.", self, target),
            }
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical or logical connection of an adapter to its endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
    Disconnecting,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Error,
        ConnectionState::Disconnecting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Error => "Error",
            ConnectionState::Disconnecting => "Disconnecting",
        }
    }

    pub fn legal_targets(&self) -> &'static [ConnectionState] {
        use ConnectionState::*;
        match self {
            Disconnected => &[Connecting],
            Connecting => &[Connected, Error, Disconnecting],
            Connected => &[Error, Disconnecting],
            Error => &[Disconnecting],
            Disconnecting => &[Disconnected],
        }
    }

    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        self.legal_targets().contains(&target)
    }

    pub fn transition(self, target: ConnectionState) -> TransitionResponse {
        if self == target {
            return TransitionResponse {
                status: TransitionStatus::NotChanged,
                message: format!("Connection {} is unchanged.", self),
            };
        }
        if self.can_transition_to(target) {
            TransitionResponse {
                status: TransitionStatus::Success,
                message: format!("Connection transitioned from {} to {}.", self, target),
            }
        } else {
            TransitionResponse {
                status: TransitionStatus::Failure,
                message: format!(
                    "Unable to transition connection from {} to {}.",
                    self, target
                ),
            }
        }
    }

    /// Shortest legal path from `self` to `Disconnected`, excluding `self`.
    pub fn path_to_disconnected(&self) -> &'static [ConnectionState] {
        use ConnectionState::*;
        match self {
            Disconnected => &[],
            Disconnecting => &[Disconnected],
            Connecting | Connected | Error => &[Disconnecting, Disconnected],
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_table_is_complete() {
        for from in LifecycleState::ALL {
            for to in LifecycleState::ALL {
                let response = from.transition(to);
                if from == to {
                    assert_eq!(response.status, TransitionStatus::NotChanged);
                    assert_eq!(response.message, format!("{} is unchanged.", from));
                } else if from.legal_targets().contains(&to) {
                    assert_eq!(response.status, TransitionStatus::Success);
                    assert_eq!(
                        response.message,
                        format!("Transitioned from {} to {}.", from, to)
                    );
                } else {
                    assert_eq!(response.status, TransitionStatus::Failure);
                    assert_eq!(
                        response.message,
                        format!("Unable to transition from {} to {}.", from, to)
                    );
                }
            }
        }
    }

    #[test]
    fn lifecycle_legal_pairs_match_table() {
        use LifecycleState::*;
        let legal = [
            (Starting, Started),
            (Starting, Stopping),
            (Starting, Error),
            (Started, Stopping),
            (Started, Error),
            (Stopping, Stopped),
            (Stopping, Error),
            (Stopped, Starting),
            (Error, Starting),
        ];
        let mut count = 0;
        for from in LifecycleState::ALL {
            for to in LifecycleState::ALL {
                let expected = legal.contains(&(from, to));
                assert_eq!(from.transition(to).is_success(), expected, "{from} -> {to}");
                if expected {
                    count += 1;
                }
            }
        }
        assert_eq!(count, legal.len());
    }

    #[test]
    fn lifecycle_messages_are_exact() {
        assert_eq!(
            LifecycleState::Stopped
                .transition(LifecycleState::Starting)
                .message,
            "Transitioned from Stopped to Starting."
        );
        assert_eq!(
            LifecycleState::Stopped
                .transition(LifecycleState::Started)
                .message,
            "Unable to transition from Stopped to Started."
        );
        assert_eq!(
            LifecycleState::Error.transition(LifecycleState::Error).message,
            "Error is unchanged."
        );
    }

    #[test]
    fn connection_table_is_complete() {
        use ConnectionState::*;
        let legal = [
            (Disconnected, Connecting),
            (Connecting, Connected),
            (Connecting, Error),
            (Connecting, Disconnecting),
            (Connected, Error),
            (Connected, Disconnecting),
            (Error, Disconnecting),
            (Disconnecting, Disconnected),
        ];
        for from in ConnectionState::ALL {
            for to in ConnectionState::ALL {
                let response = from.transition(to);
                if from == to {
                    assert!(response.is_not_changed());
                    assert_eq!(response.message, format!("Connection {} is unchanged.", from));
                } else if legal.contains(&(from, to)) {
                    assert!(response.is_success());
                    assert_eq!(
                        response.message,
                        format!("Connection transitioned from {} to {}.", from, to)
                    );
                } else {
                    assert!(response.is_failure());
                    assert_eq!(
                        response.message,
                        format!("Unable to transition connection from {} to {}.", from, to)
                    );
                }
            }
        }
    }

    #[test]
    fn connection_messages_are_exact() {
        assert_eq!(
            ConnectionState::Connecting
                .transition(ConnectionState::Connected)
                .message,
            "Connection transitioned from Connecting to Connected."
        );
        assert_eq!(
            ConnectionState::Error
                .transition(ConnectionState::Connected)
                .message,
            "Unable to transition connection from Error to Connected."
        );
        assert_eq!(
            ConnectionState::Disconnected
                .transition(ConnectionState::Disconnected)
                .message,
            "Connection Disconnected is unchanged."
        );
    }

    #[test]
    fn paths_to_disconnected_are_legal() {
        for from in ConnectionState::ALL {
            let mut current = from;
            for step in from.path_to_disconnected() {
                assert!(current.transition(*step).is_success());
                current = *step;
            }
            assert_eq!(current, ConnectionState::Disconnected);
        }
    }

    #[test]
    fn defaults_match_initial_states() {
        assert_eq!(LifecycleState::default(), LifecycleState::Stopped);
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
