use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Joining,
    Negotiating,
    Active,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Joining => write!(f, "Joining"),
            ConnectionState::Negotiating => write!(f, "Negotiating"),
            ConnectionState::Active => write!(f, "Active"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Completed offer/answer rounds, either direction.
    pub negotiations: u64,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Joining,
            negotiations: 0,
            last_error: None,
        }
    }
}

/// Publishes a peer's status to any number of observers.
///
/// `Closed` is terminal: once published, later updates are ignored.
#[derive(Clone)]
pub struct ConnectionMonitor {
    status: Arc<watch::Sender<ConnectionStatus>>,
    receiver: watch::Receiver<ConnectionStatus>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, receiver) = watch::channel(ConnectionStatus::default());
        Self {
            status: Arc::new(status),
            receiver,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn update_state(&self, state: ConnectionState) {
        self.status.send_if_modified(|status| {
            if status.state == ConnectionState::Closed || status.state == state {
                return false;
            }
            status.state = state;
            true
        });
    }

    /// Marks a finished round and moves to `Active`.
    pub fn negotiation_completed(&self) {
        self.status.send_if_modified(|status| {
            if status.state == ConnectionState::Closed {
                return false;
            }
            status.negotiations += 1;
            status.state = ConnectionState::Active;
            true
        });
    }

    /// Records a failure without changing the lifecycle state.
    pub fn set_error(&self, error: String) {
        self.status.send_modify(|status| {
            status.last_error = Some(error);
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.receiver.clone()
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
