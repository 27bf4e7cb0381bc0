//! Connection state.
//!
//! The manager stores the state in an `AtomicU8` so `state()` and `send()`
//! never wait on the control lock. Observers share the same atomic.

use std::sync::atomic::{AtomicU8, Ordering};

use tavern_domain::ConnectionStatus;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be
    #[default]
    Disconnected,
    /// Initial attempt in flight
    Connecting,
    /// Socket open and authenticated
    Connected,
    /// Link lost, backoff in progress
    Reconnecting,
    /// Last attempt failed (terminal, or between reconnect attempts)
    Error,
}

impl ConnectionState {
    /// Convert to u8 for atomic storage.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Reconnecting => 3,
            ConnectionState::Error => 4,
        }
    }

    /// Convert from u8 (atomic storage).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Error,
            _ => ConnectionState::Disconnected,
        }
    }

    /// An attempt is in flight or scheduled
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Connected => ConnectionStatus::Connected,
            ConnectionState::Reconnecting => ConnectionStatus::Reconnecting,
            ConnectionState::Error => ConnectionStatus::Error,
        }
    }
}

/// Store a new state, returning the previous one
pub fn swap_connection_state(state_ref: &AtomicU8, new_state: ConnectionState) -> ConnectionState {
    ConnectionState::from_u8(state_ref.swap(new_state.to_u8(), Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_roundtrip() {
        let states = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Error,
        ];

        for state in states {
            assert_eq!(ConnectionState::from_u8(state.to_u8()), state);
        }
        assert_eq!(ConnectionState::from_u8(200), ConnectionState::Disconnected);
    }

    #[test]
    fn test_swap_returns_previous_state() {
        let state = AtomicU8::new(ConnectionState::Disconnected.to_u8());

        let previous = swap_connection_state(&state, ConnectionState::Connected);

        assert_eq!(previous, ConnectionState::Disconnected);
        assert_eq!(
            ConnectionState::from_u8(state.load(Ordering::SeqCst)),
            ConnectionState::Connected
        );
    }

    #[test]
    fn test_maps_to_domain_status() {
        assert_eq!(
            ConnectionStatus::from(ConnectionState::Reconnecting),
            ConnectionStatus::Reconnecting
        );
        assert_eq!(
            ConnectionStatus::from(ConnectionState::Error),
            ConnectionStatus::Error
        );
    }
}
