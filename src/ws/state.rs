// =============================================================================
// WS Transport connection state machine (spec §4.4)
// =============================================================================

use serde::{Deserialize, Serialize};

/// States the single combined-stream connection can occupy. `Disconnected`
/// is the only terminal state, reached solely via explicit `dispose()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Banned,
    PongTimeout,
    RateLimited,
    ServerError,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Banned => "banned",
            Self::PongTimeout => "pong_timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
        };
        write!(f, "{s}")
    }
}

/// How a decoded frame carrying a nonzero `code` field should be handled
/// (spec §4.4: "on a decoded frame with nonzero code, classify").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorAction {
    /// Code 1: informational, stay connected.
    Informational,
    /// Code 2: fatal for the session, reconnect.
    Reconnect,
    /// Code 3: back off.
    RateLimit,
    /// Anything else: logged, connection preserved.
    Ignore,
}

pub fn classify_server_error_code(code: i64) -> ServerErrorAction {
    match code {
        1 => ServerErrorAction::Informational,
        2 => ServerErrorAction::Reconnect,
        3 => ServerErrorAction::RateLimit,
        _ => ServerErrorAction::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_one_is_informational() {
        assert_eq!(classify_server_error_code(1), ServerErrorAction::Informational);
    }

    #[test]
    fn code_two_forces_reconnect() {
        assert_eq!(classify_server_error_code(2), ServerErrorAction::Reconnect);
    }

    #[test]
    fn code_three_is_rate_limit() {
        assert_eq!(classify_server_error_code(3), ServerErrorAction::RateLimit);
    }

    #[test]
    fn unknown_codes_are_ignored() {
        assert_eq!(classify_server_error_code(99), ServerErrorAction::Ignore);
    }

    #[test]
    fn only_disconnected_reports_as_not_connected_plus_others() {
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(!ConnectionStatus::Reconnecting.is_connected());
        assert!(!ConnectionStatus::Disconnected.is_connected());
    }
}
