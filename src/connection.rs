//! Connection lifecycle types.
//!
//! The transition logic lives in [`crate::channel`]; this module defines the
//! states and the close codes visible to the application.

use std::fmt::{Display, Formatter};

/// Close code for a clean termination: a FIN was observed before any timer
/// expired.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for an abnormal termination: the handshake timed out, or the
/// close handshake expired without the caller supplying a code.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// All possible states of a [`crate::channel::Channel`].
///
/// The numeric values are part of the caller-facing API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// SYN sent, waiting for the peer's SYN or the connection timer.
    Connecting = 0,
    /// Handshake complete; messages flow in both directions.
    Open = 1,
    /// FIN sent, waiting for the peer's FIN or the closing timer.
    Closing = 2,
    /// Terminal. All timers are cancelled on entry.
    Closed = 3,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_values() {
        assert_eq!(ConnectionState::Connecting as u8, 0);
        assert_eq!(ConnectionState::Open as u8, 1);
        assert_eq!(ConnectionState::Closing as u8, 2);
        assert_eq!(ConnectionState::Closed as u8, 3);
    }
}
