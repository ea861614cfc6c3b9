use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors returned synchronously from channel operations.
///
/// Everything else the channel can run into (corrupt packets, exhausted
/// retransmissions, timeouts) is handled internally or surfaced through the
/// event callbacks.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// `send` was called while the channel was not open.
    #[error("channel is not open (state: {state})")]
    NotOpen { state: ConnectionState },

    /// `send` was called with a payload kind the channel cannot transmit.
    #[error("unsupported payload kind: {0}")]
    Unsupported(&'static str),

    /// The message cannot be expressed in the 7-bit fragment index space.
    #[error("message of {size} bytes exceeds the fragmentation limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },
}
