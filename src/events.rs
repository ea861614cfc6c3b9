use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;

/// Representation of inbound message data handed to
///  [`ChannelEvents::on_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinaryMode {
    #[default]
    Bytes,
    Blob,
}

/// Opaque blob wrapper, for callers that want message data behind a handle
///  instead of a raw byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob(pub Bytes);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Bytes(Bytes),
    Blob(Blob),
}

impl MessageData {
    pub fn as_bytes(&self) -> &Bytes {
        match self {
            MessageData::Bytes(bytes) => bytes,
            MessageData::Blob(Blob(bytes)) => bytes,
        }
    }
}

/// Payload of [`ChannelEvents::on_close`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    /// `true` iff a FIN was observed before any timer expired.
    pub was_clean: bool,
}

/// Subscriber interface for everything the channel reports upstream.
///
/// Callbacks are invoked on the channel's runtime with no internal lock held,
///  so a callback may call back into the channel (e.g. reply to a message
///  from within `on_message`).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChannelEvents: Send + Sync + 'static {
    /// The handshake completed; the channel is open.
    async fn on_open(&self);

    /// One complete message arrived.
    async fn on_message(&self, data: MessageData);

    /// The carrier reported a transport error. Connection state is unchanged.
    async fn on_error(&self, error: anyhow::Error);

    /// The channel reached its terminal state.
    async fn on_close(&self, event: CloseEvent);
}
