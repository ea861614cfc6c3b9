use async_trait::async_trait;
#[cfg(test)] use mockall::automock;

/// This is an abstraction for handing one encoded packet buffer to the
///  unreliable link, introduced to keep the channel independent of the
///  concrete transport and to facilitate mocking the I/O part away for
///  testing.
///
/// A carrier delivers buffers best-effort: it may drop, duplicate, reorder or
///  corrupt them. Inbound traffic does not flow through this trait; whoever
///  owns the receive side of the link calls
///  [`crate::channel::Channel::handle_incoming`] once per received buffer and
///  [`crate::channel::Channel::handle_carrier_error`] for transport errors.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Carrier: Send + Sync + 'static {
    /// Transmit one opaque buffer. Completion means the buffer was handed
    ///  off to the link, not that it was delivered.
    async fn send(&self, buf: &[u8]);
}
