//! Shared helpers for the in-crate tests.

use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;

use crate::carrier::Carrier;
use crate::events::{ChannelEvents, CloseEvent, MessageData};
use crate::packet::{Packet, PacketFlags};

/// Carrier that records every buffer it is asked to transmit and delivers
///  nothing: from the channel's point of view it is a link with 100% loss.
pub struct RecordingCarrier {
    sent: Mutex<Vec<Bytes>>,
}

impl RecordingCarrier {
    pub fn new() -> RecordingCarrier {
        RecordingCarrier {
            sent: Mutex::new(Vec::new()),
        }
    }

    /// All transmitted buffers, in order.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    /// All transmitted buffers that decode and carry the given flag.
    pub fn sent_packets_with(&self, flag: PacketFlags) -> Vec<Packet> {
        self.sent()
            .iter()
            .filter_map(|buf| Packet::try_deser(buf).ok())
            .filter(|packet| packet.header.flags.contains(flag))
            .collect()
    }
}

#[async_trait]
impl Carrier for RecordingCarrier {
    async fn send(&self, buf: &[u8]) {
        self.sent.lock().unwrap().push(Bytes::copy_from_slice(buf));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Open,
    Message(MessageData),
    Error(String),
    Close(CloseEvent),
}

/// Event subscriber that records everything for later assertions.
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn new() -> RecordingEvents {
        RecordingEvents {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn opened(&self) -> bool {
        self.events().iter().any(|e| matches!(e, RecordedEvent::Open))
    }

    pub fn messages(&self) -> Vec<Bytes> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                RecordedEvent::Message(data) => Some(data.as_bytes().clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                RecordedEvent::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> Vec<CloseEvent> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                RecordedEvent::Close(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChannelEvents for RecordingEvents {
    async fn on_open(&self) {
        self.events.lock().unwrap().push(RecordedEvent::Open);
    }

    async fn on_message(&self, data: MessageData) {
        self.events.lock().unwrap().push(RecordedEvent::Message(data));
    }

    async fn on_error(&self, error: anyhow::Error) {
        self.events.lock().unwrap().push(RecordedEvent::Error(error.to_string()));
    }

    async fn on_close(&self, event: CloseEvent) {
        self.events.lock().unwrap().push(RecordedEvent::Close(event));
    }
}

/// Lets spawned timer and delivery tasks run to completion on a
///  current-thread runtime.
pub async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}
