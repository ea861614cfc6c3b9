//! Fault-injecting carrier for exercising the channel against realistic link
//! behavior without a real link.
//!
//! Real carriers drop, corrupt, duplicate, reorder and delay buffers. A
//! [`ChaosCarrier`] applies a configurable fault model on the send side and
//! queues whatever survives for the far end:
//!
//! | Fault       | Description                                             |
//! |-------------|---------------------------------------------------------|
//! | Loss        | Drop a buffer with probability `loss_rate`.             |
//! | Corruption  | Flip one random byte with probability `corruption_rate`.|
//! | Duplication | Deliver a buffer twice.                                 |
//! | Reordering  | Delay a buffer, letting later buffers overtake it.      |
//! | Delay       | Fixed propagation delay on every delivered buffer.      |
//!
//! The RNG is seeded so a failing run can be replayed exactly. Two endpoints
//! plus two [`link`] pumps form a full bidirectional lossy link between two
//! channels.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace};

use crate::carrier::Carrier;
use crate::channel::Channel;

/// Fault model configuration. All probabilities are in `[0.0, 1.0]`; the
///  default is a transparent pass-through.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    pub loss_rate: f64,
    pub corruption_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    /// Delay applied to reordered buffers.
    pub reorder_delay: Duration,
    /// Fixed propagation delay applied to every delivered buffer.
    pub delay: Option<Duration>,
    /// Seed for the fault RNG, so failing runs are reproducible.
    pub seed: u64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            loss_rate: 0.0,
            corruption_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(50),
            delay: None,
            seed: 0,
        }
    }
}

/// One endpoint of a simulated link.
pub struct ChaosCarrier {
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    observed: Mutex<Vec<Bytes>>,
    delivery_tx: mpsc::UnboundedSender<Bytes>,
}

impl ChaosCarrier {
    /// Creates a carrier endpoint. The receiver yields what the far end of
    ///  the link sees, after fault injection; feed it to [`link`] or drain it
    ///  manually.
    pub fn endpoint(config: ChaosConfig) -> (Arc<ChaosCarrier>, mpsc::UnboundedReceiver<Bytes>) {
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
        let carrier = ChaosCarrier {
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            observed: Mutex::new(Vec::new()),
            delivery_tx,
        };
        (Arc::new(carrier), delivery_rx)
    }

    /// Every buffer handed to `send`, in order, before fault injection.
    pub fn observed(&self) -> Vec<Bytes> {
        self.observed.lock().unwrap().clone()
    }

    fn roll(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        self.rng.lock().unwrap().gen_bool(probability.min(1.0))
    }

    fn corrupt(&self, buf: &mut [u8]) {
        let mut rng = self.rng.lock().unwrap();
        let index = rng.gen_range(0..buf.len());
        let mask = rng.gen_range(1u8..=255);
        buf[index] ^= mask;
        trace!("chaos: corrupting byte {} with mask {:#04x}", index, mask);
    }

    fn deliver(&self, buf: Bytes) {
        let delay = if self.roll(self.config.reorder_rate) {
            debug!("chaos: reordering buffer by {:?}", self.config.reorder_delay);
            Some(self.config.reorder_delay)
        }
        else {
            self.config.delay
        };

        match delay {
            Some(delay) => {
                let tx = self.delivery_tx.clone();
                tokio::spawn(async move {
                    time::sleep(delay).await;
                    tx.send(buf).ok();
                });
            }
            None => {
                self.delivery_tx.send(buf).ok();
            }
        }
    }
}

#[async_trait]
impl Carrier for ChaosCarrier {
    async fn send(&self, buf: &[u8]) {
        self.observed.lock().unwrap().push(Bytes::copy_from_slice(buf));

        if self.roll(self.config.loss_rate) {
            debug!("chaos: dropping buffer of {} bytes", buf.len());
            return;
        }

        let mut delivered = buf.to_vec();
        if !delivered.is_empty() && self.roll(self.config.corruption_rate) {
            self.corrupt(&mut delivered);
        }
        let delivered = Bytes::from(delivered);

        if self.roll(self.config.duplicate_rate) {
            debug!("chaos: duplicating buffer of {} bytes", delivered.len());
            self.deliver(delivered.clone());
        }
        self.deliver(delivered);
    }
}

/// Pumps one endpoint's deliveries into a channel, forming one direction of
///  a link. The task ends when the sending endpoint is dropped.
pub fn link(mut delivery_rx: mpsc::UnboundedReceiver<Bytes>, channel: Channel) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(buf) = delivery_rx.recv().await {
            channel.handle_incoming(&buf).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::connection::ConnectionState;
    use crate::packet::Packet;
    use crate::sequence::PacketSeq;
    use crate::test_util::{settle, RecordingEvents};
    use tokio::runtime::Builder;

    fn paused_rt() -> tokio::runtime::Runtime {
        Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap()
    }

    fn sample_packet() -> Bytes {
        Packet::data(PacketSeq::from_raw(1), Bytes::from_static(b"sample payload")).to_bytes()
    }

    #[test]
    fn test_pass_through_by_default() {
        let rt = paused_rt();
        rt.block_on(async {
            let (carrier, mut rx) = ChaosCarrier::endpoint(ChaosConfig::default());

            carrier.send(&sample_packet()).await;

            assert_eq!(rx.try_recv().unwrap(), sample_packet());
            assert!(rx.try_recv().is_err());
            assert_eq!(carrier.observed(), vec![sample_packet()]);
        });
    }

    #[test]
    fn test_full_loss_still_observes_sends() {
        let rt = paused_rt();
        rt.block_on(async {
            let (carrier, mut rx) = ChaosCarrier::endpoint(ChaosConfig {
                loss_rate: 1.0,
                ..ChaosConfig::default()
            });

            carrier.send(&sample_packet()).await;

            assert!(rx.try_recv().is_err());
            assert_eq!(carrier.observed().len(), 1);
        });
    }

    #[test]
    fn test_corruption_breaks_the_checksum() {
        let rt = paused_rt();
        rt.block_on(async {
            let (carrier, mut rx) = ChaosCarrier::endpoint(ChaosConfig {
                corruption_rate: 1.0,
                ..ChaosConfig::default()
            });

            carrier.send(&sample_packet()).await;

            let delivered = rx.try_recv().unwrap();
            assert_ne!(delivered, sample_packet());
            assert!(Packet::try_deser(&delivered).is_err());
        });
    }

    #[test]
    fn test_duplication_delivers_twice() {
        let rt = paused_rt();
        rt.block_on(async {
            let (carrier, mut rx) = ChaosCarrier::endpoint(ChaosConfig {
                duplicate_rate: 1.0,
                ..ChaosConfig::default()
            });

            carrier.send(&sample_packet()).await;

            assert_eq!(rx.try_recv().unwrap(), sample_packet());
            assert_eq!(rx.try_recv().unwrap(), sample_packet());
            assert!(rx.try_recv().is_err());
        });
    }

    #[test]
    fn test_fixed_delay_holds_buffers_back() {
        let rt = paused_rt();
        rt.block_on(async {
            let (carrier, mut rx) = ChaosCarrier::endpoint(ChaosConfig {
                delay: Some(Duration::from_millis(10)),
                ..ChaosConfig::default()
            });

            carrier.send(&sample_packet()).await;
            settle().await;
            assert!(rx.try_recv().is_err());

            time::advance(Duration::from_millis(10)).await;
            settle().await;
            assert_eq!(rx.try_recv().unwrap(), sample_packet());
        });
    }

    struct PairedEndpoint {
        events: Arc<RecordingEvents>,
        channel: Channel,
    }

    /// Two channels wired up through a bidirectional chaos link.
    async fn paired(config_ab: ChaosConfig, config_ba: ChaosConfig) -> (PairedEndpoint, PairedEndpoint) {
        let (carrier_a, rx_a) = ChaosCarrier::endpoint(config_ab);
        let (carrier_b, rx_b) = ChaosCarrier::endpoint(config_ba);

        let events_a = Arc::new(RecordingEvents::new());
        let events_b = Arc::new(RecordingEvents::new());

        let a = Channel::new(carrier_a, events_a.clone(), ChannelConfig::default()).await.unwrap();
        let b = Channel::new(carrier_b, events_b.clone(), ChannelConfig::default()).await.unwrap();

        // the pumps run until the runtime is torn down
        let _ = link(rx_a, b.clone());
        let _ = link(rx_b, a.clone());

        (
            PairedEndpoint { events: events_a, channel: a },
            PairedEndpoint { events: events_b, channel: b },
        )
    }

    #[test]
    fn test_lossless_pair_delivers_every_message_exactly_once() {
        let rt = paused_rt();
        rt.block_on(async {
            let (a, b) = paired(ChaosConfig::default(), ChaosConfig::default()).await;

            settle().await;
            assert_eq!(a.channel.state().await, ConnectionState::Open);
            assert_eq!(b.channel.state().await, ConnectionState::Open);
            assert!(a.events.opened());
            assert!(b.events.opened());

            let big_message: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
            a.channel.send("hello from a").await.unwrap();
            a.channel.send(big_message.clone()).await.unwrap();
            b.channel.send("hello from b").await.unwrap();
            settle().await;

            assert_eq!(
                b.events.messages(),
                vec![Bytes::from_static(b"hello from a"), Bytes::from(big_message)]
            );
            assert_eq!(a.events.messages(), vec![Bytes::from_static(b"hello from b")]);

            // every packet was acknowledged, nothing is left buffered
            assert_eq!(a.channel.buffered_amount().await, 0);
            assert_eq!(b.channel.buffered_amount().await, 0);
        });
    }

    #[test]
    fn test_lossy_pair_recovers_through_retransmission() {
        let rt = paused_rt();
        rt.block_on(async {
            let faulty = |seed| ChaosConfig {
                loss_rate: 0.2,
                corruption_rate: 0.02,
                duplicate_rate: 0.1,
                reorder_rate: 0.15,
                reorder_delay: Duration::from_millis(30),
                delay: None,
                seed,
            };
            let (a, b) = paired(faulty(1), faulty(2)).await;

            // SYN frames are not retransmitted, so open both sides directly
            // and let only the data plane run over the lossy link
            a.channel.handle_incoming(&Packet::syn().to_bytes()).await;
            b.channel.handle_incoming(&Packet::syn().to_bytes()).await;
            settle().await;
            assert_eq!(a.channel.state().await, ConnectionState::Open);
            assert_eq!(b.channel.state().await, ConnectionState::Open);

            let messages: Vec<Vec<u8>> = vec![
                b"first".to_vec(),
                vec![0xaa; 3000],
                b"third".to_vec(),
                vec![0x55; 6000],
                b"fifth".to_vec(),
            ];
            for message in &messages {
                a.channel.send(message.clone()).await.unwrap();
            }

            for _ in 0..10 {
                settle().await;
                time::advance(Duration::from_millis(1000)).await;
            }
            settle().await;

            let mut delivered = b.events.messages();
            delivered.sort();
            let mut expected: Vec<Bytes> = messages.into_iter().map(Bytes::from).collect();
            expected.sort();
            assert_eq!(delivered, expected);

            assert_eq!(a.channel.buffered_amount().await, 0);
        });
    }
}
