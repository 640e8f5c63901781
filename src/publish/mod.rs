//! Outbound publication of particles and driver events.
//!
//! The driver hands every publication to a [`Publisher`] from inside its
//! event loop, so implementations must return promptly. [`ChannelPublisher`]
//! queues onto a bounded channel and drops (with a warning) when the
//! subscriber falls behind rather than stalling the read path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::protocol::{DataParticle, DriverState, Parameter, StreamName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishKind {
    Raw,
    Parsed,
    Event,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    StateChange { state: DriverState },
    ConfigChange { parameters: Vec<(Parameter, serde_json::Value)> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Publication {
    Raw(DataParticle),
    Parsed(DataParticle),
    Event(DriverEvent),
}

impl Publication {
    pub fn kind(&self) -> PublishKind {
        match self {
            Publication::Raw(_) => PublishKind::Raw,
            Publication::Parsed(_) => PublishKind::Parsed,
            Publication::Event(_) => PublishKind::Event,
        }
    }

    /// Frame text of a sample publication; empty for events.
    pub fn raw_line(&self) -> &str {
        match self {
            Publication::Raw(p) | Publication::Parsed(p) => p.raw(),
            Publication::Event(_) => "",
        }
    }

    /// Payload in transport form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        match self {
            Publication::Raw(p) => p.to_json(StreamName::Raw),
            Publication::Parsed(p) => p.to_json(StreamName::Parsed),
            Publication::Event(e) => serde_json::to_string(e),
        }
    }
}

/// Order of the two publications a sample produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOrder {
    #[default]
    RawFirst,
    ParsedFirst,
}

impl PublishOrder {
    pub fn arrange(&self, particle: DataParticle) -> [Publication; 2] {
        match self {
            PublishOrder::RawFirst => [Publication::Raw(particle.clone()), Publication::Parsed(particle)],
            PublishOrder::ParsedFirst => [Publication::Parsed(particle.clone()), Publication::Raw(particle)],
        }
    }
}

pub trait Publisher: Send + Sync {
    fn publish(&self, publication: Publication);

    /// Both publications of one sample. Implementations that can drop must
    /// drop the pair together.
    fn publish_sample(&self, pair: [Publication; 2]) {
        for publication in pair {
            self.publish(publication);
        }
    }
}

/// Bounded queue in front of the subscriber.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Publication>,
    dropped: Arc<AtomicU64>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Publication>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped: Arc::new(AtomicU64::new(0)) }, rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Publisher for ChannelPublisher {
    fn publish(&self, publication: Publication) {
        match self.tx.try_send(publication) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(p)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("Publish queue full; dropped {:?} publication ({} dropped so far)", p.kind(), total);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("Publish subscriber gone; discarding publication");
            }
        }
    }

    fn publish_sample(&self, pair: [Publication; 2]) {
        match self.tx.try_reserve_many(pair.len()) {
            Ok(permits) => {
                for (permit, publication) in permits.zip(pair) {
                    permit.send(publication);
                }
            }
            Err(mpsc::error::TrySendError::Full(())) => {
                let total = self.dropped.fetch_add(2, Ordering::Relaxed) + 2;
                log::warn!("Publish queue full; dropped sample {} ({} dropped so far)", pair[0].raw_line(), total);
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                self.dropped.fetch_add(2, Ordering::Relaxed);
                log::debug!("Publish subscriber gone; discarding sample");
            }
        }
    }
}

/// Keeps every publication in memory; for tools and tests that inspect the
/// stream after the fact.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<Publication>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.published.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn take(&self) -> Vec<Publication> {
        self.published.lock().map(|mut p| std::mem::take(&mut *p)).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<PublishKind> {
        self.published
            .lock()
            .map(|p| p.iter().map(Publication::kind).collect())
            .unwrap_or_default()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, publication: Publication) {
        if let Ok(mut published) = self.published.lock() {
            published.push(publication);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{extract, ProtocolState, SAMPLE_REGEX};

    fn particle() -> DataParticle {
        let line = "SATPAR0229,10.01,2206748544,234";
        let fields = extract(&SAMPLE_REGEX, line).unwrap();
        DataParticle::build(line, &fields, 1.0, None, 2.0)
    }

    #[test]
    fn test_publish_order() {
        let kinds = |order: PublishOrder| order.arrange(particle()).iter().map(Publication::kind).collect::<Vec<_>>();
        assert_eq!(kinds(PublishOrder::RawFirst), vec![PublishKind::Raw, PublishKind::Parsed]);
        assert_eq!(kinds(PublishOrder::ParsedFirst), vec![PublishKind::Parsed, PublishKind::Raw]);
    }

    #[test]
    fn test_channel_publisher_drops_when_full() {
        let (publisher, mut rx) = ChannelPublisher::new(1);
        publisher.publish(Publication::Raw(particle()));
        publisher.publish(Publication::Parsed(particle()));
        assert_eq!(publisher.dropped(), 1);
        assert_eq!(rx.try_recv().unwrap().kind(), PublishKind::Raw);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sample_pair_dropped_together() {
        let (publisher, mut rx) = ChannelPublisher::new(3);
        publisher.publish_sample(PublishOrder::RawFirst.arrange(particle()));
        publisher.publish_sample(PublishOrder::RawFirst.arrange(particle()));
        assert_eq!(publisher.dropped(), 2);
        assert_eq!(rx.try_recv().unwrap().kind(), PublishKind::Raw);
        assert_eq!(rx.try_recv().unwrap().kind(), PublishKind::Parsed);
        assert!(rx.try_recv().is_err());

        // room again once the subscriber catches up
        publisher.publish_sample(PublishOrder::ParsedFirst.arrange(particle()));
        assert_eq!(rx.try_recv().unwrap().kind(), PublishKind::Parsed);
        assert_eq!(rx.try_recv().unwrap().kind(), PublishKind::Raw);
    }

    #[test]
    fn test_recording_publisher_keeps_pairs() {
        let publisher = RecordingPublisher::new();
        publisher.publish_sample(PublishOrder::RawFirst.arrange(particle()));
        assert_eq!(publisher.kinds(), vec![PublishKind::Raw, PublishKind::Parsed]);
    }

    #[test]
    fn test_event_payload() {
        let event = Publication::Event(DriverEvent::StateChange {
            state: DriverState::Connected(ProtocolState::Command),
        });
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "state_change", "state": "DRIVER_STATE_COMMAND"}));
    }
}
