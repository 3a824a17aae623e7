//! # Event Topic Delivery
//!
//! Named channels through which the device layer hands asynchronous
//! notifications to registered listeners. The reader task publishes; listeners
//! run synchronously on that task, never on the caller's thread.
//!
//! Two topics exist today:
//!
//! - [`TOPIC_PACKET`] - decoded application packets carrying text
//! - [`TOPIC_LOG_LINE`] - raw device log lines (console text or forwarded
//!   `LogRecord` frames)
//!
//! Subscriptions are identified by a [`SubscriptionId`] so the same listener
//! function can be registered against several topics and removed individually.

use log::{trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Decoded application packets that carry text.
pub const TOPIC_PACKET: &str = "radio.packet";
/// Raw device log lines.
pub const TOPIC_LOG_LINE: &str = "radio.log.line";

/// Structured text extracted from a decoded mesh packet.
#[derive(Debug, Clone)]
pub struct TextEvent {
    pub source: u32,
    pub dest: Option<u32>,
    pub channel: Option<u32>,
    pub content: String,
}

/// A notification delivered through the bus.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Decoded application packet carrying text.
    Text(TextEvent),
    /// One raw log line from the device.
    LogLine(String),
}

impl DeviceEvent {
    /// The human-readable text carried by this event, whatever its shape.
    pub fn text(&self) -> &str {
        match self {
            DeviceEvent::Text(ev) => &ev.content,
            DeviceEvent::LogLine(line) => line,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to remove the listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Listener callback. Receives the topic it fired on and the event.
pub type Listener = Arc<dyn Fn(&str, &DeviceEvent) + Send + Sync>;

/// Topic-keyed listener registry.
///
/// Publishing to a topic nobody subscribed to is a no-op; unsubscribing twice
/// returns `false` the second time.
#[derive(Default)]
pub struct EventBus {
    topics: Mutex<HashMap<String, Vec<(SubscriptionId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener on a topic. The listener runs on whatever thread
    /// publishes to the topic.
    pub fn subscribe(&self, topic: &str, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_default()
            .push((id, listener));
        trace!("subscribed {:?} to topic '{}'", id, topic);
        id
    }

    /// Remove a previously registered listener. Returns `true` only when a
    /// listener was actually removed, so callers can assert exactly-once
    /// de-registration.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut topics = self.topics.lock().unwrap();
        let Some(listeners) = topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            topics.remove(topic);
        }
        if !removed {
            warn!("unsubscribe on topic '{}' removed nothing ({:?})", topic, id);
        }
        removed
    }

    /// Deliver an event to every listener on the topic, in subscription order.
    pub fn publish(&self, topic: &str, event: &DeviceEvent) {
        // Clone the listener list out of the lock so a listener can
        // subscribe/unsubscribe without deadlocking.
        let listeners: Vec<Listener> = {
            let topics = self.topics.lock().unwrap();
            match topics.get(topic) {
                Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };
        for listener in listeners {
            listener(topic, event);
        }
    }

    /// Number of listeners currently registered on a topic.
    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(hits: Arc<AtomicUsize>) -> Listener {
        Arc::new(move |_topic, _event| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn publish_reaches_only_matching_topic() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(TOPIC_PACKET, counting_listener(hits.clone()));

        bus.publish(TOPIC_PACKET, &DeviceEvent::LogLine("a".into()));
        bus.publish(TOPIC_LOG_LINE, &DeviceEvent::LogLine("b".into()));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_exactly_once() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(TOPIC_LOG_LINE, counting_listener(hits.clone()));

        assert!(bus.unsubscribe(TOPIC_LOG_LINE, id));
        assert!(!bus.unsubscribe(TOPIC_LOG_LINE, id));
        assert_eq!(bus.listener_count(TOPIC_LOG_LINE), 0);

        bus.publish(TOPIC_LOG_LINE, &DeviceEvent::LogLine("late".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn multiple_listeners_all_fire() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(TOPIC_PACKET, counting_listener(hits.clone()));
        bus.subscribe(TOPIC_PACKET, counting_listener(hits.clone()));

        bus.publish(TOPIC_PACKET, &DeviceEvent::LogLine("x".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn publish_to_unknown_topic_is_noop() {
        let bus = EventBus::new();
        bus.publish("radio.never", &DeviceEvent::LogLine("x".into()));
    }

    #[test]
    fn event_text_accessor_covers_both_shapes() {
        let text = DeviceEvent::Text(TextEvent {
            source: 0x11223344,
            dest: None,
            channel: Some(0),
            content: "hello".into(),
        });
        assert_eq!(text.text(), "hello");
        assert_eq!(DeviceEvent::LogLine("raw".into()).text(), "raw");
    }
}
