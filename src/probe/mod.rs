//! # Send-and-Confirm Probe
//!
//! The one behavior this tool exists for: transmit a single tactical
//! quick-message control request and watch the device's event stream for the
//! firmware acknowledgement line.
//!
//! The firmware logs a fixed line when its phone API accepts the request;
//! depending on serial mode that line arrives either as a forwarded log
//! record or embedded in decoded text, so the watcher listens on both
//! topics. A shared atomic flag is set on the first match and the main flow
//! polls it cooperatively until the listen window expires.

use crate::events::{DeviceEvent, EventBus, Listener, SubscriptionId, TOPIC_LOG_LINE, TOPIC_PACKET};
use crate::protobuf::radio_generated as proto;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

/// Log line the firmware emits when the phone API accepts the request.
pub const FIRMWARE_ACK_SIGNATURE: &str = "PhoneAPI: Received SendTacticalMessageRequest";

/// Cooperative poll cadence while waiting for the acknowledgement.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default listen window after the request is sent.
pub const DEFAULT_LISTEN_SECONDS: u64 = 10;

/// Selection lists as baked into the firmware module. Display only; indices
/// outside the lists are sent anyway and shown without a label.
pub const CONTACT_LABELS: [&str; 9] = [
    "Inf", "Vec", "Obj", "FS", "LP/OP", "Comm", "FOB", "Friend", "Unkn",
];
pub const DISTANCE_LABELS: [&str; 9] = [
    "<25m", "25m", "50m", "100m", "150m", "200m", "300m", "400m", "500m",
];
pub const ORDER_LABELS: [&str; 9] = [
    "ENGAGE", "Observe", "Retreat", "Follow", "Mark", "Regroup", "Dig-in", "Spread out", "Hold",
];

fn label(list: &[&'static str], index: u32) -> Option<&'static str> {
    list.get(index as usize).copied()
}

/// The outbound request: one entry from each of the three selection lists.
/// Built once, sent once, discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TacticalRequest {
    pub contact: u32,
    pub distance: u32,
    pub order: u32,
}

impl TacticalRequest {
    /// Convert to the wire request. The three indices are carried unmodified.
    pub fn to_proto(self) -> proto::SendTacticalMessageRequest {
        proto::SendTacticalMessageRequest {
            contact_index: self.contact,
            distance_index: self.distance,
            order_index: self.order,
        }
    }

    /// Human-readable summary, labelled where the index is in range.
    pub fn describe(&self) -> String {
        fn part(name: &str, idx: u32, list: &[&'static str]) -> String {
            match label(list, idx) {
                Some(l) => format!("{}={} ({})", name, idx, l),
                None => format!("{}={}", name, idx),
            }
        }
        format!(
            "{} {} {}",
            part("contact", self.contact, &CONTACT_LABELS),
            part("distance", self.distance, &DISTANCE_LABELS),
            part("order", self.order, &ORDER_LABELS),
        )
    }
}

/// Watches both event topics for a text signature.
///
/// Register BEFORE the connection opens so no early event is missed. The
/// internal flag transitions false to true exactly once; later matches only
/// bump the match counter.
pub struct SignatureWatcher {
    bus: Arc<EventBus>,
    seen: Arc<AtomicBool>,
    matches: Arc<AtomicUsize>,
    subscriptions: Vec<(&'static str, SubscriptionId)>,
}

impl SignatureWatcher {
    pub fn register(bus: Arc<EventBus>, signature: &str) -> Self {
        let seen = Arc::new(AtomicBool::new(false));
        let matches = Arc::new(AtomicUsize::new(0));

        let sig = signature.to_string();
        let flag = seen.clone();
        let counter = matches.clone();
        let listener: Listener = Arc::new(move |topic: &str, event: &DeviceEvent| {
            if event.text().contains(&sig) {
                counter.fetch_add(1, Ordering::SeqCst);
                if !flag.swap(true, Ordering::SeqCst) {
                    info!("Target signature observed on topic '{}'", topic);
                }
            }
        });

        let subscriptions = vec![
            (TOPIC_PACKET, bus.subscribe(TOPIC_PACKET, listener.clone())),
            (TOPIC_LOG_LINE, bus.subscribe(TOPIC_LOG_LINE, listener)),
        ];
        info!(
            "Subscribed to event topics: {}, {}",
            TOPIC_PACKET, TOPIC_LOG_LINE
        );

        Self {
            bus,
            seen,
            matches,
            subscriptions,
        }
    }

    pub fn seen(&self) -> bool {
        self.seen.load(Ordering::SeqCst)
    }

    /// Total events whose text contained the signature.
    pub fn matches(&self) -> usize {
        self.matches.load(Ordering::SeqCst)
    }

    /// Poll the flag every [`POLL_INTERVAL`] until it is set or the window
    /// expires. Returns whether the signature was seen.
    pub async fn wait(&self, window: Duration) -> bool {
        let deadline = Instant::now() + window;
        while Instant::now() < deadline {
            if self.seen() {
                return true;
            }
            sleep(POLL_INTERVAL).await;
        }
        self.seen()
    }

    /// Remove both listeners. Idempotent; a failed removal on one topic does
    /// not prevent the other from being removed.
    pub fn detach(&mut self) {
        for (topic, id) in self.subscriptions.drain(..) {
            if !self.bus.unsubscribe(topic, id) {
                warn!("Listener on '{}' was already gone during detach", topic);
            }
        }
    }
}

impl Drop for SignatureWatcher {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Outcome of one probe run.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub request: TacticalRequest,
    pub found: bool,
    pub matches: usize,
    pub elapsed: Duration,
}

impl ProbeReport {
    pub fn summary_json(&self, window: Duration) -> serde_json::Value {
        serde_json::json!({
            "status": if self.found { "ok" } else { "timeout" },
            "signature": FIRMWARE_ACK_SIGNATURE,
            "signature_found": self.found,
            "matches": self.matches,
            "contact_index": self.request.contact,
            "distance_index": self.request.distance,
            "order_index": self.request.order,
            "elapsed_ms": self.elapsed.as_millis() as u64,
            "listen_window_seconds": window.as_secs(),
        })
    }
}
