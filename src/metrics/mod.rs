//! Prometheus counters for the broker and its clients
//!
//! Counters live in the crate [`REGISTRY`]. There is no HTTP endpoint here;
//! whoever embeds the crate serves [`gather_metrics`] however it likes.

use std::sync::Once;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::error;


lazy_static! {
    /// Frames handled, labelled by channel (`push`, `request`, `subscribe`)
    pub static ref MESSAGES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("treebus_messages_total", "Frames handled per channel"),
        &["channel"]
    )
    .expect("metric can not be created");

    /// Items evicted from a full ring buffer, labelled by buffer name
    pub static ref BUFFER_OVERFLOW_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("treebus_buffer_overflow_total", "Items evicted from full ring buffers"),
        &["buffer"]
    )
    .expect("metric can not be created");

    pub static ref MALFORMED_MESSAGES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("treebus_malformed_messages_total", "Undecodable or invalid frames dropped"),
        &["channel"]
    )
    .expect("metric can not be created");

    pub static ref RECONNECTS_TOTAL: IntCounter = IntCounter::new(
        "treebus_reconnects_total",
        "Client connection attempts after a failure"
    )
    .expect("metric can not be created");

    pub static ref SESSION_ROTATIONS_TOTAL: IntCounter = IntCounter::new(
        "treebus_session_rotations_total",
        "Session tokens generated by the server"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

fn register_custom_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(MESSAGES_TOTAL.clone()),
            Box::new(BUFFER_OVERFLOW_TOTAL.clone()),
            Box::new(MALFORMED_MESSAGES_TOTAL.clone()),
            Box::new(RECONNECTS_TOTAL.clone()),
            Box::new(SESSION_ROTATIONS_TOTAL.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                error!("collector can not be registered: {:?}", e);
            }
        }
    });
}

/// Text exposition of every treebus counter.
pub fn gather_metrics() -> String {
    register_custom_metrics();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}

pub(crate) fn get_current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
