use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tracing::error;


lazy_static! {
    pub static ref WATCH_NOTIFICATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("watch_notifications", "Watch notifications delivered to handlers"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref DROPPED_NOTIFICATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "dropped_notifications",
            "Watch notifications discarded while the session was not connected"
        ),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref UPDATE_CONFLICTS: IntCounterVec = IntCounterVec::new(
        Opts::new("update_conflicts", "Version conflicts retried by structured record updates"),
        &["record"]
    )
    .expect("metric can not be created");

    pub static ref UPDATE_COMMITS: IntCounterVec = IntCounterVec::new(
        Opts::new("update_commits", "Structured record updates committed"),
        &["record"]
    )
    .expect("metric can not be created");

    pub static ref SESSION_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("session_events", "Session state transitions observed by the coordinator"),
        &["state"]
    )
    .expect("metric can not be created");

    pub static ref LOADED_ENTITIES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("loaded_entities", "Entities currently cached by watched collections"),
        &["collection"]
    )
    .expect("metric can not be created");
}

pub fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(WATCH_NOTIFICATIONS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(DROPPED_NOTIFICATIONS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(UPDATE_CONFLICTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(UPDATE_COMMITS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(SESSION_EVENTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LOADED_ENTITIES.clone()))
        .expect("collector can be registered");
}

/// Renders every metric in `registry` in the Prometheus text exposition format.
pub fn encode_metrics(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
