//! Prometheus counters for the decision pipeline and the agent plane.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

pub static DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mfasrv_decisions_total",
        "Authentication decisions by outcome",
        &["decision"]
    )
    .expect("metric registration")
});

pub static CHALLENGES_ISSUED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mfasrv_challenges_issued_total",
        "Challenges issued to users"
    )
    .expect("metric registration")
});

pub static CHALLENGE_VERIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mfasrv_challenge_verifications_total",
        "Challenge verification attempts by outcome",
        &["outcome"]
    )
    .expect("metric registration")
});

pub static STREAM_SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "mfasrv_policy_stream_subscribers",
        "Agents currently subscribed to the policy stream"
    )
    .expect("metric registration")
});

pub static SESSIONS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("mfasrv_sessions_created_total", "Bearer sessions created")
        .expect("metric registration")
});

/// Render the default registry in the text exposition format.
pub fn render() -> String {
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buf) {
        tracing::warn!(error = %e, "metric encoding failed");
    }
    String::from_utf8(buf).unwrap_or_default()
}
