use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, Histogram, IntCounterVec, TextEncoder, register_counter,
    register_histogram, register_int_counter_vec,
};

lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("travelnet_requests_total", "Total number of API requests").unwrap();
    pub static ref RATE_LIMITED: Counter =
        register_counter!("travelnet_rate_limited_total", "Requests rejected by the rate limiter").unwrap();
    pub static ref BLOCKED: Counter =
        register_counter!("travelnet_blocked_total", "Requests rejected from blocked clients").unwrap();
    pub static ref VALIDATION_FAILURES: Counter =
        register_counter!("travelnet_validation_failures_total", "Request bodies rejected by validation").unwrap();
    pub static ref COMMAND_LATENCY: Histogram = register_histogram!(
        "travelnet_command_latency_seconds",
        "External command latency in seconds"
    )
    .unwrap();
    pub static ref COMMAND_RESULTS: IntCounterVec = register_int_counter_vec!(
        "travelnet_commands_total",
        "External command invocations by program and outcome",
        &["program", "outcome"]
    )
    .unwrap();
}

// Prometheus text exposition of everything registered above
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
