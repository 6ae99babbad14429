//! Prometheus metrics
//!
//! All metrics live in the default registry and are exposed by the server at
//! `GET /metrics` in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramVec,
    TextEncoder,
};

lazy_static! {
    /// User turns by outcome (finished, iteration_limit, cancelled, llm_error)
    pub static ref AGENT_TASKS: CounterVec = register_counter_vec!(
        "shellagent_agent_tasks_total",
        "User turns processed by the orchestration loop",
        &["outcome"]
    )
    .expect("metric can be registered");

    /// LLM calls made per user turn
    pub static ref AGENT_ITERATIONS: Histogram = register_histogram!(
        "shellagent_agent_iterations",
        "LLM calls made per user turn",
        vec![1.0, 2.0, 3.0, 5.0, 8.0, 10.0, 15.0, 20.0]
    )
    .expect("metric can be registered");

    pub static ref LLM_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "shellagent_llm_call_duration_seconds",
        "Latency of a single chat completion call",
        &["model"],
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    )
    .expect("metric can be registered");

    /// Tool calls by tool name and status (ok, error)
    pub static ref TOOL_CALLS: CounterVec = register_counter_vec!(
        "shellagent_tool_calls_total",
        "Tool calls dispatched by the executor",
        &["tool", "status"]
    )
    .expect("metric can be registered");

    /// Placeholder tool results synthesized while rendering a conversation
    pub static ref PAIRING_REPAIRS: Counter = register_counter!(
        "shellagent_pairing_repairs_total",
        "Missing tool responses replaced with placeholder results"
    )
    .expect("metric can be registered");

    pub static ref BACKGROUND_PROCESSES: Gauge = register_gauge!(
        "shellagent_background_processes",
        "Background processes currently registered with the supervisor"
    )
    .expect("metric can be registered");
}

/// Encode every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_text_includes_registered_metrics() {
        PAIRING_REPAIRS.inc();
        TOOL_CALLS.with_label_values(&["run_command", "ok"]).inc();

        let text = gather_text().unwrap();
        assert!(text.contains("shellagent_pairing_repairs_total"));
        assert!(text.contains("shellagent_tool_calls_total"));
    }
}
