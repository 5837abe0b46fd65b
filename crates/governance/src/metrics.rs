//! Prometheus metrics for the orchestration core.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use orchestra_core::{Error, Result};

/// Install the Prometheus recorder and return the render handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Task reached a terminal (or reviewing) state.
pub fn track_task(task_type: &str, status: &str) {
    metrics::counter!(
        "orchestra_tasks_total",
        "task_type" => task_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// One pipeline step finished.
pub fn track_step(step: &str, success: bool, duration_sec: f64) {
    let outcome = if success { "ok" } else { "error" };
    metrics::counter!("orchestra_pipeline_steps_total", "step" => step.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!("orchestra_pipeline_step_duration_seconds", "step" => step.to_string())
        .record(duration_sec);
}

/// Token usage and cost for one LLM call.
pub fn track_tokens(model: &str, prompt: u64, completion: u64, cost: f64) {
    metrics::counter!("llm_token_usage_total", "model" => model.to_string(), "type" => "prompt")
        .increment(prompt);
    metrics::counter!("llm_token_usage_total", "model" => model.to_string(), "type" => "completion")
        .increment(completion);
    metrics::histogram!("llm_call_cost_usd", "model" => model.to_string()).record(cost);
}

pub fn track_skill_call(skill: &str, status: &str, latency_sec: f64) {
    metrics::counter!(
        "orchestra_skill_calls_total",
        "skill" => skill.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("orchestra_skill_call_duration_seconds", "skill" => skill.to_string())
        .record(latency_sec);
}

pub fn track_validation(accepted: usize, rejected: usize, duplicates: usize) {
    metrics::counter!("orchestra_entities_validated_total", "result" => "accepted").increment(accepted as u64);
    metrics::counter!("orchestra_entities_validated_total", "result" => "rejected").increment(rejected as u64);
    metrics::counter!("orchestra_entities_validated_total", "result" => "duplicate").increment(duplicates as u64);
}

/// HTTP request count and latency, recorded by the gateway middleware.
pub fn track_request(method: &str, path: &str, status: u16, latency_sec: f64) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(latency_sec);
}
