//! Prometheus metrics for the augmentation pipeline
//!
//! Tracks per-item outcomes of both stages and stage durations. Pipeline logic
//! never reads these back.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec,
    IntCounter, IntCounterVec,
};
use std::time::Duration;

/// Ingestion records by outcome (processed/skipped/failed)
static INGESTION_RECORDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "augmentation_ingestion_records_total",
        "Total storage events handled by the ingestion stage",
        &["outcome"]
    )
    .expect("failed to register augmentation_ingestion_records_total")
});

/// Transform tasks by outcome (processed/failed)
static TRANSFORM_TASKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "augmentation_transform_tasks_total",
        "Total fan-out tasks handled by the transform stage",
        &["outcome"]
    )
    .expect("failed to register augmentation_transform_tasks_total")
});

static TASKS_ENQUEUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "augmentation_tasks_enqueued_total",
        "Total fan-out tasks sent to the task queue"
    )
    .expect("failed to register augmentation_tasks_enqueued_total")
});

static STAGE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "augmentation_stage_duration_seconds",
        "Duration of one stage invocation over a batch",
        &["stage"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("failed to register augmentation_stage_duration_seconds")
});

pub fn record_ingestion_outcome(outcome: &str) {
    INGESTION_RECORDS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_transform_outcome(outcome: &str) {
    TRANSFORM_TASKS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_task_enqueued() {
    TASKS_ENQUEUED_TOTAL.inc();
}

pub fn record_stage_duration(stage: &str, duration: Duration) {
    STAGE_DURATION_SECONDS
        .with_label_values(&[stage])
        .observe(duration.as_secs_f64());
}
