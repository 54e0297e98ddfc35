pub mod latency;
pub mod pipeline_metrics;

pub use latency::{LatencyTracker, MetricsSnapshot, LATENCY_WINDOW};
pub use pipeline_metrics::{FpsTracker, PipelineMetrics, PipelineStage};
