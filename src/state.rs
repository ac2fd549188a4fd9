//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every call actor through
//! `web::Data<AppState>`.
//!
//! ## Sharing model:
//! - **config**: `Arc<AppConfig>`, built once at startup and never mutated
//! - **metrics**: `Arc<RwLock<AppMetrics>>`, the only mutable state shared between calls
//! - **start_time**: `Instant`, copied as is
//!
//! Calls never share anything else. A lock is held only for the few
//! increments below, never across an `.await` or a socket write.

use crate::config::AppConfig;
use crate::session::SessionStats;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Immutable application configuration
    pub config: Arc<AppConfig>,

    /// Request and call counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all requests and calls.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of error responses since server start
    pub error_count: u64,

    /// Calls currently bridged
    pub active_calls: u32,

    /// Calls admitted since server start
    pub total_calls: u64,

    /// Upgrades refused because the call limit was reached
    pub rejected_calls: u64,

    /// Outbound telephony media frames, summed over finished calls
    pub frames_sent: u64,

    /// Caller chunks forwarded to the model, summed over finished calls
    pub caller_chunks_forwarded: u64,

    /// Audio chunks dropped, summed over finished calls
    pub dropped_chunks: u64,

    /// Completed model responses, summed over finished calls
    pub responses: u64,

    /// Per-endpoint statistics keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed metrics for one HTTP endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Cumulative time spent processing requests (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // A poisoned lock only means another thread panicked mid-increment;
    // the counters are still usable.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|e| e.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## Parameters:
    /// - **endpoint**: The API endpoint (e.g., "GET /health")
    /// - **duration_ms**: How long the request took to process
    /// - **is_error**: Whether this request resulted in an error
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Admit a new call if the configured limit allows it.
    ///
    /// Check and increment happen under one write lock, so two upgrades
    /// racing for the last slot cannot both succeed.
    pub fn try_admit_call(&self) -> bool {
        let limit = self.config.bridge.max_concurrent_calls;
        let mut metrics = self.metrics_write();
        if metrics.active_calls as usize >= limit {
            metrics.rejected_calls += 1;
            return false;
        }
        metrics.active_calls += 1;
        metrics.total_calls += 1;
        true
    }

    /// Release a call slot and fold its counters into the totals.
    pub fn call_ended(&self, stats: &SessionStats) {
        let mut metrics = self.metrics_write();
        metrics.active_calls = metrics.active_calls.saturating_sub(1);
        metrics.frames_sent += stats.frames_sent;
        metrics.caller_chunks_forwarded += stats.caller_chunks_forwarded;
        metrics.dropped_chunks += stats.dropped_chunks;
        metrics.responses += stats.responses;
    }

    /// Consistent copy of the metrics, taken without holding the lock afterwards.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    /// Average = Total Duration ÷ Number of Requests
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
