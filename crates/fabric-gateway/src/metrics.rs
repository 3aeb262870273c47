//! Process-local gateway metrics.
//!
//! Plain atomic counters rendered in Prometheus text exposition format at
//! `/mcp/metrics`. Trace-id propagation is the mandatory observability
//! primitive; these counters are best-effort operational sugar.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct GatewayMetrics {
    started_at: Instant,
    requests_total: AtomicU64,
    errors_total: AtomicU64,
    errors_by_code: DashMap<String, u64>,
    calls_by_name: DashMap<String, u64>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            errors_by_code: DashMap::new(),
            calls_by_name: DashMap::new(),
        }
    }

    pub fn record_request(&self, name: &str) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        *self.calls_by_name.entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn record_error(&self, code: &str) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        *self.errors_by_code.entry(code.to_string()).or_insert(0) += 1;
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# HELP fabric_requests_total Total calls handled by the pipeline\n");
        out.push_str("# TYPE fabric_requests_total counter\n");
        out.push_str(&format!(
            "fabric_requests_total {}\n",
            self.requests_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP fabric_errors_total Total failed calls\n");
        out.push_str("# TYPE fabric_errors_total counter\n");
        out.push_str(&format!(
            "fabric_errors_total {}\n",
            self.errors_total.load(Ordering::Relaxed)
        ));

        out.push_str("# HELP fabric_errors_by_code Failed calls by canonical error code\n");
        out.push_str("# TYPE fabric_errors_by_code counter\n");
        let mut codes: Vec<(String, u64)> = self
            .errors_by_code
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        codes.sort();
        for (code, count) in codes {
            out.push_str(&format!("fabric_errors_by_code{{code=\"{code}\"}} {count}\n"));
        }

        out.push_str("# HELP fabric_calls_by_name Calls by fabric.* name\n");
        out.push_str("# TYPE fabric_calls_by_name counter\n");
        let mut names: Vec<(String, u64)> = self
            .calls_by_name
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        names.sort();
        for (name, count) in names {
            out.push_str(&format!("fabric_calls_by_name{{name=\"{name}\"}} {count}\n"));
        }

        out.push_str("# HELP fabric_uptime_seconds Seconds since gateway start\n");
        out.push_str("# TYPE fabric_uptime_seconds gauge\n");
        out.push_str(&format!("fabric_uptime_seconds {}\n", self.uptime_seconds()));
        out
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}
