//! Prometheus metrics (spec.md §4.6's statistics, exposed the way the
//! teacher exposes its masking metrics): connection counts, admission
//! outcomes, and query throughput for the protocol core.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the process-wide Prometheus recorder and returns a handle a
/// management endpoint can render from.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_connection_opened() {
    counter!("hchdb_connections_total").increment(1);
    gauge!("hchdb_connections_active").increment(1.0);
}

pub fn record_connection_closed() {
    gauge!("hchdb_connections_active").decrement(1.0);
}

pub fn record_connection_rejected() {
    counter!("hchdb_connections_rejected_total").increment(1);
}

pub fn record_query_processed() {
    counter!("hchdb_queries_total").increment(1);
}

pub fn record_idle_timeout() {
    counter!("hchdb_idle_timeouts_total").increment(1);
}

pub fn set_max_connections(max: u32) {
    gauge!("hchdb_connections_max").set(max as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_calls_do_not_panic_without_a_recorder() {
        record_connection_opened();
        record_connection_closed();
        record_connection_rejected();
        record_query_processed();
        record_idle_timeout();
        set_max_connections(1000);
    }
}
