//! Thin metrics wrappers, gated behind the `observability` feature so a
//! default build carries no Prometheus dependency. Call sites invoke these
//! helpers unconditionally; with the feature off they compile to no-ops.

#[cfg(feature = "observability")]
use metrics::{counter, histogram};

#[cfg(feature = "observability")]
pub fn init_prometheus_exporter(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}

#[cfg(not(feature = "observability"))]
pub fn init_prometheus_exporter(_addr: std::net::SocketAddr) -> anyhow::Result<()> {
    Ok(())
}

pub fn record_scheduler_tick(chain: &str, refreshed: usize, failed: usize) {
    #[cfg(feature = "observability")]
    {
        counter!("scheduler_pools_refreshed_total", "chain" => chain.to_string()).increment(refreshed as u64);
        counter!("scheduler_pools_failed_total", "chain" => chain.to_string()).increment(failed as u64);
    }
    #[cfg(not(feature = "observability"))]
    {
        let _ = (chain, refreshed, failed);
    }
}

pub fn record_discovery_result(chain: &str, pools_found: usize) {
    #[cfg(feature = "observability")]
    counter!("discovery_pools_found_total", "chain" => chain.to_string()).increment(pools_found as u64);
    #[cfg(not(feature = "observability"))]
    {
        let _ = (chain, pools_found);
    }
}

pub fn record_snapshot_request(chain: &str, window_size: usize) {
    #[cfg(feature = "observability")]
    histogram!("snapshot_window_size", "chain" => chain.to_string()).record(window_size as f64);
    #[cfg(not(feature = "observability"))]
    {
        let _ = (chain, window_size);
    }
}
