//! # Metrics Collection Module

pub mod handler;

/// Initializes the metrics exporter.
///
/// Installs the global Prometheus recorder and keeps a handle for the
/// `/metrics` exposition endpoint. A background task runs periodic upkeep
/// for histograms and summaries.
///
/// # Feature Requirements
/// Requires the `prometheus` feature; a no-op otherwise.
pub fn init() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        use tracing::debug;
        debug!("Prometheus metrics endpoint is enabled");
        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            crate::metrics::handler::set_prom_handle(handle.clone());
            use std::time::Duration;
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    handle.run_upkeep();
                }
            });
        }
    }
}

/// Records a handled user-traffic request by mode and outcome.
///
/// Outcomes are coarse: `ok`, `unauthorized`, `redirect`, `error`.
pub fn record_request(mode: &str, outcome: &str) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!(
            "elastauth_requests_total",
            "mode" => mode.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (mode, outcome);
    }
}

/// Records a credential cache lookup result (`hit` or `miss`).
pub fn record_credential_cache(result: &str) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!(
            "elastauth_credential_cache_total",
            "result" => result.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = result;
    }
}

/// Records a completed Elasticsearch user provisioning.
pub fn record_user_provisioned() {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!("elastauth_users_provisioned_total").increment(1);
    }
}

/// Records a cache fault absorbed in degraded mode.
pub fn record_cache_degraded() {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!("elastauth_cache_degraded_total").increment(1);
    }
}

/// Records a proxied request's upstream status class and latency.
///
/// # Arguments
/// * `status` - HTTP status returned to the client
/// * `latency_ms` - Time between accepting the request and the upstream
///   response head
pub fn record_proxy(status: u16, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        let class = format!("{}xx", status / 100);
        counter!(
            "elastauth_proxy_responses_total",
            "class" => class
        )
        .increment(1);
        histogram!("elastauth_proxy_latency_ms").record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (status, latency_ms);
    }
}
