use std::time::Duration;

use prometheus::{
    core::Collector, opts, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge,
    Registry, TextEncoder,
};

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    http_requests: IntCounterVec,
    http_latency: HistogramVec,
    asks_inflight: IntGauge,
    provider_calls: IntCounterVec,
}

/// Holds one slot of `gateway_inflight_requests` until dropped.
pub struct InflightGuard<'a> {
    metrics: &'a AppMetrics,
}

fn registered<C>(registry: &Registry, collector: C, name: &str) -> C
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .unwrap_or_else(|error| panic!("register {name}: {error}"));
    collector
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            opts!(
                "gateway_http_requests_total",
                "Requests answered by the ask API, by route and status"
            ),
            &["path", "method", "status", "stream"],
        )
        .expect("valid http_requests metric");
        let http_latency = HistogramVec::new(
            HistogramOpts::new(
                "gateway_http_request_duration_seconds",
                "Wall time from request accepted to response headers",
            ),
            &["path", "method", "stream"],
        )
        .expect("valid http_latency metric");
        let asks_inflight = IntGauge::new(
            "gateway_inflight_requests",
            "Ask requests currently waiting on a provider",
        )
        .expect("valid asks_inflight metric");
        let provider_calls = IntCounterVec::new(
            opts!(
                "gateway_calls_total",
                "Provider calls by provider and outcome"
            ),
            &["provider", "outcome"],
        )
        .expect("valid provider_calls metric");

        Self {
            http_requests: registered(&registry, http_requests, "gateway_http_requests_total"),
            http_latency: registered(
                &registry,
                http_latency,
                "gateway_http_request_duration_seconds",
            ),
            asks_inflight: registered(&registry, asks_inflight, "gateway_inflight_requests"),
            provider_calls: registered(&registry, provider_calls, "gateway_calls_total"),
            registry,
        }
    }

    pub fn inflight_guard(&self) -> InflightGuard<'_> {
        self.asks_inflight.inc();
        InflightGuard { metrics: self }
    }

    pub fn observe_request(
        &self,
        path: &str,
        method: &str,
        stream: bool,
        status: u16,
        duration: Duration,
    ) {
        let stream = if stream { "true" } else { "false" };
        self.http_requests
            .with_label_values(&[path, method, status.to_string().as_str(), stream])
            .inc();
        self.http_latency
            .with_label_values(&[path, method, stream])
            .observe(duration.as_secs_f64());
    }

    /// `outcome` is `ok` or a `GatewayError::kind` label.
    pub fn observe_call(&self, provider: &str, outcome: &str) {
        self.provider_calls
            .with_label_values(&[provider, outcome])
            .inc();
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.asks_inflight.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_output_contains_call_counter() {
        let metrics = AppMetrics::new();
        metrics.observe_call("deepseek", "ok");
        metrics.observe_call("spark", "timeout");

        let body = metrics.render().expect("render");
        assert!(body.contains(r#"gateway_calls_total{outcome="timeout",provider="spark"} 1"#));
    }

    #[test]
    fn streamed_requests_are_labelled() {
        let metrics = AppMetrics::new();
        metrics.observe_request("/v1/ask", "POST", true, 200, Duration::from_millis(5));

        let body = metrics.render().expect("render");
        assert!(body.contains(
            r#"gateway_http_requests_total{method="POST",path="/v1/ask",status="200",stream="true"} 1"#
        ));
    }

    #[test]
    fn inflight_guard_decrements_on_drop() {
        let metrics = AppMetrics::new();
        {
            let _guard = metrics.inflight_guard();
            assert_eq!(metrics.asks_inflight.get(), 1);
        }
        assert_eq!(metrics.asks_inflight.get(), 0);
    }
}
