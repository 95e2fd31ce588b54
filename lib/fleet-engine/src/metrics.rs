//! Prometheus metrics for fleet reconciliation

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Metrics shared by every reconciler of the process
#[derive(Clone)]
pub struct FleetMetrics {
    /// Reconcile passes by parent kind and result
    pub reconcile_total: CounterVec,
    /// Duration of reconcile passes in seconds
    pub reconcile_duration_seconds: HistogramVec,
    /// Replicas requested per fleet
    pub desired_replicas: GaugeVec,
    /// Replicas reporting READY per fleet
    pub ready_replicas: GaugeVec,
    /// Create-before-destroy cycles started per fleet
    pub rollouts_total: CounterVec,
    /// Dependent record operations by kind and operation
    pub resource_operations_total: CounterVec,
    pub registry: Arc<Registry>,
}

impl FleetMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let reconcile_total = CounterVec::new(
            Opts::new("fleet_reconcile_total", "Total fleet reconcile passes"),
            &["kind", "result"],
        )?;

        let reconcile_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "fleet_reconcile_duration_seconds",
                "Fleet reconcile pass duration in seconds",
            )
            .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 1200.0, 3600.0]),
            &["kind"],
        )?;

        let desired_replicas = GaugeVec::new(
            Opts::new("fleet_desired_replicas", "Replicas requested by the fleet spec"),
            &["fleet"],
        )?;

        let ready_replicas = GaugeVec::new(
            Opts::new("fleet_ready_replicas", "Replicas whose server is ready"),
            &["fleet"],
        )?;

        let rollouts_total = CounterVec::new(
            Opts::new("fleet_rollouts_total", "Create-before-destroy replacements started"),
            &["fleet"],
        )?;

        let resource_operations_total = CounterVec::new(
            Opts::new(
                "fleet_resource_operations_total",
                "Dependent record operations submitted",
            ),
            &["kind", "operation"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_duration_seconds.clone()))?;
        registry.register(Box::new(desired_replicas.clone()))?;
        registry.register(Box::new(ready_replicas.clone()))?;
        registry.register(Box::new(rollouts_total.clone()))?;
        registry.register(Box::new(resource_operations_total.clone()))?;

        Ok(Self {
            reconcile_total,
            reconcile_duration_seconds,
            desired_replicas,
            ready_replicas,
            rollouts_total,
            resource_operations_total,
            registry,
        })
    }

    pub fn record_reconcile(&self, kind: &str, success: bool, elapsed: Duration) {
        let result = if success { "success" } else { "error" };
        self.reconcile_total.with_label_values(&[kind, result]).inc();
        self.reconcile_duration_seconds
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_replicas(&self, fleet: &str, desired: u32, ready: u32) {
        self.desired_replicas
            .with_label_values(&[fleet])
            .set(desired as f64);
        self.ready_replicas.with_label_values(&[fleet]).set(ready as f64);
    }

    pub fn record_rollout(&self, fleet: &str) {
        self.rollouts_total.with_label_values(&[fleet]).inc();
    }

    pub fn record_operation(&self, kind: &str, operation: &str) {
        self.resource_operations_total
            .with_label_values(&[kind, operation])
            .inc();
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
