//! OTLP metric reporter for training-progress gauges.
//!
//! Holds the latest parsed metric values and keeps one observable gauge per
//! metric registered with the OpenTelemetry SDK. Gauges are pull-based: the
//! periodic reader (or an explicit flush) invokes the registered callback,
//! which reads the shared value snapshot at sample time. The gauge set is
//! rebuilt only when the key set changes; value-only updates touch nothing
//! but the snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{
    AsyncInstrument as _, CallbackRegistration, Meter, MeterProvider as _, ObservableGauge,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::{Resource, runtime};
use opentelemetry_semantic_conventions as semconv;
use tracing::{info, warn};

use crate::config::Config;

/// Namespace prefix for every published gauge.
const METRIC_PREFIX: &str = "fl.training.";

/// OTel instrument names are capped at 255 characters.
const MAX_INSTRUMENT_NAME_LEN: usize = 255;

/// Latest metric values, shared with the observation callback.
type Snapshot = Arc<Mutex<HashMap<String, f64>>>;

/// Gauge handles and the single live callback registration.
struct Registry {
    gauges: HashMap<String, ObservableGauge<f64>>,
    registration: Option<Box<dyn CallbackRegistration>>,
    rebuilds: u64,
}

/// Publishes the latest training metrics as observable gauges over OTLP.
///
/// Lock order is registry before snapshot, never the reverse: the SDK invokes
/// observation callbacks (which take the snapshot lock) while holding its own
/// registration state, so revoking or registering a callback under the
/// snapshot lock could deadlock against a concurrent collection.
pub struct Reporter {
    provider: SdkMeterProvider,
    meter: Meter,
    snapshot: Snapshot,
    registry: Mutex<Registry>,
}

impl Reporter {
    /// Build a reporter pushing to the configured OTLP/gRPC endpoint on the
    /// configured interval.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let provider = opentelemetry_otlp::new_pipeline()
            .metrics(runtime::Tokio)
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(&config.endpoint),
            )
            .with_period(config.push_interval)
            .with_resource(build_resource(config))
            .build()
            .context("failed to build OTLP metric pipeline")?;

        info!(
            "Metric reporter ready, endpoint: {}, push interval: {:?}",
            config.endpoint, config.push_interval
        );
        Ok(Self::with_provider(provider))
    }

    /// Wrap an existing provider. Used by `new` and by tests that pair the
    /// reporter with an in-memory exporter.
    pub fn with_provider(provider: SdkMeterProvider) -> Self {
        let meter = provider.meter("fl-train-events");
        Self {
            provider,
            meter,
            snapshot: Arc::new(Mutex::new(HashMap::new())),
            registry: Mutex::new(Registry {
                gauges: HashMap::new(),
                registration: None,
                rebuilds: 0,
            }),
        }
    }

    /// Replace the stored metric snapshot wholesale. Keys absent from
    /// `new_metrics` are dropped and their gauges retired.
    ///
    /// The gauge set is rebuilt only when the key set differs from the
    /// currently registered instruments; value-only changes never re-register.
    pub fn update_metrics(&self, new_metrics: HashMap<String, f64>) {
        let mut registry = self.registry.lock().unwrap();

        let needs_rebuild = new_metrics.len() != registry.gauges.len()
            || new_metrics
                .keys()
                .any(|name| !registry.gauges.contains_key(name));

        *self.snapshot.lock().unwrap() = new_metrics;

        if needs_rebuild {
            info!("Metric set changed, re-registering observation callback");
            self.rebuild(&mut registry);
        }
    }

    /// Revoke the live callback registration (if any) and rebuild the gauge
    /// set from the current snapshot keys. Caller holds the registry lock.
    fn rebuild(&self, registry: &mut Registry) {
        registry.rebuilds += 1;

        if let Some(mut registration) = registry.registration.take() {
            // Non-fatal: proceeding without a confirmed revoke beats stalling
            // the metric flow, at the cost of a brief double-report window.
            if let Err(err) = registration.unregister() {
                warn!("Error unregistering observation callback: {err}");
            }
        }

        let names: Vec<String> = self.snapshot.lock().unwrap().keys().cloned().collect();

        registry.gauges = HashMap::with_capacity(names.len());
        let mut instruments = Vec::with_capacity(names.len());
        for name in names {
            if !valid_metric_name(&name) {
                warn!("Skipping metric with malformed name: {name:?}");
                continue;
            }
            match self
                .meter
                .f64_observable_gauge(format!("{METRIC_PREFIX}{name}"))
                .try_init()
            {
                Ok(gauge) => {
                    instruments.push(gauge.as_any());
                    registry.gauges.insert(name, gauge);
                }
                // Skipped keys are retried on the next rebuild, which the
                // key-set comparison forces as long as the gauge is missing.
                Err(err) => warn!("Error creating gauge for {name}: {err}"),
            }
        }

        if registry.gauges.is_empty() {
            return;
        }

        let snapshot = Arc::clone(&self.snapshot);
        let observed: Vec<(String, ObservableGauge<f64>)> = registry
            .gauges
            .iter()
            .map(|(name, gauge)| (name.clone(), gauge.clone()))
            .collect();

        let result = self.meter.register_callback(&instruments, move |observer| {
            let values = snapshot.lock().unwrap();
            for (name, gauge) in &observed {
                // A key can disappear between a snapshot replacement and the
                // next rebuild; such pairs are skipped, never reported stale.
                if let Some(value) = values.get(name) {
                    observer.observe_f64(gauge, *value, &[]);
                }
            }
        });

        match result {
            Ok(registration) => registry.registration = Some(registration),
            Err(err) => warn!("Error registering observation callback: {err}"),
        }
    }

    /// Sample and push all current metrics, abandoning the attempt if the
    /// deadline elapses before the collector acknowledges. Not retried here;
    /// retry policy belongs to the caller.
    pub async fn force_flush(&self, deadline: Duration) -> anyhow::Result<()> {
        let provider = self.provider.clone();
        let flush = tokio::task::spawn_blocking(move || provider.force_flush());

        match tokio::time::timeout(deadline, flush).await {
            Ok(joined) => {
                let result = joined.context("flush task panicked")?;
                result.context("metric flush failed")
            }
            Err(_) => anyhow::bail!("metric flush timed out after {deadline:?}"),
        }
    }

    /// Drain and release the exporter. Call once at process shutdown.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.provider
            .shutdown()
            .context("metric provider shutdown failed")
    }

    /// Number of gauge-set rebuilds since startup.
    pub fn rebuild_count(&self) -> u64 {
        self.registry.lock().unwrap().rebuilds
    }
}

/// Instrument-name rules: start alphabetic, then alphanumerics and `_.-/`,
/// within the overall length cap once prefixed.
fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'))
        && METRIC_PREFIX.len() + name.len() <= MAX_INSTRUMENT_NAME_LEN
}

fn build_resource(config: &Config) -> Resource {
    let mut attrs = vec![KeyValue::new(semconv::resource::SERVICE_NAME, "fl_sidecar")];
    if let Some(pod_name) = &config.pod_name {
        attrs.push(KeyValue::new(
            semconv::resource::K8S_POD_NAME,
            pod_name.clone(),
        ));
    }
    if let Some(namespace) = &config.pod_namespace {
        attrs.push(KeyValue::new(
            semconv::resource::K8S_NAMESPACE_NAME,
            namespace.clone(),
        ));
    }
    Resource::default().merge(&Resource::from_schema_url(attrs, semconv::SCHEMA_URL))
}
