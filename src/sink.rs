//! Metrics sink: the gauges the exporter publishes.
//!
//! The router writes through the [`MetricsSink`] trait so it can be tested
//! without an exporter. [`PrometheusSink`] owns its own Prometheus recorder
//! instead of installing a process-wide one.

use crate::mac_address::MacAddress;
use metrics::{Key, KeyName, Label, Level, Metadata, Recorder, SharedString, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusRecorder};
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;

/// Gauge for the CO2 concentration, in ppm. Unlabeled.
pub const CO2_GAUGE: &str = "co2_ppm";

/// Per-thermometer gauges, labeled by `address` and `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceGauge {
    Temperature,
    Humidity,
    Rssi,
}

impl DeviceGauge {
    pub const ALL: [DeviceGauge; 3] = [
        DeviceGauge::Temperature,
        DeviceGauge::Humidity,
        DeviceGauge::Rssi,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            DeviceGauge::Temperature => "switchbot_temperature_celsius",
            DeviceGauge::Humidity => "switchbot_humidity_percent",
            DeviceGauge::Rssi => "switchbot_rssi",
        }
    }

    const fn description(self) -> &'static str {
        match self {
            DeviceGauge::Temperature => "SwitchBot temperature (Celsius)",
            DeviceGauge::Humidity => "SwitchBot relative humidity (%)",
            DeviceGauge::Rssi => "SwitchBot received signal strength (dBm)",
        }
    }

    const fn unit(self) -> Option<Unit> {
        match self {
            DeviceGauge::Humidity => Some(Unit::Percent),
            DeviceGauge::Temperature | DeviceGauge::Rssi => None,
        }
    }
}

/// Destination for telemetry values.
///
/// Every call is an independent set-by-key; implementations must tolerate
/// concurrent calls from different tasks. `f64::NAN` marks "no valid reading".
pub trait MetricsSink: Send + Sync {
    fn set_device_gauge(
        &self,
        gauge: DeviceGauge,
        address: &MacAddress,
        name: &str,
        value: f64,
    );

    fn set_co2(&self, value: f64);
}

/// Errors from setting up the metrics endpoint.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("failed to build metrics exporter: {0}")]
    Build(#[from] BuildError),
    #[error("metrics exporter stopped: {0}")]
    Exporter(String),
}

const METADATA: Metadata<'static> =
    Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

/// [`MetricsSink`] backed by a Prometheus recorder.
pub struct PrometheusSink {
    recorder: PrometheusRecorder,
}

impl PrometheusSink {
    /// Wrap a recorder and register the gauge descriptions.
    pub fn new(recorder: PrometheusRecorder) -> Self {
        for gauge in DeviceGauge::ALL {
            recorder.describe_gauge(
                KeyName::from(gauge.name()),
                gauge.unit(),
                SharedString::from(gauge.description()),
            );
        }
        recorder.describe_gauge(
            KeyName::from(CO2_GAUGE),
            None,
            SharedString::from("CO2 concentration (ppm)"),
        );
        PrometheusSink { recorder }
    }

    /// Build a sink whose metrics are served over HTTP on `addr`.
    ///
    /// The listener is bound immediately; the returned future serves scrapes
    /// and must be driven by the caller. Must be called from within a Tokio
    /// runtime.
    pub fn with_http_listener(
        addr: SocketAddr,
    ) -> Result<
        (
            Self,
            impl Future<Output = Result<(), MetricsError>> + Send + 'static,
        ),
        MetricsError,
    > {
        let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
        let serve = async move {
            exporter
                .await
                .map_err(|e| MetricsError::Exporter(format!("{e:?}")))
        };
        Ok((Self::new(recorder), serve))
    }

    /// Render the current metrics in the Prometheus text format.
    pub fn render(&self) -> String {
        self.recorder.handle().render()
    }
}

impl MetricsSink for PrometheusSink {
    fn set_device_gauge(
        &self,
        gauge: DeviceGauge,
        address: &MacAddress,
        name: &str,
        value: f64,
    ) {
        let labels = vec![
            Label::new("address", address.to_string()),
            Label::new("name", name.to_string()),
        ];
        let key = Key::from_parts(gauge.name(), labels);
        self.recorder.register_gauge(&key, &METADATA).set(value);
    }

    fn set_co2(&self, value: f64) {
        let key = Key::from_static_name(CO2_GAUGE);
        self.recorder.register_gauge(&key, &METADATA).set(value);
    }
}
