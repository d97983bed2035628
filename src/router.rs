//! Routes decoded readings from both sensor types into the metrics sink.
//!
//! Failures never leave a stale value behind: an undecodable advertisement from
//! a configured thermometer, or a failed CO2 read, publishes NaN for the
//! affected series so dashboards show a gap.

use crate::advertisement::{self, Advertisement};
use crate::roster::Roster;
use crate::serial::SerialError;
use crate::sink::{DeviceGauge, MetricsSink};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct TelemetryRouter {
    roster: Roster,
    sink: Arc<dyn MetricsSink>,
}

impl TelemetryRouter {
    pub fn new(roster: Roster, sink: Arc<dyn MetricsSink>) -> Self {
        TelemetryRouter { roster, sink }
    }

    /// Publish the reading carried by one advertisement.
    ///
    /// Advertisements from devices missing from the roster are ignored
    /// without decoding or touching the sink.
    pub fn handle_advertisement(&self, adv: &Advertisement) {
        let address = &adv.address;
        let Some(name) = self.roster.name(address) else {
            debug!(%address, local_name = ?adv.local_name, "ignoring unlisted device");
            return;
        };
        debug!(%address, name, "device detected");

        let rssi = adv.rssi.map_or(f64::NAN, f64::from);
        match advertisement::decode(&adv.manufacturer_data) {
            Ok(reading) => {
                info!(
                    %address,
                    name,
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    rssi = ?adv.rssi,
                    "thermometer reading"
                );
                let humidity = f64::from(reading.humidity);
                self.publish(adv, name, reading.temperature, humidity, rssi);
            }
            Err(reason) => {
                warn!(
                    %address,
                    name,
                    %reason,
                    data = ?adv.manufacturer_data,
                    "advertisement carries no thermometer reading"
                );
                self.publish(adv, name, f64::NAN, f64::NAN, f64::NAN);
            }
        }
    }

    fn publish(
        &self,
        adv: &Advertisement,
        name: &str,
        temperature: f64,
        humidity: f64,
        rssi: f64,
    ) {
        let values = [
            (DeviceGauge::Temperature, temperature),
            (DeviceGauge::Humidity, humidity),
            (DeviceGauge::Rssi, rssi),
        ];
        for (gauge, value) in values {
            self.sink.set_device_gauge(gauge, &adv.address, name, value);
        }
    }

    /// Publish the outcome of one CO2 read.
    pub fn record_co2(&self, result: &Result<u16, SerialError>) {
        match result {
            Ok(ppm) => {
                info!(co2 = ppm, "CO2 reading");
                self.sink.set_co2(f64::from(*ppm));
            }
            Err(e) => {
                error!(error = %e, "failed to read CO2 concentration");
                self.sink.set_co2(f64::NAN);
            }
        }
    }

    /// Mark the CO2 series as unknown, e.g. when the sensor is unreachable.
    pub fn clear_co2(&self) {
        self.sink.set_co2(f64::NAN);
    }
}
