use crate::advertisement::Advertisement;
use crate::mac_address::MacAddress;
use crate::sink::{DeviceGauge, MetricsSink};
use std::sync::Mutex;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Build a 13-byte thermometer payload with the given reading bytes at
/// offsets 10, 11 and 12.
pub fn thermometer_payload(tenths: u8, integer_and_sign: u8, humidity: u8) -> Vec<u8> {
    let mut payload = vec![0x69, 0x09, 0x4A, 0x5F, 0x10, 0x22, 0x03, 0x64, 0x00, 0x01];
    payload.extend_from_slice(&[tenths, integer_and_sign, humidity]);
    payload
}

/// Build an advertisement from `mac` carrying `manufacturer_data`.
pub fn advertisement(
    mac: MacAddress,
    rssi: Option<i16>,
    manufacturer_data: Vec<u8>,
) -> Advertisement {
    Advertisement {
        address: mac,
        rssi,
        manufacturer_data,
        local_name: None,
    }
}

/// One call made on a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Device {
        gauge: DeviceGauge,
        address: MacAddress,
        name: String,
        value: f64,
    },
    Co2(f64),
}

/// A [`MetricsSink`] that remembers every call, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn set_device_gauge(
        &self,
        gauge: DeviceGauge,
        address: &MacAddress,
        name: &str,
        value: f64,
    ) {
        self.calls.lock().unwrap().push(SinkCall::Device {
            gauge,
            address: *address,
            name: name.to_string(),
            value,
        });
    }

    fn set_co2(&self, value: f64) {
        self.calls.lock().unwrap().push(SinkCall::Co2(value));
    }
}
